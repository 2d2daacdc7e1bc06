//! Acquisition sequencer
//!
//! Arms the offset/auxiliary and current conversion sequences on the period
//! timer once, then exposes the settled readings of every logical channel. The
//! hardware free-runs; software only reads result slots and consumes the
//! completion event raised at the end of the current sequence.

pub mod plan;

pub use plan::{
    Channel, Sequence, SequenceEntry, SequenceId, TriggerEdge, TriggerTiming, CURRENT_SEQUENCE,
    OFFSET_SEQUENCE,
};

/// Conversion hardware driven by the period timer
///
/// Implementations own the register access. Results are never buffered: each
/// conversion overwrites the previous value of its slot.
pub trait AdcSequencer {
    /// Program the timer compare that starts `sequence`
    fn configure_trigger(&mut self, sequence: SequenceId, count: u32, edge: TriggerEdge);

    /// Program the entries of `sequence`
    fn arm_sequence(&mut self, sequence: &Sequence);

    /// Enable the converters, after which both sequences free-run
    fn start(&mut self);

    /// Latest raw value of a result slot
    fn read_result(&self, slot: u8) -> u16;

    /// Consume the completion event of the current sequence
    ///
    /// Returns `true` once per completed sequence and clears the event.
    fn take_completion(&mut self) -> bool;
}

/// Settled readings of one control period, in ADC counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawReadings {
    /// Zero reference of the sense front end
    pub zero_reference: u16,
    /// Temperature proxy
    pub temperature: u16,
    /// Phase A/B/C taken at the start of the period
    pub offset: [u16; 3],
    /// Phase A/B/C taken near mid period
    pub current: [u16; 3],
}

/// Owns the conversion hardware and its timing
pub struct Sequencer<H> {
    hw: H,
    timing: TriggerTiming,
    armed: bool,
}

impl<H: AdcSequencer> Sequencer<H> {
    /// Create a sequencer; nothing is programmed until [`Sequencer::init`]
    pub fn new(hw: H, timing: TriggerTiming) -> Self {
        Self {
            hw,
            timing,
            armed: false,
        }
    }

    /// Configure both triggers, arm both sequences and start the hardware
    pub fn init(&mut self) {
        info!(
            "Arming acquisition: offset trigger at {}, current trigger at {}",
            self.timing.offset_count, self.timing.current_count
        );

        for sequence in [&OFFSET_SEQUENCE, &CURRENT_SEQUENCE] {
            self.hw.configure_trigger(
                sequence.id,
                self.timing.count_for(sequence.id),
                self.timing.edge,
            );
            self.hw.arm_sequence(sequence);
        }

        self.hw.start();
        self.armed = true;
    }

    /// Whether [`Sequencer::init`] has run
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Trigger timing in use
    pub fn get_timing(&self) -> TriggerTiming {
        self.timing
    }

    /// Snapshot of the settled slot of every logical channel
    pub fn readings(&self) -> RawReadings {
        RawReadings {
            zero_reference: self.settled(&OFFSET_SEQUENCE, Channel::ZeroReference),
            temperature: self.settled(&OFFSET_SEQUENCE, Channel::Temperature),
            offset: [
                self.settled(&OFFSET_SEQUENCE, Channel::PhaseA),
                self.settled(&OFFSET_SEQUENCE, Channel::PhaseB),
                self.settled(&OFFSET_SEQUENCE, Channel::PhaseC),
            ],
            current: [
                self.settled(&CURRENT_SEQUENCE, Channel::PhaseA),
                self.settled(&CURRENT_SEQUENCE, Channel::PhaseB),
                self.settled(&CURRENT_SEQUENCE, Channel::PhaseC),
            ],
        }
    }

    /// Readings of the period that just completed, once per completion event
    pub fn poll_complete(&mut self) -> Option<RawReadings> {
        if self.hw.take_completion() {
            Some(self.readings())
        } else {
            None
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    fn settled(&self, sequence: &Sequence, channel: Channel) -> u16 {
        sequence
            .settled_slot(channel)
            .map(|slot| self.hw.read_result(slot))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::params::trigger::RESULT_SLOTS;

    /// Records programming calls and serves fixed slot values
    struct RecordingAdc {
        slots: [u16; RESULT_SLOTS],
        triggers: [(u32, Option<TriggerEdge>); 2],
        armed: [usize; 2],
        started: bool,
        pending: bool,
    }

    impl RecordingAdc {
        fn new() -> Self {
            let mut slots = [0u16; RESULT_SLOTS];
            for (i, slot) in slots.iter_mut().enumerate() {
                *slot = 1000 + i as u16;
            }
            Self {
                slots,
                triggers: [(0, None); 2],
                armed: [0; 2],
                started: false,
                pending: false,
            }
        }

        fn index(sequence: SequenceId) -> usize {
            match sequence {
                SequenceId::OffsetAux => 0,
                SequenceId::Current => 1,
            }
        }
    }

    impl AdcSequencer for RecordingAdc {
        fn configure_trigger(&mut self, sequence: SequenceId, count: u32, edge: TriggerEdge) {
            self.triggers[Self::index(sequence)] = (count, Some(edge));
        }

        fn arm_sequence(&mut self, sequence: &Sequence) {
            self.armed[Self::index(sequence.id)] = sequence.entries().count();
        }

        fn start(&mut self) {
            self.started = true;
        }

        fn read_result(&self, slot: u8) -> u16 {
            self.slots[slot as usize]
        }

        fn take_completion(&mut self) -> bool {
            core::mem::replace(&mut self.pending, false)
        }
    }

    #[test]
    fn test_init_programs_both_sequences() {
        let mut sequencer = Sequencer::new(
            RecordingAdc::new(),
            TriggerTiming::new(170_000_000, 20_000),
        );
        assert!(!sequencer.is_armed());

        sequencer.init();

        let hw = sequencer.hw();
        assert!(sequencer.is_armed());
        assert!(hw.started);
        assert_eq!(hw.triggers[0], (1, Some(TriggerEdge::Rising)));
        assert_eq!(hw.triggers[1], (4248, Some(TriggerEdge::Rising)));
        assert_eq!(hw.armed, [11, 7]);
    }

    #[test]
    fn test_readings_use_settled_slots() {
        let sequencer = Sequencer::new(
            RecordingAdc::new(),
            TriggerTiming::new(170_000_000, 20_000),
        );
        let raw = sequencer.readings();

        assert_eq!(raw.zero_reference, 1002);
        assert_eq!(raw.temperature, 1004);
        assert_eq!(raw.offset, [1006, 1008, 1010]);
        assert_eq!(raw.current, [1014, 1016, 1018]);
    }

    #[test]
    fn test_completion_is_edge_triggered() {
        let mut sequencer = Sequencer::new(
            RecordingAdc::new(),
            TriggerTiming::new(170_000_000, 20_000),
        );
        assert!(sequencer.poll_complete().is_none());

        sequencer.hw_mut().pending = true;
        assert!(sequencer.poll_complete().is_some());
        assert!(sequencer.poll_complete().is_none());
    }
}
