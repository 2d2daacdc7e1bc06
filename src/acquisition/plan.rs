//! Conversion sequence layout and trigger timing
//!
//! Every channel is converted twice in a row. The first conversion lets the
//! front end settle and is discarded, the second one is the reading that is
//! consumed. Results land one slot after the entry that selected the channel,
//! so the settled sample of the channel at position `i` of a sequence whose
//! first entry sits at slot `s` is found at slot `s + 2i + 2`.

use crate::config::params::trigger;

/// Logical analog input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Zero reference of the sense front end
    ZeroReference,
    /// Temperature proxy (internal sensor)
    Temperature,
    /// Phase A shunt
    PhaseA,
    /// Phase B shunt
    PhaseB,
    /// Phase C shunt
    PhaseC,
}

/// The two hardware sequences run every control period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceId {
    /// Start of period: zero reference, temperature, phase offsets
    OffsetAux,
    /// Near mid period: phase currents, raises the completion interrupt
    Current,
}

/// Trigger edge of the period timer compare event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    Rising,
    Falling,
}

/// One entry of a hardware sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceEntry {
    /// Result slot programmed for this entry
    pub slot: u8,
    /// Channel selected by this entry, `None` for the terminating entry
    pub channel: Option<Channel>,
    /// Raise the completion interrupt when this entry finishes
    pub irq: bool,
    /// Last entry of the sequence
    pub end: bool,
}

/// Static description of a double-sampled conversion sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub id: SequenceId,
    /// Slot of the first entry
    pub first_slot: u8,
    /// Channels in conversion order, each converted twice
    pub channels: &'static [Channel],
    /// Raise the completion interrupt on the terminating entry
    pub irq_on_end: bool,
}

/// Offset/auxiliary sequence, triggered at the start of the period
pub const OFFSET_SEQUENCE: Sequence = Sequence {
    id: SequenceId::OffsetAux,
    first_slot: trigger::OFFSET_FIRST_SLOT,
    channels: &[
        Channel::ZeroReference,
        Channel::Temperature,
        Channel::PhaseA,
        Channel::PhaseB,
        Channel::PhaseC,
    ],
    irq_on_end: false,
};

/// Current sequence, triggered just before mid period
pub const CURRENT_SEQUENCE: Sequence = Sequence {
    id: SequenceId::Current,
    first_slot: trigger::CURRENT_FIRST_SLOT,
    channels: &[Channel::PhaseA, Channel::PhaseB, Channel::PhaseC],
    irq_on_end: true,
};

impl Sequence {
    /// Number of entries including the terminating one
    pub const fn len(&self) -> usize {
        self.channels.len() * 2 + 1
    }

    /// Number of conversions (terminating entry excluded)
    pub const fn conversions(&self) -> usize {
        self.channels.len() * 2
    }

    /// Entry at `index`, `None` past the terminating entry
    pub fn entry(&self, index: usize) -> Option<SequenceEntry> {
        if index > self.conversions() {
            return None;
        }
        // In range: the slot fits the result bank
        let slot = self.first_slot + index as u8;
        if index < self.conversions() {
            Some(SequenceEntry {
                slot,
                channel: Some(self.channels[index / 2]),
                irq: false,
                end: false,
            })
        } else {
            Some(SequenceEntry {
                slot,
                channel: None,
                irq: self.irq_on_end,
                end: true,
            })
        }
    }

    /// All entries in programming order
    pub fn entries(&self) -> impl Iterator<Item = SequenceEntry> + '_ {
        (0..self.len()).filter_map(move |i| self.entry(i))
    }

    /// Slot holding the settled (second) sample of `channel`
    pub fn settled_slot(&self, channel: Channel) -> Option<u8> {
        self.channels
            .iter()
            .position(|&c| c == channel)
            .map(|i| self.first_slot + 2 * i as u8 + 2)
    }

    /// Last slot written by this sequence
    pub const fn last_slot(&self) -> u8 {
        self.first_slot + self.conversions() as u8
    }
}

/// Compare values of the period timer that start both sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerTiming {
    /// Timer count of the offset/auxiliary trigger
    pub offset_count: u32,
    /// Timer count of the current trigger
    pub current_count: u32,
    /// Edge both triggers fire on
    pub edge: TriggerEdge,
}

impl TriggerTiming {
    /// Derive trigger counts from the timer clock and the PWM frequency
    ///
    /// The current sequence fires `CURRENT_GUARD_COUNTS` before the half
    /// period so the conversions complete inside the stable conduction window.
    pub const fn new(timer_freq_hz: u32, pwm_freq_hz: u32) -> Self {
        let half_period = timer_freq_hz / 2 / pwm_freq_hz;
        Self {
            offset_count: trigger::OFFSET_COUNT,
            current_count: half_period.saturating_sub(trigger::CURRENT_GUARD_COUNTS),
            edge: TriggerEdge::Rising,
        }
    }

    /// Compare value for `sequence`
    pub fn count_for(&self, sequence: SequenceId) -> u32 {
        match sequence {
            SequenceId::OffsetAux => self.offset_count,
            SequenceId::Current => self.current_count,
        }
    }
}

// Both sequences must fit into the result slot bank without overlapping
const _: () = {
    assert!((OFFSET_SEQUENCE.last_slot() as usize) < trigger::RESULT_SLOTS);
    assert!((CURRENT_SEQUENCE.last_slot() as usize) < trigger::RESULT_SLOTS);
    assert!(OFFSET_SEQUENCE.last_slot() < CURRENT_SEQUENCE.first_slot);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_sequence_layout() {
        assert_eq!(OFFSET_SEQUENCE.len(), 11);
        let entries: [Option<SequenceEntry>; 3] = [
            OFFSET_SEQUENCE.entry(0),
            OFFSET_SEQUENCE.entry(1),
            OFFSET_SEQUENCE.entry(2),
        ];
        assert_eq!(entries[0].unwrap().channel, Some(Channel::ZeroReference));
        assert_eq!(entries[1].unwrap().channel, Some(Channel::ZeroReference));
        assert_eq!(entries[2].unwrap().channel, Some(Channel::Temperature));

        let last = OFFSET_SEQUENCE.entry(10).unwrap();
        assert_eq!(last.slot, 10);
        assert!(last.end);
        assert!(!last.irq);
        assert_eq!(last.channel, None);
        assert!(OFFSET_SEQUENCE.entry(11).is_none());
    }

    #[test]
    fn test_current_sequence_interrupts_on_last_entry() {
        let irq_entries = CURRENT_SEQUENCE.entries().filter(|e| e.irq).count();
        assert_eq!(irq_entries, 1);

        let last = CURRENT_SEQUENCE.entry(6).unwrap();
        assert_eq!(last.slot, 18);
        assert!(last.irq);
        assert!(last.end);
    }

    #[test]
    fn test_entry_far_past_end() {
        // 12 + 250 does not fit a slot number
        assert!(CURRENT_SEQUENCE.entry(7).is_none());
        assert!(CURRENT_SEQUENCE.entry(250).is_none());
        assert!(OFFSET_SEQUENCE.entry(usize::MAX).is_none());
    }

    #[test]
    fn test_settled_slots() {
        assert_eq!(OFFSET_SEQUENCE.settled_slot(Channel::ZeroReference), Some(2));
        assert_eq!(OFFSET_SEQUENCE.settled_slot(Channel::Temperature), Some(4));
        assert_eq!(OFFSET_SEQUENCE.settled_slot(Channel::PhaseA), Some(6));
        assert_eq!(OFFSET_SEQUENCE.settled_slot(Channel::PhaseB), Some(8));
        assert_eq!(OFFSET_SEQUENCE.settled_slot(Channel::PhaseC), Some(10));

        assert_eq!(CURRENT_SEQUENCE.settled_slot(Channel::PhaseA), Some(14));
        assert_eq!(CURRENT_SEQUENCE.settled_slot(Channel::PhaseB), Some(16));
        assert_eq!(CURRENT_SEQUENCE.settled_slot(Channel::PhaseC), Some(18));
        assert_eq!(CURRENT_SEQUENCE.settled_slot(Channel::Temperature), None);
    }

    #[test]
    fn test_trigger_timing() {
        // 170MHz / 2 / 20kHz = 4250 counts per half period
        let timing = TriggerTiming::new(170_000_000, 20_000);
        assert_eq!(timing.offset_count, 1);
        assert_eq!(timing.current_count, 4248);
        assert_eq!(timing.edge, TriggerEdge::Rising);
        assert_eq!(timing.count_for(SequenceId::Current), 4248);
        assert_eq!(timing.count_for(SequenceId::OffsetAux), 1);
    }
}
