//! Host run of the full measurement path: simulated conversion hardware,
//! sequencer, current pipeline, sector decoder and publication.

use std::cell::Cell;

use g4_acquisition::acquisition::{
    AdcSequencer, Channel, Sequence, SequenceId, Sequencer, TriggerEdge, TriggerTiming,
    CURRENT_SEQUENCE, OFFSET_SEQUENCE,
};
use g4_acquisition::config::params::{
    shunt, trigger::RESULT_SLOTS, PWM_FREQ_HZ, PWM_PERIOD_S, TIMER_FREQ_HZ,
};
use g4_acquisition::config::{Crc32, StoredConfig};
use g4_acquisition::current_sense::{AcquisitionConfig, ControlMode, CurrentSense, CurrentState};
use g4_acquisition::hall::{HallConfig, HallDecoder, HallState, SectorInput};
use g4_acquisition::state::Published;
use g4_acquisition::temperature::FactoryReference;

const MID_SCALE: u16 = 2048;
const TEMPERATURE_REFERENCE: u16 = 1500;

/// Result slots written directly by the test
struct SimulatedAdc {
    slots: [u16; RESULT_SLOTS],
    pending: bool,
    started: bool,
}

impl SimulatedAdc {
    fn new() -> Self {
        Self {
            // Anything the sequencer must not read stays at full scale
            slots: [4095; RESULT_SLOTS],
            pending: false,
            started: false,
        }
    }

    fn put(&mut self, sequence: &Sequence, channel: Channel, value: u16) {
        let slot = sequence.settled_slot(channel).unwrap();
        self.slots[slot as usize] = value;
    }

    /// One period worth of conversions followed by the completion event
    fn convert(&mut self, offset: [u16; 3], current: [u16; 3]) {
        self.put(&OFFSET_SEQUENCE, Channel::ZeroReference, MID_SCALE);
        self.put(&OFFSET_SEQUENCE, Channel::Temperature, TEMPERATURE_REFERENCE);
        self.put(&OFFSET_SEQUENCE, Channel::PhaseA, offset[0]);
        self.put(&OFFSET_SEQUENCE, Channel::PhaseB, offset[1]);
        self.put(&OFFSET_SEQUENCE, Channel::PhaseC, offset[2]);
        self.put(&CURRENT_SEQUENCE, Channel::PhaseA, current[0]);
        self.put(&CURRENT_SEQUENCE, Channel::PhaseB, current[1]);
        self.put(&CURRENT_SEQUENCE, Channel::PhaseC, current[2]);
        self.pending = true;
    }
}

impl AdcSequencer for SimulatedAdc {
    fn configure_trigger(&mut self, _sequence: SequenceId, _count: u32, _edge: TriggerEdge) {}

    fn arm_sequence(&mut self, _sequence: &Sequence) {}

    fn start(&mut self) {
        self.started = true;
    }

    fn read_result(&self, slot: u8) -> u16 {
        self.slots[slot as usize]
    }

    fn take_completion(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }
}

struct Lines<'a>(&'a Cell<u8>);

impl SectorInput for Lines<'_> {
    fn read_sector(&mut self) -> u8 {
        self.0.get()
    }
}

struct Rig<'a> {
    sequencer: Sequencer<SimulatedAdc>,
    current: CurrentSense,
    hall: HallDecoder<Lines<'a>>,
}

impl<'a> Rig<'a> {
    fn new(lines: &'a Cell<u8>, hall: HallConfig) -> Self {
        let mut sequencer = Sequencer::new(
            SimulatedAdc::new(),
            TriggerTiming::new(TIMER_FREQ_HZ, PWM_FREQ_HZ),
        );
        sequencer.init();
        Self {
            sequencer,
            current: CurrentSense::new(
                AcquisitionConfig::default(),
                FactoryReference::new(TEMPERATURE_REFERENCE, 27),
                PWM_PERIOD_S,
            ),
            hall: HallDecoder::new(Lines(lines), hall),
        }
    }

    /// Interrupt body: returns whether a tick ran
    fn tick(&mut self, mode: ControlMode) -> bool {
        let Some(raw) = self.sequencer.poll_complete() else {
            return false;
        };
        self.current.update(mode, &raw);
        let _ = self.hall.update(mode == ControlMode::ClosedLoop);
        true
    }

    fn period(&mut self, mode: ControlMode, offset: [u16; 3], current: [u16; 3]) {
        self.sequencer.hw_mut().convert(offset, current);
        assert!(self.tick(mode));
    }
}

fn sector_map() -> HallConfig {
    let mut config = HallConfig::new();
    config.sector_map = [0, 0, 21845, 10923, -21845, -10923, 32767, 0];
    config.sector_map_calibrated = true;
    config
}

/// Toy checksum, enough to exercise the frame plumbing
struct XorCrc;

impl Crc32 for XorCrc {
    fn checksum(&mut self, words: &[u32]) -> u32 {
        words
            .iter()
            .fold(0xFFFF_FFFF, |acc, w| acc.rotate_left(5) ^ w)
    }
}

#[test]
fn test_calibrate_then_measure() {
    let lines = Cell::new(1);
    let mut rig = Rig::new(&lines, sector_map());
    assert!(rig.sequencer.hw().started);

    let zero = [MID_SCALE; 3];
    for _ in 0..60_000 {
        rig.period(ControlMode::Calibration, zero, zero);
    }

    let expected_offset = MID_SCALE as f32 * shunt::SCALING_FACTOR;
    let offset = rig.current.get_config().phase_offset;
    for value in [offset.a, offset.b, offset.c] {
        assert!(
            (value - expected_offset).abs() < 1e-2,
            "offset {} vs {}",
            value,
            expected_offset
        );
    }

    // Balanced load: +100 counts on A, -50 on B and C
    let frozen = *rig.current.get_config();
    let load = [MID_SCALE + 100, MID_SCALE - 50, MID_SCALE - 50];
    lines.set(3);
    for _ in 0..10 {
        rig.period(ControlMode::ClosedLoop, zero, load);
    }
    assert_eq!(*rig.current.get_config(), frozen);

    let i = rig.current.get_phase_currents(false);
    let amps = 100.0 * shunt::SCALING_FACTOR;
    assert!((i.a - amps).abs() < 2e-2, "a = {}", i.a);
    assert!((i.b + amps / 2.0).abs() < 2e-2, "b = {}", i.b);
    assert!((i.c + amps / 2.0).abs() < 2e-2, "c = {}", i.c);

    let reversed = rig.current.get_phase_currents(true);
    assert_eq!(reversed.b, i.c);
    assert_eq!(reversed.c, i.b);
    assert_eq!(rig.current.get_phase_currents(false), i);

    assert_eq!(rig.current.get_temperature(), 27);
    assert_eq!(rig.hall.get_sector(), 3);
    assert_eq!(rig.hall.get_angle(), 10923);
}

#[test]
fn test_no_tick_without_completion() {
    let lines = Cell::new(2);
    let mut rig = Rig::new(&lines, sector_map());

    assert!(!rig.tick(ControlMode::ClosedLoop));
    assert_eq!(rig.current.get_state(), CurrentState::default());

    rig.period(ControlMode::ClosedLoop, [MID_SCALE; 3], [MID_SCALE; 3]);
    assert!(!rig.tick(ControlMode::ClosedLoop));
    assert_eq!(rig.hall.get_angle(), 21845);
}

#[test]
fn test_idle_holds_currents() {
    let lines = Cell::new(1);
    let mut rig = Rig::new(&lines, sector_map());

    let load = [MID_SCALE + 300, MID_SCALE - 150, MID_SCALE - 150];
    rig.period(ControlMode::ClosedLoop, [MID_SCALE; 3], load);
    let held = rig.current.get_phase_currents(false);

    rig.period(ControlMode::Idle, [MID_SCALE; 3], [MID_SCALE; 3]);
    assert_eq!(rig.current.get_phase_currents(false), held);
    assert_eq!(rig.current.get_temperature(), 27);
}

#[test]
fn test_published_snapshot_matches_tick() {
    static CURRENTS: Published<CurrentState> = Published::new(CurrentState {
        currents: g4_acquisition::current_sense::PhaseCurrents::zero(),
        temperature: 0,
    });
    static SECTOR: Published<HallState> = Published::new(HallState { sector: 0, angle: 0 });

    let lines = Cell::new(6);
    let mut rig = Rig::new(&lines, sector_map());
    rig.period(
        ControlMode::ClosedLoop,
        [MID_SCALE; 3],
        [MID_SCALE + 40, MID_SCALE - 20, MID_SCALE - 20],
    );
    CURRENTS.publish(rig.current.get_state());
    SECTOR.publish(rig.hall.get_state());

    assert_eq!(CURRENTS.snapshot(), rig.current.get_state());
    assert_eq!(SECTOR.snapshot(), HallState { sector: 6, angle: 32767 });
}

#[test]
fn test_persisted_calibration_survives_restart() {
    let lines = Cell::new(5);
    let mut rig = Rig::new(&lines, sector_map());
    let offset = [MID_SCALE + 12, MID_SCALE - 7, MID_SCALE + 3];
    for _ in 0..2_000 {
        rig.period(ControlMode::Calibration, offset, offset);
    }

    let mut saved = StoredConfig::new(*rig.current.get_config(), *rig.hall.get_config());
    let image = saved.to_bytes(&mut XorCrc);

    // Fresh boot
    let loaded = StoredConfig::from_bytes(&image, &mut XorCrc).unwrap();
    let mut rebooted = Rig::new(&lines, HallConfig::new());
    rebooted.current.restore_config(loaded.acquisition).unwrap();
    rebooted.hall.restore_config(loaded.hall);

    assert_eq!(rebooted.current.get_config(), rig.current.get_config());
    assert!(rebooted.hall.is_sector_map_calibrated());

    rebooted.period(ControlMode::ClosedLoop, offset, offset);
    rig.period(ControlMode::ClosedLoop, offset, offset);
    assert_eq!(
        rebooted.current.get_phase_currents(false),
        rig.current.get_phase_currents(false)
    );
    assert_eq!(rebooted.hall.get_angle(), -10923);
}
