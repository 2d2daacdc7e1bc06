//! Measurement context run by the acquisition interrupt

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use g4_acquisition::acquisition::Sequencer;
use g4_acquisition::current_sense::{ControlMode, CurrentSense, CurrentState, PhaseCurrents};
use g4_acquisition::hall::{HallDecoder, HallState};
use g4_acquisition::state::Published;

use crate::hardware::{self, G4Sequencer, HallInputs};

/// Everything the per-period tick touches
pub struct MeasurementContext {
    pub sequencer: Sequencer<G4Sequencer>,
    pub current: CurrentSense,
    pub hall: HallDecoder<HallInputs>,
}

static CONTEXT: Mutex<CriticalSectionRawMutex, RefCell<Option<MeasurementContext>>> =
    Mutex::new(RefCell::new(None));

/// Mode applied on the next tick
pub static MODE: Published<ControlMode> = Published::new(ControlMode::Idle);

/// Latest filtered currents and temperature
pub static CURRENT_STATE: Published<CurrentState> = Published::new(CurrentState {
    currents: PhaseCurrents::zero(),
    temperature: 0,
});

/// Latest decoded sector and angle
pub static HALL_STATE: Published<HallState> = Published::new(HallState {
    sector: 0,
    angle: 0,
});

/// Number of invalid or skipped sector codes seen in closed loop
pub static HALL_FAULTS: Published<u32> = Published::new(0);

/// Hand the context over to the interrupt
pub fn install(context: MeasurementContext) {
    CONTEXT.lock(|cell| {
        cell.replace(Some(context));
    });
}

/// Run `f` on the context with the interrupt held off
pub fn with_context<R>(f: impl FnOnce(&mut MeasurementContext) -> R) -> Option<R> {
    CONTEXT.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

fn tick(context: &mut MeasurementContext) {
    let Some(raw) = context.sequencer.poll_complete() else {
        return;
    };

    let mode = MODE.snapshot();
    context.current.update(mode, &raw);

    let check = mode == ControlMode::ClosedLoop;
    if context.hall.update(check).is_err() {
        HALL_FAULTS.update(|n| n.wrapping_add(1));
    }

    CURRENT_STATE.publish(context.current.get_state());
    HALL_STATE.publish(context.hall.get_state());
}

/// ADC1_2 interrupt entry point, registered in the vector table by name
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn ADC1_2() {
    if hardware::on_adc_interrupt() {
        with_context(tick);
    }
}
