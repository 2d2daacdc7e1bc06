//! Boot-time offset calibration
//!
//! Tracks the zero-current offsets while no drive is commanded, then freezes
//! and persists them.

use embassy_stm32::flash::{Blocking, Flash};
use embassy_time::Timer;

use g4_acquisition::config::params::tasks::CALIBRATION_TIME_MS;
use g4_acquisition::config::StoredConfig;
use g4_acquisition::current_sense::ControlMode;

use crate::eeprom;
use crate::hardware::CrcUnit;
use crate::measurement::{with_context, MODE};

#[embassy_executor::task]
pub async fn offset_calibration_task(mut flash: Flash<'static, Blocking>, mut crc: CrcUnit) {
    info!("Offset calibration started ({} ms)", CALIBRATION_TIME_MS);
    MODE.publish(ControlMode::Calibration);

    Timer::after_millis(CALIBRATION_TIME_MS).await;

    // Offsets stop moving from the next tick on
    MODE.publish(ControlMode::ClosedLoop);

    let Some((acquisition, hall)) =
        with_context(|ctx| (*ctx.current.get_config(), *ctx.hall.get_config()))
    else {
        error!("Measurement context missing, offsets not saved");
        return;
    };

    let offset = acquisition.phase_offset;
    info!(
        "Phase offsets: A={}A, B={}A, C={}A",
        offset.a, offset.b, offset.c
    );

    let mut stored = StoredConfig::new(acquisition, hall);
    match eeprom::write_config(&mut flash, &mut crc, &mut stored) {
        Ok(()) => info!("Offsets saved"),
        Err(e) => error!("Failed to save offsets: {:?}", e),
    }
}
