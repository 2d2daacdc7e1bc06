//! Periodic measurement log

use embassy_time::{Duration, Ticker};

use g4_acquisition::config::params::tasks::TELEMETRY_PERIOD_MS;

use crate::measurement::{with_context, CURRENT_STATE, HALL_FAULTS, HALL_STATE, MODE};

#[embassy_executor::task]
pub async fn telemetry_task() {
    info!("Telemetry task started");

    let current_limit = with_context(|ctx| ctx.current.get_config().current_limit).unwrap_or(0.0);
    let mut ticker = Ticker::every(Duration::from_millis(TELEMETRY_PERIOD_MS));

    loop {
        ticker.next().await;

        let state = CURRENT_STATE.snapshot();
        let hall = HALL_STATE.snapshot();
        let i = state.currents;

        info!(
            "[{:?}] I=({}, {}, {})A T={}degC sector={} angle={} faults={}",
            MODE.snapshot(),
            i.a,
            i.b,
            i.c,
            state.temperature,
            hall.sector,
            hall.angle,
            HALL_FAULTS.snapshot()
        );

        if current_limit > 0.0 && state.exceeds(current_limit) {
            warn!("Phase current above limit: peak={}A", i.peak());
        }
    }
}
