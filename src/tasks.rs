//! Task module

pub mod offset_calibration;
pub mod telemetry;

pub use offset_calibration::offset_calibration_task;
pub use telemetry::telemetry_task;
