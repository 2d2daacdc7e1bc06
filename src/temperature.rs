//! Controller temperature estimate from the internal sensor channel
//!
//! One-point linear calibration anchored at the factory reading: the sensor
//! output is proportional to absolute temperature once its linear offset is
//! removed, so the ratio of the live reading to the factory reading scales the
//! factory temperature (in Kelvin).

use crate::config::params::temperature::{DEFAULT_REFERENCE_C, KELVIN_OFFSET, SENSOR_OFFSET};

/// Factory-programmed sensor reading and the temperature it was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FactoryReference {
    /// Sensor reading at `temperature_c` [counts]
    pub reading: u16,
    /// Reference temperature [°C]
    pub temperature_c: i32,
}

impl FactoryReference {
    pub const fn new(reading: u16, temperature_c: i32) -> Self {
        Self {
            reading,
            temperature_c,
        }
    }

    /// Reference with the default reference temperature
    pub const fn at_default_temperature(reading: u16) -> Self {
        Self::new(reading, DEFAULT_REFERENCE_C)
    }

    /// Estimate the present temperature [°C] from a raw sensor reading
    ///
    /// Saturates at the `i16` range.
    pub fn estimate(&self, raw: u16) -> i16 {
        let reference_k = self.temperature_c as i64 + KELVIN_OFFSET as i64;
        let live = raw as i64 * 100 + SENSOR_OFFSET as i64;
        let factory = self.reading as i64 * 100 + SENSOR_OFFSET as i64;
        let celsius = (reference_k * live) / factory - KELVIN_OFFSET as i64;
        celsius.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_reading_is_fixed_point() {
        let reference = FactoryReference::new(1550, 27);
        assert_eq!(reference.estimate(1550), 27);

        let reference = FactoryReference::at_default_temperature(903);
        assert_eq!(reference.estimate(903), 27);
    }

    #[test]
    fn test_estimate_is_monotonic() {
        let reference = FactoryReference::new(1550, 27);
        let mut previous = reference.estimate(1000);
        for raw in (1010..=2500).step_by(10) {
            let t = reference.estimate(raw);
            assert!(t >= previous, "temperature dropped at raw={}", raw);
            previous = t;
        }
        assert!(reference.estimate(1600) > 27);
        assert!(reference.estimate(1500) < 27);
    }

    #[test]
    fn test_full_scale_does_not_overflow() {
        let reference = FactoryReference::new(1, 130);
        let t = reference.estimate(4095);
        assert!(t > 130);
    }

    #[test]
    fn test_out_of_range_reading() {
        let reference = FactoryReference::new(1550, 60);
        assert_eq!(reference.estimate(u16::MAX), 12796);

        let reference = FactoryReference::new(1, 130);
        assert_eq!(reference.estimate(u16::MAX), i16::MAX);

        let reference = FactoryReference::new(u16::MAX, -40);
        assert!(reference.estimate(0) < -40);
    }
}
