//! Design constants for the acquisition path and the Hall decoder

/// Timer kernel clock feeding the PWM timer [Hz] (170MHz SYSCLK on APB2)
pub const TIMER_FREQ_HZ: u32 = 170_000_000;

/// PWM switching frequency, one control period per PWM period [Hz]
pub const PWM_FREQ_HZ: u32 = 20_000;

/// Control period [s]
pub const PWM_PERIOD_S: f32 = 1.0 / PWM_FREQ_HZ as f32;

/// Common-mode rejection weight of the phase-current blend (0 <= k < 0.5)
pub const I_FILTER_K: f32 = 0.25;

/// Current-sense front end
pub mod shunt {
    /// Shunt resistance [Ω]
    pub const RESISTANCE_OHM: f32 = 0.003;

    /// Current-sense amplifier gain (OPAMP PGA)
    pub const AMPLIFIER_GAIN: f32 = 20.0;

    /// ADC reference voltage [V]
    pub const ADC_VREF: f32 = 3.3;

    /// ADC full scale (12 bit)
    pub const ADC_FULL_SCALE: f32 = 4096.0;

    /// Amps per ADC count
    pub const SCALING_FACTOR: f32 = ADC_VREF / ADC_FULL_SCALE / (AMPLIFIER_GAIN * RESISTANCE_OHM);

    /// ADC counts per amp
    pub const ONE_OVER_SCALING_FACTOR: f32 = 1.0 / SCALING_FACTOR;
}

/// Default operator-tunable acquisition settings
pub mod acquisition {
    /// Phase current limit handed to the overcurrent comparator [A]
    pub const DEFAULT_CURRENT_LIMIT: f32 = 60.0;

    /// Offset calibration filter time constant [s]
    pub const DEFAULT_OFFSET_TAU: f32 = 0.2;
}

/// Conversion trigger timing
pub mod trigger {
    /// Compare value that starts the offset/auxiliary sequence
    pub const OFFSET_COUNT: u32 = 1;

    /// Counts subtracted from the half period for the current sequence
    pub const CURRENT_GUARD_COUNTS: u32 = 2;

    /// First result slot of the offset/auxiliary sequence
    pub const OFFSET_FIRST_SLOT: u8 = 0;

    /// First result slot of the current sequence
    pub const CURRENT_FIRST_SLOT: u8 = 12;

    /// Number of result slots exposed by the sequencer
    pub const RESULT_SLOTS: usize = 24;
}

/// Internal temperature sensor calibration
pub mod temperature {
    /// Offset between Kelvin and Celsius used by the integer estimate
    pub const KELVIN_OFFSET: i32 = 273;

    /// Linear-term offset of the sensor transfer function, in (counts * 100)
    pub const SENSOR_OFFSET: i32 = 12_288;

    /// Factory reference temperature when no device value is available [°C]
    pub const DEFAULT_REFERENCE_C: i32 = 27;
}

/// Hall-output angle sensor (MA330 UVW outputs)
pub mod hall {
    /// Pole-pair register address
    pub const NPP_REGISTER: u8 = 0x07;

    /// Pole-pair register value, emulates 7 pole pairs on the UVW outputs
    pub const NPP_VALUE: u8 = 0b1100_0000;

    /// Sensor start-up time before the first register write [ms]
    pub const STARTUP_DELAY_MS: u64 = 16;
}

/// Firmware task timing
pub mod tasks {
    /// Offset tracking window after boot (five offset time constants) [ms]
    pub const CALIBRATION_TIME_MS: u64 = 1_000;

    /// Telemetry log period [ms]
    pub const TELEMETRY_PERIOD_MS: u64 = 500;
}
