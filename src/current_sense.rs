// Phase current calibration and filtering
// Runs once per control period from the current-sequence completion interrupt

use crate::acquisition::RawReadings;
use crate::config::params::{shunt, I_FILTER_K, PWM_PERIOD_S};
use crate::temperature::FactoryReference;

/// Operating mode supplied by the controller state machine each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    /// No measurement update
    Idle,
    /// Offset tracking, no drive current commanded; currents are still filtered
    Calibration,
    /// Closed-loop control, offsets frozen
    ClosedLoop,
}

/// Three-phase quantity in amps
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseCurrents {
    pub const fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Phases B and C exchanged
    pub const fn swapped_bc(self) -> Self {
        Self::new(self.a, self.c, self.b)
    }

    /// Largest absolute phase value
    pub fn peak(&self) -> f32 {
        libm::fmaxf(
            libm::fabsf(self.a),
            libm::fmaxf(libm::fabsf(self.b), libm::fabsf(self.c)),
        )
    }
}

/// Convert raw ADC counts to amps (offset not removed)
#[inline(always)]
pub fn counts_to_amps(counts: u16) -> f32 {
    counts as f32 * shunt::SCALING_FACTOR
}

/// Configuration error
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Offset filter time constant not strictly positive and finite
    InvalidOffsetTau,
    /// Current limit not strictly positive and finite
    InvalidCurrentLimit,
}

/// Persisted acquisition settings
///
/// The offset filter gain is derived from the control period and the time
/// constant and is only ever written together with the time constant.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionConfig {
    /// Zero-current offset per phase [A]
    pub phase_offset: PhaseCurrents,
    /// Phase current limit for the overcurrent comparator [A]
    pub current_limit: f32,
    /// Offset filter time constant [s]
    offset_tau: f32,
    /// Offset filter gain, `period / offset_tau`
    offset_gain: f32,
}

impl AcquisitionConfig {
    /// Size of the persisted image in bytes
    pub const SIZE: usize = 24;

    /// Defaults for the given control period
    pub fn new(period_s: f32) -> Self {
        use crate::config::params::acquisition::{DEFAULT_CURRENT_LIMIT, DEFAULT_OFFSET_TAU};

        Self {
            phase_offset: PhaseCurrents::zero(),
            current_limit: DEFAULT_CURRENT_LIMIT,
            offset_tau: DEFAULT_OFFSET_TAU,
            offset_gain: period_s / DEFAULT_OFFSET_TAU,
        }
    }

    /// Offset filter time constant [s]
    pub fn offset_tau(&self) -> f32 {
        self.offset_tau
    }

    /// Offset filter gain (unitless)
    pub fn offset_gain(&self) -> f32 {
        self.offset_gain
    }

    /// Set the time constant and recompute the gain for `period_s`
    pub fn set_offset_tau(&mut self, tau: f32, period_s: f32) -> Result<(), ConfigError> {
        if !(tau.is_finite() && tau > 0.0) {
            return Err(ConfigError::InvalidOffsetTau);
        }
        self.offset_tau = tau;
        self.recompute_gain(period_s);
        Ok(())
    }

    /// Recompute the gain from the stored time constant
    pub fn recompute_gain(&mut self, period_s: f32) {
        self.offset_gain = period_s / self.offset_tau;
    }

    /// Check the invariants the filter relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.offset_tau.is_finite() && self.offset_tau > 0.0) {
            return Err(ConfigError::InvalidOffsetTau);
        }
        if !(self.current_limit.is_finite() && self.current_limit > 0.0) {
            return Err(ConfigError::InvalidCurrentLimit);
        }
        Ok(())
    }

    /// Current limit expressed in ADC counts, saturated to the ADC range
    pub fn limit_counts(&self) -> u16 {
        let counts = self.current_limit * shunt::ONE_OVER_SCALING_FACTOR;
        if counts >= u16::MAX as f32 {
            u16::MAX
        } else if counts > 0.0 {
            counts as u16
        } else {
            0
        }
    }

    /// Little-endian image
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let fields = [
            self.phase_offset.a,
            self.phase_offset.b,
            self.phase_offset.c,
            self.current_limit,
            self.offset_tau,
            self.offset_gain,
        ];
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Rebuild from an image produced by [`AcquisitionConfig::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let field = |i: usize| {
            f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            phase_offset: PhaseCurrents::new(field(0), field(1), field(2)),
            current_limit: field(3),
            offset_tau: field(4),
            offset_gain: field(5),
        })
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::new(PWM_PERIOD_S)
    }
}

/// Per-tick measurement published to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentState {
    /// Filtered, offset-corrected phase currents [A]
    pub currents: PhaseCurrents,
    /// Controller temperature [°C]
    pub temperature: i16,
}

impl CurrentState {
    /// Any phase magnitude above `limit`
    pub fn exceeds(&self, limit: f32) -> bool {
        self.currents.peak() > limit
    }
}

/// Common-mode rejection blend
///
/// A disturbance common to all three shunts is scaled by `1 - 3k`, while a
/// balanced (zero-sum) signal passes unchanged.
#[inline(always)]
pub fn reject_common_mode(i: PhaseCurrents, k: f32) -> PhaseCurrents {
    PhaseCurrents {
        a: (1.0 - k) * i.a - k * (i.b + i.c),
        b: (1.0 - k) * i.b - k * (i.a + i.c),
        c: (1.0 - k) * i.c - k * (i.a + i.b),
    }
}

/// Offset calibration and current filter pipeline
pub struct CurrentSense {
    config: AcquisitionConfig,
    state: CurrentState,
    thermometer: FactoryReference,
    period_s: f32,
}

impl CurrentSense {
    /// Create the pipeline for a fixed control period
    ///
    /// The offset gain of `config` is recomputed for `period_s`. An invalid
    /// `config` is replaced by the defaults.
    pub fn new(config: AcquisitionConfig, thermometer: FactoryReference, period_s: f32) -> Self {
        let mut config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                error!("Invalid acquisition config, using defaults: {:?}", e);
                AcquisitionConfig::new(period_s)
            }
        };
        config.recompute_gain(period_s);
        info!(
            "Current sense: tau={}s, gain={}, limit={}A",
            config.offset_tau(),
            config.offset_gain(),
            config.current_limit
        );
        Self {
            config,
            state: CurrentState::default(),
            thermometer,
            period_s,
        }
    }

    /// Process the readings of one completed acquisition
    pub fn update(&mut self, mode: ControlMode, raw: &RawReadings) {
        let currents = match mode {
            ControlMode::Calibration => {
                self.track_offsets(&raw.offset);
                self.filter_currents(&raw.current)
            }
            ControlMode::ClosedLoop => self.filter_currents(&raw.current),
            ControlMode::Idle => self.state.currents,
        };

        self.state = CurrentState {
            currents,
            temperature: self.thermometer.estimate(raw.temperature),
        };
    }

    /// Offset EMA toward the zero-current reading
    fn track_offsets(&mut self, offset_counts: &[u16; 3]) {
        let gain = self.config.offset_gain;
        let offset = &mut self.config.phase_offset;
        offset.a += (counts_to_amps(offset_counts[0]) - offset.a) * gain;
        offset.b += (counts_to_amps(offset_counts[1]) - offset.b) * gain;
        offset.c += (counts_to_amps(offset_counts[2]) - offset.c) * gain;
    }

    /// Offset-corrected, common-mode-rejected currents
    fn filter_currents(&self, current_counts: &[u16; 3]) -> PhaseCurrents {
        let offset = self.config.phase_offset;
        let i = PhaseCurrents {
            a: counts_to_amps(current_counts[0]) - offset.a,
            b: counts_to_amps(current_counts[1]) - offset.b,
            c: counts_to_amps(current_counts[2]) - offset.c,
        };
        reject_common_mode(i, I_FILTER_K)
    }

    /// Filtered currents in physical phase order
    ///
    /// With `windings_reversed` phases B and C are exchanged. Internal state is
    /// not touched.
    pub fn get_phase_currents(&self, windings_reversed: bool) -> PhaseCurrents {
        if windings_reversed {
            self.state.currents.swapped_bc()
        } else {
            self.state.currents
        }
    }

    /// Controller temperature [°C]
    pub fn get_temperature(&self) -> i16 {
        self.state.temperature
    }

    /// Latest measurement
    pub fn get_state(&self) -> CurrentState {
        self.state
    }

    pub fn get_config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut AcquisitionConfig {
        &mut self.config
    }

    /// Control period the gain is derived from [s]
    pub fn period(&self) -> f32 {
        self.period_s
    }

    /// Change the offset filter time constant
    pub fn set_offset_tau(&mut self, tau: f32) -> Result<(), ConfigError> {
        self.config.set_offset_tau(tau, self.period_s)
    }

    /// Replace the configuration as a whole
    ///
    /// The gain is recomputed for the pipeline's period so a gain saved under a
    /// different period does not survive. The caller must keep the update
    /// interrupt quiet while this runs.
    pub fn restore_config(&mut self, config: AcquisitionConfig) -> Result<(), ConfigError> {
        config.validate().map_err(|e| {
            error!("Rejected acquisition config: {:?}", e);
            e
        })?;
        self.config = config;
        self.config.recompute_gain(self.period_s);
        Ok(())
    }
}
