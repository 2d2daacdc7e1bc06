// Hall sector decoder
// Maps the 3-bit UVW code of the angle sensor to a calibrated angle through an
// 8-entry table filled by an external calibration routine

use crate::config::params::hall::{NPP_REGISTER, NPP_VALUE};

/// Number of entries in the sector map (one per 3-bit code)
pub const SECTOR_COUNT: usize = 8;

/// Source of the 3-bit sector code
pub trait SectorInput {
    /// Current code; only the low three bits are used
    fn read_sector(&mut self) -> u8;
}

/// Write-only configuration link to the sensor chip
pub trait SensorLink {
    type Error;

    /// Write `value` to register `reg`
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Self::Error>;
}

/// Two-byte register write frame of the sensor's SPI protocol
///
/// The first byte carries the write command (0b100) and the 5-bit register
/// address, the second one the value.
pub const fn write_frame(reg: u8, value: u8) -> [u8; 2] {
    [0x80 | (reg & 0x1F), value]
}

/// Decode plausibility errors
///
/// Reported only when checking is requested; the decoded state is updated
/// regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HallError {
    /// All-zero or all-one code, which a 120° sensor never produces
    InvalidCode(u8),
    /// More than one line changed between two consecutive reads
    SectorJump { from: u8, to: u8 },
}

/// Persisted sector map
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallConfig {
    /// Angle per sector code
    pub sector_map: [i16; SECTOR_COUNT],
    /// The map holds calibrated data
    pub sector_map_calibrated: bool,
    _padding: u8,
}

impl HallConfig {
    /// Size of the persisted image in bytes
    pub const SIZE: usize = SECTOR_COUNT * 2 + 2;

    /// Cleared, uncalibrated map
    pub const fn new() -> Self {
        Self {
            sector_map: [0; SECTOR_COUNT],
            sector_map_calibrated: false,
            _padding: 0,
        }
    }

    /// Little-endian image
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, angle) in bytes.chunks_exact_mut(2).zip(self.sector_map) {
            chunk.copy_from_slice(&angle.to_le_bytes());
        }
        bytes[SECTOR_COUNT * 2] = self.sector_map_calibrated as u8;
        bytes
    }

    /// Rebuild from an image produced by [`HallConfig::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut config = Self::new();
        for (angle, chunk) in config.sector_map.iter_mut().zip(bytes.chunks_exact(2)) {
            *angle = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        config.sector_map_calibrated = bytes[SECTOR_COUNT * 2] != 0;
        Some(config)
    }
}

impl Default for HallConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded state, written once per update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallState {
    /// Sector code (0-7)
    pub sector: u8,
    /// Angle looked up for `sector`
    pub angle: i16,
}

/// Hall sector decoder
pub struct HallDecoder<I> {
    input: I,
    config: HallConfig,
    state: HallState,
    /// Last code seen, for the jump check
    previous: Option<u8>,
}

impl<I: SectorInput> HallDecoder<I> {
    /// Create a decoder
    ///
    /// # Arguments
    /// * `input` - Sector code source
    /// * `config` - Sector map, usually restored from flash
    pub fn new(input: I, config: HallConfig) -> Self {
        Self {
            input,
            config,
            state: HallState::default(),
            previous: None,
        }
    }

    /// Program the pole-pair count of the sensor
    ///
    /// Must run once, after the sensor start-up time has elapsed.
    pub fn program_pole_pairs<L: SensorLink>(link: &mut L) -> Result<(), L::Error> {
        info!("Programming Hall sensor pole pairs: reg={}, value={}", NPP_REGISTER, NPP_VALUE);
        link.write_register(NPP_REGISTER, NPP_VALUE)
    }

    /// Check if a code can come from a 120° sensor
    ///
    /// # Returns
    /// `true` if code is valid (1-6), `false` otherwise
    pub fn is_valid_code(code: u8) -> bool {
        (1..=6).contains(&code)
    }

    /// Read the sector code and look up its angle
    ///
    /// # Arguments
    /// * `check` - Report invalid codes and multi-line transitions
    ///
    /// The state is updated even when an error is returned.
    pub fn update(&mut self, check: bool) -> Result<(), HallError> {
        let sector = self.input.read_sector() & 0b111;
        self.state = HallState {
            sector,
            angle: self.config.sector_map[sector as usize],
        };

        let previous = self.previous.replace(sector);
        if !check {
            return Ok(());
        }

        if !Self::is_valid_code(sector) {
            return Err(HallError::InvalidCode(sector));
        }

        // Adjacent sectors differ in exactly one line
        match previous {
            Some(from) if Self::is_valid_code(from) && (from ^ sector).count_ones() > 1 => {
                Err(HallError::SectorJump { from, to: sector })
            }
            _ => Ok(()),
        }
    }

    /// Current angle
    ///
    /// Only meaningful when [`HallDecoder::is_sector_map_calibrated`] is true.
    pub fn get_angle(&self) -> i16 {
        self.state.angle
    }

    /// Current sector code (0-7)
    pub fn get_sector(&self) -> u8 {
        self.state.sector
    }

    /// Sector and angle of the last update
    pub fn get_state(&self) -> HallState {
        self.state
    }

    /// Zero every entry and clear the calibrated flag
    pub fn clear_sector_map(&mut self) {
        self.config.sector_map = [0; SECTOR_COUNT];
        self.config.sector_map_calibrated = false;
    }

    /// Mark the map as holding calibrated data
    pub fn mark_sector_map_calibrated(&mut self) {
        self.config.sector_map_calibrated = true;
    }

    pub fn is_sector_map_calibrated(&self) -> bool {
        self.config.sector_map_calibrated
    }

    /// Raw table access for the calibration routine
    pub fn get_sector_map_mut(&mut self) -> &mut [i16; SECTOR_COUNT] {
        &mut self.config.sector_map
    }

    pub fn get_config(&self) -> &HallConfig {
        &self.config
    }

    /// Replace the sector map as a whole
    pub fn restore_config(&mut self, config: HallConfig) {
        self.config = config;
    }

    /// Forget the previous code (e.g. after the motor was stopped)
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
