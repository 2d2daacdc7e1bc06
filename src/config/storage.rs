//! Persisted configuration frame
//!
//! Holds the acquisition settings and the Hall sector map in one image that
//! fits a single flash page. The image is written field by field in
//! little-endian order and protected by a CRC-32 computed over every
//! preceding byte, packed into little-endian words.

use crate::current_sense::AcquisitionConfig;
use crate::hall::HallConfig;

/// Magic number ("ACQ1" in ASCII)
pub const CONFIG_MAGIC: u32 = 0x3151_4341;

/// Current layout version
pub const CONFIG_VERSION: u16 = 1;

/// CRC engine used to protect the frame
pub trait Crc32 {
    /// Checksum of `words`, starting from the engine's reset value
    fn checksum(&mut self, words: &[u32]) -> u32;
}

/// Frame validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Buffer shorter than a frame
    InvalidSize,
    /// Magic number mismatch (blank or foreign page)
    InvalidMagic(u32),
    /// Layout version mismatch
    VersionMismatch(u16),
    /// Stored and computed CRC differ
    CrcMismatch { stored: u32, computed: u32 },
}

/// Persisted configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredConfig {
    pub magic: u32,
    pub version: u16,
    pub acquisition: AcquisitionConfig,
    pub hall: HallConfig,
    /// CRC32 checksum, filled in by [`StoredConfig::to_bytes`]
    pub crc32: u32,
}

const HEADER_SIZE: usize = 8;
const ACQUISITION_START: usize = HEADER_SIZE;
const HALL_START: usize = ACQUISITION_START + AcquisitionConfig::SIZE;
const CRC_START: usize = HALL_START + HallConfig::SIZE + 2;

/// Words covered by the checksum
const CRC_WORDS: usize = CRC_START / 4;

impl StoredConfig {
    /// Size of the frame in bytes
    pub const SIZE: usize = CRC_START + 4;

    pub fn new(acquisition: AcquisitionConfig, hall: HallConfig) -> Self {
        Self {
            magic: CONFIG_MAGIC,
            version: CONFIG_VERSION,
            acquisition,
            hall,
            crc32: 0,
        }
    }

    /// Serialize and fill in the checksum
    pub fn to_bytes(&mut self, crc: &mut impl Crc32) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[ACQUISITION_START..HALL_START].copy_from_slice(&self.acquisition.to_bytes());
        bytes[HALL_START..HALL_START + HallConfig::SIZE].copy_from_slice(&self.hall.to_bytes());

        self.crc32 = checksum(&bytes[..CRC_START], crc);
        bytes[CRC_START..].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    /// Parse and validate a frame
    ///
    /// # Returns
    /// * `Ok(StoredConfig)` - header and checksum are valid
    /// * `Err(StorageError)` - first check that failed
    pub fn from_bytes(bytes: &[u8], crc: &mut impl Crc32) -> Result<Self, StorageError> {
        if bytes.len() < Self::SIZE {
            return Err(StorageError::InvalidSize);
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        Self::validate_header(magic, version)?;

        let stored = u32::from_le_bytes([
            bytes[CRC_START],
            bytes[CRC_START + 1],
            bytes[CRC_START + 2],
            bytes[CRC_START + 3],
        ]);
        let computed = checksum(&bytes[..CRC_START], crc);
        if stored != computed {
            return Err(StorageError::CrcMismatch { stored, computed });
        }

        let acquisition = AcquisitionConfig::from_bytes(&bytes[ACQUISITION_START..HALL_START])
            .ok_or(StorageError::InvalidSize)?;
        let hall = HallConfig::from_bytes(&bytes[HALL_START..]).ok_or(StorageError::InvalidSize)?;

        Ok(Self {
            magic,
            version,
            acquisition,
            hall,
            crc32: stored,
        })
    }

    /// Check magic number and version
    pub fn validate(&self) -> Result<(), StorageError> {
        Self::validate_header(self.magic, self.version)
    }

    fn validate_header(magic: u32, version: u16) -> Result<(), StorageError> {
        if magic != CONFIG_MAGIC {
            return Err(StorageError::InvalidMagic(magic));
        }
        if version != CONFIG_VERSION {
            return Err(StorageError::VersionMismatch(version));
        }
        Ok(())
    }
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self::new(AcquisitionConfig::default(), HallConfig::new())
    }
}

fn checksum(data: &[u8], crc: &mut impl Crc32) -> u32 {
    let mut words = [0u32; CRC_WORDS];
    for (word, chunk) in words.iter_mut().zip(data.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    crc.checksum(&words)
}

// Checksum covers whole words and the frame fits one 2KB flash page
const _: () = {
    assert!(CRC_START % 4 == 0);
    assert!(StoredConfig::SIZE <= 2048);
};
