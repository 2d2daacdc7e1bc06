//! Flash-backed configuration storage
//!
//! Keeps the configuration frame in the last flash page of the STM32G431VB
//! (page 63).

use embassy_stm32::flash::{Blocking, Flash};

use g4_acquisition::config::{StorageError, StoredConfig};

use crate::hardware::CrcUnit;

/// Flash page size of the STM32G431VB (2KB)
pub const FLASH_PAGE_SIZE: u32 = 2048;

/// Offset of the last page from the start of flash (128KB - 2KB)
pub const CONFIG_OFFSET: u32 = 0x1_F800;

/// EEPROM operation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    FlashReadError,
    FlashEraseError,
    FlashWriteError,
    /// Page content is not a valid frame
    InvalidFrame(StorageError),
}

/// Read and validate the stored configuration
pub fn read_config(
    flash: &mut Flash<'static, Blocking>,
    crc: &mut CrcUnit,
) -> Result<StoredConfig, EepromError> {
    info!("Reading config from flash at offset 0x{:X}", CONFIG_OFFSET);

    let mut buffer = [0u8; StoredConfig::SIZE];
    flash.blocking_read(CONFIG_OFFSET, &mut buffer).map_err(|e| {
        error!("Flash read failed: {:?}", e);
        EepromError::FlashReadError
    })?;

    let config = StoredConfig::from_bytes(&buffer, crc).map_err(|e| {
        error!("Stored config rejected: {:?}", e);
        EepromError::InvalidFrame(e)
    })?;

    info!("Config loaded successfully: version={}", config.version);
    Ok(config)
}

/// Erase the config page and write `config`, filling in its CRC
pub fn write_config(
    flash: &mut Flash<'static, Blocking>,
    crc: &mut CrcUnit,
    config: &mut StoredConfig,
) -> Result<(), EepromError> {
    let data = config.to_bytes(crc);
    info!("Calculated CRC32: 0x{:08X}", config.crc32);

    flash
        .blocking_erase(CONFIG_OFFSET, CONFIG_OFFSET + FLASH_PAGE_SIZE)
        .map_err(|e| {
            error!("Flash erase failed: {:?}", e);
            EepromError::FlashEraseError
        })?;

    flash.blocking_write(CONFIG_OFFSET, &data).map_err(|e| {
        error!("Flash write failed: {:?}", e);
        EepromError::FlashWriteError
    })?;

    info!("Config saved ({} bytes)", data.len());
    Ok(())
}

/// Write and return the default configuration
pub fn initialize_default_config(
    flash: &mut Flash<'static, Blocking>,
    crc: &mut CrcUnit,
) -> Result<StoredConfig, EepromError> {
    info!("Initializing flash with default config");

    let mut config = StoredConfig::default();
    write_config(flash, crc, &mut config)?;
    Ok(config)
}

/// Load the configuration, falling back to freshly written defaults
pub fn load_or_initialize_config(
    flash: &mut Flash<'static, Blocking>,
    crc: &mut CrcUnit,
) -> StoredConfig {
    match read_config(flash, crc) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config: {:?}, initializing with defaults", e);
            match initialize_default_config(flash, crc) {
                Ok(config) => config,
                Err(e) => {
                    error!(
                        "Failed to initialize default config: {:?}, using in-memory defaults",
                        e
                    );
                    StoredConfig::default()
                }
            }
        }
    }
}
