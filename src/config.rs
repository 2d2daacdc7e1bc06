//! Configuration module
//!
//! Compile-time design constants and the persisted configuration image.

pub mod params;
pub mod storage;

pub use storage::{Crc32, StorageError, StoredConfig};
