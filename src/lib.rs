//! Phase-current acquisition and Hall sector decoding for a three-phase
//! motor controller.
//!
//! The hardware-facing parts are reached through small traits
//! ([`acquisition::AdcSequencer`], [`hall::SectorInput`], [`hall::SensorLink`],
//! [`config::Crc32`]) so the signal path runs on the host as well as on the
//! target.

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod acquisition;
pub mod config;
pub mod current_sense;
pub mod hall;
pub mod state;
pub mod temperature;
