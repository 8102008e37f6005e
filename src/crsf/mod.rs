//! # CRSF Protocol Module
//!
//! Implementation of the Crossfire (CRSF) wire protocol used between ELRS
//! receivers, radios and the bridge.
//!
//! This module handles:
//! - CRC8-DVB-S2 checksum calculation
//! - Frame synchronization, validation and resync after corruption
//! - Frame building for the return (telemetry) direction
//! - RC channels packing and unpacking (16 channels, 11-bit resolution)

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
