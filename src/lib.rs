//! # CRSF Bridge Library
//!
//! Carry CRSF (Crossfire) radio links over UDP and feed simulator telemetry
//! back to the radio.
//!
//! This library provides the CRSF codec (framing, CRC, RC channel packing,
//! telemetry payloads) and the async tasks that connect a serial CRSF link,
//! a network-side RC receiver and a simulator telemetry stream.

pub mod bridge;
pub mod config;
pub mod crsf;
pub mod error;
pub mod serial;
pub mod telemetry;
