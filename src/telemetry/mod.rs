//! # Telemetry Module
//!
//! Simulator telemetry in, CRSF telemetry out.
//!
//! This module handles:
//! - Decoding the simulator's configurable telemetry datagrams
//! - Converting world coordinates and attitude quaternions to GPS and Euler angles
//! - Encoding records into CRSF telemetry payloads (GPS, battery, vario,
//!   baro altitude, airspeed, attitude, RPM)

pub mod encoder;
pub mod geo;
pub mod record;

pub use encoder::{TelemetryEncoder, TelemetryPayload};
pub use geo::GeoOrigin;
pub use record::{DecodePlan, TelemetryDescription, TelemetryField, TelemetryRecord};
