//! # CRSF Telemetry Encoder
//!
//! Turns one simulator [`TelemetryRecord`] into the CRSF telemetry payloads a
//! radio understands. All multi-byte fields are big-endian.
//!
//! | Frame          | Encoding                                                        |
//! |----------------|-----------------------------------------------------------------|
//! | GPS            | lat/lon deg×1e7 (i32), km/h×10 (u16), deg×100 (u16), m+1000 (u16), sats (u8) |
//! | BATTERY_SENSOR | V×10 (i16), A×10 (i16), mAh (u24), % (u8)                       |
//! | VARIO          | cm/s (i16)                                                      |
//! | BARO_ALT       | packed altitude (u16), packed vertical speed (i8)               |
//! | AIRSPEED       | km/h×10 (u16)                                                   |
//! | ATTITUDE       | pitch, roll, yaw in 100 µrad (i16)                              |
//! | RPM            | source id (u8), then u24 per rotor                              |
//!
//! Ground speed is sent as km/h×10 rather than the ×100 the protocol document
//! describes, because that is what EdgeTX and Betaflight actually use.

use bytes::BufMut;

use super::geo::{gps_from_coord, quat_to_euler, quat_to_heading, EulerAngles, GeoOrigin};
use super::record::TelemetryRecord;
use crate::crsf::encoder::build_frame;
use crate::crsf::protocol::{FrameType, RawFrame};
use crate::error::Result;

/// Most rotors one RPM frame can describe
pub const MAX_RPM_VALUES: usize = 19;

/// Baro altitude offset: 10000 dm is the starting altitude
const BARO_ALT_OFFSET_DM: i64 = 10_000;

/// Baro altitude flag: value is whole meters without offset
const BARO_ALT_METERS_FLAG: u16 = 0x8000;

/// One telemetry payload ready to be framed or forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPayload {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl TelemetryPayload {
    /// `type + payload`, as exchanged between bridge processes
    pub fn body(&self) -> Vec<u8> {
        let mut body: Vec<u8> = Vec::with_capacity(1 + self.payload.len());
        body.push(self.frame_type.into());
        body.extend_from_slice(&self.payload);
        body
    }

    /// Complete CRSF frame
    pub fn to_frame(&self) -> Result<RawFrame> {
        build_frame(self.frame_type, &self.payload)
    }
}

/// GPS fix as sent to the radio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// km/h
    pub ground_speed: f64,
    /// Degrees, any sign
    pub heading: f64,
    /// Meters
    pub altitude: f64,
    pub satellites: u8,
}

/// GPS payload (15 bytes)
pub fn encode_gps(fix: &GpsFix) -> Vec<u8> {
    let mut payload: Vec<u8> = Vec::with_capacity(15);
    payload.put_i32((fix.latitude * 1e7).round() as i32);
    payload.put_i32((fix.longitude * 1e7).round() as i32);
    payload.put_u16((fix.ground_speed * 10.0).round() as u16);
    payload.put_u16(encode_heading(fix.heading));
    payload.put_u16((fix.altitude + 1000.0).round() as u16);
    payload.put_u8(fix.satellites);
    payload
}

/// Heading in centidegrees, normalized to `0..36000`
fn encode_heading(degrees: f64) -> u16 {
    let normalized = degrees.rem_euclid(360.0);
    ((normalized * 100.0).round() as u32 % 36_000) as u16
}

/// Battery sensor payload (8 bytes)
///
/// `remaining` is a 0..1 fraction.
pub fn encode_battery(voltage: f64, current: f64, capacity_used: f64, remaining: f64) -> Vec<u8> {
    let mut payload: Vec<u8> = Vec::with_capacity(8);
    payload.put_i16((voltage * 10.0).round() as i16);
    payload.put_i16((current * 10.0).round() as i16);
    payload.put_uint(capacity_used.round().clamp(0.0, 0xFF_FFFF as f64) as u64, 3);
    payload.put_u8((remaining * 100.0).round() as u8);
    payload
}

/// Vario payload: vertical speed in cm/s (2 bytes)
pub fn encode_vario(vertical_speed: f64) -> Vec<u8> {
    ((vertical_speed * 100.0).round() as i16).to_be_bytes().to_vec()
}

/// Baro altitude payload (3 bytes)
///
/// Altitude relative to `starting_altitude` in decimeters, offset by 10000 so
/// that 0 means -1000 m. Values beyond 0x7FFF switch to whole meters with the
/// MSB set. The vertical speed byte is left 0.
pub fn encode_baro_altitude(altitude: f64, starting_altitude: f64) -> Vec<u8> {
    let decimeters = ((altitude - starting_altitude) * 10.0).round() as i64 + BARO_ALT_OFFSET_DM;

    let packed = if decimeters < 0 {
        0
    } else if decimeters > 0x7FFF {
        BARO_ALT_METERS_FLAG | altitude.round().clamp(0.0, 0x7FFF as f64) as u16
    } else {
        decimeters as u16
    };

    let mut payload: Vec<u8> = Vec::with_capacity(3);
    payload.put_u16(packed);
    payload.put_i8(0);
    payload
}

/// Airspeed payload: km/h×10 from a speed in m/s (2 bytes)
pub fn encode_airspeed(speed: f64) -> Vec<u8> {
    ((speed * 3.6 * 10.0).round() as u16).to_be_bytes().to_vec()
}

/// Attitude payload: pitch, roll, yaw in 100 µrad (6 bytes)
pub fn encode_attitude(angles: &EulerAngles) -> Vec<u8> {
    let mut payload: Vec<u8> = Vec::with_capacity(6);
    for rad in [angles.pitch, angles.roll, angles.yaw] {
        payload.put_i16((rad * 10_000.0).round() as i16);
    }
    payload
}

/// RPM payload: source id 0, then one u24 per rotor (at most 19)
pub fn encode_rpm(rpm: &[f32]) -> Vec<u8> {
    let rotors = &rpm[..rpm.len().min(MAX_RPM_VALUES)];
    let mut payload: Vec<u8> = Vec::with_capacity(1 + rotors.len() * 3);
    payload.put_u8(0);
    for &value in rotors {
        payload.put_uint((value as f64).round().clamp(0.0, 0xFF_FFFF as f64) as u64, 3);
    }
    payload
}

/// Encodes telemetry records into CRSF payloads
///
/// The baro altitude is relative to the session start: the altitude of the
/// first encoded record unless set explicitly.
#[derive(Debug, Clone, Default)]
pub struct TelemetryEncoder {
    origin: GeoOrigin,
    starting_altitude: Option<f64>,
}

impl TelemetryEncoder {
    pub fn new(origin: GeoOrigin) -> Self {
        Self {
            origin,
            starting_altitude: None,
        }
    }

    /// Use a fixed reference altitude for baro altitude frames
    #[must_use]
    pub fn with_starting_altitude(mut self, altitude: f64) -> Self {
        self.starting_altitude = Some(altitude);
        self
    }

    pub fn starting_altitude(&self) -> Option<f64> {
        self.starting_altitude
    }

    /// Encode one record
    ///
    /// Order: GPS, battery (if the stream has one), vario, baro altitude,
    /// airspeed, attitude, RPM (if the stream reports rotors).
    pub fn encode(&mut self, record: &TelemetryRecord) -> Vec<TelemetryPayload> {
        let geo = gps_from_coord(record.position, self.origin);
        let starting_altitude = *self.starting_altitude.get_or_insert(geo.altitude);

        let [vx, vy, vz] = record.velocity.map(f64::from);
        let ground_speed = (vx * vx + vz * vz).sqrt();
        let air_speed = (vx * vx + vy * vy + vz * vz).sqrt();

        let mut payloads = Vec::with_capacity(7);

        let fix = GpsFix {
            latitude: geo.latitude,
            longitude: geo.longitude,
            ground_speed: ground_speed * 3.6,
            heading: quat_to_heading(record.attitude).to_degrees(),
            altitude: geo.altitude,
            satellites: 1,
        };
        payloads.push(TelemetryPayload {
            frame_type: FrameType::Gps,
            payload: encode_gps(&fix),
        });

        if let Some(battery) = record.battery {
            payloads.push(TelemetryPayload {
                frame_type: FrameType::BatterySensor,
                payload: encode_battery(battery.voltage as f64, 0.0, 0.0, battery.percentage as f64),
            });
        }

        payloads.push(TelemetryPayload {
            frame_type: FrameType::Vario,
            payload: encode_vario(vy),
        });
        payloads.push(TelemetryPayload {
            frame_type: FrameType::BaroAlt,
            payload: encode_baro_altitude(geo.altitude, starting_altitude),
        });
        payloads.push(TelemetryPayload {
            frame_type: FrameType::Airspeed,
            payload: encode_airspeed(air_speed),
        });
        payloads.push(TelemetryPayload {
            frame_type: FrameType::Attitude,
            payload: encode_attitude(&quat_to_euler(record.attitude)),
        });

        if !record.motor_rpm.is_empty() {
            payloads.push(TelemetryPayload {
                frame_type: FrameType::Rpm,
                payload: encode_rpm(&record.motor_rpm),
            });
        }

        payloads
    }
}
