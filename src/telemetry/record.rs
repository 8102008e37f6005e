//! # Simulator Telemetry Decoding
//!
//! The simulator streams one UDP datagram per physics update. Its layout is
//! declared by name in the simulator's configuration (`StreamFormat`): an
//! ordered list of fields, each a fixed number of little-endian `f32`s, except
//! `MotorRPM`, which is a one-byte count followed by that many floats.
//!
//! The configured names are checked against [`TelemetryField`] when the
//! configuration is parsed, and turned into a [`DecodePlan`] once at startup.

use serde::Deserialize;

use crate::error::{CrsfBridgeError, Result};

/// Every field the simulator can put in its telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TelemetryField {
    Timestamp,
    Position,
    PositionX,
    PositionY,
    PositionZ,
    Attitude,
    AttitudeX,
    AttitudeY,
    AttitudeZ,
    AttitudeW,
    Velocity,
    SpeedX,
    SpeedY,
    SpeedZ,
    Gyro,
    GyroPitch,
    GyroRoll,
    GyroYaw,
    Input,
    InputThrottle,
    InputYaw,
    InputPitch,
    InputRoll,
    Battery,
    BatteryPercentage,
    BatteryVoltage,
    #[serde(rename = "MotorRPM")]
    MotorRpm,
}

/// How a field is laid out in the datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRead {
    /// Fixed number of `f32`s
    Floats(usize),
    /// One count byte, then that many `f32`s
    CountPrefixed,
}

impl TelemetryField {
    /// Wire layout of this field
    pub fn read(self) -> FieldRead {
        use TelemetryField::*;
        match self {
            Position | Velocity | Gyro => FieldRead::Floats(3),
            Attitude | Input => FieldRead::Floats(4),
            Battery => FieldRead::Floats(2),
            MotorRpm => FieldRead::CountPrefixed,
            _ => FieldRead::Floats(1),
        }
    }

    fn apply(self, record: &mut TelemetryRecord, values: &[f32]) {
        use TelemetryField::*;
        match self {
            Timestamp => record.timestamp = Some(values[0]),
            Position => record.position.copy_from_slice(values),
            PositionX => record.position[0] = values[0],
            PositionY => record.position[1] = values[0],
            PositionZ => record.position[2] = values[0],
            Attitude => record.attitude.copy_from_slice(values),
            AttitudeX => record.attitude[0] = values[0],
            AttitudeY => record.attitude[1] = values[0],
            AttitudeZ => record.attitude[2] = values[0],
            AttitudeW => record.attitude[3] = values[0],
            Velocity => record.velocity.copy_from_slice(values),
            SpeedX => record.velocity[0] = values[0],
            SpeedY => record.velocity[1] = values[0],
            SpeedZ => record.velocity[2] = values[0],
            Gyro => record.gyro.copy_from_slice(values),
            GyroPitch => record.gyro[0] = values[0],
            GyroRoll => record.gyro[1] = values[0],
            GyroYaw => record.gyro[2] = values[0],
            Input => record.input.copy_from_slice(values),
            InputThrottle => record.input[0] = values[0],
            InputYaw => record.input[1] = values[0],
            InputPitch => record.input[2] = values[0],
            InputRoll => record.input[3] = values[0],
            Battery => {
                record.battery = Some(BatteryState {
                    percentage: values[0],
                    voltage: values[1],
                })
            }
            BatteryPercentage => record.battery.get_or_insert_with(Default::default).percentage = values[0],
            BatteryVoltage => record.battery.get_or_insert_with(Default::default).voltage = values[0],
            MotorRpm => record.motor_rpm = values.to_vec(),
        }
    }
}

/// Battery part of a telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatteryState {
    /// Remaining charge as a 0..1 fraction
    pub percentage: f32,
    /// Pack voltage in volts
    pub voltage: f32,
}

/// One decoded snapshot of simulator flight state
///
/// Fields absent from the stream format keep their defaults: zeros, and the
/// identity quaternion for attitude.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Simulator time in seconds
    pub timestamp: Option<f32>,
    /// x, y, z in meters (y is altitude, z points north)
    pub position: [f32; 3],
    /// Quaternion x, y, z, w
    pub attitude: [f32; 4],
    /// x, y, z in m/s
    pub velocity: [f32; 3],
    /// Pitch, roll, yaw rates
    pub gyro: [f32; 3],
    /// Throttle, yaw, pitch, roll stick inputs
    pub input: [f32; 4],
    pub battery: Option<BatteryState>,
    /// Rotor speeds in RPM, in simulator order
    pub motor_rpm: Vec<f32>,
}

impl Default for TelemetryRecord {
    fn default() -> Self {
        Self {
            timestamp: None,
            position: [0.0; 3],
            attitude: [0.0, 0.0, 0.0, 1.0],
            velocity: [0.0; 3],
            gyro: [0.0; 3],
            input: [0.0; 4],
            battery: None,
            motor_rpm: Vec::new(),
        }
    }
}

/// Ordered list of reads built once from a stream format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePlan {
    steps: Vec<(TelemetryField, FieldRead)>,
}

impl DecodePlan {
    /// Build a plan for the given stream format
    pub fn new(format: &[TelemetryField]) -> Self {
        Self {
            steps: format.iter().map(|&field| (field, field.read())).collect(),
        }
    }

    /// Minimum datagram size, counting count-prefixed fields as empty
    pub fn min_size(&self) -> usize {
        self.steps
            .iter()
            .map(|(_, read)| match read {
                FieldRead::Floats(n) => n * 4,
                FieldRead::CountPrefixed => 1,
            })
            .sum()
    }

    /// Decode one telemetry datagram
    ///
    /// Trailing bytes after the last field are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CrsfBridgeError::TelemetryDecode`] if the datagram ends
    /// before the last field.
    pub fn decode(&self, data: &[u8]) -> Result<TelemetryRecord> {
        let mut record = TelemetryRecord::default();
        let mut ptr = 0;

        for &(field, read) in &self.steps {
            let count = match read {
                FieldRead::Floats(n) => n,
                FieldRead::CountPrefixed => {
                    let count = *data.get(ptr).ok_or_else(|| short_datagram(field, data.len()))?;
                    ptr += 1;
                    count as usize
                }
            };

            let end = ptr + count * 4;
            let bytes = data.get(ptr..end).ok_or_else(|| short_datagram(field, data.len()))?;
            let values: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            field.apply(&mut record, &values);
            ptr = end;
        }

        Ok(record)
    }
}

fn short_datagram(field: TelemetryField, len: usize) -> CrsfBridgeError {
    CrsfBridgeError::TelemetryDecode(format!(
        "datagram of {} bytes ends inside field {:?}",
        len, field
    ))
}

/// Simulator telemetry description, as written next to its configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryDescription {
    #[serde(rename = "StreamFormat")]
    pub stream_format: Vec<TelemetryField>,
}

impl TelemetryDescription {
    /// Parse a JSON description such as `{"StreamFormat": ["Timestamp", "Position"]}`
    ///
    /// # Errors
    ///
    /// Returns [`CrsfBridgeError::Description`] for invalid JSON or field names
    /// outside [`TelemetryField`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn plan(&self) -> DecodePlan {
        DecodePlan::new(&self.stream_format)
    }
}
