//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.
//!
//! Wire layout of one frame:
//!
//! ```text
//! sync(1) | length(1) | type(1) | payload(N) | crc(1)
//! ```
//!
//! `length` counts `type + payload + crc`, and the CRC covers `type + payload`.

use bytes::Bytes;

use super::crc::crc8_dvb_s2;
use crate::error::{CrsfBridgeError, Result};

/// CRSF frame sync byte (always 0xC8)
pub const CRSF_SYNC_BYTE: u8 = 0xC8;

/// Bytes in front of the type byte: sync + length
pub const CRSF_HEADER_SIZE: usize = 2;

/// Smallest usable length field (type + crc, empty payload)
pub const CRSF_MIN_FRAME_LENGTH: u8 = 2;

/// Largest payload a length byte can describe (255 - type - crc)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = 253;

/// Largest datagram carried between bridge processes (type + payload)
pub const CRSF_MAX_DATAGRAM_SIZE: usize = 254;

/// RC channels payload size (22 bytes for 16 channels × 11 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// Bits per packed channel
pub const CRSF_CHANNEL_BITS: usize = 11;

/// Channel value range (11-bit: 0-2047)
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 0;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 2047;

/// Highest plausible axis value sent by ELRS radios (`us_to_ticks(2012)`)
pub const AXIS_MAX: u16 = 1984 - 1;

/// Axis mid-point, `us_to_ticks(1500)`
pub const AXIS_MID: u16 = 992;

/// Ordered set of 16 channel values (11-bit: 0-2047)
pub type ChannelSet = [u16; CRSF_NUM_CHANNELS];

/// CRSF frame types forwarded or produced by this bridge.
///
/// Types outside this list are carried as [`FrameType::Unknown`] so they can be
/// forwarded untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Gps,
    Vario,
    BatterySensor,
    BaroAlt,
    Airspeed,
    Heartbeat,
    Rpm,
    Temp,
    Voltages,
    VideoTransmitter,
    LinkStatistics,
    RcChannelsPacked,
    LinkStatisticsRx,
    LinkStatisticsTx,
    Attitude,
    FlightMode,
    DeviceInfo,
    ConfigRead,
    ConfigWrite,
    RadioId,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x02 => Self::Gps,
            0x07 => Self::Vario,
            0x08 => Self::BatterySensor,
            0x09 => Self::BaroAlt,
            0x0A => Self::Airspeed,
            0x0B => Self::Heartbeat,
            0x0C => Self::Rpm,
            0x0D => Self::Temp,
            0x0E => Self::Voltages,
            0x0F => Self::VideoTransmitter,
            0x14 => Self::LinkStatistics,
            0x16 => Self::RcChannelsPacked,
            0x1C => Self::LinkStatisticsRx,
            0x1D => Self::LinkStatisticsTx,
            0x1E => Self::Attitude,
            0x21 => Self::FlightMode,
            0x29 => Self::DeviceInfo,
            0x2C => Self::ConfigRead,
            0x2D => Self::ConfigWrite,
            0x3A => Self::RadioId,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::Gps => 0x02,
            FrameType::Vario => 0x07,
            FrameType::BatterySensor => 0x08,
            FrameType::BaroAlt => 0x09,
            FrameType::Airspeed => 0x0A,
            FrameType::Heartbeat => 0x0B,
            FrameType::Rpm => 0x0C,
            FrameType::Temp => 0x0D,
            FrameType::Voltages => 0x0E,
            FrameType::VideoTransmitter => 0x0F,
            FrameType::LinkStatistics => 0x14,
            FrameType::RcChannelsPacked => 0x16,
            FrameType::LinkStatisticsRx => 0x1C,
            FrameType::LinkStatisticsTx => 0x1D,
            FrameType::Attitude => 0x1E,
            FrameType::FlightMode => 0x21,
            FrameType::DeviceInfo => 0x29,
            FrameType::ConfigRead => 0x2C,
            FrameType::ConfigWrite => 0x2D,
            FrameType::RadioId => 0x3A,
            FrameType::Unknown(other) => other,
        }
    }
}

/// One complete, CRC-checked CRSF frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Bytes,
}

impl RawFrame {
    /// Validate a complete frame (sync, length and CRC).
    ///
    /// `bytes` must hold exactly one frame: `sync + length + [length bytes]`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Frame is too short or its length field disagrees with the slice
    /// - Sync byte is incorrect
    /// - CRC check fails ([`CrsfBridgeError::CrcMismatch`])
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CRSF_HEADER_SIZE + CRSF_MIN_FRAME_LENGTH as usize {
            return Err(CrsfBridgeError::MalformedFrame(format!(
                "Frame too short: {} bytes",
                bytes.len()
            )));
        }

        if bytes[0] != CRSF_SYNC_BYTE {
            return Err(CrsfBridgeError::MalformedFrame(format!(
                "Invalid sync byte: 0x{:02X}",
                bytes[0]
            )));
        }

        let expected_len = CRSF_HEADER_SIZE + bytes[1] as usize;
        if bytes.len() != expected_len {
            return Err(CrsfBridgeError::MalformedFrame(format!(
                "Frame length mismatch: expected {} bytes, got {}",
                expected_len,
                bytes.len()
            )));
        }

        verify_crc(bytes)?;

        Ok(Self {
            bytes: Bytes::copy_from_slice(bytes),
        })
    }

    /// Wrap bytes that are already known to form a valid frame.
    pub(crate) fn from_validated(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Frame type tag
    pub fn frame_type(&self) -> FrameType {
        FrameType::from(self.bytes[CRSF_HEADER_SIZE])
    }

    /// Length field (type + payload + crc)
    pub fn length(&self) -> u8 {
        self.bytes[1]
    }

    /// Payload between the type byte and the CRC
    pub fn payload(&self) -> &[u8] {
        &self.bytes[CRSF_HEADER_SIZE + 1..self.bytes.len() - 1]
    }

    /// `type + payload`, the part forwarded over the network
    pub fn body(&self) -> &[u8] {
        &self.bytes[CRSF_HEADER_SIZE..self.bytes.len() - 1]
    }

    /// CRC byte
    pub fn crc(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Complete wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Check the trailing CRC of a complete frame.
pub(crate) fn verify_crc(frame: &[u8]) -> Result<()> {
    let body = &frame[CRSF_HEADER_SIZE..frame.len() - 1];
    let expected = crc8_dvb_s2(body);
    let actual = frame[frame.len() - 1];

    if expected != actual {
        return Err(CrsfBridgeError::CrcMismatch { expected, actual });
    }
    Ok(())
}

/// Convert a pulse width in microseconds to CRSF ticks.
pub fn us_to_ticks(us: u16) -> u16 {
    ((us as i32 - 1500) * 8 / 5 + 992).clamp(0, CRSF_CHANNEL_VALUE_MAX as i32) as u16
}

/// Convert CRSF ticks to a pulse width in microseconds.
pub fn ticks_to_us(ticks: u16) -> u16 {
    ((ticks as i32 - 992) * 5 / 8 + 1500).max(0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_crc(frame_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![CRSF_SYNC_BYTE, (payload.len() + 2) as u8, frame_type];
        frame.extend_from_slice(payload);
        frame.push(crc8_dvb_s2(&frame[2..]));
        frame
    }

    #[test]
    fn test_channel_value_ranges() {
        assert_eq!(CRSF_CHANNEL_VALUE_MIN, 0);
        assert_eq!(CRSF_CHANNEL_VALUE_MAX, 2047);
        assert_eq!(AXIS_MAX, 1983);
        assert_eq!(CRSF_NUM_CHANNELS * CRSF_CHANNEL_BITS, CRSF_RC_CHANNELS_PAYLOAD_SIZE * 8);
    }

    #[test]
    fn test_frame_type_round_trips_known_tags() {
        let tags = [
            0x02, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x14, 0x16, 0x1C, 0x1D,
            0x1E, 0x21, 0x29, 0x2C, 0x2D, 0x3A,
        ];
        for tag in tags {
            let frame_type = FrameType::from(tag);
            assert!(!matches!(frame_type, FrameType::Unknown(_)), "0x{:02X} should be known", tag);
            assert_eq!(u8::from(frame_type), tag);
        }
        assert_eq!(FrameType::from(0x16), FrameType::RcChannelsPacked);
        assert_eq!(FrameType::from(0x1E), FrameType::Attitude);
    }

    #[test]
    fn test_frame_type_preserves_unknown() {
        assert_eq!(FrameType::from(0x7F), FrameType::Unknown(0x7F));
        assert_eq!(u8::from(FrameType::Unknown(0x7F)), 0x7F);
    }

    #[test]
    fn test_parse_valid_frame() {
        let bytes = frame_with_crc(0x08, &[1, 2, 3]);
        let frame = RawFrame::parse(&bytes).unwrap();

        assert_eq!(frame.frame_type(), FrameType::BatterySensor);
        assert_eq!(frame.length(), 5);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.body(), &[0x08, 1, 2, 3]);
        assert_eq!(frame.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn test_parse_crc_mismatch() {
        let mut bytes = frame_with_crc(0x16, &[0u8; 22]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        match RawFrame::parse(&bytes) {
            Err(CrsfBridgeError::CrcMismatch { expected, actual }) => {
                assert_eq!(expected, 239);
                assert_eq!(actual, 239 ^ 0xFF);
            }
            other => panic!("Expected CrcMismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_sync_and_short_frames() {
        assert!(RawFrame::parse(&[CRSF_SYNC_BYTE, 0x02]).is_err());
        assert!(RawFrame::parse(&[0xEE, 0x02, 0x16, 0x00]).is_err());

        let mut bytes = frame_with_crc(0x07, &[0x00, 0x10]);
        bytes.push(0x00);
        assert!(RawFrame::parse(&bytes).is_err());
    }

    #[test]
    fn test_us_ticks_conversion() {
        assert_eq!(us_to_ticks(1500), AXIS_MID);
        assert_eq!(us_to_ticks(1000), 192);
        assert_eq!(us_to_ticks(2000), 1792);
        assert_eq!(ticks_to_us(AXIS_MID), 1500);
        assert_eq!(ticks_to_us(1792), 2000);
        assert_eq!(ticks_to_us(192), 1000);
    }
}
