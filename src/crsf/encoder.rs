//! # CRSF Frame Encoder
//!
//! Builds CRSF frames and packs RC channels into their 22-byte payload.

use bytes::{BufMut, BytesMut};

use super::crc::crc8_dvb_s2;
use super::protocol::*;
use crate::error::{CrsfBridgeError, Result};

/// Build a complete CRSF frame around a payload
///
/// Emits `sync + length + type + payload + crc`, where length is
/// `payload.len() + 2` and the CRC covers `type + payload`.
///
/// # Errors
///
/// Returns [`CrsfBridgeError::PayloadTooLarge`] if the length would not fit
/// in one byte (payload larger than 253 bytes). No partial frame is produced.
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::encoder::build_frame;
/// use crsf_bridge::crsf::protocol::FrameType;
///
/// let frame = build_frame(FrameType::Vario, &[0x00, 0x64]).unwrap();
/// assert_eq!(&frame.as_bytes()[..3], &[0xC8u8, 0x04, 0x07]);
/// ```
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Result<RawFrame> {
    if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
        return Err(CrsfBridgeError::PayloadTooLarge {
            size: payload.len(),
            max: CRSF_MAX_PAYLOAD_SIZE,
        });
    }

    let mut frame = BytesMut::with_capacity(CRSF_HEADER_SIZE + payload.len() + 2);
    frame.put_u8(CRSF_SYNC_BYTE);
    frame.put_u8((payload.len() + 2) as u8);
    frame.put_u8(frame_type.into());
    frame.put_slice(payload);

    let crc = crc8_dvb_s2(&frame[CRSF_HEADER_SIZE..]);
    frame.put_u8(crc);

    Ok(RawFrame::from_validated(frame.freeze()))
}

/// Build a frame from a `type + payload` datagram body
///
/// This is the return path of the bridge: peers send frames without sync,
/// length and CRC, which are added here.
///
/// # Errors
///
/// Returns [`CrsfBridgeError::MalformedFrame`] for an empty body and
/// [`CrsfBridgeError::PayloadTooLarge`] if the body does not fit a frame.
pub fn build_frame_from_body(body: &[u8]) -> Result<RawFrame> {
    match body.split_first() {
        Some((&frame_type, payload)) => build_frame(FrameType::from(frame_type), payload),
        None => Err(CrsfBridgeError::MalformedFrame(
            "Empty frame body".to_string(),
        )),
    }
}

/// Encode RC channels into a complete CRSF frame
///
/// # Returns
///
/// * `Result<RawFrame>` - 26 bytes: sync + length + type + 22-byte payload + crc
///
/// # Errors
///
/// Returns [`CrsfBridgeError::ChannelOutOfRange`] if any channel exceeds 2047
pub fn encode_rc_channels_frame(channels: &ChannelSet) -> Result<RawFrame> {
    let payload = pack_channels(channels)?;
    build_frame(FrameType::RcChannelsPacked, &payload)
}

/// Pack RC channels into payload (22 bytes)
///
/// Packs 16 channels (11 bits each) into 22 bytes using bit packing.
/// Channels are packed as a continuous bitstream, LSB first.
///
/// # Algorithm
///
/// ```text
/// Byte 0: Ch1[0:7]
/// Byte 1: Ch1[8:10] | Ch2[0:4]
/// Byte 2: Ch2[5:10] | Ch3[0:1]
/// ...
/// ```
///
/// # Errors
///
/// Returns [`CrsfBridgeError::ChannelOutOfRange`] if any value exceeds the
/// 11-bit range. Range checks against a game-specific axis maximum are the
/// caller's job.
pub fn pack_channels(channels: &ChannelSet) -> Result<[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE]> {
    if let Some((index, &value)) = channels
        .iter()
        .enumerate()
        .find(|&(_, &value)| value > CRSF_CHANNEL_VALUE_MAX)
    {
        return Err(CrsfBridgeError::ChannelOutOfRange {
            index,
            value,
            max: CRSF_CHANNEL_VALUE_MAX,
        });
    }

    let mut payload = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
    let mut bit_index = 0;

    for &value in channels.iter() {
        for bit in 0..CRSF_CHANNEL_BITS {
            if (value >> bit) & 1 == 1 {
                payload[bit_index / 8] |= 1 << (bit_index % 8);
            }
            bit_index += 1;
        }
    }

    Ok(payload)
}
