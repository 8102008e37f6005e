//! # CRSF Stream Decoder
//!
//! Splits a continuous, possibly corrupted byte stream into CRSF frames and
//! unpacks RC channel payloads.
//!
//! ## Resynchronization
//!
//! The scanner searches for the sync byte, commits to the length byte that
//! follows it and jumps over the whole candidate frame whether or not its CRC
//! matches. A corrupted frame therefore costs exactly one frame and never
//! cascades into the next one. Incomplete frames are left in the buffer,
//! starting at their sync byte, until more bytes arrive.

use bytes::{Buf, BytesMut};

use super::protocol::*;

/// Outcome for one candidate frame found in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrameResult {
    /// Complete frame with a matching CRC
    Ok(RawFrame),
    /// Complete candidate frame whose CRC did not match (or whose length field
    /// is too small to hold type and CRC). The bytes were consumed.
    CrcError,
}

/// Frames found by one [`scan`] call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanResult {
    /// Frames in stream order
    pub frames: Vec<RawFrameResult>,
    /// Number of leading buffer bytes that were fully processed
    pub consumed: usize,
}

/// Scan an accumulating buffer for complete frames
///
/// Bytes before the first sync byte are consumed and discarded. Scanning
/// stops at the first incomplete frame; `buffer[consumed..]` starts with that
/// frame's sync byte and must be kept for the next call.
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::decoder::{scan, RawFrameResult};
/// use crsf_bridge::crsf::encoder::build_frame;
/// use crsf_bridge::crsf::protocol::FrameType;
///
/// let frame = build_frame(FrameType::Vario, &[0x00, 0x64]).unwrap();
/// let result = scan(frame.as_bytes());
///
/// assert_eq!(result.consumed, frame.as_bytes().len());
/// assert_eq!(result.frames, vec![RawFrameResult::Ok(frame)]);
/// ```
pub fn scan(buffer: &[u8]) -> ScanResult {
    let mut result = ScanResult::default();
    let mut offset = 0;

    loop {
        let sync = match buffer[offset..].iter().position(|&b| b == CRSF_SYNC_BYTE) {
            Some(pos) => offset + pos,
            None => {
                // No sync byte anywhere: nothing worth keeping
                offset = buffer.len();
                break;
            }
        };

        // Everything before the sync byte is garbage
        offset = sync;

        // Need sync, length and at least the type byte before committing
        if sync + CRSF_HEADER_SIZE >= buffer.len() {
            break;
        }

        let frame_len = CRSF_HEADER_SIZE + buffer[sync + 1] as usize;
        if sync + frame_len > buffer.len() {
            break;
        }

        let candidate = &buffer[sync..sync + frame_len];
        let valid = buffer[sync + 1] >= CRSF_MIN_FRAME_LENGTH && verify_crc(candidate).is_ok();

        if valid {
            let frame = RawFrame::from_validated(bytes::Bytes::copy_from_slice(candidate));
            result.frames.push(RawFrameResult::Ok(frame));
        } else {
            result.frames.push(RawFrameResult::CrcError);
        }

        offset = sync + frame_len;
    }

    result.consumed = offset;
    result
}

/// Where the reader stands with the bytes it has not consumed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No sync byte buffered
    AwaitingSync,
    /// Sync byte buffered, length (or type) byte still missing
    HaveSyncNeedLength,
    /// Length known, waiting for the rest of the frame
    HaveLengthNeedBody { expected: usize, available: usize },
}

/// Accumulating receive buffer in front of [`scan`]
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::decoder::{FrameReader, ReaderState, RawFrameResult};
/// use crsf_bridge::crsf::encoder::build_frame;
/// use crsf_bridge::crsf::protocol::FrameType;
///
/// let frame = build_frame(FrameType::Vario, &[0x00, 0x64]).unwrap();
/// let (head, tail) = frame.as_bytes().split_at(3);
///
/// let mut reader = FrameReader::new();
/// reader.extend(head);
/// assert!(reader.drain_frames().is_empty());
/// assert_eq!(reader.state(), ReaderState::HaveLengthNeedBody { expected: 6, available: 3 });
///
/// reader.extend(tail);
/// assert_eq!(reader.drain_frames(), vec![RawFrameResult::Ok(frame)]);
/// assert_eq!(reader.state(), ReaderState::AwaitingSync);
/// ```
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Scan the buffer and drop every processed byte
    pub fn drain_frames(&mut self) -> Vec<RawFrameResult> {
        let result = scan(&self.buffer);
        self.buffer.advance(result.consumed);
        result.frames
    }

    /// Bytes retained for the next read
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Current framing state of the retained bytes
    pub fn state(&self) -> ReaderState {
        match self.buffer.first() {
            Some(&CRSF_SYNC_BYTE) if self.buffer.len() > CRSF_HEADER_SIZE => {
                ReaderState::HaveLengthNeedBody {
                    expected: CRSF_HEADER_SIZE + self.buffer[1] as usize,
                    available: self.buffer.len(),
                }
            }
            Some(&CRSF_SYNC_BYTE) => ReaderState::HaveSyncNeedLength,
            _ => ReaderState::AwaitingSync,
        }
    }
}

/// Unpack RC channels from a 22-byte payload
///
/// Reads 16 groups of 11 bits, least significant bit first, from one
/// continuous bitstream. Never fails: values are returned as found, and
/// plausibility checks (e.g. against [`AXIS_MAX`]) belong to the caller.
pub fn unpack_channels(data: &[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE]) -> ChannelSet {
    let mut channels = [0u16; CRSF_NUM_CHANNELS];
    let mut src_shift = 0usize;
    let mut ptr = 0usize;

    for channel in channels.iter_mut() {
        let mut value = (data[ptr] as u16) >> src_shift;
        ptr += 1;

        let mut bits_left = CRSF_CHANNEL_BITS - 8 + src_shift;
        value = (value | ((data[ptr] as u16) << (CRSF_CHANNEL_BITS - bits_left))) & 0x7FF;

        if bits_left >= 8 {
            ptr += 1;
            bits_left -= 8;
            if bits_left > 0 {
                value = (value | ((data[ptr] as u16) << (CRSF_CHANNEL_BITS - bits_left))) & 0x7FF;
            }
        }

        src_shift = bits_left;
        *channel = value;
    }

    channels
}

/// Unpack RC channels from a frame, if it is an RC channels frame of the right size
pub fn decode_rc_channels(frame: &RawFrame) -> Option<ChannelSet> {
    if frame.frame_type() != FrameType::RcChannelsPacked {
        return None;
    }
    let payload: &[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] = frame.payload().try_into().ok()?;
    Some(unpack_channels(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::{build_frame, encode_rc_channels_frame, pack_channels};

    fn vario(cm_s: i16) -> RawFrame {
        build_frame(FrameType::Vario, &cm_s.to_be_bytes()).unwrap()
    }

    #[test]
    fn test_scan_empty_buffer() {
        let result = scan(&[]);
        assert!(result.frames.is_empty());
        assert_eq!(result.consumed, 0);
    }

    #[test]
    fn test_scan_two_frames_in_one_call() {
        let frame1 = vario(120);
        let frame2 = encode_rc_channels_frame(&[AXIS_MID; CRSF_NUM_CHANNELS]).unwrap();
        let mut stream = frame1.as_bytes().to_vec();
        stream.extend_from_slice(frame2.as_bytes());

        let result = scan(&stream);

        assert_eq!(result.consumed, stream.len());
        assert_eq!(
            result.frames,
            vec![RawFrameResult::Ok(frame1), RawFrameResult::Ok(frame2)]
        );
    }

    #[test]
    fn test_scan_garbage_without_sync_is_consumed() {
        let result = scan(&[0x00, 0x13, 0x37, 0xFF]);
        assert!(result.frames.is_empty());
        assert_eq!(result.consumed, 4);
    }

    #[test]
    fn test_scan_skips_garbage_before_sync() {
        let frame = vario(-50);
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.extend_from_slice(frame.as_bytes());

        let result = scan(&stream);

        assert_eq!(result.frames, vec![RawFrameResult::Ok(frame)]);
        assert_eq!(result.consumed, stream.len());
    }

    #[test]
    fn test_scan_partial_frame_is_retained() {
        let frame = encode_rc_channels_frame(&[AXIS_MID; CRSF_NUM_CHANNELS]).unwrap();
        let bytes = frame.as_bytes();

        for n in 1..bytes.len() {
            let result = scan(&bytes[..n]);
            assert!(result.frames.is_empty(), "no frame expected from {} bytes", n);
            assert_eq!(result.consumed, 0, "all {} bytes must be retained", n);
        }
    }

    #[test]
    fn test_scan_partial_after_garbage_keeps_sync() {
        let frame = vario(7);
        let mut stream = vec![0xAA, 0xBB];
        stream.extend_from_slice(&frame.as_bytes()[..4]);

        let result = scan(&stream);

        assert!(result.frames.is_empty());
        assert_eq!(result.consumed, 2);
        assert_eq!(stream[result.consumed], CRSF_SYNC_BYTE);
    }

    #[test]
    fn test_scan_crc_error_then_recovery() {
        let frame1 = vario(300);
        let frame2 = vario(-300);
        let mut stream = frame1.as_bytes().to_vec();
        let crc_pos = stream.len() - 1;
        stream[crc_pos] ^= 0x5A;
        stream.extend_from_slice(frame2.as_bytes());

        let result = scan(&stream);

        assert_eq!(
            result.frames,
            vec![RawFrameResult::CrcError, RawFrameResult::Ok(frame2)]
        );
        assert_eq!(result.consumed, stream.len());
    }

    #[test]
    fn test_scan_corrupted_payload_does_not_cascade() {
        let frame1 = encode_rc_channels_frame(&[1500; CRSF_NUM_CHANNELS]).unwrap();
        let frame2 = vario(42);
        let mut stream = frame1.as_bytes().to_vec();
        stream[10] ^= 0x01;
        stream.extend_from_slice(frame2.as_bytes());

        let result = scan(&stream);

        assert_eq!(
            result.frames,
            vec![RawFrameResult::CrcError, RawFrameResult::Ok(frame2)]
        );
    }

    #[test]
    fn test_scan_sync_byte_inside_payload_is_not_a_frame_start() {
        // Battery frame whose payload is full of sync bytes
        let payload = [CRSF_SYNC_BYTE; 8];
        let frame = build_frame(FrameType::BatterySensor, &payload).unwrap();
        let next = vario(1);
        let mut stream = frame.as_bytes().to_vec();
        stream.extend_from_slice(next.as_bytes());

        let result = scan(&stream);

        assert_eq!(
            result.frames,
            vec![RawFrameResult::Ok(frame), RawFrameResult::Ok(next)]
        );
    }

    #[test]
    fn test_scan_unknown_type_is_preserved() {
        let frame = build_frame(FrameType::Unknown(0x7E), &[1, 2, 3, 4]).unwrap();
        let result = scan(frame.as_bytes());

        match &result.frames[..] {
            [RawFrameResult::Ok(found)] => {
                assert_eq!(found.frame_type(), FrameType::Unknown(0x7E));
                assert_eq!(found.body(), &[0x7E, 1, 2, 3, 4]);
            }
            other => panic!("Expected one valid frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_scan_length_too_small_is_consumed_as_error() {
        let next = vario(9);
        let mut stream = vec![CRSF_SYNC_BYTE, 0x00, 0x55];
        stream.extend_from_slice(next.as_bytes());

        let result = scan(&stream);

        assert_eq!(
            result.frames,
            vec![RawFrameResult::CrcError, RawFrameResult::Ok(next)]
        );
        assert_eq!(result.consumed, stream.len());
    }

    #[test]
    fn test_frame_reader_byte_by_byte() {
        let frame1 = vario(11);
        let frame2 = encode_rc_channels_frame(&[AXIS_MID; CRSF_NUM_CHANNELS]).unwrap();
        let mut stream = vec![0x00];
        stream.extend_from_slice(frame1.as_bytes());
        stream.extend_from_slice(frame2.as_bytes());

        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        for byte in stream {
            reader.extend(&[byte]);
            frames.extend(reader.drain_frames());
        }

        assert_eq!(
            frames,
            vec![RawFrameResult::Ok(frame1), RawFrameResult::Ok(frame2)]
        );
        assert!(reader.pending().is_empty());
    }

    #[test]
    fn test_frame_reader_states() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.state(), ReaderState::AwaitingSync);

        reader.extend(&[CRSF_SYNC_BYTE]);
        assert!(reader.drain_frames().is_empty());
        assert_eq!(reader.state(), ReaderState::HaveSyncNeedLength);

        reader.extend(&[0x04, 0x07]);
        assert!(reader.drain_frames().is_empty());
        assert_eq!(
            reader.state(),
            ReaderState::HaveLengthNeedBody { expected: 6, available: 3 }
        );
    }

    #[test]
    fn test_unpack_all_zero() {
        assert_eq!(unpack_channels(&[0u8; 22]), [0u16; CRSF_NUM_CHANNELS]);
    }

    #[test]
    fn test_unpack_all_ones() {
        assert_eq!(unpack_channels(&[0xFFu8; 22]), [0x7FFu16; CRSF_NUM_CHANNELS]);
    }

    #[test]
    fn test_unpack_returns_values_above_axis_max() {
        let mut channels = [AXIS_MID; CRSF_NUM_CHANNELS];
        channels[15] = 2040;
        let payload = pack_channels(&channels).unwrap();

        let decoded = unpack_channels(&payload);
        assert_eq!(decoded[15], 2040);
        assert!(decoded[15] > AXIS_MAX);
    }

    #[test]
    fn test_unpack_known_pattern() {
        // Channel 0 = 0x7FF, channel 1 = 0x001
        let mut payload = [0u8; 22];
        payload[0] = 0xFF;
        payload[1] = 0x0F;

        let channels = unpack_channels(&payload);
        assert_eq!(channels[0], 0x7FF);
        assert_eq!(channels[1], 0x001);
        assert!(channels[2..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_decode_rc_channels() {
        let channels: ChannelSet = core::array::from_fn(|i| 172 + i as u16 * 100);
        let frame = encode_rc_channels_frame(&channels).unwrap();
        assert_eq!(decode_rc_channels(&frame), Some(channels));

        assert_eq!(decode_rc_channels(&vario(5)), None);

        let short = build_frame(FrameType::RcChannelsPacked, &[0u8; 21]).unwrap();
        assert_eq!(decode_rc_channels(&short), None);
    }
}
