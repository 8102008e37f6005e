//! # CRC8-DVB-S2 Implementation
//!
//! CRC-8-DVB-S2 checksum calculation for CRSF protocol.
//!
//! **Polynomial**: 0xD5 (x^8 + x^7 + x^6 + x^4 + x^2 + 1)
//! **Initial Value**: 0x00
//! **Final XOR**: none, MSB-first
//!
//! A CRSF frame checksum covers `type + payload`, i.e. everything between the
//! length byte and the CRC byte itself.

/// CRC-8-DVB-S2 polynomial
const POLYNOMIAL: u8 = 0xD5;

/// Per-byte lookup table, built at compile time
const TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        table[index] = shift_byte(index as u8);
        index += 1;
    }
    table
};

/// Run one byte's worth of register shifts
const fn shift_byte(mut register: u8) -> u8 {
    let mut bit = 0;
    while bit < 8 {
        register = match register & 0x80 {
            0 => register << 1,
            _ => (register << 1) ^ POLYNOMIAL,
        };
        bit += 1;
    }
    register
}

/// Checksum `data` (a frame's `type + payload`)
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::crc::crc8_dvb_s2;
///
/// assert_eq!(crc8_dvb_s2(b"123456789"), 0xBC);
/// ```
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| TABLE[(crc ^ byte) as usize])
}

/// Bit-at-a-time form of the same checksum
#[cfg(test)]
fn crc8_bitwise(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| shift_byte(crc ^ byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_empty() {
        assert_eq!(crc8_dvb_s2(&[]), 0x00);
    }

    #[test]
    fn test_crc8_single_zero_byte() {
        assert_eq!(crc8_dvb_s2(&[0x00]), 0x00);
    }

    #[test]
    fn test_crc8_catalog_check_value() {
        // CRC-8/DVB-S2 check value over ASCII "123456789"
        assert_eq!(crc8_dvb_s2(b"123456789"), 0xBC);
        assert_eq!(crc8_bitwise(b"123456789"), 0xBC);
    }

    #[test]
    fn test_crc8_captured_rc_frame() {
        // RC channels frame with every channel at zero, as captured from a receiver
        let mut frame = vec![0xC8, 24, 0x16];
        frame.extend_from_slice(&[0u8; 22]);
        frame.push(239);

        let body = &frame[2..frame.len() - 1];
        assert_eq!(crc8_dvb_s2(body), frame[frame.len() - 1]);
    }

    #[test]
    fn test_table_agrees_with_bitwise() {
        let mut ramp: Vec<u8> = (0..=255u8).collect();
        assert_eq!(crc8_dvb_s2(&ramp), crc8_bitwise(&ramp));

        ramp.reverse();
        assert_eq!(crc8_dvb_s2(&ramp), crc8_bitwise(&ramp));

        for len in 0..32 {
            let data = vec![0xA5u8; len];
            assert_eq!(crc8_dvb_s2(&data), crc8_bitwise(&data), "length {}", len);
        }
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(TABLE[0], 0x00);
        assert_eq!(TABLE[1], POLYNOMIAL);
        assert_eq!(TABLE[0x80], shift_byte(0x80));
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let body = [0x08u8, 0x00, 0x6F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x32];
        let crc = crc8_dvb_s2(&body);

        for i in 0..body.len() {
            for bit in 0..8 {
                let mut corrupted = body;
                corrupted[i] ^= 1 << bit;
                assert_ne!(crc8_dvb_s2(&corrupted), crc, "byte {} bit {}", i, bit);
            }
        }
    }
}
