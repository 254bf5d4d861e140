//! Endian-aware primitive readers and fixed-width ASCII decoders (spec §4.1).
//!
//! These are total on well-formed fixed-width records: the only failure is a
//! buffer too short for the field being read. Length validation against a
//! record's declared size is the parser's job, not the decoder's.

use crate::error::DecodeError;

macro_rules! read_be {
    ($name:ident, $ty:ty, $n:expr) => {
        pub fn $name(buf: &[u8], offset: usize) -> Result<$ty, DecodeError> {
            let bytes = buf
                .get(offset..offset + $n)
                .ok_or(DecodeError::BufferTooShort {
                    offset,
                    need: $n,
                    have: buf.len().saturating_sub(offset),
                })?;
            let mut arr = [0u8; $n];
            arr.copy_from_slice(bytes);
            Ok(<$ty>::from_be_bytes(arr))
        }
    };
}

macro_rules! read_le {
    ($name:ident, $ty:ty, $n:expr) => {
        pub fn $name(buf: &[u8], offset: usize) -> Result<$ty, DecodeError> {
            let bytes = buf
                .get(offset..offset + $n)
                .ok_or(DecodeError::BufferTooShort {
                    offset,
                    need: $n,
                    have: buf.len().saturating_sub(offset),
                })?;
            let mut arr = [0u8; $n];
            arr.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(arr))
        }
    };
}

read_be!(read_u8_be, u8, 1);
read_be!(read_u16_be, u16, 2);
read_be!(read_u32_be, u32, 4);
read_be!(read_u64_be, u64, 8);

read_le!(read_u8_le, u8, 1);
read_le!(read_u16_le, u16, 2);
read_le!(read_u32_le, u32, 4);
read_le!(read_u64_le, u64, 8);

/// Right-justified, space-padded base-10 ASCII integer.
///
/// Scans from the right; the first space encountered terminates accumulation.
/// Any other non-digit character contributes zero without aborting the scan,
/// matching the legacy behavior this decoder reproduces.
pub fn ascii_atoi(buf: &[u8]) -> u64 {
    let mut result: u64 = 0;
    let mut exp: u64 = 1;
    for &b in buf.iter().rev() {
        if b == b' ' {
            break;
        }
        if b.is_ascii_digit() {
            result += u64::from(b - b'0') * exp;
        }
        exp *= 10;
    }
    result
}

/// Fixed-width ISE-style price: 10 ASCII bytes, 6 whole digits followed by 4
/// fractional digits, space-padded. Returns the price as an integer number of
/// 1e-4 units (e.g. `" 100.5000"`-shaped input `"  100 5000"` -> 1_005_000).
///
/// Requires `buf.len() >= 10`.
pub fn ascii_price10(buf: &[u8]) -> Result<u64, DecodeError> {
    if buf.len() < 10 {
        return Err(DecodeError::BufferTooShort {
            offset: 0,
            need: 10,
            have: buf.len(),
        });
    }
    let mut result: u64 = 0;

    // fractional digits: buf[6..10], most significant first, weight 1000 down to 1
    let mut exp: u64 = 1000;
    for &b in &buf[6..10] {
        if b == b' ' {
            break;
        }
        if b.is_ascii_digit() {
            result += u64::from(b - b'0') * exp;
        }
        exp /= 10;
    }

    // whole digits: buf[0..6], scanned right-to-left, weight 10_000 upward
    let mut exp: u64 = 10_000;
    for &b in buf[0..6].iter().rev() {
        if b == b' ' {
            break;
        }
        if b.is_ascii_digit() {
            result += u64::from(b - b'0') * exp;
        }
        exp *= 10;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn be_round_trip() {
        let buf = 0x0102_0304_0506_0708u64.to_be_bytes();
        assert_eq!(read_u64_be(&buf, 0).unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(read_u32_be(&buf, 0).unwrap(), 0x0102_0304);
        assert_eq!(read_u16_be(&buf, 0).unwrap(), 0x0102);
        assert_eq!(read_u8_be(&buf, 0).unwrap(), 0x01);
    }

    #[test]
    fn le_round_trip() {
        let buf = 0x0102_0304_0506_0708u64.to_le_bytes();
        assert_eq!(read_u64_le(&buf, 0).unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(read_u32_le(&buf, 0).unwrap(), 0x0102_0304);
    }

    #[test]
    fn short_buffer_fails() {
        let buf = [0u8; 2];
        assert!(read_u32_be(&buf, 0).is_err());
        assert!(read_u64_le(&buf, 0).is_err());
    }

    #[test]
    fn atoi_examples_from_spec() {
        assert_eq!(ascii_atoi(b"  42"), 42);
        assert_eq!(ascii_atoi(b" 4 2"), 2);
        assert_eq!(ascii_atoi(b"0000000001"), 1);
        assert_eq!(ascii_atoi(b"          "), 0);
    }

    #[test]
    fn price10_spec_example() {
        // "   100" (right-justified, 6 wide) + "5000" == 100.5000 -> 1_005_000
        assert_eq!(ascii_price10(b"   1005000").unwrap(), 1_005_000);
        assert_eq!(ascii_price10(b"0000100000").unwrap(), 100_000);
    }

    #[test]
    fn price10_too_short() {
        assert!(ascii_price10(b"12345").is_err());
    }

    proptest! {
        /// Every integer round-trips through the big-endian and little-endian
        /// readers (spec §8 property 6).
        #[test]
        fn u32_round_trips_both_endians(value: u32) {
            let be = value.to_be_bytes();
            prop_assert_eq!(read_u32_be(&be, 0).unwrap(), value);
            let le = value.to_le_bytes();
            prop_assert_eq!(read_u32_le(&le, 0).unwrap(), value);
        }

        #[test]
        fn u64_round_trips_both_endians(value: u64) {
            let be = value.to_be_bytes();
            prop_assert_eq!(read_u64_be(&be, 0).unwrap(), value);
            let le = value.to_le_bytes();
            prop_assert_eq!(read_u64_le(&le, 0).unwrap(), value);
        }

        /// A zero-padded decimal string always decodes to the value it spells
        /// out, for any value that fits in the field width.
        #[test]
        fn atoi_round_trips_zero_padded(value in 0u64..10_000_000_000) {
            let s = format!("{value:010}");
            prop_assert_eq!(ascii_atoi(s.as_bytes()), value);
        }
    }
}
