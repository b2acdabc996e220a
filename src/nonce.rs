//! Nonce arithmetic.
//!
//! Nonces are 8-byte big-endian counters handed out by the sequencer. A
//! sequence owns a half-open range `[next, max)`; ranges granted to other
//! devices are carved off the top half so they can never overlap.

use crate::error::{Result, TidelockError};

/// Advances a nonce by the minimum representable increment, refusing to
/// step past `max_nonce` (exclusive).
pub fn increased(nonce: u64, max_nonce: u64, drive_id: &str) -> Result<u64> {
    let next = nonce
        .checked_add(1)
        .ok_or_else(|| TidelockError::RangeExceeded(drive_id.to_owned()))?;

    if next > max_nonce {
        return Err(TidelockError::RangeExceeded(drive_id.to_owned()));
    }

    Ok(next)
}

/// Midpoint of `[start, end)`, used to carve a disjoint sub-range for a
/// newly authorized device. The lower half stays with the grantor.
pub fn split_point(start: u64, end: u64) -> u64 {
    start + (end - start) / 2
}

/// Encodes a nonce in its 8-byte big-endian wire form.
pub fn to_bytes(nonce: u64) -> [u8; 8] {
    nonce.to_be_bytes()
}

/// Decodes a nonce from its 8-byte big-endian wire form.
pub fn from_bytes(bytes: [u8; 8]) -> u64 {
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_within_range() {
        assert_eq!(increased(0, 10, "d").unwrap(), 1);
        assert_eq!(increased(9, 10, "d").unwrap(), 10);
    }

    #[test]
    fn test_increase_past_max() {
        assert!(matches!(increased(10, 10, "d"), Err(TidelockError::RangeExceeded(_))));
    }

    #[test]
    fn test_increase_overflow() {
        assert!(matches!(increased(u64::MAX, u64::MAX, "d"), Err(TidelockError::RangeExceeded(_))));
    }

    #[test]
    fn test_split_point() {
        assert_eq!(split_point(0, 100), 50);
        assert_eq!(split_point(50, 100), 75);
        assert_eq!(split_point(0, u64::MAX), u64::MAX / 2);
    }

    #[test]
    fn test_wire_round_trip() {
        let n = 0x0102_0304_0506_0708;
        assert_eq!(from_bytes(to_bytes(n)), n);
        assert_eq!(to_bytes(1)[7], 1);
    }
}
