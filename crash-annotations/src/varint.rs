//! Base 128 varints, as used for the length prefix of ring buffer records.
//!
//! Each byte holds 7 bits of the value, least significant group first, with
//! the high bit set on every byte except the last.

use crate::Error;

/// The maximum number of bytes a `u32` can be encoded as
pub const MAX_LEN: usize = 5;

const VALUE_MASK: u8 = 0x7f;
const CONTINUATION: u8 = 0x80;
const BITS_PER_BYTE: u32 = 7;

/// The number of bytes `value` is encoded as
#[inline]
pub const fn encoded_len(mut value: u32) -> u32 {
    let mut len = 1;
    while value >= CONTINUATION as u32 {
        value >>= BITS_PER_BYTE;
        len += 1;
    }
    len
}

/// Encodes `value` into `out`, returning the number of bytes written
pub fn encode(mut value: u32, out: &mut [u8; MAX_LEN]) -> usize {
    let mut len = 0;
    while value > VALUE_MASK as u32 {
        out[len] = (value as u8 & VALUE_MASK) | CONTINUATION;
        value >>= BITS_PER_BYTE;
        len += 1;
    }

    out[len] = value as u8;
    len + 1
}

/// Decodes a varint from the front of `bytes`, returning the value and the
/// number of bytes it was encoded as.
///
/// Only the bytes belonging to the varint are consumed, so this can be used
/// with [`Iterator::by_ref`] to continue reading after the varint.
pub fn decode<I: IntoIterator<Item = u8>>(bytes: I) -> Result<(u32, u32), Error> {
    let mut value = 0u32;
    let mut len = 0u32;

    for byte in bytes {
        let shift = len * BITS_PER_BYTE;
        let bits = u32::from(byte & VALUE_MASK);

        // Reject both too many continuation bytes, and bits in the final
        // group that would be shifted out of a u32
        if shift >= u32::BITS || (bits << shift) >> shift != bits {
            return Err(Error::VarintOverflow);
        }

        value |= bits << shift;
        len += 1;

        if byte & CONTINUATION == 0 {
            return Ok((value, len));
        }
    }

    Err(Error::VarintTruncated)
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(value: u32) -> Vec<u8> {
        let mut out = [0; MAX_LEN];
        let len = encode(value, &mut out);
        out[..len].to_vec()
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(1), [0x01]);
        assert_eq!(encoded(0x7f), [0x7f]);
        assert_eq!(encoded(0x80), [0x80, 0x01]);
        assert_eq!(encoded(300), [0xac, 0x02]);
        assert_eq!(encoded(u32::MAX), [0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn lengths() {
        for value in [0, 0x7f, 0x80, 0x3fff, 0x4000, 0x1f_ffff, 0x20_0000, u32::MAX] {
            assert_eq!(encoded_len(value) as usize, encoded(value).len(), "{value:#x}");
        }
    }

    #[test]
    fn decodes_known() {
        assert_eq!(decode([0xac, 0x02]).unwrap(), (300, 2));
        assert_eq!(
            decode([0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap(),
            (u32::MAX, 5)
        );
    }

    #[test]
    fn decode_leaves_trailing_bytes() {
        let mut bytes = [0x05, 0xaa, 0xbb].into_iter();
        assert_eq!(decode(bytes.by_ref()).unwrap(), (5, 1));
        assert_eq!(bytes.next(), Some(0xaa));
    }

    #[test]
    fn rejects_too_many_bytes() {
        assert_eq!(
            decode([0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(Error::VarintOverflow)
        );
    }

    #[test]
    fn rejects_overflowing_final_byte() {
        // Bits 33 and 34 set in the 5th byte
        assert_eq!(
            decode([0x80, 0x80, 0x80, 0x80, 0x60]),
            Err(Error::VarintOverflow)
        );
    }

    #[test]
    fn rejects_truncated() {
        assert_eq!(decode([0u8; 0]), Err(Error::VarintTruncated));
        assert_eq!(decode([0x80, 0x80]), Err(Error::VarintTruncated));
    }
}
