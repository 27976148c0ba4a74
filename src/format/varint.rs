//! Variable-byte integer codec
//!
//! Unsigned integers are stored most-significant 7-bit group first; every
//! byte except the last has the high bit set. A `u64` therefore occupies
//! between 1 and 10 bytes. Payload floats are stored as raw little-endian
//! f32, no tagging.

use crate::error::{Result, TableError};

/// Maximum encoded length of a u64
pub const MAX_LEN: usize = 10;

/// Append the encoding of `value` to `buf`
pub fn encode_into(buf: &mut Vec<u8>, mut value: u64) {
    let mut scratch = [0u8; MAX_LEN];
    let mut pos = MAX_LEN - 1;

    scratch[pos] = (value & 0x7f) as u8;
    value >>= 7;

    while value != 0 {
        pos -= 1;
        scratch[pos] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }

    buf.extend_from_slice(&scratch[pos..]);
}

/// Encode `value` into a fresh buffer
pub fn encode(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_LEN);
    encode_into(&mut buf, value);
    buf
}

/// Number of bytes `value` occupies when encoded
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, (bits + 6) / 7)
}

/// Decode one integer from the front of `input`, advancing it past the
/// consumed bytes.
///
/// Errors if `input` ends inside an encoding or the accumulated value
/// overflows 64 bits.
pub fn decode_from(input: &mut &[u8]) -> Result<u64> {
    let mut pos = 0;
    let first = *input
        .first()
        .ok_or_else(|| TableError::format("truncated varint"))?;
    let mut result = u64::from(first & 0x7f);

    while input[pos] & 0x80 != 0 {
        pos += 1;
        let byte = *input
            .get(pos)
            .ok_or_else(|| TableError::format("truncated varint"))?;
        if result >> 57 != 0 {
            return Err(TableError::format("varint overflows 64 bits"));
        }
        result = (result << 7) | u64::from(byte & 0x7f);
    }

    *input = &input[pos + 1..];
    Ok(result)
}

/// Decode one integer from `input`, returning the value and the number of
/// bytes consumed.
pub fn decode(mut input: &[u8]) -> Result<(u64, usize)> {
    let before = input.len();
    let value = decode_from(&mut input)?;
    Ok((value, before - input.len()))
}

/// Append a raw little-endian f32 to `buf`
pub fn encode_f32_into(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Decode a raw little-endian f32 from the front of `input`, advancing it
pub fn decode_f32_from(input: &mut &[u8]) -> Result<f32> {
    let bytes: [u8; 4] = input
        .get(..4)
        .ok_or_else(|| TableError::format("truncated float"))?
        .try_into()
        .unwrap();
    *input = &input[4..];
    Ok(f32::from_le_bytes(bytes))
}
