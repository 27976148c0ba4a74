//! Run-length byte stream codec
//!
//! Used by the offset/score payload codec for step and mask bytes. Any
//! byte with both top bits set (`b & 0xc0 == 0xc0`) introduces a run:
//! `b & 0x3f` is the extra-repeat count and the following byte is the
//! value, repeated `(b & 0x3f) + 1` times in total. Every other byte
//! stands for itself, which means a literal with both top bits set must be
//! escaped as a run of one.

use crate::error::{Result, TableError};

/// Longest run a single introducer byte can express
const MAX_RUN: usize = 0x3f + 1;

/// Append the run-length encoding of `bytes` to `out`
pub fn encode_into(out: &mut Vec<u8>, bytes: &[u8]) {
    let mut rest = bytes;

    while let Some((&value, _)) = rest.split_first() {
        let mut run = rest.iter().take_while(|&&b| b == value).count();
        rest = &rest[run..];

        if run == 1 && (value & 0xc0) != 0xc0 {
            out.push(value);
            continue;
        }

        while run > 0 {
            let chunk = run.min(MAX_RUN);
            out.push(0xc0 | (chunk - 1) as u8);
            out.push(value);
            run -= chunk;
        }
    }
}

/// Streaming decoder over a borrowed byte slice.
///
/// The decoder does not know how many logical bytes the stream holds; the
/// caller reads exactly as many as the surrounding format dictates, then
/// calls [`Reader::finish`] to recover the number of raw bytes consumed.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    run: usize,
}

impl<'a> Reader<'a> {
    /// Start decoding at the front of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, run: 0 }
    }

    /// Decode the next logical byte
    pub fn read_byte(&mut self) -> Result<u8> {
        if self.run > 0 {
            self.run -= 1;
        } else {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| TableError::format("truncated RLE stream"))?;
            if byte & 0xc0 == 0xc0 {
                self.run = (byte & 0x3f) as usize;
                self.pos += 2;
                if self.pos > self.data.len() {
                    return Err(TableError::format("truncated RLE run"));
                }
            } else {
                self.pos += 1;
            }
        }

        Ok(self.data[self.pos - 1])
    }

    /// Finish decoding, returning the number of raw bytes consumed.
    ///
    /// Errors if a run is still open, which means the caller's read count
    /// disagrees with the encoder's.
    pub fn finish(self) -> Result<usize> {
        if self.run != 0 {
            return Err(TableError::format("RLE stream ends inside a run"));
        }
        Ok(self.pos)
    }
}
