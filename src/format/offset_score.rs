//! Offset/score payload codec
//!
//! Encodes sequences of `(offset, score)` pairs, the row-value format used
//! by posting-list producers. Independent of row framing: the table treats
//! these bytes as opaque. A value is a concatenation of tagged blocks;
//! decoding operations loop until the input is exhausted.
//!
//! ## Block Formats
//!
//! ### FLEXI (tag 0x00)
//! ```text
//! ┌───────┬──────────────┬──────────┬──────────────┬───────┬────────┐
//! │ count │ first_offset │ step_gcd │ step stream  │ flags │ scores │
//! └───────┴──────────────┴──────────┴──────────────┴───────┴────────┘
//! ```
//! Offsets advance by `step_gcd * (min_step + increment)`. Increments are
//! absent (uniform), packed two per byte, one per byte (both through the
//! RLE codec), or varints, depending on the `max_step - min_step` range.
//! Scores are raw f32 or 1/2/3-byte offsets from a minimum; flag bit 0x80
//! stores only the first score and broadcasts it.
//!
//! ### WITH_PREDICTION (tag 0x01)
//! ```text
//! ┌───────┬──────────────┬────────────┬───────────────┬──────┬─────────┐
//! │ count │ first_offset │ step table │ indices/deltas│ mask │ entries │
//! └───────┴──────────────┴────────────┴───────────────┴──────┴─────────┘
//! ```
//! Each entry is an f32 score, plus four f32 percentile bands (5/25/75/95)
//! when its bit is set in the RLE-compressed probability mask.

use crate::error::{Result, TableError};

use super::{rle, varint};

/// Leading byte of a FLEXI block
pub const TAG_FLEXI: u8 = 0x00;

/// Leading byte of a WITH_PREDICTION block
pub const TAG_WITH_PREDICTION: u8 = 0x01;

/// Step tables larger than this are cheaper to skip than to index into
const STEP_TABLE_MAX: usize = 15;

/// Percentile bands attached to a scored offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub pct5: f32,
    pub pct25: f32,
    pub pct75: f32,
    pub pct95: f32,
}

/// A single scored offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetScore {
    pub offset: u64,
    pub score: f32,
    pub prediction: Option<Prediction>,
}

impl OffsetScore {
    /// A scored offset without percentile bands
    pub fn new(offset: u64, score: f32) -> Self {
        Self { offset, score, prediction: None }
    }
}

// =============================================================================
// Stream Operations
// =============================================================================

/// Decode every block in `input`, appending the entries to `out`
pub fn parse(mut input: &[u8], out: &mut Vec<OffsetScore>) -> Result<()> {
    while !input.is_empty() {
        match read_u8(&mut input)? {
            TAG_FLEXI => parse_flexi(&mut input, out)?,
            TAG_WITH_PREDICTION => parse_with_prediction(&mut input, out)?,
            tag => {
                return Err(TableError::format(format!(
                    "unknown offset/score tag 0x{:02x}",
                    tag
                )))
            }
        }
    }
    Ok(())
}

/// Count the entries in `input` without materializing scores
pub fn count(mut input: &[u8]) -> Result<usize> {
    let mut result = 0;
    while !input.is_empty() {
        match read_u8(&mut input)? {
            TAG_FLEXI => result += count_flexi(&mut input)?,
            TAG_WITH_PREDICTION => result += count_with_prediction(&mut input)?,
            tag => {
                return Err(TableError::format(format!(
                    "unknown offset/score tag 0x{:02x}",
                    tag
                )))
            }
        }
    }
    Ok(result)
}

/// Largest offset in `input` without materializing scores; 0 when empty
pub fn max_offset(mut input: &[u8]) -> Result<u64> {
    let mut result = 0;
    while !input.is_empty() {
        let block_max = match read_u8(&mut input)? {
            TAG_FLEXI => max_offset_flexi(&mut input)?,
            TAG_WITH_PREDICTION => max_offset_with_prediction(&mut input)?,
            tag => {
                return Err(TableError::format(format!(
                    "unknown offset/score tag 0x{:02x}",
                    tag
                )))
            }
        };
        result = result.max(block_max);
    }
    Ok(result)
}

// =============================================================================
// FLEXI Decoding
// =============================================================================

fn parse_flexi(input: &mut &[u8], out: &mut Vec<OffsetScore>) -> Result<()> {
    let count = varint::decode_from(input)? as usize;
    if count == 0 {
        return expect_stream_end(input);
    }

    let offsets = decode_flexi_offsets(input, count)?;

    let score_flags = read_u8(input)?;
    let min_score = if score_flags & 0x03 != 0 {
        varint::decode_from(input)?
    } else {
        0
    };

    let stored = if score_flags & 0x80 != 0 { 1 } else { count };

    let mut scores = Vec::with_capacity(count);
    match score_flags & 0x03 {
        0x00 => {
            for _ in 0..stored {
                scores.push(varint::decode_f32_from(input)?);
            }
        }
        0x01 => {
            for _ in 0..stored {
                scores.push((min_score + u64::from(read_u8(input)?)) as f32);
            }
        }
        0x02 => {
            for _ in 0..stored {
                let hi = u64::from(read_u8(input)?);
                let lo = u64::from(read_u8(input)?);
                scores.push((min_score + (hi << 8) + lo) as f32);
            }
        }
        0x03 => {
            for _ in 0..stored {
                let b0 = u64::from(read_u8(input)?);
                let b1 = u64::from(read_u8(input)?);
                let b2 = u64::from(read_u8(input)?);
                scores.push((min_score + (b0 << 16) + (b1 << 8) + b2) as f32);
            }
        }
        _ => unreachable!(),
    }

    // Remaining entries inherit the first score
    let first_score = scores[0];
    scores.resize(count, first_score);

    out.reserve(count);
    for (offset, score) in offsets.into_iter().zip(scores) {
        out.push(OffsetScore::new(offset, score));
    }

    Ok(())
}

/// Decode the offset section of a FLEXI block into concrete offsets
fn decode_flexi_offsets(input: &mut &[u8], count: usize) -> Result<Vec<u64>> {
    let mut offsets = Vec::with_capacity(count);
    offsets.push(varint::decode_from(input)?);

    let step_gcd = varint::decode_from(input)?;

    if step_gcd == 0 {
        offsets.resize(count, offsets[0]);
        return Ok(offsets);
    }

    let min_step = varint::decode_from(input)?;
    let max_step = varint::decode_from(input)?.wrapping_add(min_step);

    if min_step == max_step {
        for i in 1..count {
            offsets.push(advance(offsets[i - 1], step_gcd, min_step));
        }
    } else if max_step - min_step <= 0x0f {
        let mut rle = rle::Reader::new(input);
        let mut i = 1;
        while i < count {
            let packed = rle.read_byte()?;
            offsets.push(advance(
                offsets[i - 1],
                step_gcd,
                min_step + u64::from(packed & 0x0f),
            ));
            if i + 1 < count {
                offsets.push(advance(
                    offsets[i],
                    step_gcd,
                    min_step + u64::from(packed >> 4),
                ));
            }
            i += 2;
        }
        *input = &input[rle.finish()?..];
    } else if max_step - min_step <= 0xff {
        let mut rle = rle::Reader::new(input);
        for i in 1..count {
            let step = u64::from(rle.read_byte()?);
            offsets.push(advance(offsets[i - 1], step_gcd, min_step + step));
        }
        *input = &input[rle.finish()?..];
    } else {
        for i in 1..count {
            let step = varint::decode_from(input)?;
            offsets.push(advance(offsets[i - 1], step_gcd, min_step + step));
        }
    }

    Ok(offsets)
}

fn count_flexi(input: &mut &[u8]) -> Result<usize> {
    let count = varint::decode_from(input)? as usize;
    if count == 0 {
        expect_stream_end(input)?;
        return Ok(0);
    }

    varint::decode_from(input)?; // first offset

    let step_gcd = varint::decode_from(input)?;
    if step_gcd != 0 {
        let min_step = varint::decode_from(input)?;
        let max_step = varint::decode_from(input)?.wrapping_add(min_step);

        if min_step == max_step {
            // No step bytes
        } else if max_step - min_step <= 0x0f {
            let mut rle = rle::Reader::new(input);
            for _ in (1..count).step_by(2) {
                rle.read_byte()?;
            }
            *input = &input[rle.finish()?..];
        } else if max_step - min_step <= 0xff {
            let mut rle = rle::Reader::new(input);
            for _ in 1..count {
                rle.read_byte()?;
            }
            *input = &input[rle.finish()?..];
        } else {
            for _ in 1..count {
                varint::decode_from(input)?;
            }
        }
    }

    skip_flexi_scores(input, count)?;

    Ok(count)
}

fn max_offset_flexi(input: &mut &[u8]) -> Result<u64> {
    let count = varint::decode_from(input)? as usize;
    if count == 0 {
        expect_stream_end(input)?;
        return Ok(0);
    }

    let mut offset = varint::decode_from(input)?;

    let step_gcd = varint::decode_from(input)?;
    if step_gcd != 0 && count > 1 {
        let min_step = varint::decode_from(input)?;
        let max_step = varint::decode_from(input)?.wrapping_add(min_step);

        if min_step == max_step {
            offset = advance(offset, step_gcd, min_step.wrapping_mul(count as u64 - 1));
        } else if max_step - min_step <= 0x0f {
            let mut rle = rle::Reader::new(input);
            let mut i = 1;
            while i < count {
                let packed = rle.read_byte()?;
                offset = advance(offset, step_gcd, min_step + u64::from(packed & 0x0f));
                if i + 1 < count {
                    offset = advance(offset, step_gcd, min_step + u64::from(packed >> 4));
                }
                i += 2;
            }
            *input = &input[rle.finish()?..];
        } else if max_step - min_step <= 0xff {
            let mut rle = rle::Reader::new(input);
            for _ in 1..count {
                let step = u64::from(rle.read_byte()?);
                offset = advance(offset, step_gcd, min_step + step);
            }
            *input = &input[rle.finish()?..];
        } else {
            for _ in 1..count {
                let step = varint::decode_from(input)?;
                offset = advance(offset, step_gcd, min_step + step);
            }
        }
    } else if step_gcd != 0 {
        varint::decode_from(input)?;
        varint::decode_from(input)?;
    }

    skip_flexi_scores(input, count)?;

    // Steps are non-negative, so the last offset is the largest
    Ok(offset)
}

fn skip_flexi_scores(input: &mut &[u8], count: usize) -> Result<()> {
    let score_flags = read_u8(input)?;
    if score_flags & 0x03 != 0 {
        varint::decode_from(input)?;
    }

    let stored = if score_flags & 0x80 != 0 { 1 } else { count };
    let width = match score_flags & 0x03 {
        0x00 => 4,
        0x01 => 1,
        0x02 => 2,
        0x03 => 3,
        _ => unreachable!(),
    };

    skip(input, stored * width)
}

// =============================================================================
// WITH_PREDICTION Decoding
// =============================================================================

fn parse_with_prediction(input: &mut &[u8], out: &mut Vec<OffsetScore>) -> Result<()> {
    let count = varint::decode_from(input)? as usize;
    if count == 0 {
        return expect_stream_end(input);
    }

    let mut offsets = Vec::with_capacity(count);
    offsets.push(varint::decode_from(input)?);

    let steps = decode_step_table(input, count)?;

    if !steps.is_empty() {
        for i in 1..count {
            let index = varint::decode_from(input)? as usize;
            let step = *steps.get(index).ok_or_else(|| {
                TableError::format("step index out of range")
            })?;
            offsets.push(offsets[i - 1].wrapping_add(step));
        }
    } else {
        for i in 1..count {
            let delta = varint::decode_from(input)?;
            offsets.push(offsets[i - 1].wrapping_add(delta));
        }
    }

    let mask = decode_prob_mask(input, count)?;

    out.reserve(count);
    for (i, offset) in offsets.into_iter().enumerate() {
        let score = varint::decode_f32_from(input)?;
        let prediction = if mask[i >> 3] & (1 << (i & 7)) != 0 {
            Some(Prediction {
                pct5: varint::decode_f32_from(input)?,
                pct25: varint::decode_f32_from(input)?,
                pct75: varint::decode_f32_from(input)?,
                pct95: varint::decode_f32_from(input)?,
            })
        } else {
            None
        };
        out.push(OffsetScore { offset, score, prediction });
    }

    Ok(())
}

fn count_with_prediction(input: &mut &[u8]) -> Result<usize> {
    let mut scratch = Vec::new();
    parse_with_prediction(input, &mut scratch)?;
    Ok(scratch.len())
}

fn max_offset_with_prediction(input: &mut &[u8]) -> Result<u64> {
    let count = varint::decode_from(input)? as usize;
    if count == 0 {
        return Err(TableError::format("empty offset/score block"));
    }

    let mut result = varint::decode_from(input)?;

    let steps = decode_step_table(input, count)?;

    if !steps.is_empty() {
        for _ in 1..count {
            let index = varint::decode_from(input)? as usize;
            let step = *steps.get(index).ok_or_else(|| {
                TableError::format("step index out of range")
            })?;
            result = result.wrapping_add(step);
        }
    } else {
        for _ in 1..count {
            result = result.wrapping_add(varint::decode_from(input)?);
        }
    }

    let mask = decode_prob_mask(input, count)?;

    for i in 0..count {
        let bands = if mask[i >> 3] & (1 << (i & 7)) != 0 { 5 } else { 1 };
        skip(input, bands * 4)?;
    }

    Ok(result)
}

/// Decode the delta-encoded step table of a WITH_PREDICTION block
fn decode_step_table(input: &mut &[u8], count: usize) -> Result<Vec<u64>> {
    let mut steps = Vec::new();

    if count > 1 {
        let step_count = varint::decode_from(input)? as usize;
        if step_count > count + 1 {
            return Err(TableError::format("step table larger than entry count"));
        }

        let mut prev = 0u64;
        for _ in 0..step_count {
            prev = prev.wrapping_add(varint::decode_from(input)?);
            steps.push(prev);
        }
    }

    Ok(steps)
}

/// Decode the RLE-compressed probability mask of a WITH_PREDICTION block
fn decode_prob_mask(input: &mut &[u8], count: usize) -> Result<Vec<u8>> {
    let mask_len = (count + 7) / 8;
    let mut mask = Vec::with_capacity(mask_len);

    let mut rle = rle::Reader::new(input);
    for _ in 0..mask_len {
        mask.push(rle.read_byte()?);
    }
    *input = &input[rle.finish()?..];

    Ok(mask)
}

// =============================================================================
// FLEXI Encoding
// =============================================================================

/// Append a FLEXI block holding `values` to `out`.
///
/// Offsets must be non-decreasing and no value may carry prediction bands;
/// an empty slice encodes to nothing.
pub fn encode_flexi(out: &mut Vec<u8>, values: &[OffsetScore]) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    if values.iter().any(|v| v.prediction.is_some()) {
        return Err(TableError::invariant(
            "prediction bands require the WITH_PREDICTION encoding",
        ));
    }

    let steps = collect_steps(values)?;
    let step_gcd = steps.iter().fold(0u64, |g, &s| gcd(g, s));

    out.push(TAG_FLEXI);
    varint::encode_into(out, values.len() as u64);
    varint::encode_into(out, values[0].offset);
    varint::encode_into(out, step_gcd);

    if step_gcd != 0 {
        let normalized: Vec<u64> = steps.iter().map(|&s| s / step_gcd).collect();
        let min_step = *normalized.iter().min().unwrap();
        let max_step = *normalized.iter().max().unwrap();
        varint::encode_into(out, min_step);
        varint::encode_into(out, max_step - min_step);

        let range = max_step - min_step;
        if range == 0 {
            // Uniform steps need no increment stream
        } else if range <= 0x0f {
            let mut packed = Vec::with_capacity((normalized.len() + 1) / 2);
            for pair in normalized.chunks(2) {
                let lo = (pair[0] - min_step) as u8;
                let hi = pair.get(1).map(|&v| (v - min_step) as u8).unwrap_or(0);
                packed.push(lo | (hi << 4));
            }
            rle::encode_into(out, &packed);
        } else if range <= 0xff {
            let raw: Vec<u8> = normalized.iter().map(|&v| (v - min_step) as u8).collect();
            rle::encode_into(out, &raw);
        } else {
            for &v in &normalized {
                varint::encode_into(out, v - min_step);
            }
        }
    }

    encode_flexi_scores(out, values);

    Ok(())
}

/// Pick the narrowest legal score encoding and append it
fn encode_flexi_scores(out: &mut Vec<u8>, values: &[OffsetScore]) {
    let first_bits = values[0].score.to_bits();
    let broadcast =
        values.len() > 1 && values.iter().all(|v| v.score.to_bits() == first_bits);

    let stored: Vec<f32> = if broadcast {
        vec![values[0].score]
    } else {
        values.iter().map(|v| v.score).collect()
    };

    let mut flags = 0u8;
    let mut min_score = 0u64;

    if let Some(quantized) = quantize_scores(&stored) {
        let min = *quantized.iter().min().unwrap();
        let max = *quantized.iter().max().unwrap();
        let range = max - min;
        flags = if range <= 0xff {
            0x01
        } else if range <= 0xffff {
            0x02
        } else {
            0x03
        };
        min_score = min;
    }

    if broadcast {
        flags |= 0x80;
    }

    out.push(flags);
    if flags & 0x03 != 0 {
        varint::encode_into(out, min_score);
    }

    match flags & 0x03 {
        0x00 => {
            for &score in &stored {
                varint::encode_f32_into(out, score);
            }
        }
        0x01 => {
            for &score in &stored {
                out.push((score as u64 - min_score) as u8);
            }
        }
        0x02 => {
            for &score in &stored {
                let delta = score as u64 - min_score;
                out.push((delta >> 8) as u8);
                out.push(delta as u8);
            }
        }
        0x03 => {
            for &score in &stored {
                let delta = score as u64 - min_score;
                out.push((delta >> 16) as u8);
                out.push((delta >> 8) as u8);
                out.push(delta as u8);
            }
        }
        _ => unreachable!(),
    }
}

/// Integer values of `scores` when every one survives a lossless
/// integer round-trip within the quantized encoding limits
fn quantize_scores(scores: &[f32]) -> Option<Vec<u64>> {
    let mut values = Vec::with_capacity(scores.len());

    for &score in scores {
        if !score.is_finite() || score < 0.0 || score.fract() != 0.0 {
            return None;
        }
        let value = score as u64;
        if (value as f32).to_bits() != score.to_bits() {
            return None;
        }
        values.push(value);
    }

    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    if min > u64::from(u32::MAX) || max - min > 0xff_ffff {
        return None;
    }

    Some(values)
}

// =============================================================================
// WITH_PREDICTION Encoding
// =============================================================================

/// Append a WITH_PREDICTION block holding `values` to `out`.
///
/// Offsets must be non-decreasing; an empty slice encodes to nothing.
pub fn encode_with_prediction(out: &mut Vec<u8>, values: &[OffsetScore]) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }

    let steps = collect_steps(values)?;

    out.push(TAG_WITH_PREDICTION);
    varint::encode_into(out, values.len() as u64);
    varint::encode_into(out, values[0].offset);

    if values.len() > 1 {
        let mut table = steps.clone();
        table.sort_unstable();
        table.dedup();

        if table.len() <= STEP_TABLE_MAX {
            varint::encode_into(out, table.len() as u64);
            let mut prev = 0u64;
            for &step in &table {
                varint::encode_into(out, step - prev);
                prev = step;
            }
            for &step in &steps {
                let index = table.binary_search(&step).unwrap();
                varint::encode_into(out, index as u64);
            }
        } else {
            varint::encode_into(out, 0);
            for &step in &steps {
                varint::encode_into(out, step);
            }
        }
    }

    let mut mask = vec![0u8; (values.len() + 7) / 8];
    for (i, value) in values.iter().enumerate() {
        if value.prediction.is_some() {
            mask[i >> 3] |= 1 << (i & 7);
        }
    }
    rle::encode_into(out, &mask);

    for value in values {
        varint::encode_f32_into(out, value.score);
        if let Some(prediction) = value.prediction {
            varint::encode_f32_into(out, prediction.pct5);
            varint::encode_f32_into(out, prediction.pct25);
            varint::encode_f32_into(out, prediction.pct75);
            varint::encode_f32_into(out, prediction.pct95);
        }
    }

    Ok(())
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Offset deltas between consecutive values; errors on a decrease
fn collect_steps(values: &[OffsetScore]) -> Result<Vec<u64>> {
    values
        .windows(2)
        .map(|pair| {
            pair[1].offset.checked_sub(pair[0].offset).ok_or_else(|| {
                TableError::invariant("offsets must be non-decreasing")
            })
        })
        .collect()
}

fn advance(prev: u64, step_gcd: u64, step: u64) -> u64 {
    prev.wrapping_add(step_gcd.wrapping_mul(step))
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn read_u8(input: &mut &[u8]) -> Result<u8> {
    let byte = *input
        .first()
        .ok_or_else(|| TableError::format("truncated offset/score block"))?;
    *input = &input[1..];
    Ok(byte)
}

fn skip(input: &mut &[u8], n: usize) -> Result<()> {
    if input.len() < n {
        return Err(TableError::format("truncated offset/score block"));
    }
    *input = &input[n..];
    Ok(())
}

/// A zero-count block is only legal as the last thing in a stream
fn expect_stream_end(input: &&[u8]) -> Result<()> {
    if !input.is_empty() {
        return Err(TableError::format(
            "zero-sized offset/score block before end of stream",
        ));
    }
    Ok(())
}
