//! Tests for the offset/score payload codec
//!
//! These tests verify:
//! - FLEXI round-trips across every step and score encoding
//! - WITH_PREDICTION round-trips with and without percentile bands
//! - count/max_offset agreement with parse on the same bytes
//! - Concatenated block streams
//! - Rejection of malformed input

use wormtable::format::offset_score::{
    self, OffsetScore, Prediction, TAG_FLEXI, TAG_WITH_PREDICTION,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn pairs(values: &[(u64, f32)]) -> Vec<OffsetScore> {
    values
        .iter()
        .map(|&(offset, score)| OffsetScore::new(offset, score))
        .collect()
}

/// Encode with FLEXI, decode, and cross-check count and max_offset
fn flexi_round_trip(values: &[OffsetScore]) -> Vec<u8> {
    let mut encoded = Vec::new();
    offset_score::encode_flexi(&mut encoded, values).unwrap();

    let mut decoded = Vec::new();
    offset_score::parse(&encoded, &mut decoded).unwrap();
    assert_eq!(decoded, values);

    assert_eq!(offset_score::count(&encoded).unwrap(), values.len());
    let expected_max = values.iter().map(|v| v.offset).max().unwrap_or(0);
    assert_eq!(offset_score::max_offset(&encoded).unwrap(), expected_max);

    encoded
}

fn prediction_round_trip(values: &[OffsetScore]) -> Vec<u8> {
    let mut encoded = Vec::new();
    offset_score::encode_with_prediction(&mut encoded, values).unwrap();

    let mut decoded = Vec::new();
    offset_score::parse(&encoded, &mut decoded).unwrap();
    assert_eq!(decoded, values);

    assert_eq!(offset_score::count(&encoded).unwrap(), values.len());
    let expected_max = values.iter().map(|v| v.offset).max().unwrap_or(0);
    assert_eq!(offset_score::max_offset(&encoded).unwrap(), expected_max);

    encoded
}

// =============================================================================
// FLEXI Step Encodings
// =============================================================================

#[test]
fn test_flexi_uniform_steps() {
    let values = pairs(&[(10, 1.0), (20, 2.0), (30, 3.0)]);
    let encoded = flexi_round_trip(&values);

    assert_eq!(encoded[0], TAG_FLEXI);
    assert_eq!(offset_score::count(&encoded).unwrap(), 3);
    assert_eq!(offset_score::max_offset(&encoded).unwrap(), 30);
}

#[test]
fn test_flexi_single_entry() {
    flexi_round_trip(&pairs(&[(42, 7.25)]));
}

#[test]
fn test_flexi_identical_offsets() {
    // All-equal offsets collapse to step_gcd = 0
    flexi_round_trip(&pairs(&[(5, 1.0), (5, 2.0), (5, 3.0), (5, 4.0)]));
}

#[test]
fn test_flexi_nibble_steps() {
    // Steps 2,2,6,4 share gcd 2; normalized range 2 fits a nibble
    flexi_round_trip(&pairs(&[
        (100, 1.5),
        (102, 2.5),
        (104, 3.5),
        (110, 4.5),
        (114, 5.5),
    ]));
}

#[test]
fn test_flexi_nibble_steps_even_count() {
    // Even entry count leaves the last high nibble unused
    flexi_round_trip(&pairs(&[(0, 0.5), (1, 0.5), (3, 0.5), (4, 0.5)]));
}

#[test]
fn test_flexi_byte_steps() {
    // Normalized step range 0x10..0xff takes one RLE byte per step
    flexi_round_trip(&pairs(&[(0, 1.0), (1, 1.0), (33, 1.0), (233, 1.0)]));
}

#[test]
fn test_flexi_varint_steps() {
    // Step range past 0xff falls back to one varint per step
    flexi_round_trip(&pairs(&[
        (0, 1.0),
        (1, 2.0),
        (100_000, 3.0),
        (100_001, 4.0),
    ]));
}

#[test]
fn test_flexi_zero_and_positive_steps() {
    // A zero step among positive ones keeps min_step at zero
    flexi_round_trip(&pairs(&[(7, 1.0), (7, 2.0), (9, 3.0), (11, 4.0)]));
}

// =============================================================================
// FLEXI Score Encodings
// =============================================================================

#[test]
fn test_flexi_integer_scores_one_byte() {
    let encoded = flexi_round_trip(&pairs(&[(1, 3.0), (2, 250.0), (3, 17.0)]));
    // tag, count, first, gcd, min_step, range, flags
    assert_eq!(encoded[6] & 0x03, 0x01);
}

#[test]
fn test_flexi_integer_scores_two_bytes() {
    let encoded = flexi_round_trip(&pairs(&[(1, 100.0), (2, 40_000.0)]));
    assert_eq!(encoded[6] & 0x03, 0x02);
}

#[test]
fn test_flexi_integer_scores_three_bytes() {
    let encoded = flexi_round_trip(&pairs(&[(1, 0.0), (2, 1_000_000.0)]));
    assert_eq!(encoded[6] & 0x03, 0x03);
}

#[test]
fn test_flexi_fractional_scores_stay_raw() {
    let encoded = flexi_round_trip(&pairs(&[(1, 1.5), (2, 2.25)]));
    assert_eq!(encoded[6] & 0x03, 0x00);
}

#[test]
fn test_flexi_negative_scores_stay_raw() {
    let encoded = flexi_round_trip(&pairs(&[(1, -1.0), (2, 2.0)]));
    assert_eq!(encoded[6] & 0x03, 0x00);
}

#[test]
fn test_flexi_equal_scores_broadcast() {
    let with_equal = flexi_round_trip(&pairs(&[(1, 9.0), (2, 9.0), (3, 9.0)]));
    assert_eq!(with_equal[6] & 0x80, 0x80);

    let with_distinct = flexi_round_trip(&pairs(&[(1, 9.0), (2, 8.0), (3, 7.0)]));
    assert!(with_distinct.len() > with_equal.len());
}

#[test]
fn test_flexi_huge_score_range_stays_raw() {
    // Integer scores whose range exceeds three bytes cannot be quantized
    let encoded = flexi_round_trip(&pairs(&[(1, 0.0), (2, 16_777_216.0)]));
    assert_eq!(encoded[6] & 0x03, 0x00);
}

// =============================================================================
// WITH_PREDICTION
// =============================================================================

fn bands(pct5: f32, pct25: f32, pct75: f32, pct95: f32) -> Option<Prediction> {
    Some(Prediction { pct5, pct25, pct75, pct95 })
}

#[test]
fn test_prediction_without_bands() {
    let encoded = prediction_round_trip(&pairs(&[(10, 1.0), (13, 2.0), (16, 3.0)]));
    assert_eq!(encoded[0], TAG_WITH_PREDICTION);
}

#[test]
fn test_prediction_with_bands() {
    let values = vec![
        OffsetScore {
            offset: 100,
            score: 0.5,
            prediction: bands(0.1, 0.3, 0.7, 0.9),
        },
        OffsetScore::new(220, 0.75),
        OffsetScore {
            offset: 220,
            score: 0.25,
            prediction: bands(0.05, 0.2, 0.4, 0.6),
        },
    ];
    prediction_round_trip(&values);
}

#[test]
fn test_prediction_single_entry() {
    prediction_round_trip(&[OffsetScore {
        offset: 0,
        score: 1.0,
        prediction: bands(0.0, 0.5, 1.5, 2.0),
    }]);
}

#[test]
fn test_prediction_step_table_reuse() {
    // Two distinct deltas repeated many times land in the step table
    let mut values = Vec::new();
    let mut offset = 0;
    for i in 0..64 {
        offset += if i % 2 == 0 { 3 } else { 17 };
        values.push(OffsetScore::new(offset, i as f32));
    }
    let with_table = prediction_round_trip(&values);

    // The same offsets as raw deltas would need a varint per entry; the
    // indexed form must not be larger
    assert!(with_table.len() <= 2 + values.len() * 6);
}

#[test]
fn test_prediction_many_distinct_deltas_skip_table() {
    // More distinct deltas than the table threshold fall back to raw
    let mut values = Vec::new();
    let mut offset = 0u64;
    for i in 0..40u64 {
        offset += 1000 + i * 7;
        values.push(OffsetScore::new(offset, 1.0));
    }
    prediction_round_trip(&values);
}

// =============================================================================
// Streams
// =============================================================================

#[test]
fn test_empty_list_encodes_to_nothing() {
    let mut encoded = Vec::new();
    offset_score::encode_flexi(&mut encoded, &[]).unwrap();
    offset_score::encode_with_prediction(&mut encoded, &[]).unwrap();
    assert!(encoded.is_empty());

    let mut decoded = Vec::new();
    offset_score::parse(&encoded, &mut decoded).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(offset_score::count(&encoded).unwrap(), 0);
    assert_eq!(offset_score::max_offset(&encoded).unwrap(), 0);
}

#[test]
fn test_concatenated_blocks() {
    let first = pairs(&[(1, 1.0), (2, 2.0)]);
    let second = vec![OffsetScore {
        offset: 500,
        score: 0.5,
        prediction: bands(0.1, 0.2, 0.8, 0.9),
    }];

    let mut encoded = Vec::new();
    offset_score::encode_flexi(&mut encoded, &first).unwrap();
    offset_score::encode_with_prediction(&mut encoded, &second).unwrap();

    let mut decoded = Vec::new();
    offset_score::parse(&encoded, &mut decoded).unwrap();
    assert_eq!(decoded.len(), 3);
    assert_eq!(&decoded[..2], &first[..]);
    assert_eq!(&decoded[2..], &second[..]);

    assert_eq!(offset_score::count(&encoded).unwrap(), 3);
    assert_eq!(offset_score::max_offset(&encoded).unwrap(), 500);
}

// =============================================================================
// Malformed Input
// =============================================================================

#[test]
fn test_unknown_tag_fails() {
    let mut decoded = Vec::new();
    assert!(offset_score::parse(&[0x17, 0x00], &mut decoded).is_err());
    assert!(offset_score::count(&[0x17, 0x00]).is_err());
    assert!(offset_score::max_offset(&[0x17, 0x00]).is_err());
}

#[test]
fn test_truncated_block_fails() {
    let mut encoded = Vec::new();
    offset_score::encode_flexi(&mut encoded, &pairs(&[(1, 1.5), (9, 2.5)])).unwrap();
    encoded.truncate(encoded.len() - 2);

    let mut decoded = Vec::new();
    assert!(offset_score::parse(&encoded, &mut decoded).is_err());
}

#[test]
fn test_zero_count_block_must_end_stream() {
    // A lone zero-count block is accepted...
    let mut decoded = Vec::new();
    offset_score::parse(&[TAG_FLEXI, 0x00], &mut decoded).unwrap();
    assert!(decoded.is_empty());

    // ...but trailing bytes after one are not
    assert!(offset_score::parse(&[TAG_FLEXI, 0x00, 0x01], &mut decoded).is_err());
}

#[test]
fn test_decreasing_offsets_rejected() {
    let mut encoded = Vec::new();
    let values = pairs(&[(10, 1.0), (5, 2.0)]);
    assert!(offset_score::encode_flexi(&mut encoded, &values).is_err());
    assert!(offset_score::encode_with_prediction(&mut encoded, &values).is_err());
    // A failed encode leaves the buffer untouched
    assert!(encoded.is_empty());
}

#[test]
fn test_flexi_rejects_prediction_bands() {
    let values = vec![OffsetScore {
        offset: 1,
        score: 1.0,
        prediction: bands(0.0, 0.0, 0.0, 0.0),
    }];
    let mut encoded = Vec::new();
    assert!(offset_score::encode_flexi(&mut encoded, &values).is_err());
}
