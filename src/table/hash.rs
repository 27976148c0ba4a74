//! Row key hashing
//!
//! The hash index stores `hash(key) mod index_size` bucket positions, so
//! writer and reader must agree byte-for-byte across machines. Version 2
//! switched from a seeded 31-polynomial to xxh3; the dispatch keys on the
//! header's major version.

use xxhash_rust::xxh3::xxh3_64;

/// Seed of the pre-version-2 polynomial hash
const LEGACY_SEED: u64 = 0x2257d6803a6f1b2;

/// Hash `key` the way tables of `major_version` index it
pub fn row_hash(major_version: u8, key: &[u8]) -> u64 {
    if major_version < 2 {
        legacy_hash(key)
    } else {
        xxh3_64(key)
    }
}

fn legacy_hash(key: &[u8]) -> u64 {
    let mut hash = LEGACY_SEED;
    for &byte in key {
        hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
    }
    hash
}
