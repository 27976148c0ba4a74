//! Memory-mapped table reader
//!
//! Maps a finished table file read-only and serves sequential scans via a
//! cursor plus point lookups through the tail hash index. Lookups narrow
//! an offset window on sorted tables, so probe chains reject most false
//! candidates without touching row bytes.

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use memmap2::{Advice, Mmap};

use crate::backend::Whence;
use crate::error::{Result, TableError};
use crate::format::varint;

use super::hash::row_hash;
use super::header::TableHeader;
use super::HEADER_SIZE;

/// Read handle over one finished table file.
///
/// The mapping is immutable; the sequential cursor is the only mutable
/// state, so independent readers of the same file never interfere.
pub struct TableReader {
    map: Mmap,
    header: TableHeader,
    /// Width of one hash index slot
    index_bits: u32,
    /// Number of hash index slots
    index_size: u64,
    /// Sequential-read cursor, absolute file offset
    offset: u64,
    madvised_index: bool,
}

impl TableReader {
    /// Map `path` and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size <= HEADER_SIZE as u64 {
            return Err(TableError::format("file too small for a table header"));
        }

        // The file was published by an atomic rename and is never written
        // again, so the shared read-only mapping stays stable.
        let map = unsafe { Mmap::map(&file)? };

        let header_bytes: &[u8; HEADER_SIZE] = map[..HEADER_SIZE].try_into().unwrap();
        let header = TableHeader::decode(header_bytes)?;

        if header.compression != 0 {
            return Err(TableError::Unsupported(format!(
                "compression codec {}",
                header.compression
            )));
        }

        if header.index_offset < HEADER_SIZE as u64 || header.index_offset > size {
            return Err(TableError::format(format!(
                "index offset {} outside file of {} bytes",
                header.index_offset, size
            )));
        }

        let index_bits: u32 = if header.major_version >= 3 {
            64
        } else if header.index_offset <= 0xffff {
            16
        } else if header.index_offset <= 0xffff_ffff {
            32
        } else {
            64
        };

        let entry_width = u64::from(index_bits / 8);
        let tail = size - header.index_offset;
        if tail % entry_width != 0 {
            return Err(TableError::format(format!(
                "index of {} bytes is not a multiple of the {}-byte slot width",
                tail, entry_width
            )));
        }

        Ok(Self {
            map,
            header,
            index_bits,
            index_size: tail / entry_width,
            offset: HEADER_SIZE as u64,
            madvised_index: false,
        })
    }

    /// Whether rows are in ascending key order
    pub fn is_sorted(&self) -> bool {
        self.header.is_ascending()
    }

    /// Cursor position relative to the start of the row region
    pub fn offset(&self) -> u64 {
        self.offset - HEADER_SIZE as u64
    }

    /// Reposition the sequential cursor.
    ///
    /// `Set` takes a non-negative offset from the start of the row region,
    /// `Current` a signed delta, `End` a non-positive offset against the
    /// end of the row region. Targets outside the row region fail.
    pub fn seek(&mut self, delta: i64, whence: Whence) -> Result<()> {
        let target: i128 = match whence {
            Whence::Set => {
                if delta < 0 {
                    return Err(TableError::invariant(
                        "negative offset with Whence::Set",
                    ));
                }
                HEADER_SIZE as i128 + i128::from(delta)
            }
            Whence::Current => i128::from(self.offset) + i128::from(delta),
            Whence::End => {
                if delta > 0 {
                    return Err(TableError::invariant(
                        "positive offset with Whence::End",
                    ));
                }
                i128::from(self.header.index_offset) - i128::from(delta)
            }
        };

        if target < HEADER_SIZE as i128 {
            return Err(TableError::invariant(
                "attempt to seek before start of table",
            ));
        }
        if target > i128::from(self.header.index_offset) {
            return Err(TableError::invariant(
                "attempt to seek past end of table",
            ));
        }

        self.offset = target as u64;
        Ok(())
    }

    /// Decode the row under the cursor and advance past it.
    ///
    /// Returns `None` at the end of the row region, marked either by
    /// reaching `index_offset` or by a zero first byte.
    pub fn read_row(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        let rows_end = self.header.index_offset as usize;
        let pos = self.offset as usize;

        if pos >= rows_end || self.map[pos] == 0 {
            return Ok(None);
        }

        let (frame_len, inner, key_len) = {
            let mut rest = &self.map[pos..rows_end];
            let before = rest.len();
            let inner = varint::decode_from(&mut rest)? as usize;
            let frame_len = before - rest.len();

            if inner > rest.len() {
                return Err(TableError::format("row overruns the row region"));
            }
            let key_len = rest[..inner]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| TableError::format("row key missing NUL terminator"))?;

            (frame_len, inner, key_len)
        };

        let key_start = pos + frame_len;
        self.offset = (key_start + inner) as u64;

        let key = &self.map[key_start..key_start + key_len];
        let value = &self.map[key_start + key_len + 1..key_start + inner];
        Ok(Some((key, value)))
    }

    /// Position the cursor on the row holding `key`.
    ///
    /// Returns false and leaves the cursor untouched when the key is
    /// absent.
    pub fn seek_to_key(&mut self, key: &[u8]) -> Result<bool> {
        if self.index_size == 0 {
            return Ok(false);
        }
        if !self.madvised_index {
            self.madvise_index();
        }

        let mut bucket = row_hash(self.header.major_version, key) % self.index_size;
        let ascending = self.header.is_ascending();

        // Offset window narrowed by row comparisons on sorted tables
        let mut min = 0u64;
        let mut max = self.map.len() as u64;

        let mut fib = [2u64, 1u64];
        let mut collisions = 0usize;

        // The writer keeps the load factor under 1, so an empty slot ends
        // every unsuccessful probe chain; the bound covers foreign files
        // with a full index.
        for _ in 0..self.index_size {
            let slot = self.index_slot(bucket);
            if slot == 0 {
                return Ok(false);
            }

            if slot >= min && slot <= max {
                match self.compare_key_at(slot, key)? {
                    Ordering::Equal => {
                        self.offset = slot;
                        return Ok(true);
                    }
                    Ordering::Less => {
                        if ascending {
                            max = slot;
                        }
                    }
                    Ordering::Greater => {
                        if ascending {
                            min = slot;
                        }
                    }
                }
            }

            if self.header.major_version >= 3 {
                bucket += 1;
                if bucket == self.index_size {
                    bucket = 0;
                }
            } else {
                collisions += 1;
                bucket = (bucket + fib[collisions & 1]) % self.index_size;
                fib[collisions & 1] =
                    fib[collisions & 1].wrapping_add(fib[(collisions + 1) & 1]);
            }
        }

        Ok(false)
    }

    /// Read index slot `bucket` at the configured width
    fn index_slot(&self, bucket: u64) -> u64 {
        let width = (self.index_bits / 8) as usize;
        let start = self.header.index_offset as usize + bucket as usize * width;
        let bytes = &self.map[start..start + width];

        match self.index_bits {
            16 => u64::from(u16::from_le_bytes(bytes.try_into().unwrap())),
            32 => u64::from(u32::from_le_bytes(bytes.try_into().unwrap())),
            _ => u64::from_le_bytes(bytes.try_into().unwrap()),
        }
    }

    /// Compare the caller's key against the NUL-terminated key of the row
    /// starting at `slot`
    fn compare_key_at(&self, slot: u64, key: &[u8]) -> Result<Ordering> {
        let mut pos = slot as usize;

        // Skip the row's length varint
        loop {
            let byte = *self
                .map
                .get(pos)
                .ok_or_else(|| TableError::format("row offset outside file"))?;
            pos += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }

        for &caller_byte in key {
            let disk_byte = *self
                .map
                .get(pos)
                .ok_or_else(|| TableError::format("row offset outside file"))?;
            if disk_byte == 0 {
                // On-disk key is a proper prefix of the caller's
                return Ok(Ordering::Greater);
            }
            if caller_byte != disk_byte {
                return Ok(caller_byte.cmp(&disk_byte));
            }
            pos += 1;
        }

        let disk_byte = *self
            .map
            .get(pos)
            .ok_or_else(|| TableError::format("row offset outside file"))?;
        Ok(if disk_byte == 0 {
            Ordering::Equal
        } else {
            Ordering::Less
        })
    }

    /// Ask the kernel to fault in the index region ahead of probing
    fn madvise_index(&mut self) {
        let base = self.header.index_offset as usize & !0xfff;
        if let Err(error) = self
            .map
            .advise_range(Advice::WillNeed, base, self.map.len() - base)
        {
            tracing::debug!(%error, "madvise on the index region failed");
        }
        self.madvised_index = true;
    }
}
