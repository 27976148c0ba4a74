//! Table builder
//!
//! Ingests unordered key/value pairs and produces a finished table file.
//! Raw pairs stream to an anonymous spill file next to the destination; a
//! compact in-memory index carries a 24-byte key prefix per row. `build`
//! stable-sorts the index (prefix fast path, positional spill reads for
//! tie-breaks), then streams header, re-framed rows and the hash index
//! into a temporary file that is atomically renamed onto the destination.

use std::cmp::Ordering;
use std::fs::{File, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Result, TableError};
use crate::format::varint;
use crate::options::TableOptions;

use super::hash::row_hash;
use super::header::TableHeader;
use super::{
    ENTRY_SIZE_LIMIT, HEADER_SIZE, INDEX_ALIGNMENT, MAJOR_VERSION, PREFIX_LEN,
};

/// Initial capacity of the in-memory sort index
const INDEX_RESERVE: usize = 64 * 1024;

/// Sort index entry for one spilled row
struct SpillEntry {
    /// Byte position of `key || value` in the spill file
    spill_offset: u64,
    key_size: u32,
    value_size: u32,
    /// First bytes of the key, for the comparator fast path
    prefix: [u8; PREFIX_LEN],
}

/// Accumulates rows and writes a finished table on [`TableBuilder::build`].
///
/// Dropping an un-built builder discards the spill file and leaves nothing
/// at the destination path.
pub struct TableBuilder {
    /// Final destination
    path: PathBuf,
    options: TableOptions,
    /// Anonymous spill file holding raw `key || value` in insertion order
    spill: BufWriter<File>,
    /// In-memory index over the spill file
    entries: Vec<SpillEntry>,
    /// Running spill write position
    spill_offset: u64,
    /// Largest key seen, sizes the comparator scratch buffers
    key_size_max: u32,
}

impl TableBuilder {
    /// Create a builder targeting `path`.
    ///
    /// The spill file is created in the destination directory so the
    /// eventual rename stays on one filesystem.
    pub fn new(path: impl Into<PathBuf>, options: TableOptions) -> Result<Self> {
        let path = path.into();
        let spill = tempfile::tempfile_in(table_dir(&path))?;

        Ok(Self {
            path,
            options,
            spill: BufWriter::new(spill),
            entries: Vec::with_capacity(INDEX_RESERVE),
            spill_offset: 0,
            key_size_max: 0,
        })
    }

    /// Buffer one row. Rows may arrive in any order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > u32::MAX as usize {
            return Err(TableError::invariant("key too long"));
        }
        if value.len() > u32::MAX as usize {
            return Err(TableError::invariant("value too long"));
        }
        if key.contains(&0) {
            return Err(TableError::invariant("key contains a NUL byte"));
        }
        if key.len() + value.len() > ENTRY_SIZE_LIMIT {
            // Oversized entries would need dedicated blocks, which no
            // format version defines yet.
            return Err(TableError::invariant("entry does not fit a block"));
        }

        let mut prefix = [0u8; PREFIX_LEN];
        let prefix_len = PREFIX_LEN.min(key.len());
        prefix[..prefix_len].copy_from_slice(&key[..prefix_len]);

        self.entries.push(SpillEntry {
            spill_offset: self.spill_offset,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
            prefix,
        });

        self.spill.write_all(key)?;
        self.spill.write_all(value)?;

        self.spill_offset += (key.len() + value.len()) as u64;
        self.key_size_max = self.key_size_max.max(key.len() as u32);

        Ok(())
    }

    /// Number of rows buffered so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Skip the fsync after the table is renamed into place
    pub fn set_no_fsync(&mut self, value: bool) {
        self.options.no_fsync = value;
    }

    /// Sort, write and atomically publish the table file.
    ///
    /// On any failure after the temporary output file exists it is
    /// unlinked before the error propagates.
    pub fn build(self) -> Result<()> {
        let TableBuilder {
            path,
            options,
            spill,
            mut entries,
            key_size_max,
            ..
        } = self;

        // into_inner flushes the buffered spill tail
        let spill = spill.into_inner().map_err(io::IntoInnerError::into_error)?;

        sort_entries(&spill, &mut entries, key_size_max)?;

        let file_name = path
            .file_name()
            .ok_or_else(|| TableError::invariant("table path has no file name"))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(
                "{}.tmp.{}.",
                file_name.to_string_lossy(),
                std::process::id()
            ))
            .tempfile_in(table_dir(&path))?;

        write_table(temp.as_file(), &spill, &entries, &options)?;

        temp.as_file()
            .set_permissions(Permissions::from_mode(options.file_mode))?;

        let persisted = if options.exclusive {
            temp.persist_noclobber(&path)
        } else {
            temp.persist(&path)
        };
        let file = persisted.map_err(|e| TableError::Io(e.error))?;

        if !options.no_fsync {
            file.sync_all()?;
        }

        Ok(())
    }
}

/// Directory holding `path`, defaulting to the working directory
fn table_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Stable sort of the spill index.
///
/// The 24-byte prefixes decide most comparisons; ties fall back to
/// positional reads of the full keys, reusing two scratch buffers sized to
/// the largest key. Stability keeps duplicate keys in insertion order.
fn sort_entries(spill: &File, entries: &mut [SpillEntry], key_size_max: u32) -> Result<()> {
    let mut lhs_buf = vec![0u8; key_size_max as usize];
    let mut rhs_buf = vec![0u8; key_size_max as usize];

    // A comparator cannot abort the sort, so the first read failure is
    // parked here and every later comparison degrades to Equal.
    let mut io_error: Option<io::Error> = None;
    let mut tie_break_reads = 0u64;

    entries.sort_by(|lhs, rhs| {
        let lhs_prefix = &lhs.prefix[..PREFIX_LEN.min(lhs.key_size as usize)];
        let rhs_prefix = &rhs.prefix[..PREFIX_LEN.min(rhs.key_size as usize)];

        let fast = lhs_prefix.cmp(rhs_prefix);
        if fast != Ordering::Equal {
            return fast;
        }

        if io_error.is_some() {
            return Ordering::Equal;
        }

        let lhs_key = &mut lhs_buf[..lhs.key_size as usize];
        let rhs_key = &mut rhs_buf[..rhs.key_size as usize];
        if let Err(e) = spill
            .read_exact_at(lhs_key, lhs.spill_offset)
            .and_then(|_| spill.read_exact_at(rhs_key, rhs.spill_offset))
        {
            io_error = Some(e);
            return Ordering::Equal;
        }
        tie_break_reads += 2;

        (*lhs_key).cmp(&*rhs_key)
    });

    if let Some(error) = io_error {
        return Err(error.into());
    }

    tracing::debug!(
        entries = entries.len(),
        tie_break_reads,
        "sorted spill index"
    );
    Ok(())
}

/// Stream header, rows and hash index into `file`
fn write_table(
    file: &File,
    spill: &File,
    entries: &[SpillEntry],
    options: &TableOptions,
) -> Result<()> {
    let mut writer = BufWriter::new(file);
    let mut header = TableHeader::new(options.compression.id(), options.compression_level);

    // Placeholder; rewritten below once index_offset is known
    writer.write_all(&header.encode())?;

    let mut offset = HEADER_SIZE as u64;
    let mut buckets = Vec::with_capacity(entries.len());
    let mut row_buf = Vec::new();
    let mut frame = Vec::with_capacity(varint::MAX_LEN);

    for entry in entries {
        row_buf.resize(entry.key_size as usize + entry.value_size as usize, 0);
        spill.read_exact_at(&mut row_buf, entry.spill_offset)?;

        let key = &row_buf[..entry.key_size as usize];
        let value = &row_buf[entry.key_size as usize..];

        let inner = key.len() as u64 + 1 + value.len() as u64;
        frame.clear();
        varint::encode_into(&mut frame, inner);

        writer.write_all(&frame)?;
        writer.write_all(key)?;
        writer.write_all(&[0])?;
        writer.write_all(value)?;

        buckets.push((row_hash(MAJOR_VERSION, key), offset));
        offset += frame.len() as u64 + inner;
    }

    // Pad the row region up to a 4 KiB boundary; the zeros double as the
    // end-of-rows terminator and keep madvise ranges page-aligned.
    let index_offset = (offset + (INDEX_ALIGNMENT - 1)) & !(INDEX_ALIGNMENT - 1);
    writer.write_all(&vec![0u8; (index_offset - offset) as usize])?;

    // Open-addressed index, load factor at most 1/2
    let index_size = if entries.is_empty() {
        0
    } else {
        (entries.len() as u64 * 2).next_power_of_two()
    };

    let mut slots = vec![0u64; index_size as usize];
    for &(hash, row_offset) in &buckets {
        let mut bucket = (hash % index_size) as usize;
        while slots[bucket] != 0 {
            bucket += 1;
            if bucket == slots.len() {
                bucket = 0;
            }
        }
        slots[bucket] = row_offset;
    }

    for slot in &slots {
        writer.write_all(&slot.to_le_bytes())?;
    }
    writer.flush()?;
    drop(writer);

    header.index_offset = index_offset;
    file.write_all_at(&header.encode(), 0)?;

    tracing::debug!(
        rows = entries.len(),
        index_slots = index_size,
        index_offset,
        "wrote table"
    );
    Ok(())
}
