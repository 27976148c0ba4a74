//! Write-once table backend
//!
//! Immutable sorted key/value table files: bulk ingestion through
//! [`TableBuilder`], then point lookups and sequential scans through the
//! memory-mapped [`TableReader`].
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                            │
//! │   Magic: u64 | Major: u8 | Minor: u8 | Flags: u16            │
//! │   Codec: u8 | Level: u8 | Reserved: u16 | IndexOffset: u64   │
//! │   Padding to 32                                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Row Region (sorted by key)                                   │
//! │   [varint total_len][key][0x00][value]                       │
//! │   ... zero-padded up to a 4 KiB boundary ...                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Hash Index (file tail)                                       │
//! │   open-addressed slots of absolute row offsets; 0 = empty    │
//! │   slot width u16/u32/u64 by version and file size            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod hash;
mod header;
mod reader;

use std::path::Path;

pub use builder::TableBuilder;
pub use hash::row_hash;
pub use header::TableHeader;
pub use reader::TableReader;

use crate::backend::{Backend, Table, TableFlag, Whence};
use crate::error::{Result, TableError};
use crate::options::TableOptions;

// =============================================================================
// Shared Constants (used by builder, reader, header)
// =============================================================================

/// Magic constant identifying a table file ("p.i.tabl" as a little-endian
/// u64); a byte-swapped match exposes a wrong-endian file
pub(crate) const MAGIC: u64 = 0x6c6261742e692e70;

/// Format version written by the builder
pub(crate) const MAJOR_VERSION: u8 = 4;
pub(crate) const MINOR_VERSION: u8 = 0;

/// Oldest and newest major versions the reader accepts
pub(crate) const MAJOR_VERSION_MIN: u8 = 2;
pub(crate) const MAJOR_VERSION_MAX: u8 = 4;

/// Fixed on-disk header size
pub const HEADER_SIZE: usize = 32;

/// Header flag: rows are in ascending key order
pub const FLAG_ASCENDING: u16 = 0x0001;

/// Header flag: rows are in descending key order (readers treat files
/// with neither flag as unsorted)
pub const FLAG_DESCENDING: u16 = 0x0002;

/// Key prefix bytes carried in the builder's sort index
pub(crate) const PREFIX_LEN: usize = 24;

/// Largest `key + value` size a row block can hold
pub(crate) const ENTRY_SIZE_LIMIT: usize = 16 * 1024;

/// The hash index starts on this boundary; the zero pad before it also
/// terminates the row region
pub(crate) const INDEX_ALIGNMENT: u64 = 4096;

/// Registry name of this backend
pub const BACKEND_NAME: &str = "write-once";

// =============================================================================
// Table Handle
// =============================================================================

enum Mode {
    /// Created for writing; rows buffer into the builder until `sync`
    Building(TableBuilder),
    /// Opened for reading
    Reading(TableReader),
    /// A write-mode handle after `sync`
    Synced,
}

/// A write-once table handle in either write or read mode
pub struct WriteOnceTable {
    mode: Mode,
    no_relative: bool,
}

impl WriteOnceTable {
    /// Start building a table at `path`; nothing appears there until
    /// [`Table::sync`] succeeds
    pub fn create(path: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        Ok(Self {
            mode: Mode::Building(TableBuilder::new(path.as_ref(), options)?),
            no_relative: false,
        })
    }

    /// Open a finished table at `path` for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            mode: Mode::Reading(TableReader::open(path.as_ref())?),
            no_relative: false,
        })
    }

    /// Whether payload offset lists should be treated as absolute
    pub fn no_relative(&self) -> bool {
        self.no_relative
    }

    fn reader(&self) -> Result<&TableReader> {
        match &self.mode {
            Mode::Reading(reader) => Ok(reader),
            _ => Err(TableError::invariant("table is not open for reading")),
        }
    }

    fn reader_mut(&mut self) -> Result<&mut TableReader> {
        match &mut self.mode {
            Mode::Reading(reader) => Ok(reader),
            _ => Err(TableError::invariant("table is not open for reading")),
        }
    }
}

impl Table for WriteOnceTable {
    fn sync(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Synced) {
            Mode::Building(builder) => builder.build(),
            other => {
                self.mode = other;
                Ok(())
            }
        }
    }

    fn set_flag(&mut self, flag: TableFlag) -> Result<()> {
        match flag {
            TableFlag::NoRelative => self.no_relative = true,
            TableFlag::NoFsync => {
                if let Mode::Building(builder) = &mut self.mode {
                    builder.set_no_fsync(true);
                }
            }
        }
        Ok(())
    }

    fn is_sorted(&self) -> bool {
        match &self.mode {
            Mode::Reading(reader) => reader.is_sorted(),
            _ => false,
        }
    }

    fn insert_row(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match &mut self.mode {
            Mode::Building(builder) => builder.add(key, value),
            _ => Err(TableError::invariant(
                "insert_row on a table not open for writing",
            )),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<()> {
        self.reader_mut()?.seek(offset, whence)
    }

    fn seek_to_key(&mut self, key: &[u8]) -> Result<bool> {
        self.reader_mut()?.seek_to_key(key)
    }

    fn offset(&self) -> Result<u64> {
        Ok(self.reader()?.offset())
    }

    fn read_row(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.reader_mut()?.read_row()
    }
}

// =============================================================================
// Backend Registration
// =============================================================================

/// The write-once backend, registered under [`BACKEND_NAME`]
pub struct WriteOnceBackend;

impl Backend for WriteOnceBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn create(&self, path: &Path, options: &TableOptions) -> Result<Box<dyn Table>> {
        Ok(Box::new(WriteOnceTable::create(path, options.clone())?))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Table>> {
        Ok(Box::new(WriteOnceTable::open(path)?))
    }
}
