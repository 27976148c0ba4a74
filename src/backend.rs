//! Table backend abstraction
//!
//! A backend turns paths into [`Table`] handles; the handle carries every
//! operation the storage layer exposes. Backends live in a process-wide
//! registry keyed by name so callers can select one from configuration.
//! The write-once backend registers itself on first registry access.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::Result;
use crate::options::TableOptions;

/// Origin of a cursor seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Non-negative offset from the start of the row region
    Set,
    /// Signed delta from the current cursor
    Current,
    /// Non-positive offset against the end of the row region
    End,
}

/// Per-handle behavior toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFlag {
    /// Payload offset lists are absolute, not delta-encoded
    NoRelative,
    /// Skip the fsync when the table is finalized
    NoFsync,
}

/// One open table, in either write or read mode.
///
/// Write-mode handles accept `insert_row` and are finalized by `sync`;
/// read-mode handles serve the cursor and lookup operations. Calling an
/// operation on a handle in the wrong mode is an `InvariantViolation`.
/// Dropping a write-mode handle before `sync` discards the pending table.
pub trait Table {
    /// Finalize a pending build; a no-op on read-mode handles
    fn sync(&mut self) -> Result<()>;

    /// Toggle a per-handle behavior flag
    fn set_flag(&mut self, flag: TableFlag) -> Result<()>;

    /// Whether rows are in ascending key order
    fn is_sorted(&self) -> bool;

    /// Buffer one row into the pending build
    fn insert_row(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Reposition the sequential cursor
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<()>;

    /// Move the cursor to the first row
    fn seek_to_first(&mut self) -> Result<()> {
        self.seek(0, Whence::Set)
    }

    /// Position the cursor on `key`'s row; false when absent
    fn seek_to_key(&mut self, key: &[u8]) -> Result<bool>;

    /// Cursor position relative to the start of the row region
    fn offset(&self) -> Result<u64>;

    /// Decode the row under the cursor and advance past it
    fn read_row(&mut self) -> Result<Option<(&[u8], &[u8])>>;
}

/// A named table storage implementation
pub trait Backend: Send + Sync {
    /// Registry key for this backend
    fn name(&self) -> &'static str;

    /// Start a new table at `path`, pending until `sync`
    fn create(&self, path: &Path, options: &TableOptions) -> Result<Box<dyn Table>>;

    /// Open a finished table at `path` for reading
    fn open(&self, path: &Path) -> Result<Box<dyn Table>>;
}

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, Arc<dyn Backend>>>> =
    OnceLock::new();

fn registry() -> &'static RwLock<HashMap<&'static str, Arc<dyn Backend>>> {
    REGISTRY.get_or_init(|| {
        let mut backends: HashMap<&'static str, Arc<dyn Backend>> = HashMap::new();
        let write_once: Arc<dyn Backend> = Arc::new(crate::table::WriteOnceBackend);
        backends.insert(write_once.name(), write_once);
        RwLock::new(backends)
    })
}

/// Register `backend` under its name, replacing any previous entry
pub fn register_backend(backend: Arc<dyn Backend>) {
    registry().write().insert(backend.name(), backend);
}

/// Look up a backend by registry name
pub fn backend(name: &str) -> Option<Arc<dyn Backend>> {
    registry().read().get(name).cloned()
}
