//! Error types for wormtable
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using TableError
pub type Result<T> = std::result::Result<T, TableError>;

/// Unified error type for wormtable operations
#[derive(Debug, Error)]
pub enum TableError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // File Format Errors
    // -------------------------------------------------------------------------
    /// Magic mismatch, version out of range, truncated or inconsistent
    /// index, varint overflow, unknown payload tag.
    #[error("format error: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Caller Contract Violations
    // -------------------------------------------------------------------------
    /// Oversized keys or values, seeks outside the row region, writes to a
    /// read-only handle and similar misuse.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // -------------------------------------------------------------------------
    // Recognized But Unimplemented Features
    // -------------------------------------------------------------------------
    /// Well-formed input asking for a feature this build does not carry,
    /// e.g. a compression codec other than "none".
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl TableError {
    /// Shorthand for a `Format` error
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        TableError::Format(msg.into())
    }

    /// Shorthand for an `InvariantViolation` error
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        TableError::InvariantViolation(msg.into())
    }
}
