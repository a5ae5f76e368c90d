//! Core error types for the Salvor recovery engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source device or image could not be opened
    #[error("cannot open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    /// Permission denied opening the source
    #[error("permission denied: {0} (re-run with elevated privileges)")]
    PermissionDenied(String),

    /// Mid-scan read failure; callers truncate the chunk and continue
    #[error("read failed at offset {offset}: {reason}")]
    Read { offset: u64, reason: String },

    /// Offset is out of bounds for the source
    #[error("offset {offset} is out of bounds (source size {size})")]
    OutOfBounds { offset: u64, size: u64 },

    /// Invalid file format or on-disk structure
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
