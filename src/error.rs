//! Error types for dirdrop.
//!
//! Filesystem failures keep the `std::io::Error` they came from as their
//! source, so callers can still match on the original `ErrorKind`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::queue::Stage;

/// Errors raised while reading a zip archive.
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a valid ZIP file")]
    NotZip,

    #[error("invalid End of Central Directory")]
    InvalidEocd,

    #[error("invalid ZIP64 format")]
    InvalidZip64,

    #[error("invalid Central Directory File Header")]
    InvalidCentralHeader,

    #[error("invalid Local File Header for '{0}'")]
    InvalidLocalHeader(String),

    #[error("unsupported compression method {method} for '{name}'")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("encrypted member '{0}' is not supported")]
    Encrypted(String),

    #[error("corrupt data for '{name}': {reason}")]
    Corrupt { name: String, reason: String },

    #[error("CRC mismatch for '{name}': expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
}

/// Errors surfaced by the queue.
///
/// A claim that loses the race to another process is not an error and never
/// shows up here.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Scanning the `todo` tree failed
    #[error("failed to scan '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving an entry from `todo` to `doing` failed
    #[error("failed to claim '{path}': {source}")]
    Claim {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving a claimed entry out of `doing` failed
    #[error("failed to move '{path}' to {stage}: {source}")]
    Finalize {
        path: PathBuf,
        stage: Stage,
        #[source]
        source: io::Error,
    },

    /// Opening or reading a task's content failed
    #[error("failed to read '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A claimed archive is malformed or one of its members is corrupt
    #[error("bad archive '{name}': {source}")]
    Archive {
        name: String,
        #[source]
        source: ZipError,
    },

    /// The task being settled failed to read; its entry stays in `doing`
    #[error("task '{name}' failed to read and cannot be settled")]
    TaskFailed { name: String },

    #[error("no task is waiting for a disposition")]
    NothingToSettle,
}

impl QueueError {
    /// Kind of the underlying filesystem error, if there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            QueueError::Scan { source, .. }
            | QueueError::Claim { source, .. }
            | QueueError::Finalize { source, .. }
            | QueueError::Read { source, .. } => Some(source.kind()),
            QueueError::Archive {
                source: ZipError::Io(source),
                ..
            } => Some(source.kind()),
            QueueError::Archive { .. }
            | QueueError::TaskFailed { .. }
            | QueueError::NothingToSettle => None,
        }
    }
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
