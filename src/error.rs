//! Error types and handling for the FDP simulation kernel.
//!
//! This module defines all error types used throughout the crate,
//! organized the way the teacher codebase groups its failure domains:
//! a top-level enum that wraps per-subsystem error enums via `#[from]`.

use thiserror::Error;

/// Main result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the FDP kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation on a stale or null entity handle in paranoid mode.
    #[error("invalid entity handle: {0:?}")]
    InvalidHandle(crate::ecr::Entity),

    /// Component table lookup for a type that was never registered.
    #[error("component type not registered: {0}")]
    NotRegistered(&'static str),

    /// Component type ID or index queried outside its valid range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Chunk storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Flight recorder encode/decode errors.
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// I/O errors from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk storage specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Chunk commit failed to allocate backing memory.
    #[error("out of memory committing chunk {chunk_idx}")]
    OutOfMemory {
        /// Index of the chunk that failed to commit.
        chunk_idx: usize,
    },

    /// Entity index passed to a chunk table operation was out of bounds.
    #[error("entity index {index} exceeds MAX_ENTITIES ({max})")]
    IndexOutOfBounds {
        /// The offending index.
        index: i32,
        /// The configured entity cap.
        max: i32,
    },
}

/// Flight recorder specific errors.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Global header magic bytes did not match `"FDPREC"`.
    #[error("invalid recording: bad magic bytes")]
    BadMagic,

    /// Global header format version did not match `FORMAT_VERSION`.
    #[error("invalid recording: unsupported format version {found} (expected {expected})")]
    VersionMismatch {
        /// Version found in the file.
        found: u32,
        /// Version this build expects.
        expected: u32,
    },

    /// A frame was truncated before all declared bytes could be read.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame {
        /// Bytes the frame header declared.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The async recorder's background worker stored a write failure.
    #[error("recorder worker failed: {0}")]
    WorkerFailed(String),

    /// `capture_frame`/`capture_keyframe` called after the recorder was
    /// already disposed.
    #[error("recorder already disposed")]
    Disposed,
}

impl Error {
    /// Build an [`Error::OutOfRange`] with a formatted message.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }
}
