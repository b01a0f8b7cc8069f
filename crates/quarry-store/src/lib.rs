//! Local filesystem side of tool hydration for Quarry.
//!
//! This crate provides the path safety resolver that confines manifest-supplied
//! archive paths to a trusted mirror root, streaming SHA-256 verification, the
//! `StagingArea` scratch directory, and the `Library`/`Extractor` boundaries
//! together with `DirectoryLibrary`, a tar-backed implementation of both.

pub mod hash;
pub mod library;
pub mod paths;
pub mod staging;

pub use hash::{sha256_bytes, sha256_of, verify_sha256, HASH_CHUNK_SIZE};
pub use library::{DirectoryLibrary, Extractor, Library};
pub use paths::resolve_archive_path;
pub use staging::StagingArea;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive root must not be empty")]
    EmptyRoot,
    #[error("archive path must not be empty")]
    EmptyRelativePath,
    #[error("archive path must be relative: '{0}'")]
    AbsoluteRelativePath(String),
    #[error("archive path '{path}' escapes root '{root}'")]
    EscapesRoot { path: String, root: String },
    #[error("cannot open '{path}' for hashing: {source}")]
    HashOpen {
        path: String,
        source: std::io::Error,
    },
    #[error("read failed while hashing '{path}': {source}")]
    HashRead {
        path: String,
        source: std::io::Error,
    },
    #[error("sha256 mismatch for '{path}': expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("size mismatch for '{path}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("cannot read archive source '{path}': {source}")]
    StageSource {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),
    #[error("extraction failed: {0}")]
    ExtractFailed(String),
}

impl StoreError {
    /// Integrity failures must never be followed by extraction.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::HashMismatch { .. } | Self::SizeMismatch { .. })
    }
}
