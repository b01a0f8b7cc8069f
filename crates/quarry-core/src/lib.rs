//! Hydration orchestration for Quarry.
//!
//! This crate ties together manifest validation, the offline gate, the
//! retrieval client and the staging/verification primitives into the
//! `Hydrator`: given a list of `(id, version)` requests it brings each tool to
//! an installed or failed state and aggregates the outcome into a report. It
//! also provides worker-thread execution with a single-consumer event queue,
//! an in-process "already running" guard, and a cross-process staging lock.

pub mod concurrency;
pub mod hydrator;
pub mod report;
pub mod source;
pub mod testing;
pub mod worker;

pub use concurrency::{RunGuard, StagingLock};
pub use hydrator::{Hydrator, HydratorConfig};
pub use report::{
    BatchFailure, HydrationEvent, HydrationObserver, HydrationReport, ToolOutcome, ToolResult,
};
pub use source::{
    file_url_to_path, resolve_archive_source, ArchiveSource, ManifestSource, MirrorRoot,
};
pub use worker::HydrationHandle;

use quarry_schema::{ManifestIssue, ToolRequest};
use thiserror::Error;

fn join_codes(issues: &[ManifestIssue]) -> String {
    issues
        .iter()
        .map(ManifestIssue::code)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest rejected: {}", join_codes(.0))]
    ManifestRejected(Vec<ManifestIssue>),
    #[error("manifest from {0} is not valid UTF-8")]
    ManifestEncoding(String),
    #[error("store error: {0}")]
    Store(#[from] quarry_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] quarry_remote::RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("a hydration run is already in progress")]
    AlreadyRunning,
    #[error("staging directory '{0}' is locked by another process")]
    StagingLocked(String),
    #[error("{0} is not listed in the manifest")]
    NotInManifest(ToolRequest),
    #[error("archive path '{0}' is relative but no mirror root is configured")]
    NoMirrorRoot(String),
    #[error("unsupported archive source: {0}")]
    UnsupportedSource(String),
    #[error("extraction of {tool} failed: {reason}")]
    Extract { tool: String, reason: String },
    #[error("{0} was extracted but is not present in the library")]
    NotInstalled(ToolRequest),
    #[error("hydration worker panicked")]
    WorkerPanicked,
}

impl CoreError {
    /// Blocked by the offline gate rather than failed.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_policy_denial())
    }
}
