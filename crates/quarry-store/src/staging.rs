use crate::StoreError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const STAGED_SUFFIX: &str = "archive";

/// Scratch directory holding archives between retrieval and extraction.
///
/// Each `(tool id, version)` maps to one deterministic file name. A stale file
/// at that name is deleted before restaging, so two runs staging the same tool
/// at once would race; callers serialize runs (see [`lock_file`](Self::lock_file)).
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Deterministic staging path for a tool. Characters outside
    /// `[A-Za-z0-9._-]` are replaced so ids can never introduce separators.
    pub fn staged_path(&self, id: &str, version: &str) -> PathBuf {
        self.dir.join(format!(
            "{}@{}.{STAGED_SUFFIX}",
            sanitize_component(id),
            sanitize_component(version)
        ))
    }

    /// Ensure the directory exists and nothing stale sits at the tool's path.
    pub fn prepare(&self, id: &str, version: &str) -> Result<PathBuf, StoreError> {
        self.initialize()?;
        let path = self.staged_path(id, version);
        if path.exists() {
            debug!("removing stale staged archive {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(path)
    }

    /// Copy a local archive byte-for-byte into staging.
    pub fn stage_local(&self, source: &Path, id: &str, version: &str) -> Result<PathBuf, StoreError> {
        let dest = self.prepare(id, version)?;
        let mut input = File::open(source).map_err(|e| StoreError::StageSource {
            path: source.display().to_string(),
            source: e,
        })?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        let copied = io::copy(&mut input, &mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        debug!(
            "staged {} ({copied} bytes) from {}",
            dest.display(),
            source.display()
        );
        Ok(dest)
    }

    /// Remove a staged archive; a missing file is not an error.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!("discarded staged archive {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to discard staged archive {}: {e}", path.display()),
        }
    }
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_path_is_deterministic() {
        let staging = StagingArea::new("/tmp/quarry-staging");
        assert_eq!(
            staging.staged_path("godot", "4.3"),
            PathBuf::from("/tmp/quarry-staging/godot@4.3.archive")
        );
        assert_eq!(
            staging.staged_path("godot", "4.3"),
            staging.staged_path("godot", "4.3")
        );
    }

    #[test]
    fn staged_path_cannot_escape_directory() {
        let staging = StagingArea::new("/tmp/quarry-staging");
        let p = staging.staged_path("../../etc", "x/y");
        assert_eq!(p.parent(), Some(Path::new("/tmp/quarry-staging")));
        assert_eq!(
            p.file_name().and_then(|n| n.to_str()),
            Some(".._.._etc@x_y.archive")
        );
    }

    #[test]
    fn prepare_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.initialize().unwrap();
        let stale = staging.staged_path("godot", "4.3");
        fs::write(&stale, b"stale").unwrap();

        let path = staging.prepare("godot", "4.3").unwrap();
        assert_eq!(path, stale);
        assert!(!path.exists());
    }

    #[test]
    fn stage_local_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("godot.tar");
        fs::write(&src, b"archive-bytes").unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));

        let staged = staging.stage_local(&src, "godot", "4.3").unwrap();
        assert_eq!(fs::read(&staged).unwrap(), b"archive-bytes");
        assert!(src.exists(), "source must be left in place");

        staging.discard(&staged);
        assert!(!staged.exists());
        staging.discard(&staged);
    }

    #[test]
    fn stage_local_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        let err = staging
            .stage_local(&dir.path().join("missing.tar"), "a", "1")
            .unwrap_err();
        assert!(matches!(err, StoreError::StageSource { .. }));
    }
}
