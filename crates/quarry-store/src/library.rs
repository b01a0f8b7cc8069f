use crate::paths::resolve_archive_path;
use crate::{fsync_dir, StoreError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read-only view of the local content library.
pub trait Library: Send + Sync {
    fn tool_exists(&self, id: &str, version: &str) -> bool;

    fn get_available_tools(&self) -> Vec<String>;

    fn get_available_versions(&self, id: &str) -> Vec<String>;
}

/// Unpacks a verified archive into the library. Re-extracting after a partial
/// failure must be safe.
pub trait Extractor: Send + Sync {
    fn extract_to_library(&self, archive: &Path, id: &str, version: &str)
        -> Result<(), StoreError>;
}

/// Library laid out as `<root>/<id>/<version>/`, populated from tar archives.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Install directory for a tool, confined to the library root.
    pub fn tool_dir(&self, id: &str, version: &str) -> Result<PathBuf, StoreError> {
        let bad = |s: &str| s.is_empty() || s.contains(['/', '\\']);
        if bad(id) || bad(version) {
            return Err(StoreError::InvalidToolName(format!("{id}@{version}")));
        }
        let dir = resolve_archive_path(&self.root, &format!("{id}/{version}"))?;
        if dir.parent().and_then(Path::file_name) != Some(std::ffi::OsStr::new(id)) {
            return Err(StoreError::InvalidToolName(format!("{id}@{version}")));
        }
        Ok(dir)
    }

    fn list_dirs(dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().to_str().map(str::to_owned))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

impl Library for DirectoryLibrary {
    fn tool_exists(&self, id: &str, version: &str) -> bool {
        let Ok(dir) = self.tool_dir(id, version) else {
            return false;
        };
        fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
    }

    fn get_available_tools(&self) -> Vec<String> {
        Self::list_dirs(&self.root)
            .into_iter()
            .filter(|id| !self.get_available_versions(id).is_empty())
            .collect()
    }

    fn get_available_versions(&self, id: &str) -> Vec<String> {
        Self::list_dirs(&self.root.join(id))
            .into_iter()
            .filter(|version| self.tool_exists(id, version))
            .collect()
    }
}

impl Extractor for DirectoryLibrary {
    fn extract_to_library(
        &self,
        archive: &Path,
        id: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        let target = self.tool_dir(id, version)?;
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::InvalidToolName(format!("{id}@{version}")))?;
        fs::create_dir_all(parent)?;

        // Unpack beside the target, then swap into place.
        let scratch = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(parent)?;
        let file = File::open(archive)?;
        let mut ar = tar::Archive::new(file);
        ar.set_preserve_permissions(true);
        ar.set_preserve_mtime(false);
        ar.set_unpack_xattrs(false);
        ar.unpack(scratch.path())
            .map_err(|e| StoreError::ExtractFailed(format!("{}: {e}", archive.display())))?;

        if target.exists() {
            debug!("replacing previous install at {}", target.display());
            fs::remove_dir_all(&target)?;
        }
        fs::rename(scratch.path(), &target)?;
        fsync_dir(parent)?;
        info!("extracted {id}@{version} into {}", target.display());
        Ok(())
    }
}
