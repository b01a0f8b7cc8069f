//! In-memory [`Library`] and [`Extractor`] for exercising the hydrator.

use quarry_store::{Extractor, Library, StoreError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct FakeLibrary {
    tools: Mutex<BTreeSet<(String, String)>>,
}

impl FakeLibrary {
    pub fn insert(&self, id: &str, version: &str) {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((id.to_owned(), version.to_owned()));
    }
}

impl Library for FakeLibrary {
    fn tool_exists(&self, id: &str, version: &str) -> bool {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(id.to_owned(), version.to_owned()))
    }

    fn get_available_tools(&self) -> Vec<String> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: BTreeSet<String> = tools.iter().map(|(id, _)| id.clone()).collect();
        ids.into_iter().collect()
    }

    fn get_available_versions(&self, id: &str) -> Vec<String> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(tool, _)| tool == id)
            .map(|(_, version)| version.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Record the tool in the attached library.
    Register,
    /// Report success without touching the library.
    Silent,
    Fail,
}

/// Records every call. Archive bytes are read at call time so callers can
/// check what the extractor actually saw.
#[derive(Debug)]
pub struct FakeExtractor {
    behavior: Behavior,
    library: Option<Arc<FakeLibrary>>,
    calls: Mutex<Vec<(PathBuf, String, String, Vec<u8>)>>,
}

impl FakeExtractor {
    pub fn registering(library: Arc<FakeLibrary>) -> Self {
        Self {
            behavior: Behavior::Register,
            library: Some(library),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self {
            behavior: Behavior::Silent,
            library: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            library: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(archive, id, version, archive bytes)` per call, in order.
    pub fn calls(&self) -> Vec<(PathBuf, String, String, Vec<u8>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Extractor for FakeExtractor {
    fn extract_to_library(
        &self,
        archive: &Path,
        id: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        let bytes = std::fs::read(archive).unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((archive.to_path_buf(), id.to_owned(), version.to_owned(), bytes));
        match self.behavior {
            Behavior::Register => {
                if let Some(library) = &self.library {
                    library.insert(id, version);
                }
                Ok(())
            }
            Behavior::Silent => Ok(()),
            Behavior::Fail => Err(StoreError::ExtractFailed("fake extractor refused".to_owned())),
        }
    }
}
