use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exclusive advisory lock on the staging directory, held for one run.
///
/// Serializes hydration runs from separate processes sharing a staging area.
pub struct StagingLock {
    lock_file: File,
}

impl StagingLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = Self::open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// "Already running" marker for one hydrator. Cleared on drop.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("staging/.lock");

        {
            let _lock = StagingLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");

        let _lock = StagingLock::acquire(&lock_path).unwrap();
        let result = StagingLock::try_acquire(&lock_path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");

        {
            let _lock = StagingLock::acquire(&lock_path).unwrap();
        }

        let lock2 = StagingLock::try_acquire(&lock_path).unwrap();
        assert!(lock2.is_some());
    }

    #[test]
    fn run_guard_is_exclusive_until_dropped() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::try_acquire(&flag).unwrap();
        assert!(RunGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(RunGuard::try_acquire(&flag).is_some());
    }
}
