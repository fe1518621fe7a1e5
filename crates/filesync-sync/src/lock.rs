//! In-process run lock per replica root

use filesync_types::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

static ACTIVE_ROOTS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a replica root for the lifetime of the guard
#[derive(Debug)]
pub struct RootLock {
    root: PathBuf,
}

impl RootLock {
    /// Claim `root`. Fails if another run in this process holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            Error::filesystem_access(root, format!("Failed to resolve replica root: {}", e))
        })?;

        let mut active = ACTIVE_ROOTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(root.clone()) {
            return Err(Error::sync(format!(
                "'{}' is already being synchronized",
                root.display()
            )));
        }

        debug!("Locked replica root '{}'", root.display());
        Ok(Self { root })
    }

    /// Canonical path of the locked root
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let mut active = ACTIVE_ROOTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.root);
        debug!("Released replica root '{}'", self.root.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp_dir = TempDir::new().unwrap();

        let guard = RootLock::acquire(temp_dir.path()).unwrap();
        let err = RootLock::acquire(temp_dir.path()).unwrap_err();
        assert_eq!(err.kind(), filesync_types::ErrorKind::Sync);

        drop(guard);
        assert!(RootLock::acquire(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_lock_resolves_equivalent_paths() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("inner")).unwrap();

        let _guard = RootLock::acquire(&temp_dir.path().join("inner")).unwrap();
        assert!(RootLock::acquire(&temp_dir.path().join("inner/../inner")).is_err());
    }
}
