//! Persistent replica identity
//!
//! A replica root is identified by a UUID stored as the single line of
//! `<root>/filesync.id`. The file is created on first contact and never
//! rewritten while it holds a valid identifier.

use crate::layout::ReplicaLayout;
use filesync_types::{Error, ReplicaId, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Resolves and creates replica identities
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaIdentity;

impl ReplicaIdentity {
    /// Return the identity of `root`, creating it if none is usable.
    ///
    /// An absent, unreadable, empty or malformed metadata file is replaced by a
    /// freshly generated identifier.
    pub async fn get_or_create<P: AsRef<Path>>(root: P) -> Result<ReplicaId> {
        let root = root.as_ref();

        if let Some(id) = Self::read(root).await? {
            debug!("Resolved replica {} at '{}'", id, root.display());
            return Ok(id);
        }

        let layout = ReplicaLayout::new(root);
        let path = layout.id_file();
        let id = ReplicaId::new_random();

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::filesystem_access(&path, format!("Failed to create replica metadata: {}", e))
            })?;

        file.write_all(format!("{}\n", id).as_bytes())
            .await
            .map_err(|e| {
                Error::filesystem_access(&path, format!("Failed to write replica metadata: {}", e))
            })?;
        file.sync_all().await.map_err(|e| {
            Error::filesystem_access(&path, format!("Failed to flush replica metadata: {}", e))
        })?;

        info!("Created replica {} at '{}'", id, root.display());
        Ok(id)
    }

    /// Read the identity of `root` without creating one.
    ///
    /// Fails only when the root itself is missing or not a directory.
    pub async fn read<P: AsRef<Path>>(root: P) -> Result<Option<ReplicaId>> {
        let root = root.as_ref();
        let metadata = fs::metadata(root)
            .await
            .map_err(|e| Error::filesystem_access(root, format!("Replica root is not accessible: {}", e)))?;
        if !metadata.is_dir() {
            return Err(Error::filesystem_access(root, "Replica root is not a directory"));
        }

        let path = ReplicaLayout::new(root).id_file();
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let line = content.lines().next().unwrap_or_default();
                match line.parse::<ReplicaId>() {
                    Ok(id) => Ok(Some(id)),
                    Err(e) => {
                        warn!("Ignoring malformed replica metadata '{}': {}", path.display(), e);
                        Ok(None)
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!("Ignoring unreadable replica metadata '{}': {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_identity_is_stable_and_not_rewritten() {
        let temp_dir = TempDir::new().unwrap();
        let id_file = ReplicaLayout::new(temp_dir.path()).id_file();

        let first = ReplicaIdentity::get_or_create(temp_dir.path()).await.unwrap();
        let written = std::fs::metadata(&id_file).unwrap().modified().unwrap();
        let content = std::fs::read_to_string(&id_file).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = ReplicaIdentity::get_or_create(temp_dir.path()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(content, format!("{}\n", first));
        assert_eq!(std::fs::read_to_string(&id_file).unwrap(), content);
        assert_eq!(std::fs::metadata(&id_file).unwrap().modified().unwrap(), written);
    }

    #[tokio::test]
    async fn test_malformed_identity_is_regenerated() {
        let temp_dir = TempDir::new().unwrap();
        let id_file = ReplicaLayout::new(temp_dir.path()).id_file();

        for garbage in ["", "\n", "not-a-guid\n"] {
            std::fs::write(&id_file, garbage).unwrap();
            let id = ReplicaIdentity::get_or_create(temp_dir.path()).await.unwrap();
            let stored = std::fs::read_to_string(&id_file).unwrap();
            assert_eq!(stored.trim().parse::<ReplicaId>().unwrap(), id);
        }
    }

    #[tokio::test]
    async fn test_read_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();

        assert_eq!(ReplicaIdentity::read(temp_dir.path()).await.unwrap(), None);
        assert!(!ReplicaLayout::new(temp_dir.path()).id_file().exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_filesystem_access_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent");

        let err = ReplicaIdentity::get_or_create(&missing).await.unwrap_err();
        assert_eq!(err.kind(), filesync_types::ErrorKind::FilesystemAccess);
    }
}
