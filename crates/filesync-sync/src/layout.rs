//! On-disk layout of a replica root
//!
//! Everything the engine writes besides synchronized content lives either in
//! the metadata file or below the state directory:
//!
//! ```text
//! <root>/filesync.id
//! <root>/.filesync/tracking-<replica-id>.bin
//! <root>/.filesync/recycle/<timestamp>-<run-id>/...
//! <root>/.filesync/staging/
//! ```

use filesync_types::{Error, ReplicaId, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Name of the file holding the replica identity
pub const METADATA_FILE_NAME: &str = "filesync.id";

/// Name of the directory holding tracking data, recycle area and staging
pub const STATE_DIR_NAME: &str = ".filesync";

const RECYCLE_DIR_NAME: &str = "recycle";
const STAGING_DIR_NAME: &str = "staging";

/// Resolves engine-owned paths below one replica root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaLayout {
    root: PathBuf,
}

impl ReplicaLayout {
    /// Create a layout for `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Replica root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a root-relative path
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Identity metadata file
    pub fn id_file(&self) -> PathBuf {
        self.root.join(METADATA_FILE_NAME)
    }

    /// Engine state directory
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    /// Tracking store for the given replica identity
    pub fn tracking_file(&self, replica_id: &ReplicaId) -> PathBuf {
        self.state_dir().join(format!("tracking-{}.bin", replica_id))
    }

    /// Recycle area holding one batch directory per run
    pub fn recycle_dir(&self) -> PathBuf {
        self.state_dir().join(RECYCLE_DIR_NAME)
    }

    /// Staging area for in-flight writes
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir().join(STAGING_DIR_NAME)
    }

    /// Create the state directory if needed
    pub async fn ensure_state_dir(&self) -> Result<PathBuf> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::filesystem_access(&dir, format!("Failed to create state directory: {}", e)))?;
        Ok(dir)
    }
}
