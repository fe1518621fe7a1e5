//! Persistent per-replica baseline
//!
//! The tracking store remembers the signature of every file seen by the last
//! detection pass. It is keyed by replica identity so that a regenerated
//! identity starts from an empty baseline.

use crate::layout::ReplicaLayout;
use filesync_types::{ContentSignature, Error, ReplicaId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const TRACKING_FORMAT_VERSION: u32 = 1;

/// Baseline entries keyed by root-relative path
pub type Baseline = BTreeMap<PathBuf, ContentSignature>;

#[derive(Debug, Serialize, Deserialize)]
struct TrackingFile {
    version: u32,
    replica_id: ReplicaId,
    entries: Baseline,
}

/// Baseline of one replica, loaded from and saved to its state directory
#[derive(Debug)]
pub struct TrackingStore {
    layout: ReplicaLayout,
    replica_id: ReplicaId,
    entries: Baseline,
    dirty: bool,
}

impl TrackingStore {
    /// Create an empty store that has never been persisted
    pub fn empty(layout: ReplicaLayout, replica_id: ReplicaId) -> Self {
        Self {
            layout,
            replica_id,
            entries: Baseline::new(),
            dirty: false,
        }
    }

    /// Load the baseline of `replica_id` from `layout`.
    ///
    /// A missing store, a store written by another format version, or one
    /// that fails to decode yields an empty baseline.
    pub async fn load(layout: &ReplicaLayout, replica_id: ReplicaId) -> Result<Self> {
        let path = layout.tracking_file(&replica_id);
        let mut store = Self::empty(layout.clone(), replica_id);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No tracking store at '{}', starting with empty baseline", path.display());
                return Ok(store);
            }
            Err(e) => {
                return Err(Error::detection(
                    &path,
                    format!("Failed to read tracking store: {}", e),
                ))
            }
        };

        match bincode::serde::decode_from_slice::<TrackingFile, _>(&data, bincode::config::standard())
        {
            Ok((file, _)) if file.version == TRACKING_FORMAT_VERSION && file.replica_id == replica_id => {
                store.entries = file.entries;
                info!("Loaded {} baseline entries for replica {}", store.entries.len(), replica_id);
            }
            Ok((file, _)) => {
                warn!(
                    "Discarding tracking store '{}' (version {}, replica {})",
                    path.display(),
                    file.version,
                    file.replica_id
                );
            }
            Err(e) => {
                warn!("Discarding undecodable tracking store '{}': {}", path.display(), e);
            }
        }

        Ok(store)
    }

    /// Replica this baseline belongs to
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Recorded signature of `path`
    pub fn get(&self, path: &Path) -> Option<&ContentSignature> {
        self.entries.get(path)
    }

    /// Record the signature of `path`
    pub fn insert<P: Into<PathBuf>>(&mut self, path: P, signature: ContentSignature) {
        self.entries.insert(path.into(), signature);
        self.dirty = true;
    }

    /// Forget `path`
    pub fn remove(&mut self, path: &Path) -> Option<ContentSignature> {
        let removed = self.entries.remove(path);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Replace every entry
    pub fn replace_all(&mut self, entries: Baseline) {
        self.entries = entries;
        self.dirty = true;
    }

    /// All entries in path order
    pub fn entries(&self) -> &Baseline {
        &self.entries
    }

    /// Number of tracked files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the baseline through a temporary file and an atomic rename
    pub async fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let path = self.layout.tracking_file(&self.replica_id);
        let state_dir = self
            .layout
            .ensure_state_dir()
            .await
            .map_err(|e| Error::detection(&path, e.to_string()))?;

        let file = TrackingFile {
            version: TRACKING_FORMAT_VERSION,
            replica_id: self.replica_id,
            entries: self.entries.clone(),
        };
        let data = bincode::serde::encode_to_vec(&file, bincode::config::standard())
            .map_err(|e| Error::detection(&path, format!("Failed to encode tracking store: {}", e)))?;

        let temp_path = state_dir.join(format!("tracking-{}.tmp", self.replica_id));
        fs::write(&temp_path, &data).await.map_err(|e| {
            Error::detection(&temp_path, format!("Failed to write tracking store: {}", e))
        })?;
        fs::rename(&temp_path, &path).await.map_err(|e| {
            Error::detection(&path, format!("Failed to replace tracking store: {}", e))
        })?;

        self.dirty = false;
        debug!("Saved {} baseline entries to '{}'", self.entries.len(), path.display());
        Ok(())
    }
}
