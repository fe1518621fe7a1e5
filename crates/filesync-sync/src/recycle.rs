//! Recycle area for destination content displaced by a run
//!
//! Each run moves displaced files into its own batch directory named after
//! the UTC start time and the run id, mirroring their relative paths.

use crate::layout::ReplicaLayout;
use chrono::{DateTime, NaiveDateTime, Utc};
use filesync_types::{Error, Result, RunId};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const BATCH_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const BATCH_TIMESTAMP_LEN: usize = 16;

/// One batch directory in the recycle area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleBatch {
    /// Directory name
    pub name: String,
    /// Absolute path of the batch directory
    pub path: PathBuf,
    /// Creation time parsed from the name
    pub created: DateTime<Utc>,
}

/// Recycle batch of one run on one replica
#[derive(Debug, Clone)]
pub struct RecycleBin {
    recycle_dir: PathBuf,
    batch_dir: PathBuf,
}

impl RecycleBin {
    /// Recycle bin for `run_id`, stamped with the current time
    pub fn new(layout: &ReplicaLayout, run_id: RunId) -> Self {
        Self::at(layout, run_id, Utc::now())
    }

    /// Recycle bin for `run_id`, stamped with `started`
    pub fn at(layout: &ReplicaLayout, run_id: RunId, started: DateTime<Utc>) -> Self {
        let recycle_dir = layout.recycle_dir();
        let batch_dir = recycle_dir.join(format!(
            "{}-{}",
            started.format(BATCH_TIMESTAMP_FORMAT),
            run_id.simple()
        ));
        Self {
            recycle_dir,
            batch_dir,
        }
    }

    /// Batch directory of this run
    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    /// Move `absolute` (stored at `relative` in the replica) into the batch.
    ///
    /// Returns the location it was moved to. A path recycled twice in one
    /// run keeps both copies under numbered names.
    pub async fn recycle(&self, absolute: &Path, relative: &Path) -> io::Result<PathBuf> {
        let mut target = self.batch_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut attempt = 1;
        while fs::symlink_metadata(&target).await.is_ok() {
            let mut name = relative
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default();
            name.push(format!(".{}", attempt));
            target.set_file_name(name);
            attempt += 1;
        }

        match fs::rename(absolute, &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::PermissionDenied => {
                return Err(e)
            }
            Err(rename_error) => {
                // Cross-device layouts fall back to copy and remove.
                if fs::copy(absolute, &target).await.is_err() {
                    return Err(rename_error);
                }
                fs::remove_file(absolute).await?;
            }
        }

        debug!("Recycled '{}' to '{}'", absolute.display(), target.display());
        Ok(target)
    }

    /// List batch directories, oldest first
    pub async fn list_batches(layout: &ReplicaLayout) -> Result<Vec<RecycleBatch>> {
        let recycle_dir = layout.recycle_dir();
        let mut entries = match fs::read_dir(&recycle_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::filesystem_access(
                    &recycle_dir,
                    format!("Failed to read recycle area: {}", e),
                ))
            }
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            Error::filesystem_access(&recycle_dir, format!("Failed to read recycle area: {}", e))
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_batch_time(&name) {
                Some(created) => batches.push(RecycleBatch {
                    path: entry.path(),
                    name,
                    created,
                }),
                None => debug!("Ignoring foreign entry '{}' in recycle area", name),
            }
        }

        batches.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(batches)
    }

    /// Remove batches created more than `max_age` ago. Returns how many were removed.
    pub async fn purge_older_than(layout: &ReplicaLayout, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::config(format!("Invalid recycle retention: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let mut removed = 0;
        for batch in Self::list_batches(layout).await? {
            if batch.created >= cutoff {
                continue;
            }
            match fs::remove_dir_all(&batch.path).await {
                Ok(()) => {
                    debug!("Purged recycle batch '{}'", batch.name);
                    removed += 1;
                }
                Err(e) => {
                    warn!("Failed to purge recycle batch '{}': {}", batch.path.display(), e);
                }
            }
        }

        if removed > 0 {
            info!("Purged {} recycle batches from '{}'", removed, layout.root().display());
        }
        Ok(removed)
    }

    /// Recycle area root
    pub fn recycle_dir(&self) -> &Path {
        &self.recycle_dir
    }
}

fn parse_batch_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..BATCH_TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, BATCH_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
