//! One-way application of a change set to a destination replica
//!
//! Every write goes through a staging file below the destination state
//! directory and is renamed into place, so an interrupted run never leaves
//! half-written content at a synchronized path. Destination content that is
//! overwritten or removed is moved to the run's recycle batch first.
//!
//! Item failures never abort the batch: each one is turned into a
//! [`ApplyOutcome::Skipped`] carrying a classified [`SkipReason`].

use crate::detect::hash_file;
use crate::filter::ChangeFilter;
use crate::layout::ReplicaLayout;
use crate::progress::ProgressReporter;
use crate::recycle::RecycleBin;
use filesync_types::{
    ApplyConcurrency, ApplyOutcome, ChangeKind, ChangeRecord, ChangeSet, ContentSignature, Error,
    Result, RunId, SkipReason,
};
use filetime::FileTime;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Configuration for applying changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Copy source modification times onto written files
    pub preserve_timestamps: bool,
    /// Report what would be applied without touching the destination
    pub dry_run: bool,
    /// Records applied concurrently within one wave
    pub concurrency: ApplyConcurrency,
    /// Destination files larger than this are compared by size and mtime only
    pub max_hash_size: u64,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            preserve_timestamps: true,
            dry_run: false,
            concurrency: ApplyConcurrency::default(),
            max_hash_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Applies source change sets to a destination replica
#[derive(Debug, Clone)]
pub struct SyncApplier {
    config: ApplyConfig,
    run_id: RunId,
    cancel: CancellationToken,
    destination_changes: HashSet<PathBuf>,
    progress: Option<ProgressReporter>,
}

impl Default for SyncApplier {
    fn default() -> Self {
        Self::new(ApplyConfig::default())
    }
}

impl SyncApplier {
    /// Create an applier for a fresh run
    pub fn new(config: ApplyConfig) -> Self {
        Self {
            config,
            run_id: RunId::new_v4(),
            cancel: CancellationToken::new(),
            destination_changes: HashSet::new(),
            progress: None,
        }
    }

    /// Use `run_id` to name the recycle batch
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Stop applying once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Flag records touching paths the destination changed itself
    pub fn with_destination_changes(mut self, changes: &ChangeSet) -> Self {
        self.destination_changes = changes
            .iter()
            .flat_map(|record| record.paths().map(Path::to_path_buf))
            .collect();
        self
    }

    /// Report item progress to `reporter`
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Run identifier
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Apply `change_set` to the replica at `destination_root`.
    ///
    /// Returns one outcome per record, in record order. Fails only when the
    /// staging area cannot be prepared.
    pub async fn apply_one_way(
        &self,
        change_set: &ChangeSet,
        destination_root: &Path,
        filter: &ChangeFilter,
    ) -> Result<Vec<ApplyOutcome>> {
        let destination = ReplicaLayout::new(destination_root);
        let staging = destination.staging_dir();
        if !self.config.dry_run {
            prepare_staging(&staging).await?;
        }

        let context = ApplyContext {
            applier: self,
            source: ReplicaLayout::new(&change_set.root),
            recycle: RecycleBin::new(&destination, self.run_id),
            destination,
            staging: staging.clone(),
            filter,
        };

        let records = &change_set.records;
        let concurrency = self.config.concurrency.get();
        let waves = if concurrency > 1 {
            plan_waves(records)
        } else {
            vec![(0..records.len()).collect()]
        };

        info!(
            "Applying {} changes to '{}' in {} waves (concurrency {})",
            records.len(),
            destination_root.display(),
            waves.len(),
            concurrency
        );

        let mut outcomes: Vec<Option<ApplyOutcome>> = vec![None; records.len()];
        let mut vacated = Vec::new();

        for wave in waves {
            let context = &context;
            let finished: Vec<(usize, ApplyOutcome, Option<PathBuf>)> = stream::iter(wave)
                .map(|index| async move {
                    let (outcome, freed) = context.apply_record(&records[index]).await;
                    (index, outcome, freed)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (index, outcome, freed) in finished {
                outcomes[index] = Some(outcome);
                vacated.extend(freed);
            }
        }

        context.prune_vacated(vacated).await;

        if !self.config.dry_run {
            if let Err(e) = fs::remove_dir(&staging).await {
                debug!("Staging area '{}' not removed: {}", staging.display(), e);
            }
        }

        Ok(outcomes.into_iter().flatten().collect())
    }
}

/// Partition records into waves of mutually independent records.
///
/// A record lands in the wave after the last one holding an overlapping
/// record, so overlapping records keep their relative order.
pub fn plan_waves(records: &[ChangeRecord]) -> Vec<Vec<usize>> {
    let mut waves: Vec<Vec<usize>> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let target = waves
            .iter()
            .rposition(|wave| wave.iter().any(|&other| overlaps(&records[other], record)))
            .map_or(0, |last| last + 1);

        if target == waves.len() {
            waves.push(Vec::new());
        }
        waves[target].push(index);
    }

    waves
}

fn overlaps(a: &ChangeRecord, b: &ChangeRecord) -> bool {
    a.paths()
        .any(|pa| b.paths().any(|pb| pa.starts_with(pb) || pb.starts_with(pa)))
}

async fn prepare_staging(staging: &Path) -> Result<()> {
    match fs::remove_dir_all(staging).await {
        Ok(()) => debug!("Cleared stale staging area '{}'", staging.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::filesystem_access(
                staging,
                format!("Failed to clear staging area: {}", e),
            ))
        }
    }

    fs::create_dir_all(staging).await.map_err(|e| {
        Error::filesystem_access(staging, format!("Failed to create staging area: {}", e))
    })
}

enum ItemError {
    Cancelled,
    Io {
        context: &'static str,
        source: io::Error,
    },
}

impl ItemError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

type ItemResult<T> = std::result::Result<T, ItemError>;

#[derive(Debug, Default)]
struct Applied {
    recycled: Vec<PathBuf>,
    vacated: Option<PathBuf>,
}

struct ApplyContext<'a> {
    applier: &'a SyncApplier,
    source: ReplicaLayout,
    destination: ReplicaLayout,
    recycle: RecycleBin,
    staging: PathBuf,
    filter: &'a ChangeFilter,
}

impl ApplyContext<'_> {
    async fn apply_record(&self, record: &ChangeRecord) -> (ApplyOutcome, Option<PathBuf>) {
        if let Some(progress) = &self.applier.progress {
            progress.item_started(record).await;
        }

        let (outcome, vacated) = self.execute(record).await;

        if let Some(progress) = &self.applier.progress {
            progress.item_finished(&outcome).await;
        }
        (outcome, vacated)
    }

    async fn execute(&self, record: &ChangeRecord) -> (ApplyOutcome, Option<PathBuf>) {
        if self.applier.cancel.is_cancelled() {
            return (
                ApplyOutcome::skipped(record.clone(), SkipReason::Cancelled, None),
                None,
            );
        }

        if record.paths().any(|path| self.filter.is_excluded(path)) {
            debug!("Excluded: {}", record);
            return (
                ApplyOutcome::skipped(record.clone(), SkipReason::Excluded, None),
                None,
            );
        }

        let conflict = record
            .paths()
            .any(|path| self.applier.destination_changes.contains(path));

        if self.applier.config.dry_run {
            info!("DRY RUN: Would apply {}", record);
            return (
                ApplyOutcome::Applied {
                    record: record.clone(),
                    recycled: Vec::new(),
                    conflict,
                },
                None,
            );
        }

        let result = match record.kind {
            ChangeKind::Create => self.write(record, false).await,
            ChangeKind::Update => self.write(record, true).await,
            ChangeKind::Delete => self.delete(record).await,
            ChangeKind::Rename => self.rename(record).await,
        };

        match result {
            Ok(applied) => {
                if conflict {
                    info!("Source wins for {}, destination change recycled", record);
                } else {
                    debug!("Applied: {}", record);
                }
                (
                    ApplyOutcome::Applied {
                        record: record.clone(),
                        recycled: applied.recycled,
                        conflict,
                    },
                    applied.vacated,
                )
            }
            Err(ItemError::Cancelled) => (
                ApplyOutcome::skipped(record.clone(), SkipReason::Cancelled, None),
                None,
            ),
            Err(ItemError::Io { context, source }) => {
                let reason = SkipReason::from_io(&source);
                let cause = format!("{}: {}", context, source);
                warn!(
                    "Skipped {} ({}): {}",
                    record,
                    reason,
                    Error::item_apply(&record.path, &cause)
                );
                (
                    ApplyOutcome::skipped(record.clone(), reason, Some(cause)),
                    None,
                )
            }
        }
    }

    /// Create or update `record.path` with source content
    async fn write(&self, record: &ChangeRecord, always_recycle: bool) -> ItemResult<Applied> {
        let target = self.destination.resolve(&record.path);
        let existing = occupant(&target)
            .await
            .map_err(ItemError::io("inspect destination"))?;

        if let Some(metadata) = &existing {
            if !always_recycle && self.matches(&target, metadata, &record.signature).await {
                debug!("Destination already matches {}", record);
                return Ok(Applied::default());
            }
        }

        let staged = self.stage(&record.path).await?;

        let mut recycled = Vec::new();
        if existing.is_some() {
            match self.recycle.recycle(&target, &record.path).await {
                Ok(location) => recycled.push(location),
                Err(e) => {
                    discard(&staged).await;
                    return Err(ItemError::Io {
                        context: "recycle destination",
                        source: e,
                    });
                }
            }
        }

        if let Err(e) = install(&staged, &target).await {
            discard(&staged).await;
            restore(&recycled, &target).await;
            return Err(ItemError::Io {
                context: "install staged file",
                source: e,
            });
        }

        Ok(Applied {
            recycled,
            vacated: None,
        })
    }

    async fn delete(&self, record: &ChangeRecord) -> ItemResult<Applied> {
        let target = self.destination.resolve(&record.path);

        let recycled = match occupant(&target)
            .await
            .map_err(ItemError::io("inspect destination"))?
        {
            Some(_) => vec![self
                .recycle
                .recycle(&target, &record.path)
                .await
                .map_err(ItemError::io("recycle destination"))?],
            None => {
                debug!("Already absent: {}", record.path.display());
                Vec::new()
            }
        };

        Ok(Applied {
            recycled,
            vacated: Some(target),
        })
    }

    async fn rename(&self, record: &ChangeRecord) -> ItemResult<Applied> {
        let Some(old_path) = record.old_path.as_deref() else {
            return self.write(record, false).await;
        };
        let old_target = self.destination.resolve(old_path);
        let new_target = self.destination.resolve(&record.path);

        let old_metadata = occupant(&old_target)
            .await
            .map_err(ItemError::io("inspect destination"))?;
        let old_matches = match &old_metadata {
            Some(metadata) => self.matches(&old_target, metadata, &record.signature).await,
            None => false,
        };

        if !old_matches {
            debug!(
                "Destination copy of '{}' missing or diverged, copying from source",
                old_path.display()
            );
            let mut recycled = Vec::new();
            if old_metadata.is_some() {
                recycled.push(
                    self.recycle
                        .recycle(&old_target, old_path)
                        .await
                        .map_err(ItemError::io("recycle diverged destination"))?,
                );
            }
            let mut applied = match self.write(record, false).await {
                Ok(applied) => applied,
                Err(e) => {
                    restore(&recycled, &old_target).await;
                    return Err(e);
                }
            };
            recycled.append(&mut applied.recycled);
            applied.recycled = recycled;
            applied.vacated = Some(old_target);
            return Ok(applied);
        }

        let mut recycled = Vec::new();
        if let Some(metadata) = occupant(&new_target)
            .await
            .map_err(ItemError::io("inspect destination"))?
        {
            if self.matches(&new_target, &metadata, &record.signature).await {
                recycled.push(
                    self.recycle
                        .recycle(&old_target, old_path)
                        .await
                        .map_err(ItemError::io("recycle duplicate"))?,
                );
                return Ok(Applied {
                    recycled,
                    vacated: Some(old_target),
                });
            }
            recycled.push(
                self.recycle
                    .recycle(&new_target, &record.path)
                    .await
                    .map_err(ItemError::io("recycle destination"))?,
            );
        }

        if let Err(e) = install(&old_target, &new_target).await {
            restore(&recycled, &new_target).await;
            return Err(ItemError::Io {
                context: "move within destination",
                source: e,
            });
        }

        Ok(Applied {
            recycled,
            vacated: Some(old_target),
        })
    }

    /// Copy source content for `relative` into a staging file
    async fn stage(&self, relative: &Path) -> ItemResult<PathBuf> {
        let source = self.source.resolve(relative);
        let staged = self
            .staging
            .join(format!("{}.part", uuid::Uuid::new_v4().simple()));

        // Opening a source that never becomes readable blocks, so the whole
        // copy races the token as well as checking it between chunks.
        let copied = tokio::select! {
            biased;
            () = self.applier.cancel.cancelled() => Err(ItemError::Cancelled),
            result = copy_file(&source, &staged, &self.applier.cancel) => result,
        };
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        };

        if self.applier.config.preserve_timestamps {
            let preserved: io::Result<()> = async {
                let modified = fs::metadata(&source).await?.modified()?;
                filetime::set_file_mtime(&staged, FileTime::from_system_time(modified))
            }
            .await;
            if let Err(e) = preserved {
                discard(&staged).await;
                return Err(ItemError::Io {
                    context: "preserve modification time",
                    source: e,
                });
            }
        }

        debug!("Staged: {} ({} bytes)", relative.display(), bytes);
        Ok(staged)
    }

    /// Whether the destination file at `path` holds the content `signature` describes
    async fn matches(&self, path: &Path, metadata: &Metadata, signature: &ContentSignature) -> bool {
        if !metadata.is_file() || metadata.len() != signature.size {
            return false;
        }

        match &signature.hash {
            Some(expected) if metadata.len() <= self.applier.config.max_hash_size => {
                let path = path.to_path_buf();
                match tokio::task::spawn_blocking(move || hash_file(&path)).await {
                    Ok(Ok(actual)) => &actual == expected,
                    _ => false,
                }
            }
            _ => metadata.modified().is_ok_and(|modified| {
                ContentSignature::new(metadata.len(), modified).same_stat(signature)
            }),
        }
    }

    /// Remove directories emptied by deletes and renames, up to the root
    async fn prune_vacated(&self, vacated: Vec<PathBuf>) {
        let root = self.destination.root();
        for path in vacated {
            let mut dir = path.parent();
            while let Some(current) = dir {
                if current == root || !current.starts_with(root) {
                    break;
                }
                if fs::remove_dir(current).await.is_err() {
                    break;
                }
                debug!("Pruned empty directory '{}'", current.display());
                dir = current.parent();
            }
        }
    }
}

async fn occupant(path: &Path) -> io::Result<Option<Metadata>> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn install(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(from, to).await
}

/// Copy `from` into a new file at `to`, stopping between chunks once
/// `cancel` fires
async fn copy_file(from: &Path, to: &Path, cancel: &CancellationToken) -> ItemResult<u64> {
    let mut reader = fs::File::open(from)
        .await
        .map_err(ItemError::io("copy from source"))?;
    let mut writer = fs::File::create(to)
        .await
        .map_err(ItemError::io("create staging file"))?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(ItemError::Cancelled);
        }
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(ItemError::io("copy from source"))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(ItemError::io("write staging file"))?;
        total += read as u64;
    }

    writer
        .flush()
        .await
        .map_err(ItemError::io("write staging file"))?;
    Ok(total)
}

async fn discard(staged: &Path) {
    if let Err(e) = fs::remove_file(staged).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove staging file '{}': {}", staged.display(), e);
        }
    }
}

async fn restore(recycled: &[PathBuf], target: &Path) {
    if let Some(previous) = recycled.last() {
        if let Err(e) = fs::rename(previous, target).await {
            warn!(
                "Failed to restore '{}' from '{}': {}",
                target.display(),
                previous.display(),
                e
            );
        }
    }
}
