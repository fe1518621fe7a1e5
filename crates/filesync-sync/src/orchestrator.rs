//! Run orchestration: lock, identify, detect, apply, reconcile

use crate::apply::{ApplyConfig, SyncApplier};
use crate::detect::{ChangeDetector, DetectConfig};
use crate::filter::ChangeFilter;
use crate::identity::ReplicaIdentity;
use crate::layout::ReplicaLayout;
use crate::lock::RootLock;
use crate::progress::{ProgressReporter, SyncPhase};
use crate::recycle::RecycleBin;
use crate::tracking::TrackingStore;
use filesync_config::Config;
use filesync_types::{
    ApplyConcurrency, ApplyOutcome, ChangeKind, ChangeRecord, ContentSignature, Error, ReplicaId,
    Result, RunId, RunResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Options for one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Follow symbolic links while enumerating
    pub follow_symlinks: bool,
    /// Pair deletes with creates of identical content
    pub detect_renames: bool,
    /// Files larger than this are tracked by size and modification time only
    pub max_hash_size: u64,
    /// Records applied concurrently within one wave
    pub apply_concurrency: ApplyConcurrency,
    /// Copy source modification times onto written files
    pub preserve_timestamps: bool,
    /// Detect and report without writing anything
    pub dry_run: bool,
    /// Recycle batches older than this many days are purged (0 keeps them forever)
    pub recycle_retention_days: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let detect = DetectConfig::default();
        Self {
            follow_symlinks: detect.follow_symlinks,
            detect_renames: detect.detect_renames,
            max_hash_size: detect.max_hash_size,
            apply_concurrency: ApplyConcurrency::default(),
            preserve_timestamps: true,
            dry_run: false,
            recycle_retention_days: 30,
        }
    }
}

impl SyncOptions {
    /// Derive run options from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            follow_symlinks: config.sync.follow_symlinks,
            detect_renames: config.sync.detect_renames,
            max_hash_size: config.sync.max_hash_size,
            apply_concurrency: config.sync.apply_concurrency,
            preserve_timestamps: config.sync.preserve_timestamps,
            dry_run: false,
            recycle_retention_days: config.recycle.retention_days,
        }
    }

    /// Set dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Detection settings implied by these options
    pub fn detect_config(&self) -> DetectConfig {
        DetectConfig {
            follow_symlinks: self.follow_symlinks,
            detect_renames: self.detect_renames,
            max_hash_size: self.max_hash_size,
            persist_baseline: !self.dry_run,
        }
    }

    /// Apply settings implied by these options
    pub fn apply_config(&self) -> ApplyConfig {
        ApplyConfig {
            preserve_timestamps: self.preserve_timestamps,
            dry_run: self.dry_run,
            concurrency: self.apply_concurrency,
            max_hash_size: self.max_hash_size,
        }
    }

    /// Recycle retention, `None` when batches are kept forever
    pub fn recycle_retention(&self) -> Option<Duration> {
        (self.recycle_retention_days > 0)
            .then(|| Duration::from_secs(u64::from(self.recycle_retention_days) * SECONDS_PER_DAY))
    }
}

/// One replica root opened for a run
#[derive(Debug)]
pub struct Replica {
    root: PathBuf,
    id: ReplicaId,
    store: TrackingStore,
}

impl Replica {
    /// Resolve the identity of `root` and load its baseline
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        let id = ReplicaIdentity::get_or_create(&root).await?;
        let store = TrackingStore::load(&ReplicaLayout::new(&root), id).await?;
        Ok(Self { root, id, store })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replica identity
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Loaded baseline
    pub fn store(&self) -> &TrackingStore {
        &self.store
    }
}

/// Drives one-way synchronization runs
#[derive(Debug, Clone, Default)]
pub struct SyncOrchestrator {
    options: SyncOptions,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl SyncOrchestrator {
    /// Create an orchestrator with the given options
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop the run once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report phases and items to `reporter`
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Run options
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Propagate the changes of `source_root` to `destination_root`
    pub async fn sync<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source_root: P,
        destination_root: Q,
        filter: &ChangeFilter,
    ) -> Result<RunResult> {
        let run_id = RunId::new_v4();
        let result = self
            .run(run_id, source_root.as_ref(), destination_root.as_ref(), filter)
            .await;

        if let Some(progress) = &self.progress {
            match &result {
                Ok(result) if result.cancelled => progress.cancelled().await,
                Ok(_) => progress.completed().await,
                Err(e) if e.is_cancelled() => progress.cancelled().await,
                Err(e) => progress.failed(e.to_string()).await,
            }
        }

        result
    }

    async fn run(
        &self,
        run_id: RunId,
        source_root: &Path,
        destination_root: &Path,
        filter: &ChangeFilter,
    ) -> Result<RunResult> {
        let start_time = Instant::now();
        info!(
            "Starting run {}: {} -> {}{}",
            run_id,
            source_root.display(),
            destination_root.display(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        self.phase(SyncPhase::Initializing).await;
        let (source_root, destination_root) = prepare_roots(source_root, destination_root).await?;
        let _source_lock = RootLock::acquire(&source_root)?;
        let _destination_lock = RootLock::acquire(&destination_root)?;
        self.check_cancelled()?;

        self.phase(SyncPhase::ResolvingIdentity).await;
        let mut source = Replica::open(&source_root).await?;
        let mut destination = Replica::open(&destination_root).await?;
        if source.id == destination.id {
            warn!(
                "Source and destination share replica id {}; one was probably copied from the other",
                source.id
            );
        }
        self.check_cancelled()?;

        // Detection advances the source baseline before anything is applied.
        // A run that fails afterwards puts it back so the next run sees the
        // same changes again.
        let source_baseline = source.store.entries().clone();
        let result = self
            .propagate(run_id, &mut source, &mut destination, filter)
            .await;
        if result.is_err() && !self.options.dry_run {
            source.store.replace_all(source_baseline);
            match source.store.save().await {
                Ok(()) => debug!("Source baseline restored after failed run {}", run_id),
                Err(e) => warn!("Failed to restore source baseline: {}", e),
            }
        }
        let mut result = result?;
        result.duration = start_time.elapsed();

        info!(
            "Run {} {}: {} applied, {} skipped, {} conflicts in {:?}",
            run_id,
            if result.cancelled { "cancelled" } else { "finished" },
            result.applied_count(),
            result.skipped_count(),
            result.conflict_count(),
            result.duration
        );
        Ok(result)
    }

    /// Detect both sides, apply source changes and commit both baselines
    async fn propagate(
        &self,
        run_id: RunId,
        source: &mut Replica,
        destination: &mut Replica,
        filter: &ChangeFilter,
    ) -> Result<RunResult> {
        let detector = ChangeDetector::new(self.options.detect_config());

        self.phase(SyncPhase::DetectingSource).await;
        let source_changes = detector
            .detect_with_store(&mut source.store, &source.root, filter)
            .await?;
        self.check_cancelled()?;

        self.phase(SyncPhase::DetectingDestination).await;
        let destination_changes = detector
            .detect_with_store(&mut destination.store, &destination.root, filter)
            .await?;
        self.check_cancelled()?;

        self.phase(SyncPhase::Applying).await;
        let mut applier = SyncApplier::new(self.options.apply_config())
            .with_run_id(run_id)
            .with_cancellation(self.cancel.clone())
            .with_destination_changes(&destination_changes);
        if let Some(progress) = &self.progress {
            progress.set_total_items(source_changes.len() as u64).await;
            applier = applier.with_progress(progress.clone());
        }
        let outcomes = applier
            .apply_one_way(&source_changes, &destination.root, filter)
            .await?;

        // Items skipped as cancelled are rolled back below like any other
        // skip, so the outcomes of the applied ones are still committed.
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            info!("Run cancelled while applying");
        }

        if !self.options.dry_run {
            self.phase(SyncPhase::Reconciling).await;
            reconcile_destination(&mut destination.store, &destination.root, &outcomes).await;
            destination.store.save().await?;
            retain_skipped(&mut source.store, &outcomes);
            source.store.save().await?;
        }

        self.phase(SyncPhase::Finalizing).await;
        if let (false, false, Some(retention)) = (
            self.options.dry_run,
            cancelled,
            self.options.recycle_retention(),
        ) {
            let layout = ReplicaLayout::new(&destination.root);
            if let Err(e) = RecycleBin::purge_older_than(&layout, retention).await {
                warn!("Recycle purge failed: {}", e);
            }
        }

        let mut issues = source_changes.issues;
        issues.extend(destination_changes.issues);

        Ok(RunResult {
            run_id,
            source_id: source.id,
            destination_id: destination.id,
            outcomes,
            issues,
            duration: Duration::ZERO,
            dry_run: self.options.dry_run,
            cancelled,
        })
    }

    async fn phase(&self, phase: SyncPhase) {
        if let Some(progress) = &self.progress {
            progress.set_phase(phase).await;
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Run cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Validate both roots and return their canonical forms
async fn prepare_roots(source: &Path, destination: &Path) -> Result<(PathBuf, PathBuf)> {
    let metadata = fs::metadata(source).await.map_err(|e| {
        Error::filesystem_access(source, format!("Source root is not accessible: {}", e))
    })?;
    if !metadata.is_dir() {
        return Err(Error::filesystem_access(source, "Source root is not a directory"));
    }

    let source = fs::canonicalize(source).await.map_err(|e| {
        Error::filesystem_access(source, format!("Failed to resolve source root: {}", e))
    })?;
    let planned = resolve_nonexistent(destination).await.map_err(|e| {
        Error::filesystem_access(destination, format!("Failed to resolve destination root: {}", e))
    })?;

    if source == planned {
        return Err(Error::config(format!(
            "Source and destination are the same directory: '{}'",
            source.display()
        )));
    }
    if planned.starts_with(&source) || source.starts_with(&planned) {
        return Err(Error::config(format!(
            "Source '{}' and destination '{}' must not be nested",
            source.display(),
            planned.display()
        )));
    }

    fs::create_dir_all(destination).await.map_err(|e| {
        Error::filesystem_access(destination, format!("Failed to create destination root: {}", e))
    })?;
    let destination = fs::canonicalize(destination).await.map_err(|e| {
        Error::filesystem_access(destination, format!("Failed to resolve destination root: {}", e))
    })?;

    Ok((source, destination))
}

/// Canonicalize the deepest existing ancestor of `path` and append the rest
async fn resolve_nonexistent(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut remainder = Vec::new();
    loop {
        match fs::canonicalize(existing).await {
            Ok(resolved) => {
                return Ok(remainder.iter().rev().fold(resolved, |acc, part| acc.join(part)));
            }
            Err(e) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    remainder.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(e),
            },
        }
    }
}

/// Record the engine's own writes in the destination baseline
async fn reconcile_destination(store: &mut TrackingStore, root: &Path, outcomes: &[ApplyOutcome]) {
    for outcome in outcomes {
        let ApplyOutcome::Applied { record, .. } = outcome else {
            continue;
        };

        match record.kind {
            ChangeKind::Create | ChangeKind::Update => {
                track_written(store, root, record).await;
            }
            ChangeKind::Delete => {
                store.remove(&record.path);
            }
            ChangeKind::Rename => {
                if let Some(old_path) = &record.old_path {
                    store.remove(old_path);
                }
                track_written(store, root, record).await;
            }
        }
    }
    debug!("Destination baseline reconciled, {} entries", store.len());
}

async fn track_written(store: &mut TrackingStore, root: &Path, record: &ChangeRecord) {
    let path = root.join(&record.path);
    match fs::metadata(&path).await.and_then(|m| Ok((m.len(), m.modified()?))) {
        Ok((size, modified)) => {
            // The source hash only describes the written file while its stat
            // still matches the one observed at detection.
            let mut signature = ContentSignature::new(size, modified);
            if signature.same_stat(&record.signature) {
                signature.hash = record.signature.hash.clone();
            }
            store.insert(record.path.clone(), signature);
        }
        Err(e) => {
            debug!("Not tracking '{}': {}", path.display(), e);
            store.remove(&record.path);
        }
    }
}

/// Roll skipped records back out of the source baseline so the next run
/// detects them again
fn retain_skipped(store: &mut TrackingStore, outcomes: &[ApplyOutcome]) {
    let mut retried = 0;
    for outcome in outcomes {
        let ApplyOutcome::Skipped { record, .. } = outcome else {
            continue;
        };

        match record.kind {
            ChangeKind::Create | ChangeKind::Update => {
                store.remove(&record.path);
            }
            ChangeKind::Delete => {
                store.insert(record.path.clone(), record.signature.clone());
            }
            ChangeKind::Rename => {
                store.remove(&record.path);
                if let Some(old_path) = &record.old_path {
                    store.insert(old_path.clone(), record.signature.clone());
                }
            }
        }
        retried += 1;
    }

    if retried > 0 {
        info!("{} skipped changes will be retried on the next run", retried);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_types::{RunStatus, SkipReason};
    use tempfile::TempDir;

    struct Roots {
        _temp: TempDir,
        source: PathBuf,
        destination: PathBuf,
    }

    fn roots() -> Roots {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        let destination = temp.path().join("dst");
        std::fs::create_dir_all(&source).unwrap();
        Roots {
            _temp: temp,
            source,
            destination,
        }
    }

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        write(&r.source.join("docs/b.txt"), b"bravo");
        let orchestrator = SyncOrchestrator::default();
        let filter = ChangeFilter::default();

        let first = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();
        assert_eq!(first.applied_count(), 2);
        assert_eq!(std::fs::read(r.destination.join("docs/b.txt")).unwrap(), b"bravo");

        let second = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();
        assert!(second.outcomes.is_empty());
        assert_eq!(second.status(), RunStatus::Success);
        assert_eq!(first.source_id, second.source_id);
        assert_eq!(first.destination_id, second.destination_id);
    }

    #[tokio::test]
    async fn test_engine_writes_are_not_destination_changes() {
        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        let orchestrator = SyncOrchestrator::default();
        let filter = ChangeFilter::default();
        orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();

        let destination = Replica::open(&r.destination).await.unwrap();
        let changes = ChangeDetector::new(DetectConfig {
            persist_baseline: false,
            ..Default::default()
        })
        .detect_changes(destination.id(), &r.destination, &filter)
        .await
        .unwrap();

        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_nested_and_identical_roots_are_rejected() {
        let r = roots();
        let orchestrator = SyncOrchestrator::default();
        let filter = ChangeFilter::default();

        let same = orchestrator.sync(&r.source, &r.source, &filter).await.unwrap_err();
        assert_eq!(same.kind(), filesync_types::ErrorKind::Config);

        let nested = orchestrator
            .sync(&r.source, r.source.join("inner/backup"), &filter)
            .await
            .unwrap_err();
        assert_eq!(nested.kind(), filesync_types::ErrorKind::Config);
        assert!(!r.source.join("inner").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let r = roots();
        let err = SyncOrchestrator::default()
            .sync(r.source.join("absent"), &r.destination, &ChangeFilter::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), filesync_types::ErrorKind::FilesystemAccess);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_locked_root_is_refused() {
        let r = roots();
        std::fs::create_dir_all(&r.destination).unwrap();
        let _held = RootLock::acquire(&r.destination).unwrap();

        let err = SyncOrchestrator::default()
            .sync(&r.source, &r.destination, &ChangeFilter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), filesync_types::ErrorKind::Sync);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        let token = CancellationToken::new();
        token.cancel();

        let err = SyncOrchestrator::default()
            .with_cancellation(token)
            .sync(&r.source, &r.destination, &ChangeFilter::default())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!r.destination.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_source_changes_pending() {
        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        std::fs::create_dir_all(&r.destination).unwrap();
        let destination_id = ReplicaIdentity::get_or_create(&r.destination).await.unwrap();
        // A directory where the destination baseline is written makes the run fail.
        let blocker = ReplicaLayout::new(&r.destination)
            .state_dir()
            .join(format!("tracking-{}.tmp", destination_id));
        std::fs::create_dir_all(&blocker).unwrap();
        let orchestrator = SyncOrchestrator::default();
        let filter = ChangeFilter::default();

        assert!(orchestrator.sync(&r.source, &r.destination, &filter).await.is_err());

        std::fs::remove_dir(&blocker).unwrap();
        let retry = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();

        assert_eq!(retry.applied_count(), 1);
        assert_eq!(std::fs::read(r.destination.join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_applying_keeps_outcomes() {
        use crate::progress::ProgressEvent;

        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        write(&r.source.join("b.bin"), &vec![7u8; 48 * 1024 * 1024]);
        write(&r.source.join("c.txt"), b"charlie");
        let filter = ChangeFilter::default();

        let mut reporter = ProgressReporter::new(RunId::new_v4());
        let mut events = reporter.take_event_receiver().unwrap();
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let ProgressEvent::ItemFinished(_) = event {
                        token.cancel();
                        break;
                    }
                }
            })
        };

        let options = SyncOptions {
            apply_concurrency: ApplyConcurrency::new(1).unwrap(),
            ..Default::default()
        };
        let orchestrator = SyncOrchestrator::new(options)
            .with_cancellation(token)
            .with_progress(reporter);
        let result = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();
        drop(orchestrator);
        canceller.await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.status(), RunStatus::Cancelled);
        assert_eq!(result.outcomes.len(), 3);
        assert!(matches!(result.outcomes[0], ApplyOutcome::Applied { .. }));
        assert_eq!(result.outcomes[2].skip_reason(), Some(SkipReason::Cancelled));
        assert_eq!(std::fs::read(r.destination.join("a.txt")).unwrap(), b"alpha");
        assert!(!r.destination.join("c.txt").exists());
        if let Ok(metadata) = std::fs::metadata(r.destination.join("b.bin")) {
            assert_eq!(metadata.len(), 48 * 1024 * 1024);
        }

        let resumed = SyncOrchestrator::default()
            .sync(&r.source, &r.destination, &filter)
            .await
            .unwrap();
        assert!(!resumed.cancelled);
        assert_eq!(resumed.applied_count(), result.skipped_count());
        assert_eq!(std::fs::read(r.destination.join("c.txt")).unwrap(), b"charlie");
        assert_eq!(
            std::fs::metadata(r.destination.join("b.bin")).unwrap().len(),
            48 * 1024 * 1024
        );
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let r = roots();
        write(&r.source.join("a.txt"), b"alpha");
        let filter = ChangeFilter::default();

        let dry = SyncOrchestrator::new(SyncOptions::default().with_dry_run(true))
            .sync(&r.source, &r.destination, &filter)
            .await
            .unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.applied_count(), 1);
        assert!(!r.destination.join("a.txt").exists());

        let real = SyncOrchestrator::default()
            .sync(&r.source, &r.destination, &filter)
            .await
            .unwrap();
        assert_eq!(real.applied_count(), 1);
        assert!(r.destination.join("a.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skipped_change_is_retried() {
        let r = roots();
        write(&r.source.join("docs/b.txt"), b"bravo");
        // A plain file where the destination needs a directory.
        write(&r.destination.join("docs"), b"in the way");
        let filter = ChangeFilter::default();
        let orchestrator = SyncOrchestrator::default();

        let first = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();
        assert_eq!(first.skipped_count(), 1);
        assert_eq!(first.status(), RunStatus::Error);

        std::fs::remove_file(r.destination.join("docs")).unwrap();
        let second = orchestrator.sync(&r.source, &r.destination, &filter).await.unwrap();

        assert_eq!(second.applied_count(), 1);
        assert_eq!(std::fs::read(r.destination.join("docs/b.txt")).unwrap(), b"bravo");
    }

    #[test]
    fn test_retain_skipped_restores_source_baseline() {
        let temp = TempDir::new().unwrap();
        let mut store = TrackingStore::empty(ReplicaLayout::new(temp.path()), ReplicaId::new_random());
        let s = ContentSignature::new(1, std::time::SystemTime::UNIX_EPOCH);
        store.insert("created.txt", s.clone());
        store.insert("renamed.txt", s.clone());

        retain_skipped(
            &mut store,
            &[
                ApplyOutcome::skipped(ChangeRecord::create("created.txt", s.clone()), SkipReason::Io, None),
                ApplyOutcome::skipped(ChangeRecord::delete("deleted.txt", s.clone()), SkipReason::Io, None),
                ApplyOutcome::skipped(
                    ChangeRecord::rename("original.txt", "renamed.txt", s.clone()),
                    SkipReason::Cancelled,
                    None,
                ),
            ],
        );

        assert!(store.get(Path::new("created.txt")).is_none());
        assert!(store.get(Path::new("deleted.txt")).is_some());
        assert!(store.get(Path::new("renamed.txt")).is_none());
        assert_eq!(store.get(Path::new("original.txt")), Some(&s));
    }

    #[tokio::test]
    async fn test_written_file_keeps_source_hash_only_on_matching_stat() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        write(&file, b"alpha");
        let mut store = TrackingStore::empty(ReplicaLayout::new(temp.path()), ReplicaId::new_random());
        let detected = std::time::UNIX_EPOCH + Duration::from_secs(1_000_000);

        // Same size but a different mtime: the file changed after detection.
        let stale = ChangeRecord::create(
            "a.txt",
            ContentSignature::new(5, detected).with_hash("stale".to_string()),
        );
        track_written(&mut store, temp.path(), &stale).await;
        assert_eq!(store.get(Path::new("a.txt")).unwrap().hash, None);

        filetime::set_file_mtime(&file, filetime::FileTime::from_system_time(detected)).unwrap();
        track_written(&mut store, temp.path(), &stale).await;
        assert_eq!(
            store.get(Path::new("a.txt")).unwrap().hash.as_deref(),
            Some("stale")
        );
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.sync.detect_renames = false;
        config.recycle.retention_days = 0;

        let options = SyncOptions::from_config(&config);

        assert!(!options.detect_renames);
        assert!(options.recycle_retention().is_none());
        assert!(options.detect_config().persist_baseline);
        assert!(!options.with_dry_run(true).detect_config().persist_baseline);
    }
}
