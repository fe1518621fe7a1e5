//! Progress tracking for synchronization runs

use filesync_types::{ApplyOutcome, ChangeRecord, RunId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Progress information for a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Run being tracked
    pub run_id: RunId,
    /// Current phase
    pub phase: SyncPhase,
    /// Record currently being applied
    pub current_item: Option<String>,
    /// Records finished so far
    pub items_processed: u64,
    /// Records in the source change set
    pub total_items: u64,
    /// Records applied
    pub applied_count: u64,
    /// Records skipped
    pub skipped_count: u64,
    /// Applied records that overrode a destination change
    pub conflicts_count: u64,
    /// Start of the run
    #[serde(skip, default = "Instant::now")]
    pub start_time: Instant,
}

/// Phases of one sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Validating roots and taking locks
    Initializing,
    /// Reading or creating replica identities
    ResolvingIdentity,
    /// Detecting source changes
    DetectingSource,
    /// Detecting destination changes
    DetectingDestination,
    /// Applying source changes to the destination
    Applying,
    /// Updating the destination baseline
    Reconciling,
    /// Purging expired recycle batches
    Finalizing,
    /// Completed
    Completed,
    /// Failed
    Failed,
    /// Stopped by cancellation
    Cancelled,
}

impl SyncProgress {
    /// Create progress for a new run
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            phase: SyncPhase::Initializing,
            current_item: None,
            items_processed: 0,
            total_items: 0,
            applied_count: 0,
            skipped_count: 0,
            conflicts_count: 0,
            start_time: Instant::now(),
        }
    }

    /// Update the current phase
    pub fn set_phase(&mut self, phase: SyncPhase) {
        self.phase = phase;
        debug!("Sync phase changed to: {:?}", phase);
    }

    /// Count a finished record
    pub fn record_outcome(&mut self, outcome: &ApplyOutcome) {
        self.items_processed += 1;
        match outcome {
            ApplyOutcome::Applied { conflict, .. } => {
                self.applied_count += 1;
                if *conflict {
                    self.conflicts_count += 1;
                }
            }
            ApplyOutcome::Skipped { .. } => self.skipped_count += 1,
        }
    }

    /// Percentage of records finished
    pub fn item_progress(&self) -> f64 {
        if self.total_items > 0 {
            (self.items_processed as f64 / self.total_items as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Get elapsed time
    pub fn elapsed_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if the run has ended
    pub fn is_complete(&self) -> bool {
        matches!(
            self.phase,
            SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }

    /// Format elapsed time as human-readable string
    pub fn format_elapsed(&self) -> String {
        format_duration(self.elapsed_time())
    }
}

/// Progress event types
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Progress update
    Update(SyncProgress),
    /// Phase changed
    PhaseChanged(SyncPhase),
    /// A record started applying
    ItemStarted(String),
    /// A record finished
    ItemFinished(ApplyOutcome),
    /// Run completed
    Completed(SyncProgress),
    /// Run failed or was cancelled
    Failed(String),
}

/// Progress reporter for sync runs
#[derive(Debug)]
pub struct ProgressReporter {
    progress: Arc<RwLock<SyncProgress>>,
    event_tx: mpsc::UnboundedSender<ProgressEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new(run_id: RunId) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let progress = Arc::new(RwLock::new(SyncProgress::new(run_id)));

        Self {
            progress,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Get the current progress
    pub async fn get_progress(&self) -> SyncProgress {
        self.progress.read().await.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressEvent>> {
        self.event_rx.take()
    }

    /// Update the current phase
    pub async fn set_phase(&self, phase: SyncPhase) {
        self.progress.write().await.set_phase(phase);

        let _ = self.event_tx.send(ProgressEvent::PhaseChanged(phase));
        self.publish().await;
    }

    /// Set the number of records to apply
    pub async fn set_total_items(&self, total: u64) {
        self.progress.write().await.total_items = total;
        self.publish().await;
    }

    /// Report a record starting
    pub async fn item_started(&self, record: &ChangeRecord) {
        let label = record.to_string();
        self.progress.write().await.current_item = Some(label.clone());

        let _ = self.event_tx.send(ProgressEvent::ItemStarted(label));
        self.publish().await;
    }

    /// Report a record finishing
    pub async fn item_finished(&self, outcome: &ApplyOutcome) {
        {
            let mut progress = self.progress.write().await;
            progress.record_outcome(outcome);
            progress.current_item = None;
        }

        let _ = self.event_tx.send(ProgressEvent::ItemFinished(outcome.clone()));
        self.publish().await;
    }

    /// Report run completed
    pub async fn completed(&self) {
        self.progress.write().await.set_phase(SyncPhase::Completed);

        let progress = self.get_progress().await;
        let _ = self.event_tx.send(ProgressEvent::Completed(progress.clone()));
        let _ = self.event_tx.send(ProgressEvent::Update(progress));

        info!("Sync completed");
    }

    /// Report run failed
    pub async fn failed(&self, error: String) {
        self.finish_with(SyncPhase::Failed, error).await;
    }

    /// Report run cancelled
    pub async fn cancelled(&self) {
        self.finish_with(SyncPhase::Cancelled, "Run cancelled".to_string())
            .await;
    }

    async fn finish_with(&self, phase: SyncPhase, message: String) {
        self.progress.write().await.set_phase(phase);

        let _ = self.event_tx.send(ProgressEvent::Failed(message));
        self.publish().await;
    }

    async fn publish(&self) {
        let progress = self.get_progress().await;
        let _ = self.event_tx.send(ProgressEvent::Update(progress));
    }
}

impl Clone for ProgressReporter {
    fn clone(&self) -> Self {
        Self {
            progress: Arc::clone(&self.progress),
            event_tx: self.event_tx.clone(),
            event_rx: None, // Clone doesn't get the receiver
        }
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if total_seconds > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_types::{ContentSignature, SkipReason};
    use std::time::SystemTime;

    fn record(path: &str) -> ChangeRecord {
        ChangeRecord::create(path, ContentSignature::new(1, SystemTime::now()))
    }

    #[test]
    fn test_sync_progress_creation() {
        let run_id = RunId::new_v4();
        let progress = SyncProgress::new(run_id);

        assert_eq!(progress.run_id, run_id);
        assert_eq!(progress.phase, SyncPhase::Initializing);
        assert_eq!(progress.items_processed, 0);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_counts_outcomes() {
        let mut progress = SyncProgress::new(RunId::new_v4());
        progress.total_items = 4;
        progress.record_outcome(&ApplyOutcome::applied(record("a")));
        progress.record_outcome(&ApplyOutcome::skipped(record("b"), SkipReason::Io, None));

        assert_eq!(progress.item_progress(), 50.0);
        assert_eq!(progress.applied_count, 1);
        assert_eq!(progress.skipped_count, 1);
    }

    #[tokio::test]
    async fn test_progress_reporter() {
        let mut reporter = ProgressReporter::new(RunId::new_v4());
        let mut event_rx = reporter.take_event_receiver().unwrap();

        reporter.set_phase(SyncPhase::DetectingSource).await;

        let event = event_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ProgressEvent::PhaseChanged(SyncPhase::DetectingSource)
        ));
        let event = event_rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::Update(_)));

        reporter.item_started(&record("a.txt")).await;
        let event = event_rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::ItemStarted(ref label) if label == "Create a.txt"));
    }

    #[tokio::test]
    async fn test_cloned_reporter_shares_state() {
        let reporter = ProgressReporter::new(RunId::new_v4());
        let clone = reporter.clone();

        clone.item_finished(&ApplyOutcome::applied(record("a"))).await;
        clone.cancelled().await;

        let progress = reporter.get_progress().await;
        assert_eq!(progress.applied_count, 1);
        assert_eq!(progress.phase, SyncPhase::Cancelled);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }
}
