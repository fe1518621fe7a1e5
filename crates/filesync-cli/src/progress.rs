//! Terminal progress display for sync runs

use console::style;
use filesync_engine::describe_outcome;
use filesync_sync::{ProgressEvent, SyncPhase};
use filesync_types::ApplyOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Render progress events until the run's reporters are dropped
pub fn spawn_tracker(events: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(ProgressTracker::new().run(events))
}

struct ProgressTracker {
    bar: ProgressBar,
}

impl ProgressTracker {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    async fn run(self, mut events: UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::PhaseChanged(phase) => self.phase_changed(phase),
                ProgressEvent::Update(progress) => {
                    if progress.total_items > 0 {
                        self.bar.set_length(progress.total_items);
                        self.bar.set_position(progress.items_processed);
                    }
                }
                ProgressEvent::ItemStarted(label) => self.bar.set_message(label),
                ProgressEvent::ItemFinished(outcome) => self.item_finished(&outcome),
                ProgressEvent::Completed(progress) => {
                    self.bar.finish_and_clear();
                    tracing::debug!("Progress finished after {}", progress.format_elapsed());
                }
                ProgressEvent::Failed(_) => self.bar.abandon(),
            }
        }
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }

    fn phase_changed(&self, phase: SyncPhase) {
        let message = match phase {
            SyncPhase::Initializing => "Checking roots...",
            SyncPhase::ResolvingIdentity => "Resolving replica identities...",
            SyncPhase::DetectingSource => "Detecting source changes...",
            SyncPhase::DetectingDestination => "Detecting destination changes...",
            SyncPhase::Applying => {
                self.bar.set_style(bar_style());
                "Applying changes..."
            }
            SyncPhase::Reconciling => "Updating baselines...",
            SyncPhase::Finalizing => "Finishing...",
            SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled => return,
        };
        self.bar.set_message(message);
    }

    fn item_finished(&self, outcome: &ApplyOutcome) {
        if outcome.is_applied() {
            return;
        }
        let line = describe_outcome(outcome);
        self.bar.suspend(|| {
            println!("{} {}", style("⚠").yellow().bold(), style(line).yellow());
        });
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("█▉▊▋▌▍▎▏  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
