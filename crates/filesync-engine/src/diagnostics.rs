//! Ordered human-readable diagnostics of one invocation

use filesync_sync::progress::format_duration;
use filesync_types::{ApplyOutcome, DetectionIssue, Error, ErrorSeverity, RunResult, RunStatus};
use std::path::Path;
use tracing::{error, info, warn};

/// Collects the diagnostic lines of one run and mirrors them to the log
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    lines: Vec<String>,
}

impl Diagnostics {
    /// Create an empty diagnostics list
    pub fn new() -> Self {
        Self::default()
    }

    /// Start line
    pub fn started(&mut self, source: &Path, destination: &Path, dry_run: bool) {
        let line = format!(
            "Starting sync: '{}' -> '{}'{}",
            source.display(),
            destination.display(),
            if dry_run { " (dry run)" } else { "" }
        );
        info!("{}", line);
        self.lines.push(line);
    }

    /// One line per outcome, then one per detection issue
    pub fn result(&mut self, result: &RunResult) {
        for outcome in &result.outcomes {
            self.outcome(outcome);
        }
        for issue in &result.issues {
            self.issue(issue);
        }
    }

    /// Line for a single outcome
    pub fn outcome(&mut self, outcome: &ApplyOutcome) {
        let line = describe_outcome(outcome);
        if outcome.is_applied() {
            info!("{}", line);
        } else {
            warn!("{}", line);
        }
        self.lines.push(line);
    }

    /// Line for an entry detection could not read
    pub fn issue(&mut self, issue: &DetectionIssue) {
        let line = format!("Unreadable {}", issue);
        warn!("{}", line);
        self.lines.push(line);
    }

    /// Non-fatal problem outside item processing
    pub fn warning<S: Into<String>>(&mut self, message: S) {
        let line = message.into();
        warn!("{}", line);
        self.lines.push(line);
    }

    /// Run-level failure
    pub fn failed(&mut self, error: &Error) {
        let line = if error.is_cancelled() {
            "Sync cancelled".to_string()
        } else {
            format!("Sync failed: {}", error)
        };
        if error.severity() <= ErrorSeverity::Low {
            warn!("{}", line);
        } else if error.is_recoverable() {
            error!("{} (may succeed on retry)", line);
        } else {
            error!("{}", line);
        }
        self.lines.push(line);
    }

    /// Completion line for a run that returned a result
    pub fn completed(&mut self, result: &RunResult) {
        let status = result.status();
        let line = format!(
            "Sync {} with status {}: {} applied ({} conflicts), {} skipped in {}",
            if result.cancelled { "cancelled" } else { "completed" },
            status,
            result.applied_count(),
            result.conflict_count(),
            result.skipped_count(),
            format_duration(result.duration)
        );
        match status {
            RunStatus::Success => info!("{}", line),
            _ => warn!("{}", line),
        }
        self.lines.push(line);
    }

    /// Lines collected so far
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Take the collected lines
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Render one outcome the way it appears in diagnostics
pub fn describe_outcome(outcome: &ApplyOutcome) -> String {
    match outcome {
        ApplyOutcome::Applied {
            record,
            recycled,
            conflict,
        } => {
            let mut line = format!("Applied {}", record);
            if *conflict {
                line.push_str(" (conflict, source wins)");
            }
            if !recycled.is_empty() {
                line.push_str(&format!(", {} recycled", recycled.len()));
            }
            line
        }
        ApplyOutcome::Skipped {
            record,
            reason,
            cause,
        } => match cause {
            Some(cause) => format!("Skipped {}: {} ({})", record, reason, cause),
            None => format!("Skipped {}: {}", record, reason),
        },
    }
}
