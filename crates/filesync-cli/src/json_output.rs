//! JSON output structures for the filesync CLI

use filesync_engine::RunReport;
use filesync_types::{ApplyOutcome, DetectionIssue, RunStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete JSON output of a sync run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReportJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Terminal status
    pub status: RunStatus,
    /// Ordered diagnostics
    pub diagnostics: Vec<String>,
    /// Counters, absent when the run failed before applying
    pub summary: Option<RunSummaryJson>,
    /// Per-item outcomes
    pub outcomes: Vec<ApplyOutcome>,
    /// Entries detection could not read
    pub issues: Vec<DetectionIssue>,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// filesync version
    pub version: String,
    /// Operation type
    pub operation: String,
    /// Timestamp when the output was produced
    pub timestamp: String,
    /// Source path
    pub source_path: String,
    /// Destination path
    pub destination_path: String,
}

/// Run counters
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummaryJson {
    /// Run identifier
    pub run_id: String,
    /// Source replica id
    pub source_id: String,
    /// Destination replica id
    pub destination_id: String,
    /// Applied records
    pub applied: usize,
    /// Skipped records
    pub skipped: usize,
    /// Applied records that overrode a destination change
    pub conflicts: usize,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u128,
    /// Whether the destination was left untouched
    pub dry_run: bool,
}

impl RunReportJson {
    /// Build the JSON document for `report`
    pub fn new(source: &Path, destination: &Path, report: &RunReport) -> Self {
        let summary = report.result.as_ref().map(|result| RunSummaryJson {
            run_id: result.run_id.to_string(),
            source_id: result.source_id.to_string(),
            destination_id: result.destination_id.to_string(),
            applied: result.applied_count(),
            skipped: result.skipped_count(),
            conflicts: result.conflict_count(),
            duration_ms: result.duration.as_millis(),
            dry_run: result.dry_run,
        });

        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: "sync".to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                source_path: source.display().to_string(),
                destination_path: destination.display().to_string(),
            },
            status: report.status,
            diagnostics: report.diagnostics.clone(),
            summary,
            outcomes: report
                .result
                .as_ref()
                .map(|r| r.outcomes.clone())
                .unwrap_or_default(),
            issues: report
                .result
                .as_ref()
                .map(|r| r.issues.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_report_serializes_without_summary() {
        let report = RunReport {
            status: RunStatus::Error,
            diagnostics: vec!["Sync failed: boom".to_string()],
            result: None,
        };

        let json = RunReportJson::new(Path::new("/a"), Path::new("/b"), &report);
        let text = serde_json::to_string(&json).unwrap();

        assert!(json.summary.is_none());
        assert!(text.contains("\"status\":\"Error\""));
        assert!(text.contains("Sync failed: boom"));
    }
}
