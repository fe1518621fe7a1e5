//! Styled terminal output for the filesync CLI

use console::style;
use filesync_engine::RunReport;
use filesync_sync::progress::format_duration;
use filesync_sync::RecycleBatch;
use filesync_types::{ApplyOutcome, ChangeKind, ChangeSet, RunStatus};

/// Print diagnostics and a summary of a finished run
pub fn display_report(report: &RunReport) {
    println!();
    for line in &report.diagnostics {
        if line.starts_with("Skipped") || line.starts_with("Unreadable") {
            println!("  {}", style(line).yellow());
        } else if line.starts_with("Applied") {
            println!("  {}", style(line).dim());
        }
    }

    if let Some(result) = &report.result {
        println!();
        println!("{}", style("Sync Statistics:").bold().underlined());
        println!("  Applied: {}", style(result.applied_count()).green());
        println!(
            "  Conflicts (source won): {}",
            style(result.conflict_count()).cyan()
        );
        println!(
            "  Recycled files: {}",
            style(recycled_count(&result.outcomes)).cyan()
        );
        println!(
            "  Skipped: {}",
            if result.skipped_count() > 0 {
                style(result.skipped_count()).red()
            } else {
                style(result.skipped_count()).green()
            }
        );
        if !result.issues.is_empty() {
            println!("  Unreadable entries: {}", style(result.issues.len()).yellow());
        }
        println!("  Duration: {}", style(format_duration(result.duration)).blue());
    }

    println!();
    match report.status {
        RunStatus::Success if report.result.as_ref().is_some_and(|r| r.has_warnings()) => {
            display_warning("Sync completed with warnings");
        }
        RunStatus::Success => display_success("Sync completed"),
        RunStatus::Cancelled => display_warning("Sync cancelled"),
        RunStatus::Error => display_error(
            report
                .diagnostics
                .last()
                .map_or("Sync failed", String::as_str),
        ),
    }
}

fn recycled_count(outcomes: &[ApplyOutcome]) -> usize {
    outcomes
        .iter()
        .map(|outcome| match outcome {
            ApplyOutcome::Applied { recycled, .. } => recycled.len(),
            ApplyOutcome::Skipped { .. } => 0,
        })
        .sum()
}

/// Print a detected change set
pub fn display_change_set(changes: &ChangeSet, committed: bool) {
    println!(
        "{} {} ({})",
        style("Replica").bold(),
        style(changes.root.display()).cyan(),
        style(changes.replica_id).dim()
    );

    if changes.is_empty() {
        display_info("No changes since the last run");
    }
    for record in changes {
        let marker = match record.kind {
            ChangeKind::Create => style("+").green(),
            ChangeKind::Update => style("~").yellow(),
            ChangeKind::Delete => style("-").red(),
            ChangeKind::Rename => style(">").cyan(),
        };
        println!("  {} {}", marker, record);
    }
    for issue in &changes.issues {
        display_warning(&format!("Unreadable {}", issue));
    }

    if committed {
        display_info("Baseline updated");
    }
}

/// Print recycle batches
pub fn display_batches(batches: &[RecycleBatch]) {
    if batches.is_empty() {
        display_info("Recycle area is empty");
        return;
    }
    for batch in batches {
        println!(
            "  {}  {}",
            style(batch.created.format("%Y-%m-%d %H:%M:%S UTC")).dim(),
            style(&batch.name).cyan()
        );
    }
}

/// Display a warning message with proper formatting
pub fn display_warning(message: &str) {
    println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
}

/// Display an error message with proper formatting
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Display a success message with proper formatting
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}

/// Display an info message with proper formatting
pub fn display_info(message: &str) {
    println!("{} {}", style("ℹ").blue().bold(), style(message).blue());
}
