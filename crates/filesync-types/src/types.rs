//! Core data types for filesync
//!
//! This module provides the data model shared by detection, application and
//! reporting: replica identity, content signatures, change records and sets,
//! per-item apply outcomes and the aggregated run result.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique identifier for one sync run
pub type RunId = uuid::Uuid;

/// Stable 128-bit identifier of one replica root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ReplicaId(uuid::Uuid);

impl ReplicaId {
    /// Generate a new random identifier
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ReplicaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Observed state of a file used to decide whether it changed
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContentSignature {
    /// File size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_ns: u64,
    /// BLAKE3 content hash (hex), absent for files above the hashing limit
    pub hash: Option<String>,
}

impl ContentSignature {
    /// Create a signature from size and modification time
    pub fn new(size: u64, modified: SystemTime) -> Self {
        Self {
            size,
            modified_ns: nanos_since_epoch(modified),
            hash: None,
        }
    }

    /// Attach a content hash
    pub fn with_hash(mut self, hash: String) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Modification time as a `SystemTime`
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.modified_ns)
    }

    /// Size and modification time are identical
    pub fn same_stat(&self, other: &Self) -> bool {
        self.size == other.size && self.modified_ns == other.modified_ns
    }

    /// Both signatures describe the same content.
    ///
    /// Hashes decide when both sides have one; otherwise size and
    /// modification time must both match.
    pub fn same_content(&self, other: &Self) -> bool {
        match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => self.size == other.size && a == b,
            _ => self.same_stat(other),
        }
    }
}

fn nanos_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Kind of change detected for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChangeKind {
    /// File appeared
    Create,
    /// File content changed in place
    Update,
    /// File disappeared
    Delete,
    /// File moved to a new path without content change
    Rename,
}

impl ChangeKind {
    /// Position of this kind in a change set. Deletes and renames run first so
    /// that the paths they free are available to later creates.
    fn apply_rank(self) -> u8 {
        match self {
            Self::Delete => 0,
            Self::Rename => 1,
            Self::Update => 2,
            Self::Create => 3,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Rename => "Rename",
        };
        f.write_str(name)
    }
}

/// One entry in a change set
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangeRecord {
    /// Kind of change
    pub kind: ChangeKind,
    /// Relative path affected: the new path for create, update and rename,
    /// the removed path for delete
    pub path: PathBuf,
    /// Previous relative path, only set for renames
    pub old_path: Option<PathBuf>,
    /// Signature at detection time (the last recorded one for deletes)
    pub signature: ContentSignature,
}

impl ChangeRecord {
    /// A file that did not exist in the previous baseline
    pub fn create<P: Into<PathBuf>>(path: P, signature: ContentSignature) -> Self {
        Self {
            kind: ChangeKind::Create,
            path: path.into(),
            old_path: None,
            signature,
        }
    }

    /// A file whose content differs from the previous baseline
    pub fn update<P: Into<PathBuf>>(path: P, signature: ContentSignature) -> Self {
        Self {
            kind: ChangeKind::Update,
            path: path.into(),
            old_path: None,
            signature,
        }
    }

    /// A file that is no longer present
    pub fn delete<P: Into<PathBuf>>(path: P, signature: ContentSignature) -> Self {
        Self {
            kind: ChangeKind::Delete,
            path: path.into(),
            old_path: None,
            signature,
        }
    }

    /// A file moved from `old_path` to `new_path`
    pub fn rename<P: Into<PathBuf>, Q: Into<PathBuf>>(
        old_path: P,
        new_path: Q,
        signature: ContentSignature,
    ) -> Self {
        Self {
            kind: ChangeKind::Rename,
            path: new_path.into(),
            old_path: Some(old_path.into()),
            signature,
        }
    }

    /// All relative paths this record reads or writes
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.old_path.as_deref())
    }

    /// Whether this record reads or writes `path`
    pub fn touches(&self, path: &Path) -> bool {
        self.paths().any(|p| p == path)
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{} {} -> {}",
                self.kind,
                old.display(),
                self.path.display()
            ),
            None => write!(f, "{} {}", self.kind, self.path.display()),
        }
    }
}

/// An entry that could not be examined during detection
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionIssue {
    /// Path of the unreadable entry
    pub path: PathBuf,
    /// Description of the failure
    pub message: String,
}

impl fmt::Display for DetectionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Ordered changes detected for one replica in one pass
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangeSet {
    /// Replica the changes were detected on
    pub replica_id: ReplicaId,
    /// Root directory of that replica
    pub root: PathBuf,
    /// Change records in apply order
    pub records: Vec<ChangeRecord>,
    /// Entries skipped because they could not be read
    pub issues: Vec<DetectionIssue>,
}

impl ChangeSet {
    /// Create a change set, ordering records for application
    pub fn new<P: Into<PathBuf>>(
        replica_id: ReplicaId,
        root: P,
        mut records: Vec<ChangeRecord>,
        issues: Vec<DetectionIssue>,
    ) -> Self {
        records.sort_by(|a, b| {
            match a.kind.apply_rank().cmp(&b.kind.apply_rank()) {
                Ordering::Equal => a.path.cmp(&b.path),
                other => other,
            }
        });

        Self {
            replica_id,
            root: root.into(),
            records,
            issues,
        }
    }

    /// Create an empty change set
    pub fn empty<P: Into<PathBuf>>(replica_id: ReplicaId, root: P) -> Self {
        Self::new(replica_id, root, Vec::new(), Vec::new())
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no change was detected
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in apply order
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord> {
        self.records.iter()
    }

    /// Whether any record reads or writes `path`
    pub fn touches(&self, path: &Path) -> bool {
        self.records.iter().any(|record| record.touches(path))
    }

    /// Number of records of the given kind
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeRecord;
    type IntoIter = std::slice::Iter<'a, ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Why an item was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SkipReason {
    /// Source content vanished between detection and application
    SourceMissing,
    /// Access to source or destination was denied
    PermissionDenied,
    /// Destination storage is full or over quota
    StorageFull,
    /// Destination path exceeds platform limits
    PathTooLong,
    /// Temporary condition (interrupted, would block, timed out)
    Busy,
    /// Path is excluded by the change filter
    Excluded,
    /// Run was cancelled before this item completed
    Cancelled,
    /// Any other I/O failure
    Io,
}

impl SkipReason {
    /// Classify an I/O error
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::SourceMissing,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Self::Busy
            }
            _ => error
                .raw_os_error()
                .and_then(classify_os_error)
                .unwrap_or(Self::Io),
        }
    }

    /// Transient skips leave the run successful but are reported as warnings
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::SourceMissing | Self::Busy | Self::Excluded | Self::Cancelled
        )
    }

    /// Short human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::SourceMissing => "source content no longer exists",
            Self::PermissionDenied => "permission denied",
            Self::StorageFull => "destination storage is full",
            Self::PathTooLong => "path too long",
            Self::Busy => "resource temporarily unavailable",
            Self::Excluded => "path is excluded by filter",
            Self::Cancelled => "run was cancelled",
            Self::Io => "I/O error",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[allow(unused_variables)]
fn classify_os_error(code: i32) -> Option<SkipReason> {
    #[cfg(unix)]
    {
        if code == libc::ENOSPC || code == libc::EDQUOT {
            return Some(SkipReason::StorageFull);
        }
        if code == libc::ENAMETOOLONG {
            return Some(SkipReason::PathTooLong);
        }
    }

    #[cfg(windows)]
    {
        const ERROR_HANDLE_DISK_FULL: i32 = 39;
        const ERROR_DISK_FULL: i32 = 112;
        const ERROR_FILENAME_EXCED_RANGE: i32 = 206;

        match code {
            ERROR_HANDLE_DISK_FULL | ERROR_DISK_FULL => return Some(SkipReason::StorageFull),
            ERROR_FILENAME_EXCED_RANGE => return Some(SkipReason::PathTooLong),
            _ => {}
        }
    }

    None
}

/// Result of applying one change record
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ApplyOutcome {
    /// The destination now reflects the record
    Applied {
        /// Record that was applied
        record: ChangeRecord,
        /// Recycle-area locations of destination content moved aside
        recycled: Vec<PathBuf>,
        /// Destination had also changed this path since its last baseline
        conflict: bool,
    },
    /// The record was not applied
    Skipped {
        /// Record that was skipped
        record: ChangeRecord,
        /// Classified reason
        reason: SkipReason,
        /// Underlying error message, if any
        cause: Option<String>,
    },
}

impl ApplyOutcome {
    /// Applied outcome without recycling or conflict
    pub fn applied(record: ChangeRecord) -> Self {
        Self::Applied {
            record,
            recycled: Vec::new(),
            conflict: false,
        }
    }

    /// Skipped outcome
    pub fn skipped(record: ChangeRecord, reason: SkipReason, cause: Option<String>) -> Self {
        Self::Skipped {
            record,
            reason,
            cause,
        }
    }

    /// The record this outcome belongs to
    pub fn record(&self) -> &ChangeRecord {
        match self {
            Self::Applied { record, .. } | Self::Skipped { record, .. } => record,
        }
    }

    /// Whether the record was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Skip reason, if skipped
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped { reason, .. } => Some(*reason),
            Self::Applied { .. } => None,
        }
    }

    /// Skipped for a reason that fails the run
    pub fn is_unrecoverable(&self) -> bool {
        self.skip_reason().is_some_and(|reason| !reason.is_transient())
    }
}

/// Terminal status of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RunStatus {
    /// Run completed without unrecoverable skips
    Success,
    /// Run failed, or completed with unrecoverable skips
    Error,
    /// Run was stopped by an external cancellation request
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Aggregated result of one sync run
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunResult {
    /// Run identifier (also names the recycle batch)
    pub run_id: RunId,
    /// Source replica
    pub source_id: ReplicaId,
    /// Destination replica
    pub destination_id: ReplicaId,
    /// One outcome per source change record, in record order
    pub outcomes: Vec<ApplyOutcome>,
    /// Unreadable entries reported by detection on either side
    pub issues: Vec<DetectionIssue>,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Whether the destination was left untouched
    pub dry_run: bool,
    /// Cancellation arrived while records were being applied
    #[cfg_attr(feature = "serde", serde(default))]
    pub cancelled: bool,
}

impl RunResult {
    /// No item was skipped for an unrecoverable reason
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(ApplyOutcome::is_unrecoverable)
    }

    /// Transient skips or detection issues occurred
    pub fn has_warnings(&self) -> bool {
        !self.issues.is_empty()
            || self
                .outcomes
                .iter()
                .any(|o| o.skip_reason().is_some_and(SkipReason::is_transient))
    }

    /// Terminal status implied by the outcomes
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.is_success() {
            RunStatus::Success
        } else {
            RunStatus::Error
        }
    }

    /// Number of applied records
    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    /// Number of skipped records
    pub fn skipped_count(&self) -> usize {
        self.outcomes.len() - self.applied_count()
    }

    /// Number of applied records that overrode a destination-side change
    pub fn conflict_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ApplyOutcome::Applied { conflict: true, .. }))
            .count()
    }
}
