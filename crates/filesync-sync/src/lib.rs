//! Change detection and one-way synchronization between two replicas
//!
//! This crate holds the synchronization core of filesync:
//!
//! - **Replica identity**: a stable id stored in each replica root
//! - **Change detection**: comparing a directory tree against its persisted baseline
//! - **Change filtering**: glob based exclusion of paths
//! - **Applying changes**: staged writes, a recycle area for displaced content,
//!   per-item failure isolation and optional wave based concurrency
//! - **Orchestration**: locking, detection of both sides, apply and baseline reconciliation
//!
//! # Examples
//!
//! ```rust,no_run
//! use filesync_sync::{ChangeFilter, SyncOptions, SyncOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let filter = ChangeFilter::new(["*.tmp", "node_modules"])?;
//! let orchestrator = SyncOrchestrator::new(SyncOptions::default());
//! let result = orchestrator.sync("source_dir", "dest_dir", &filter).await?;
//! println!(
//!     "Applied {} changes, skipped {}",
//!     result.applied_count(),
//!     result.skipped_count()
//! );
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod apply;
pub mod detect;
pub mod filter;
pub mod identity;
pub mod layout;
pub mod lock;
pub mod orchestrator;
pub mod progress;
pub mod recycle;
pub mod tracking;

pub use apply::{ApplyConfig, SyncApplier};
pub use detect::{ChangeDetector, DetectConfig};
pub use filter::ChangeFilter;
pub use identity::ReplicaIdentity;
pub use layout::ReplicaLayout;
pub use lock::RootLock;
pub use orchestrator::{Replica, SyncOptions, SyncOrchestrator};
pub use progress::{ProgressEvent, ProgressReporter, SyncPhase, SyncProgress};
pub use recycle::{RecycleBatch, RecycleBin};
pub use tracking::{Baseline, TrackingStore};
