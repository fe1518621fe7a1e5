//! Invocation layer for filesync
//!
//! Wraps one synchronization run the way a hosting scheduler calls it: an
//! optional credentialed share session around the run, and an ordered list of
//! diagnostics with a single terminal status instead of an error.
//!
//! # Examples
//!
//! ```rust,no_run
//! use filesync_engine::SyncEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new()?;
//! let report = engine.run("/data/source", "/data/backup", None).await;
//! for line in &report.diagnostics {
//!     println!("{}", line);
//! }
//! println!("Finished with status {}", report.status);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod diagnostics;
pub mod engine;
pub mod share;

pub use diagnostics::{describe_outcome, Diagnostics};
pub use engine::{EngineBuilder, RunReport, SyncEngine};
pub use share::{CommandShareConnector, ShareSession};
