//! Core type system and error handling for filesync
//!
//! This crate provides the foundational types, error handling, and shared data structures
//! used throughout the filesync workspace. It includes:
//!
//! - **Error handling**: Run-level error kinds with severity and fatality classification
//! - **Core types**: Replica identity, change records, apply outcomes and run results
//! - **Traits**: The network share seam used by the invocation layer
//! - **Configuration**: Validated configuration value types
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `async`: Enable async trait definitions
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use filesync_types::{ChangeRecord, ChangeSet, ContentSignature, ReplicaId};
//! use std::time::SystemTime;
//!
//! let signature = ContentSignature::new(12, SystemTime::now());
//! let set = ChangeSet::new(
//!     ReplicaId::new_random(),
//!     "/data/source",
//!     vec![ChangeRecord::create("notes.txt", signature)],
//!     Vec::new(),
//! );
//! assert_eq!(set.len(), 1);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::ApplyConcurrency;
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::*;
pub use types::*;
