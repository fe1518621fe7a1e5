//! Configuration management for filesync
//!
//! Configuration is layered: built-in defaults, then an optional YAML, TOML
//! or JSON file, then environment variables such as
//! `FILESYNC__SYNC__DETECT_RENAMES=false`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use filesync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_source_file("filesync.yaml")
//!     .add_env_prefix("FILESYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Apply concurrency: {}", config.sync.apply_concurrency.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use filesync_types::ApplyConcurrency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "FILESYNC";

/// Main configuration structure for filesync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Change detection and apply settings
    #[serde(default)]
    pub sync: SyncConfig,
    /// Recycle area settings
    #[serde(default)]
    pub recycle: RecycleConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Remote share connection commands
    #[serde(default)]
    pub share: ShareConfig,
}

/// Change detection and apply settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Glob patterns excluded from synchronization
    pub exclude: Vec<String>,
    /// Follow symbolic links while enumerating
    pub follow_symlinks: bool,
    /// Pair deletes with creates of identical content
    pub detect_renames: bool,
    /// Files larger than this are tracked by size and modification time only
    pub max_hash_size: u64,
    /// Records applied concurrently
    pub apply_concurrency: ApplyConcurrency,
    /// Copy source modification times onto written files
    pub preserve_timestamps: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            follow_symlinks: false,
            detect_renames: true,
            max_hash_size: 100 * 1024 * 1024, // 100MB
            apply_concurrency: ApplyConcurrency::default(),
            preserve_timestamps: true,
        }
    }
}

/// Recycle area settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecycleConfig {
    /// Batches older than this many days are purged after a run (0 keeps them forever)
    pub retention_days: u32,
}

impl Default for RecycleConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Also write logs to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_format: false,
            log_file: None,
        }
    }
}

/// Commands used to attach and detach remote shares.
///
/// Each command is a program followed by its arguments. Arguments may contain
/// the placeholders `{path}`, `{user}`, `{domain}` and `{password}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Command connecting a share
    pub connect_command: Vec<String>,
    /// Command disconnecting a share
    pub disconnect_command: Vec<String>,
}

impl ShareConfig {
    /// Whether connect and disconnect commands are configured
    pub fn is_configured(&self) -> bool {
        !self.connect_command.is_empty() && !self.disconnect_command.is_empty()
    }
}
