//! Error types and handling for filesync
//!
//! Run-level failures (identity resolution, detection, remote access) abort a
//! sync run and surface through [`Error`]. Per-item apply failures are
//! converted into skipped outcomes at the item boundary; [`Error::ItemApply`]
//! is the only non-fatal variant.

use std::path::{Path, PathBuf};

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - operation should be retried
    Medium,
    /// High severity - operation should be aborted
    High,
    /// Critical severity - entire run must be terminated
    Critical,
}

/// Main error type for filesync operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Generic I/O failure without a more specific classification
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// A replica root or its metadata could not be read or written
    #[error("Filesystem access error at '{}': {message}", .path.display())]
    FilesystemAccess {
        /// Path that could not be accessed
        path: PathBuf,
        /// Error message describing the failure
        message: String,
    },

    /// Mounting or authenticating against a remote share failed
    #[error("Remote access error: {message}")]
    RemoteAccess {
        /// Error message describing the remote failure
        message: String,
    },

    /// Tree enumeration or baseline persistence failed
    #[error("Change detection failed at '{}': {message}", .path.display())]
    Detection {
        /// Path being processed when detection failed
        path: PathBuf,
        /// Error message describing the detection failure
        message: String,
    },

    /// Applying a single change record failed
    #[error("Failed to apply change to '{}': {message}", .path.display())]
    ItemApply {
        /// Relative path of the record that failed
        path: PathBuf,
        /// Error message describing the failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Synchronization orchestration error
    #[error("Synchronization error: {message}")]
    Sync {
        /// Error message describing the synchronization issue
        message: String,
    },

    /// Operation cancelled by an external signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Replica root or metadata access
    FilesystemAccess,
    /// Remote share access
    RemoteAccess,
    /// Change detection
    Detection,
    /// Per-item apply failure
    ItemApply,
    /// Configuration errors
    Config,
    /// Synchronization errors
    Sync,
    /// Cancellation
    Cancelled,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::FilesystemAccess { .. } => ErrorKind::FilesystemAccess,
            Self::RemoteAccess { .. } => ErrorKind::RemoteAccess,
            Self::Detection { .. } => ErrorKind::Detection,
            Self::ItemApply { .. } => ErrorKind::ItemApply,
            Self::Config { .. } => ErrorKind::Config,
            Self::Sync { .. } => ErrorKind::Sync,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ItemApply { .. } | Self::Cancelled => ErrorSeverity::Low,
            Self::Io { .. } | Self::Sync { .. } | Self::Other { .. } => ErrorSeverity::Medium,
            Self::Config { .. } | Self::RemoteAccess { .. } => ErrorSeverity::High,
            Self::FilesystemAccess { .. } | Self::Detection { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether this error ends the whole run.
    ///
    /// Cancellation is fatal too, but callers distinguish it through
    /// [`Error::is_cancelled`] and report it as its own terminal state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ItemApply { .. })
    }

    /// Whether this error represents a deliberate cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { message } => {
                message.contains("Interrupted")
                    || message.contains("WouldBlock")
                    || message.contains("timed out")
            }
            Self::ItemApply { .. } | Self::RemoteAccess { .. } | Self::Sync { .. } => true,
            Self::FilesystemAccess { .. }
            | Self::Detection { .. }
            | Self::Config { .. }
            | Self::Cancelled
            | Self::Other { .. } => false,
        }
    }

    /// Create a filesystem access error for `path`
    pub fn filesystem_access<P: AsRef<Path>, S: ToString>(path: P, message: S) -> Self {
        Self::FilesystemAccess {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a new remote access error
    pub fn remote_access<S: Into<String>>(message: S) -> Self {
        Self::RemoteAccess {
            message: message.into(),
        }
    }

    /// Create a detection error for `path`
    pub fn detection<P: AsRef<Path>, S: ToString>(path: P, message: S) -> Self {
        Self::Detection {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create an item apply error for the relative `path`
    pub fn item_apply<P: AsRef<Path>, S: ToString>(path: P, message: S) -> Self {
        Self::ItemApply {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new sync error
    pub fn sync<S: Into<String>>(message: S) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
