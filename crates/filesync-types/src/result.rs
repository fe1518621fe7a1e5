//! Result type alias for filesync operations

use crate::Error;

/// Result type alias for filesync operations
pub type Result<T> = std::result::Result<T, Error>;
