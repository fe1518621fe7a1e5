//! filesync integration test suite
//!
//! Integration tests live in `tests/`, the detection benchmark in `benches/`.
//! This library only carries the fixtures they share.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Shared fixtures for tests and benchmarks
pub mod test_utils;
