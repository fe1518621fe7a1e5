//! Shared fixtures for filesync integration tests and benchmarks

use filesync_sync::ReplicaLayout;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test data generation patterns
#[derive(Debug, Clone, Copy)]
pub enum TestDataPattern {
    /// All zeros
    Zeros,
    /// Deterministic pseudo-random bytes
    Random,
    /// Structured content similar to real files
    Realistic,
}

/// Generate test data with the given pattern
pub fn generate_test_data(size: usize, pattern: TestDataPattern) -> Vec<u8> {
    match pattern {
        TestDataPattern::Zeros => vec![0u8; size],
        TestDataPattern::Random => {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};

            // Deterministic so benchmarks are reproducible.
            let mut data = Vec::with_capacity(size);
            let mut hasher = DefaultHasher::new();
            for i in 0..size {
                i.hash(&mut hasher);
                data.push((hasher.finish() % 256) as u8);
            }
            data
        }
        TestDataPattern::Realistic => (0..size).map(|i| ((i * 7 + 13) % 256) as u8).collect(),
    }
}

/// Populate `root` with `count` files of `size` bytes spread over subdirectories
pub fn create_tree(root: &Path, count: usize, size: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let relative = PathBuf::from(format!("dir{:02}/file{:05}.dat", i % 16, i));
            let path = root.join(&relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("Failed to create test directory");
            }
            let mut data = generate_test_data(size, TestDataPattern::Realistic);
            data.extend_from_slice(&i.to_le_bytes());
            fs::write(&path, data).expect("Failed to write test file");
            relative
        })
        .collect()
}

/// Move the modification time of `path` by `seconds`
pub fn bump_mtime(path: &Path, seconds: u64) {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .expect("Failed to read modification time");
    filetime::set_file_mtime(
        path,
        FileTime::from_system_time(modified + Duration::from_secs(seconds)),
    )
    .expect("Failed to set modification time");
}

/// A source and a destination replica in one temporary directory
pub struct ReplicaPair {
    _temp: TempDir,
    /// Source root
    pub source: PathBuf,
    /// Destination root (not created until the first run)
    pub destination: PathBuf,
}

impl ReplicaPair {
    /// Create an empty source and a not-yet-existing destination
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let source = temp.path().join("source");
        let destination = temp.path().join("destination");
        fs::create_dir_all(&source).expect("Failed to create source");
        Self {
            _temp: temp,
            source,
            destination,
        }
    }

    /// Write `content` to `relative` in the source
    pub fn write_source(&self, relative: &str, content: &[u8]) -> PathBuf {
        write_file(&self.source.join(relative), content)
    }

    /// Write `content` to `relative` in the destination
    pub fn write_destination(&self, relative: &str, content: &[u8]) -> PathBuf {
        write_file(&self.destination.join(relative), content)
    }

    /// Read `relative` from the destination, `None` if absent
    pub fn read_destination(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.destination.join(relative)).ok()
    }

    /// Files below the destination recycle area
    pub fn recycled_files(&self) -> Vec<PathBuf> {
        let recycle_dir = ReplicaLayout::new(&self.destination).recycle_dir();
        WalkDir::new(recycle_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Relative paths of synchronized files in the destination
    pub fn destination_files(&self) -> Vec<PathBuf> {
        synchronized_files(&self.destination)
    }

    /// Relative paths of synchronized files in the source
    pub fn source_files(&self) -> Vec<PathBuf> {
        synchronized_files(&self.source)
    }
}

impl Default for ReplicaPair {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, content).expect("Failed to write test file");
    path.to_path_buf()
}

fn synchronized_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name();
            name != filesync_sync::layout::STATE_DIR_NAME
                && name != filesync_sync::layout::METADATA_FILE_NAME
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}
