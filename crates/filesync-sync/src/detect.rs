//! Change detection against the persisted baseline

use crate::filter::ChangeFilter;
use crate::layout::ReplicaLayout;
use crate::tracking::{Baseline, TrackingStore};
use filesync_types::{
    ChangeKind, ChangeRecord, ChangeSet, ContentSignature, DetectionIssue, Error, ReplicaId, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Configuration for change detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Whether to follow symbolic links while enumerating
    pub follow_symlinks: bool,
    /// Whether to pair deletes with creates of identical content
    pub detect_renames: bool,
    /// Files larger than this are tracked by size and modification time only
    pub max_hash_size: u64,
    /// Whether to write the new baseline after detection
    pub persist_baseline: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            detect_renames: true,
            max_hash_size: 100 * 1024 * 1024, // 100MB
            persist_baseline: true,
        }
    }
}

/// Detects what changed on one replica since its last baseline
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    config: DetectConfig,
}

struct Scan {
    current: Baseline,
    issues: Vec<DetectionIssue>,
}

impl ChangeDetector {
    /// Create a detector with the given configuration
    pub fn new(config: DetectConfig) -> Self {
        Self { config }
    }

    /// Detection configuration
    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    /// Detect the changes of `root` since the baseline stored for `replica_id`
    pub async fn detect_changes<P: AsRef<Path>>(
        &self,
        replica_id: ReplicaId,
        root: P,
        filter: &ChangeFilter,
    ) -> Result<ChangeSet> {
        let layout = ReplicaLayout::new(root.as_ref());
        let mut store = TrackingStore::load(&layout, replica_id).await?;
        self.detect_with_store(&mut store, root, filter).await
    }

    /// Detect changes against an already loaded store.
    ///
    /// When baseline persistence is enabled the store is replaced by the
    /// observed state and saved before this returns.
    pub async fn detect_with_store<P: AsRef<Path>>(
        &self,
        store: &mut TrackingStore,
        root: P,
        filter: &ChangeFilter,
    ) -> Result<ChangeSet> {
        let root = root.as_ref().to_path_buf();
        let replica_id = store.replica_id();
        info!("Detecting changes on replica {} at '{}'", replica_id, root.display());

        let scan = {
            let scan_root = root.clone();
            let filter = filter.clone();
            let config = self.config.clone();
            let baseline = store.entries().clone();
            tokio::task::spawn_blocking(move || scan_tree(&scan_root, &filter, &baseline, &config))
                .await
                .map_err(|e| Error::detection(&root, format!("Detection task failed: {}", e)))??
        };

        let records = classify(store.entries(), &scan.current, self.config.detect_renames);

        if self.config.persist_baseline {
            store.replace_all(scan.current);
            store.save().await?;
        }

        let change_set = ChangeSet::new(replica_id, root, records, scan.issues);
        info!(
            "Replica {}: {} changes ({} create, {} update, {} delete, {} rename), {} unreadable",
            replica_id,
            change_set.len(),
            change_set.count(ChangeKind::Create),
            change_set.count(ChangeKind::Update),
            change_set.count(ChangeKind::Delete),
            change_set.count(ChangeKind::Rename),
            change_set.issues.len()
        );
        Ok(change_set)
    }
}

/// Compare a baseline with the observed state.
///
/// Returned records are unordered; [`ChangeSet::new`] sorts them.
pub fn classify(baseline: &Baseline, current: &Baseline, detect_renames: bool) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut created: Vec<(&PathBuf, &ContentSignature)> = Vec::new();

    for (path, signature) in current {
        match baseline.get(path) {
            None => created.push((path, signature)),
            Some(previous) if !previous.same_content(signature) => {
                records.push(ChangeRecord::update(path.clone(), signature.clone()));
            }
            Some(_) => {}
        }
    }

    let deleted: Vec<(&PathBuf, &ContentSignature)> = baseline
        .iter()
        .filter(|(path, _)| !current.contains_key(*path))
        .collect();

    if !detect_renames {
        records.extend(created.into_iter().map(|(p, s)| ChangeRecord::create(p.clone(), s.clone())));
        records.extend(deleted.into_iter().map(|(p, s)| ChangeRecord::delete(p.clone(), s.clone())));
        return records;
    }

    let mut by_hash: HashMap<(u64, &str), Vec<usize>> = HashMap::new();
    let mut by_stat: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (index, (_, signature)) in created.iter().enumerate() {
        if let Some(hash) = signature.hash.as_deref() {
            by_hash.entry((signature.size, hash)).or_default().push(index);
        }
        by_stat
            .entry((signature.size, signature.modified_ns))
            .or_default()
            .push(index);
    }

    let mut paired = HashSet::new();
    for (old_path, old_signature) in deleted {
        let pick = |candidates: Option<&Vec<usize>>| {
            candidates.and_then(|indices| {
                indices.iter().copied().find(|index| {
                    !paired.contains(index) && created[*index].1.same_content(old_signature)
                })
            })
        };

        let by_content = old_signature
            .hash
            .as_deref()
            .and_then(|hash| pick(by_hash.get(&(old_signature.size, hash))));
        let matched =
            by_content.or_else(|| pick(by_stat.get(&(old_signature.size, old_signature.modified_ns))));

        match matched {
            Some(index) => {
                paired.insert(index);
                let (new_path, signature) = created[index];
                debug!("Paired rename {} -> {}", old_path.display(), new_path.display());
                records.push(ChangeRecord::rename(
                    old_path.clone(),
                    new_path.clone(),
                    signature.clone(),
                ));
            }
            None => records.push(ChangeRecord::delete(old_path.clone(), old_signature.clone())),
        }
    }

    records.extend(
        created
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !paired.contains(index))
            .map(|(_, (path, signature))| ChangeRecord::create(path.clone(), signature.clone())),
    );

    records
}

/// Stat `path` and hash it when it is small enough
pub async fn read_signature(path: &Path, max_hash_size: u64) -> io::Result<ContentSignature> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || observe(&path, None, max_hash_size))
        .await
        .map_err(io::Error::other)?
}

/// BLAKE3 digest of the file at `path`, hex encoded
pub(crate) fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(&mut file)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn observe(
    path: &Path,
    previous: Option<&ContentSignature>,
    max_hash_size: u64,
) -> io::Result<ContentSignature> {
    let metadata = std::fs::metadata(path)?;
    let stat = ContentSignature::new(metadata.len(), metadata.modified()?);

    if let Some(previous) = previous {
        if previous.same_stat(&stat) {
            return Ok(previous.clone());
        }
    }

    if stat.size > max_hash_size {
        return Ok(stat);
    }

    Ok(stat.with_hash(hash_file(path)?))
}

fn relative_to<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn scan_tree(
    root: &Path,
    filter: &ChangeFilter,
    baseline: &Baseline,
    config: &DetectConfig,
) -> Result<Scan> {
    let mut current = Baseline::new();
    let mut issues = Vec::new();
    let mut unreadable_dirs = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !filter.is_excluded(relative_to(root, entry.path())));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(Error::detection(
                        root,
                        format!("Failed to enumerate replica root: {}", err),
                    ));
                }
                let path = err
                    .path()
                    .map(|p| relative_to(root, p).to_path_buf())
                    .unwrap_or_default();
                warn!("Skipping unreadable entry '{}': {}", path.display(), err);
                unreadable_dirs.push(path.clone());
                issues.push(DetectionIssue {
                    path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        if !file_type.is_file() {
            if file_type.is_symlink() {
                debug!("Skipping symlink '{}'", entry.path().display());
            }
            continue;
        }

        let relative = relative_to(root, entry.path()).to_path_buf();
        let previous = baseline.get(&relative);
        match observe(entry.path(), previous, config.max_hash_size) {
            Ok(signature) => {
                current.insert(relative, signature);
            }
            Err(e) => {
                warn!("Skipping unreadable file '{}': {}", relative.display(), e);
                if let Some(previous) = previous {
                    current.insert(relative.clone(), previous.clone());
                }
                issues.push(DetectionIssue {
                    path: relative,
                    message: e.to_string(),
                });
            }
        }
    }

    // Nothing below an unreadable entry may be reported as deleted.
    for dir in &unreadable_dirs {
        for (path, signature) in baseline.iter().filter(|(path, _)| path.starts_with(dir)) {
            current
                .entry(path.clone())
                .or_insert_with(|| signature.clone());
        }
    }

    Ok(Scan { current, issues })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use tokio::fs;

    fn sig(size: u64, modified_ns: u64, hash: Option<&str>) -> ContentSignature {
        ContentSignature {
            size,
            modified_ns,
            hash: hash.map(str::to_string),
        }
    }

    fn bump_mtime(path: &Path, seconds: i64) {
        let modified = std::fs::metadata(path).unwrap().modified().unwrap();
        let shifted = if seconds >= 0 {
            modified + Duration::from_secs(seconds as u64)
        } else {
            modified - Duration::from_secs(seconds.unsigned_abs())
        };
        filetime::set_file_mtime(path, FileTime::from_system_time(shifted)).unwrap();
    }

    #[test]
    fn test_classify_pairs_renames_deterministically() {
        let mut baseline = Baseline::new();
        baseline.insert(PathBuf::from("a.txt"), sig(5, 1, Some("h1")));
        baseline.insert(PathBuf::from("b.txt"), sig(5, 2, Some("h1")));
        baseline.insert(PathBuf::from("gone.txt"), sig(9, 3, Some("h9")));

        let mut current = Baseline::new();
        current.insert(PathBuf::from("x.txt"), sig(5, 7, Some("h1")));
        current.insert(PathBuf::from("y.txt"), sig(6, 8, Some("h2")));

        let set = ChangeSet::new(
            ReplicaId::new_random(),
            "/r",
            classify(&baseline, &current, true),
            Vec::new(),
        );
        let rendered: Vec<String> = set.iter().map(ToString::to_string).collect();

        assert_eq!(
            rendered,
            vec![
                "Delete b.txt",
                "Delete gone.txt",
                "Rename a.txt -> x.txt",
                "Create y.txt",
            ]
        );
    }

    #[test]
    fn test_classify_without_rename_detection() {
        let mut baseline = Baseline::new();
        baseline.insert(PathBuf::from("a.txt"), sig(5, 1, Some("h1")));
        let mut current = Baseline::new();
        current.insert(PathBuf::from("b.txt"), sig(5, 1, Some("h1")));

        let records = classify(&baseline, &current, false);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind != ChangeKind::Rename));
    }

    #[test]
    fn test_classify_ignores_metadata_only_changes() {
        let mut baseline = Baseline::new();
        baseline.insert(PathBuf::from("a.txt"), sig(5, 1, Some("h1")));
        let mut current = Baseline::new();
        current.insert(PathBuf::from("a.txt"), sig(5, 99, Some("h1")));

        assert!(classify(&baseline, &current, true).is_empty());
    }

    #[tokio::test]
    async fn test_detection_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let id = ReplicaId::new_random();
        let detector = ChangeDetector::default();
        let filter = ChangeFilter::default();

        fs::create_dir_all(root.join("docs")).await.unwrap();
        fs::write(root.join("docs/a.txt"), b"alpha").await.unwrap();
        fs::write(root.join("b.txt"), b"bravo").await.unwrap();

        let first = detector.detect_changes(id, root, &filter).await.unwrap();
        assert_eq!(first.count(ChangeKind::Create), 2);

        let second = detector.detect_changes(id, root, &filter).await.unwrap();
        assert!(second.is_empty());

        fs::write(root.join("b.txt"), b"bravo, changed").await.unwrap();
        bump_mtime(&root.join("b.txt"), 5);
        let third = detector.detect_changes(id, root, &filter).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third.records[0].kind, ChangeKind::Update);

        fs::rename(root.join("docs/a.txt"), root.join("a-moved.txt")).await.unwrap();
        let fourth = detector.detect_changes(id, root, &filter).await.unwrap();
        assert_eq!(fourth.len(), 1);
        assert_eq!(fourth.records[0].kind, ChangeKind::Rename);
        assert_eq!(fourth.records[0].old_path.as_deref(), Some(Path::new("docs/a.txt")));

        fs::remove_file(root.join("b.txt")).await.unwrap();
        let fifth = detector.detect_changes(id, root, &filter).await.unwrap();
        assert_eq!(fifth.len(), 1);
        assert_eq!(fifth.records[0].kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_touch_without_content_change_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let id = ReplicaId::new_random();
        let detector = ChangeDetector::default();
        let filter = ChangeFilter::default();

        fs::write(root.join("a.txt"), b"same").await.unwrap();
        detector.detect_changes(id, root, &filter).await.unwrap();

        bump_mtime(&root.join("a.txt"), 10);
        let changes = detector.detect_changes(id, root, &filter).await.unwrap();
        assert!(changes.is_empty());

        let store = TrackingStore::load(&ReplicaLayout::new(root), id).await.unwrap();
        let modified = std::fs::metadata(root.join("a.txt")).unwrap().modified().unwrap();
        assert_eq!(
            store.get(Path::new("a.txt")).unwrap(),
            &ContentSignature::new(4, modified).with_hash(hash_file(&root.join("a.txt")).unwrap())
        );
    }

    #[tokio::test]
    async fn test_excluded_and_engine_paths_are_not_reported() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let filter = ChangeFilter::new(["*.tmp", "cache"]).unwrap();

        fs::create_dir_all(root.join("cache/deep")).await.unwrap();
        fs::write(root.join("cache/deep/blob"), b"x").await.unwrap();
        fs::write(root.join("scratch.tmp"), b"x").await.unwrap();
        fs::write(root.join("keep.txt"), b"x").await.unwrap();
        fs::write(root.join("filesync.id"), b"whatever").await.unwrap();

        let changes = ChangeDetector::default()
            .detect_changes(ReplicaId::new_random(), root, &filter)
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes.records[0].path, Path::new("keep.txt"));
    }

    #[tokio::test]
    async fn test_large_files_are_not_hashed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("big.bin"), vec![7u8; 64]).await.unwrap();

        let detector = ChangeDetector::new(DetectConfig {
            max_hash_size: 16,
            ..Default::default()
        });
        let changes = detector
            .detect_changes(ReplicaId::new_random(), root, &ChangeFilter::default())
            .await
            .unwrap();

        assert_eq!(changes.records[0].signature.size, 64);
        assert!(changes.records[0].signature.hash.is_none());
    }

    #[tokio::test]
    async fn test_dry_detection_leaves_baseline_alone() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let id = ReplicaId::new_random();
        fs::write(root.join("a.txt"), b"a").await.unwrap();

        let detector = ChangeDetector::new(DetectConfig {
            persist_baseline: false,
            ..Default::default()
        });
        detector.detect_changes(id, root, &ChangeFilter::default()).await.unwrap();
        let again = detector.detect_changes(id, root, &ChangeFilter::default()).await.unwrap();

        assert_eq!(again.len(), 1);
        assert!(!ReplicaLayout::new(root).tracking_file(&id).exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_detection_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = ChangeDetector::default()
            .detect_changes(
                ReplicaId::new_random(),
                temp_dir.path().join("absent"),
                &ChangeFilter::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), filesync_types::ErrorKind::Detection);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_entry_keeps_baseline() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let id = ReplicaId::new_random();
        let detector = ChangeDetector::new(DetectConfig {
            follow_symlinks: true,
            ..Default::default()
        });
        let filter = ChangeFilter::default();

        fs::write(root.join("a.txt"), b"a").await.unwrap();
        detector.detect_changes(id, root, &filter).await.unwrap();

        fs::remove_file(root.join("a.txt")).await.unwrap();
        std::os::unix::fs::symlink(root.join("nowhere"), root.join("a.txt")).unwrap();

        let changes = detector.detect_changes(id, root, &filter).await.unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.issues.len(), 1);
        assert_eq!(changes.issues[0].path, Path::new("a.txt"));

        let store = TrackingStore::load(&ReplicaLayout::new(root), id).await.unwrap();
        assert!(store.get(Path::new("a.txt")).is_some());
    }

    #[test]
    fn test_signature_reuses_baseline_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

        let previous = ContentSignature::new(3, modified).with_hash("cached".to_string());
        let observed = observe(&path, Some(&previous), u64::MAX).unwrap();
        assert_eq!(observed.hash.as_deref(), Some("cached"));

        let fresh = observe(&path, None, u64::MAX).unwrap();
        assert_eq!(fresh.hash, Some(blake3::hash(b"abc").to_hex().to_string()));
        assert!(fresh.modified() <= SystemTime::now());
    }
}
