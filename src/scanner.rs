//! Folder enumeration.
//!
//! Items are ordered by capture date: EXIF `DateTimeOriginal` when present,
//! else the file's creation time, else its modification time. Resolved dates
//! are remembered in a JSON file keyed by path and trusted for as long as the
//! file's mtime does not change.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jwalk::WalkDir;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::item::Item;
use crate::metadata;

/// Camera RAW extensions, lowercase, without the dot.
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "arw", "raf", "orf", "rw2", "dng", "pef", "srw", "3fr", "ari", "bay", "crw", "dcr", "erf",
    "fff", "mef", "mrw", "nrw", "ptx", "pxn", "r3d", "rwl", "rwz", "sr2", "srf", "x3f",
];

/// Progress is reported every this many files (and always on the last one).
const PROGRESS_EVERY: usize = 5;

/// Produces the ordered item list for a folder. Runs on a background thread.
pub trait Enumerator: Send + Sync + 'static {
    /// `on_progress(current, total)` may be called any number of times.
    fn scan(&self, folder: &Path, on_progress: &mut dyn FnMut(usize, usize)) -> Result<Vec<Item>, ScanError>;
}

/// Check if a path is a camera RAW file. AppleDouble `._*` companions are not.
pub fn is_raw_file(path: &Path) -> bool {
    let hidden_fork = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("._"));
    if hidden_fork {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| RAW_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

const DATE_CACHE_FILE_NAME: &str = "dates.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DateEntry {
    mtime_ns: i64,
    taken_ns: i64,
}

/// Persistent `path -> capture date` map shared by every scanned folder.
/// Load and save failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct DateCache {
    file: PathBuf,
}

impl DateCache {
    /// Cache stored as `dates.json` in `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            file: state_dir.join(DATE_CACHE_FILE_NAME),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn load(&self) -> BTreeMap<String, DateEntry> {
        let Ok(content) = fs::read_to_string(&self.file) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.file.display(), error = %e, "discarding unreadable date cache");
            BTreeMap::new()
        })
    }

    fn save(&self, entries: &BTreeMap<String, DateEntry>) {
        let json = match serde_json::to_string(entries) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize date cache");
                return;
            }
        };
        if let Some(parent) = self.file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.file, json) {
            tracing::warn!(path = %self.file.display(), error = %e, "could not save date cache");
        }
    }
}

fn to_nanos(t: SystemTime) -> Option<i64> {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).ok(),
        Err(e) => i64::try_from(e.duration().as_nanos()).ok().map(|n| -n),
    }
}

fn from_nanos(nanos: i64) -> SystemTime {
    let d = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        UNIX_EPOCH + d
    } else {
        UNIX_EPOCH - d
    }
}

/// Capture date of `path`, without consulting the cache.
fn resolve_capture_time(path: &Path, meta: Option<&fs::Metadata>) -> Option<SystemTime> {
    metadata::capture_time(path)
        .or_else(|| meta.and_then(|m| m.created().ok()))
        .or_else(|| meta.and_then(|m| m.modified().ok()))
}

/// Recursive RAW scanner ordering items by capture date, oldest first.
#[derive(Debug, Default, Clone)]
pub struct FolderScanner {
    dates: Option<DateCache>,
}

impl FolderScanner {
    /// Scanner that resolves every date from scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scanner that reuses and updates the capture dates in `cache`.
    pub fn with_date_cache(cache: DateCache) -> Self {
        Self { dates: Some(cache) }
    }

    fn collect_raw_paths(folder: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(folder).skip_hidden(false).follow_links(false).sort(true) {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let path = entry.path();
                    if is_raw_file(&path) {
                        paths.push(path);
                    }
                }
                Err(e) => tracing::warn!(folder = %folder.display(), error = %e, "skipping unreadable entry"),
            }
        }
        paths
    }
}

impl Enumerator for FolderScanner {
    fn scan(&self, folder: &Path, on_progress: &mut dyn FnMut(usize, usize)) -> Result<Vec<Item>, ScanError> {
        if !folder.is_dir() {
            return Err(ScanError::NotADirectory(folder.to_path_buf()));
        }
        // Surface an unreadable root as a failure instead of an empty folder.
        fs::read_dir(folder).map_err(|e| ScanError::Walk {
            path: folder.to_path_buf(),
            message: e.to_string(),
        })?;

        let paths = Self::collect_raw_paths(folder);
        let total = paths.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut cache = self.dates.as_ref().map(DateCache::load).unwrap_or_default();
        let mut cache_dirty = false;
        let mut hits = 0usize;

        let mut dated: Vec<(Option<SystemTime>, Option<SystemTime>, PathBuf)> = Vec::with_capacity(total);
        for (i, path) in paths.into_iter().enumerate() {
            let meta = fs::metadata(&path).ok();
            let modified = meta.as_ref().and_then(|m| m.modified().ok());
            let mtime_ns = modified.and_then(to_nanos);
            let key = path.to_string_lossy().into_owned();

            let cached = cache
                .get(&key)
                .filter(|entry| Some(entry.mtime_ns) == mtime_ns)
                .map(|entry| from_nanos(entry.taken_ns));
            let taken = match cached {
                Some(taken) => {
                    hits += 1;
                    Some(taken)
                }
                None => {
                    let taken = resolve_capture_time(&path, meta.as_ref());
                    if let (Some(mtime_ns), Some(taken_ns)) = (mtime_ns, taken.and_then(to_nanos)) {
                        cache.insert(key, DateEntry { mtime_ns, taken_ns });
                        cache_dirty = true;
                    }
                    taken
                }
            };
            dated.push((taken, modified, path));
            if i % PROGRESS_EVERY == 0 || i == total - 1 {
                on_progress(i + 1, total);
            }
        }

        if let (Some(dates), true) = (&self.dates, cache_dirty) {
            dates.save(&cache);
        }

        // Oldest first; ties and undated files fall back to path order.
        dated.sort_by(|a, b| match a.0.cmp(&b.0) {
            Ordering::Equal => a.2.cmp(&b.2),
            other => other,
        });

        tracing::info!(folder = %folder.display(), count = total, cached_dates = hits, "folder scanned");

        Ok(dated
            .into_iter()
            .enumerate()
            .map(|(idx, (_, modified, path))| Item::new(path, modified, idx))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures::{exif_only_jpeg, tiff_block};
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, secs: u64) {
        fs::write(path, b"raw").unwrap();
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        File::options().write(true).open(path).unwrap().set_modified(at).unwrap();
    }

    #[test]
    fn raw_extension_filter() {
        assert!(is_raw_file(Path::new("/a/IMG_0001.CR2")));
        assert!(is_raw_file(Path::new("dsc.nef")));
        assert!(!is_raw_file(Path::new("/a/._IMG_0001.CR2")));
        assert!(!is_raw_file(Path::new("/a/IMG_0001.jpg")));
        assert!(!is_raw_file(Path::new("/a/noext")));
    }

    /// A RAW stand-in whose only content is EXIF carrying `taken`.
    fn shot(path: &Path, taken: &str, mtime_secs: u64) {
        fs::write(path, exif_only_jpeg(&tiff_block(None, Some(taken)))).unwrap();
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs);
        File::options().write(true).open(path).unwrap().set_modified(at).unwrap();
    }

    fn names(items: &[Item]) -> Vec<String> {
        items.iter().map(Item::file_name).collect()
    }

    #[test]
    fn scan_sorts_by_capture_date_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("day2");
        fs::create_dir(&sub).unwrap();
        // Modification times run the other way round from the capture dates.
        shot(&dir.path().join("b.arw"), "2021:05:01 10:00:00", 1_000);
        shot(&dir.path().join("a.nef"), "2020:05:01 10:00:00", 2_000);
        shot(&sub.join("c.cr3"), "2019:05:01 10:00:00", 3_000);
        // No EXIF: falls back to the filesystem, which says "just now".
        fs::write(dir.path().join("plain.dng"), b"raw").unwrap();
        touch(&dir.path().join("notes.txt"), 10);
        touch(&dir.path().join("._a.nef"), 10);

        let mut calls = Vec::new();
        let items = FolderScanner::new()
            .scan(dir.path(), &mut |cur, total| calls.push((cur, total)))
            .unwrap();

        assert_eq!(names(&items), ["c.cr3", "a.nef", "b.arw", "plain.dng"]);
        assert!(items.iter().enumerate().all(|(i, it)| it.original_index == i));
        assert_eq!(items[0].modified, Some(SystemTime::UNIX_EPOCH + Duration::from_secs(3_000)));
        assert_eq!(calls.first(), Some(&(1, 4)));
        assert_eq!(calls.last(), Some(&(4, 4)));
    }

    #[test]
    fn undated_files_fall_back_to_filesystem_times() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x.nef"), 3_000);
        touch(&dir.path().join("y.nef"), 1_000);
        let items = FolderScanner::new().scan(dir.path(), &mut |_, _| {}).unwrap();
        let names = names(&items);
        // Where creation time is available both were created "now", in order.
        assert!(names == ["y.nef", "x.nef"] || names == ["x.nef", "y.nef"], "{names:?}");

        let when = resolve_capture_time(&dir.path().join("y.nef"), None);
        assert_eq!(when, None);
        let meta = fs::metadata(dir.path().join("y.nef")).unwrap();
        let when = resolve_capture_time(&dir.path().join("y.nef"), Some(&meta)).unwrap();
        assert_eq!(Some(when), meta.created().ok().or(Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))));
    }

    #[test]
    fn date_cache_is_reused_until_the_file_changes() {
        let photos = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let cache = DateCache::in_dir(state.path());
        let scanner = FolderScanner::with_date_cache(cache.clone());

        let a = photos.path().join("a.nef");
        shot(&a, "2020:01:01 00:00:00", 5_000);
        shot(&photos.path().join("b.nef"), "2021:01:01 00:00:00", 5_000);

        let first = scanner.scan(photos.path(), &mut |_, _| {}).unwrap();
        assert_eq!(names(&first), ["a.nef", "b.nef"]);
        let saved = fs::read_to_string(cache.file()).unwrap();
        assert!(saved.contains("a.nef") && saved.contains("b.nef"), "{saved}");

        // Same mtime: the stale cached date still wins.
        shot(&a, "2022:01:01 00:00:00", 5_000);
        let second = scanner.scan(photos.path(), &mut |_, _| {}).unwrap();
        assert_eq!(names(&second), ["a.nef", "b.nef"]);
        assert_eq!(
            names(&FolderScanner::new().scan(photos.path(), &mut |_, _| {}).unwrap()),
            ["b.nef", "a.nef"]
        );

        // New mtime: the date is read again.
        shot(&a, "2022:01:01 00:00:00", 6_000);
        let third = scanner.scan(photos.path(), &mut |_, _| {}).unwrap();
        assert_eq!(names(&third), ["b.nef", "a.nef"]);
    }

    #[test]
    fn unreadable_date_cache_is_replaced() {
        let photos = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let cache = DateCache::in_dir(state.path());
        fs::write(cache.file(), b"{ not json").unwrap();
        shot(&photos.path().join("a.nef"), "2020:01:01 00:00:00", 5_000);

        let items = FolderScanner::with_date_cache(cache.clone())
            .scan(photos.path(), &mut |_, _| {})
            .unwrap();
        assert_eq!(items.len(), 1);
        let saved: BTreeMap<String, DateEntry> = serde_json::from_str(&fs::read_to_string(cache.file()).unwrap()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved.values().next().unwrap().mtime_ns, 5_000 * 1_000_000_000);
    }

    #[test]
    fn nanos_survive_before_the_epoch() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_millis(1_500);
        assert_eq!(to_nanos(before), Some(-1_500_000_000));
        assert_eq!(from_nanos(-1_500_000_000), before);
    }

    #[test]
    fn empty_folder_yields_no_items() {
        let dir = tempfile::tempdir().unwrap();
        let items = FolderScanner::new().scan(dir.path(), &mut |_, _| {}).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FolderScanner::new()
            .scan(&dir.path().join("nope"), &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }
}
