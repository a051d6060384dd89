//! Persistent thumbnail cache.
//!
//! A flat directory of `<key>.data` / `<key>.mtime` pairs where `key` is the
//! SHA-256 of the source path and thumbnail size. There is no index file: a
//! record exists when both files exist, and it is valid while the recorded
//! modification time matches the source file's current one. Every I/O problem
//! degrades to a miss; the cache is an optimization, never a requirement.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::error::CacheIoError;

const DATA_EXT: &str = "data";
const MTIME_EXT: &str = "mtime";

/// Distinguishes temp files of concurrent writers within this process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ThumbnailDiskCache {
    dir: PathBuf,
}

impl ThumbnailDiskCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable one-way key for `(source, size)`.
    pub fn cache_key(source: &Path, size: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_os_str().as_encoded_bytes());
        hasher.update(b":");
        hasher.update(size.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn record_paths(&self, source: &Path, size: u32) -> (PathBuf, PathBuf) {
        let key = Self::cache_key(source, size);
        (
            self.dir.join(format!("{key}.{DATA_EXT}")),
            self.dir.join(format!("{key}.{MTIME_EXT}")),
        )
    }

    /// Cached bytes for `source` at `size`, or `None` when absent or stale.
    pub fn get(&self, source: &Path, size: u32) -> Option<Vec<u8>> {
        match self.try_get(source, size) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::debug!(source = %source.display(), error = %e, "thumbnail cache read failed");
                None
            }
        }
    }

    fn try_get(&self, source: &Path, size: u32) -> Result<Option<Vec<u8>>, CacheIoError> {
        let (data_path, mtime_path) = self.record_paths(source, size);

        let recorded = match fs::read_to_string(&mtime_path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheIoError::Io {
                    path: mtime_path,
                    source,
                })
            }
        };
        let recorded: u128 = recorded
            .trim()
            .parse()
            .map_err(|_| CacheIoError::BadMtime(mtime_path.clone()))?;

        let current = source_mtime_nanos(source)?;
        if recorded != current {
            tracing::trace!(source = %source.display(), "thumbnail record is stale");
            return Ok(None);
        }

        match fs::read(&data_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheIoError::Io {
                path: data_path,
                source,
            }),
        }
    }

    /// Store `bytes` for `source` at `size`, stamped with the source's current
    /// modification time. Failures are logged and swallowed.
    pub fn set(&self, source: &Path, size: u32, bytes: &[u8]) {
        if let Err(e) = self.try_set(source, size, bytes) {
            tracing::warn!(source = %source.display(), error = %e, "thumbnail cache write failed");
        }
    }

    fn try_set(&self, source: &Path, size: u32, bytes: &[u8]) -> Result<(), CacheIoError> {
        let (data_path, mtime_path) = self.record_paths(source, size);
        let mtime = source_mtime_nanos(source)?;

        // Data first, mtime last: a reader only trusts a record once the
        // stamp is there, and both files are swapped in by rename.
        write_atomically(&data_path, bytes)?;
        write_atomically(&mtime_path, mtime.to_string().as_bytes())?;
        Ok(())
    }

    /// Remove the record for `source` at `size`, if any.
    pub fn invalidate(&self, source: &Path, size: u32) {
        let (data_path, mtime_path) = self.record_paths(source, size);
        for path in [mtime_path, data_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove thumbnail record"),
            }
        }
    }
}

fn source_mtime_nanos(source: &Path) -> Result<u128, CacheIoError> {
    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(|e| CacheIoError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
    system_time_nanos(modified).ok_or_else(|| CacheIoError::NoSourceMtime(source.to_path_buf()))
}

fn system_time_nanos(time: SystemTime) -> Option<u128> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_nanos())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheIoError> {
    let io_err = |source| CacheIoError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = path.as_os_str().to_owned();
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    tmp.push(format!(".tmp{}-{}", std::process::id(), seq));
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, at: SystemTime) {
        File::options().write(true).open(path).unwrap().set_modified(at).unwrap();
    }

    #[test]
    fn key_is_deterministic_and_size_sensitive() {
        let a = ThumbnailDiskCache::cache_key(Path::new("/a/b.nef"), 80);
        assert_eq!(a, ThumbnailDiskCache::cache_key(Path::new("/a/b.nef"), 80));
        assert_ne!(a, ThumbnailDiskCache::cache_key(Path::new("/a/b.nef"), 160));
        assert_ne!(a, ThumbnailDiskCache::cache_key(Path::new("/a/c.nef"), 80));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hit_returns_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.arw");
        fs::write(&source, b"raw").unwrap();
        let cache = ThumbnailDiskCache::open(dir.path().join("thumbs")).unwrap();

        assert!(cache.get(&source, 80).is_none());
        cache.set(&source, 80, &[1, 2, 3, 250]);
        assert_eq!(cache.get(&source, 80), Some(vec![1, 2, 3, 250]));
        assert!(cache.get(&source, 81).is_none());
    }

    #[test]
    fn mtime_change_makes_record_stale() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.arw");
        fs::write(&source, b"raw").unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        touch(&source, base);

        let cache = ThumbnailDiskCache::open(dir.path().join("thumbs")).unwrap();
        cache.set(&source, 80, b"thumb");
        assert!(cache.get(&source, 80).is_some());

        touch(&source, base + Duration::from_secs(5));
        assert!(cache.get(&source, 80).is_none());
    }

    #[test]
    fn invalidate_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.arw");
        fs::write(&source, b"raw").unwrap();
        let cache = ThumbnailDiskCache::open(dir.path().join("thumbs")).unwrap();

        cache.set(&source, 80, b"thumb");
        cache.invalidate(&source, 80);
        assert!(cache.get(&source, 80).is_none());
        assert_eq!(fs::read_dir(cache.dir()).unwrap().count(), 0);
        // Removing an absent record is a no-op.
        cache.invalidate(&source, 80);
    }

    #[test]
    fn missing_source_is_a_silent_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailDiskCache::open(dir.path()).unwrap();
        let ghost = dir.path().join("gone.nef");
        cache.set(&ghost, 80, b"thumb");
        assert!(cache.get(&ghost, 80).is_none());
    }

    #[test]
    fn corrupt_stamp_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.arw");
        fs::write(&source, b"raw").unwrap();
        let cache = ThumbnailDiskCache::open(dir.path().join("thumbs")).unwrap();
        cache.set(&source, 80, b"thumb");

        let (_, mtime_path) = cache.record_paths(&source, 80);
        fs::write(mtime_path, "yesterday").unwrap();
        assert!(cache.get(&source, 80).is_none());
    }
}
