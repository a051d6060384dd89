//! Recently opened folders.
//!
//! A plain text file with one absolute path per line, most recent first.
//! Persistence is best effort: read and write failures leave the list empty
//! or unchanged on disk and are only logged.

use std::fs;
use std::path::{Path, PathBuf};

pub const MAX_RECENT: usize = 5;

const RECENT_FILE_NAME: &str = "recent_folders.txt";

#[derive(Debug, Clone)]
pub struct RecentFolders {
    file: PathBuf,
}

impl RecentFolders {
    /// Recent list stored in `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            file: state_dir.join(RECENT_FILE_NAME),
        }
    }

    /// Stored folders that still exist, most recent first.
    pub fn load(&self) -> Vec<PathBuf> {
        let content = match fs::read_to_string(&self.file) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .filter(|p| p.is_dir())
            .take(MAX_RECENT)
            .collect()
    }

    /// Move `folder` to the front of the list, save, and return the new list.
    pub fn add(&self, folder: &Path) -> Vec<PathBuf> {
        let mut folders = self.load();
        folders.retain(|f| f != folder);
        folders.insert(0, folder.to_path_buf());
        folders.truncate(MAX_RECENT);

        let mut content = String::new();
        for f in &folders {
            content.push_str(&f.to_string_lossy());
            content.push('\n');
        }
        if let Some(parent) = self.file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.file, content) {
            tracing::warn!(path = %self.file.display(), error = %e, "could not save recent folders");
        }
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_first_without_duplicates() {
        let state = tempfile::tempdir().unwrap();
        let photos = tempfile::tempdir().unwrap();
        let dirs: Vec<PathBuf> = (0..7)
            .map(|i| {
                let d = photos.path().join(format!("shoot{i}"));
                fs::create_dir(&d).unwrap();
                d
            })
            .collect();

        let recent = RecentFolders::in_dir(state.path());
        for d in &dirs {
            recent.add(d);
        }
        recent.add(&dirs[3]);

        let loaded = recent.load();
        assert_eq!(loaded.len(), MAX_RECENT);
        assert_eq!(loaded[0], dirs[3]);
        assert_eq!(loaded[1], dirs[6]);
        assert_eq!(loaded.iter().filter(|d| **d == dirs[3]).count(), 1);
    }

    #[test]
    fn vanished_folders_are_dropped_on_load() {
        let state = tempfile::tempdir().unwrap();
        let photos = tempfile::tempdir().unwrap();
        let keep = photos.path().join("keep");
        let gone = photos.path().join("gone");
        fs::create_dir(&keep).unwrap();
        fs::create_dir(&gone).unwrap();

        let recent = RecentFolders::in_dir(state.path());
        recent.add(&keep);
        recent.add(&gone);
        fs::remove_dir(&gone).unwrap();

        assert_eq!(recent.load(), vec![keep]);
    }

    #[test]
    fn missing_file_is_empty() {
        let state = tempfile::tempdir().unwrap();
        assert!(RecentFolders::in_dir(state.path()).load().is_empty());
    }
}
