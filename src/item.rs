//! Items of the browsable collection and the rating-filtered active list.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use hashbrown::HashMap;

/// Highest rating a user can give an item.
pub const MAX_RATING: u8 = 5;

/// One source file of the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable identity of the item; ratings and cache keys hang off it.
    pub path: PathBuf,
    /// Modification time observed at scan time.
    pub modified: Option<SystemTime>,
    /// Position in the unfiltered scan order. Never changes for the lifetime of the list.
    pub original_index: usize,
}

impl Item {
    pub fn new(path: impl Into<PathBuf>, modified: Option<SystemTime>, original_index: usize) -> Self {
        Self {
            path: path.into(),
            modified,
            original_index,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The navigable view over the scanned items.
///
/// Holds the full scan order plus the subsequence (by original index) that is
/// currently visible. Positions handed out to callers are always positions in
/// the visible subsequence.
#[derive(Debug, Clone, Default)]
pub struct ActiveList {
    all: Vec<Item>,
    visible: Vec<usize>,
    filter_level: u8,
}

impl ActiveList {
    /// Build an unfiltered list. `original_index` is rewritten to match the
    /// order given so callers cannot hand in inconsistent positions.
    pub fn new(mut items: Vec<Item>) -> Self {
        for (idx, item) in items.iter_mut().enumerate() {
            item.original_index = idx;
        }
        let visible = (0..items.len()).collect();
        Self {
            all: items,
            visible,
            filter_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn total_len(&self) -> usize {
        self.all.len()
    }

    pub fn filter_level(&self) -> u8 {
        self.filter_level
    }

    /// Item at an active-list position.
    pub fn get(&self, index: usize) -> Option<&Item> {
        self.visible.get(index).and_then(|&orig| self.all.get(orig))
    }

    /// All items in scan order, ignoring the filter.
    pub fn all_items(&self) -> &[Item] {
        &self.all
    }

    /// Original indices of the visible items, in order.
    pub fn visible_originals(&self) -> &[usize] {
        &self.visible
    }

    /// Active-list position of an item identified by its original index.
    pub fn position_of_original(&self, original_index: usize) -> Option<usize> {
        self.visible.iter().position(|&orig| orig == original_index)
    }

    /// Recompute the visible subsequence for `level` using resolved ratings.
    /// Items with no entry in `ratings` count as unrated (0).
    pub fn apply_filter(&mut self, level: u8, ratings: &HashMap<usize, u8>) {
        let level = level.min(MAX_RATING);
        self.filter_level = level;
        self.visible = if level == 0 {
            (0..self.all.len()).collect()
        } else {
            (0..self.all.len())
                .filter(|orig| ratings.get(orig).copied().unwrap_or(0) >= level)
                .collect()
        };
    }
}
