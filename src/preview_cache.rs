//! Windowed in-memory cache of decoded previews.
//!
//! Unlike an LRU, retention is purely positional: after every navigation the
//! cache keeps only indices within `(window_size - 1) / 2` of the current index,
//! so it never holds more than `window_size` entries, even for an even size.
//! The cache does no locking of its own; it lives inside the coordinator's
//! shared state and is only touched under that lock.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::decoder::DecodedImage;

pub struct PreviewCache {
    entries: HashMap<usize, Arc<DecodedImage>>,
    window_size: usize,
}

impl PreviewCache {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            entries: HashMap::with_capacity(window_size + 1),
            window_size,
        }
    }

    /// Largest distance from the current index that survives a trim.
    pub fn radius(&self) -> usize {
        (self.window_size - 1) / 2
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn get(&self, index: usize) -> Option<Arc<DecodedImage>> {
        self.entries.get(&index).cloned()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    /// Insert a preview. An existing entry for the index is kept, the first
    /// decode to land wins.
    pub fn put(&mut self, index: usize, image: Arc<DecodedImage>) {
        self.entries.entry(index).or_insert(image);
    }

    /// Evict every entry farther than `radius()` from `center`.
    /// Returns the evicted indices.
    pub fn trim(&mut self, center: usize) -> Vec<usize> {
        let radius = self.radius();
        let evicted: Vec<usize> = self
            .entries
            .keys()
            .copied()
            .filter(|&idx| idx.abs_diff(center) > radius)
            .collect();
        for idx in &evicted {
            self.entries.remove(idx);
        }
        evicted
    }

    /// Clear the entire cache (list changed, indices no longer mean the same items).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get indices of all cached previews.
    pub fn cached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.entries.keys().copied().collect();
        indices.sort_unstable();
        indices
    }
}
