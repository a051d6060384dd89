//! Decode jobs and the state they share with the coordinator.
//!
//! Everything a job needs to check or update lives in one [`SharedState`]
//! behind one `parking_lot::Mutex`. Jobs decode outside the lock, take it once
//! to publish their result, then report to the coordinator over a crossbeam
//! channel.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::decoder::{DecodedImage, Decoder};
use crate::error::ScanError;
use crate::item::{ActiveList, Item};
use crate::preview_cache::PreviewCache;
use crate::rating::RatingStore;
use crate::thumbnail_cache::ThumbnailDiskCache;
use crate::tracker::InFlightSet;
use crate::worker::PoolKind;

/// State shared between the coordinator and the decode workers.
pub struct SharedState {
    /// Bumped whenever the active list changes; results tagged with an older
    /// generation are dropped.
    pub generation: u64,
    pub active: ActiveList,
    /// Position in `active`. Meaningful only while `active` is non-empty.
    pub current: usize,
    pub previews: PreviewCache,
    pub preview_in_flight: InFlightSet,
    pub thumb_in_flight: InFlightSet,
    /// Active-list indices whose thumbnail has been produced.
    pub thumbnails: HashSet<usize>,
    /// Ratings by original index, loaded lazily.
    pub ratings: HashMap<usize, u8>,
}

impl SharedState {
    pub fn new(window_size: usize) -> Self {
        Self {
            generation: 0,
            active: ActiveList::default(),
            current: 0,
            previews: PreviewCache::new(window_size),
            preview_in_flight: InFlightSet::new(),
            thumb_in_flight: InFlightSet::new(),
            thumbnails: HashSet::new(),
            ratings: HashMap::new(),
        }
    }

    pub fn in_flight_mut(&mut self, kind: PoolKind) -> &mut InFlightSet {
        match kind {
            PoolKind::Preview => &mut self.preview_in_flight,
            PoolKind::Thumbnail => &mut self.thumb_in_flight,
        }
    }

    /// Drop everything tied to the current list and start a new generation.
    pub fn reset(&mut self, active: ActiveList) {
        self.generation += 1;
        self.active = active;
        self.current = 0;
        self.previews.clear();
        self.preview_in_flight.clear();
        self.thumb_in_flight.clear();
        self.thumbnails.clear();
        self.ratings.clear();
    }

    /// Like [`SharedState::reset`] but keeps ratings, which are keyed by
    /// original index and survive a filter change.
    pub fn invalidate_positions(&mut self) {
        self.generation += 1;
        self.previews.clear();
        self.preview_in_flight.clear();
        self.thumb_in_flight.clear();
        self.thumbnails.clear();
    }

    /// Percent of the active list with a produced thumbnail.
    pub fn loading_percent(&self) -> u8 {
        let total = self.active.len();
        if total == 0 {
            return 100;
        }
        ((self.thumbnails.len().min(total) * 100) / total) as u8
    }
}

pub type Shared = Arc<Mutex<SharedState>>;

/// Worker-to-coordinator messages.
pub enum Completion {
    /// `fresh` is false when the preview was already cached (and shown) by
    /// the time this job published.
    Preview {
        generation: u64,
        index: usize,
        image: Option<Arc<DecodedImage>>,
        fresh: bool,
    },
    /// `fresh` is false when a thumbnail for `index` was already delivered,
    /// typically derived from a preview while this job was decoding.
    Thumbnail {
        generation: u64,
        index: usize,
        image: Option<Arc<DecodedImage>>,
        rating: u8,
        fresh: bool,
    },
    ScanProgress {
        scan_id: u64,
        current: usize,
        total: usize,
    },
    ScanFinished {
        scan_id: u64,
        folder: PathBuf,
        result: Result<Vec<Item>, ScanError>,
    },
}

/// Keeps an index in its pool's in-flight set for exactly as long as the job
/// runs. If the job unwinds before [`InFlightGuard::finish`], `Drop` removes
/// the entry so the index can be submitted again.
pub struct InFlightGuard {
    shared: Shared,
    kind: PoolKind,
    index: usize,
    generation: u64,
    armed: bool,
}

impl InFlightGuard {
    pub fn new(shared: Shared, kind: PoolKind, index: usize, generation: u64) -> Self {
        Self {
            shared,
            kind,
            index,
            generation,
            armed: true,
        }
    }

    /// Clear the in-flight entry and run `publish` under the same lock, unless
    /// the list has moved on to a newer generation.
    pub fn finish(mut self, publish: impl FnOnce(&mut SharedState)) {
        self.armed = false;
        let mut state = self.shared.lock();
        if state.generation != self.generation {
            return;
        }
        state.in_flight_mut(self.kind).remove(self.index);
        publish(&mut state);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        if state.generation == self.generation {
            state.in_flight_mut(self.kind).remove(self.index);
        }
        tracing::debug!(pool = self.kind.name(), index = self.index, "job ended without a result");
    }
}

/// Everything a job needs, cloned per submission.
#[derive(Clone)]
pub struct JobContext {
    pub shared: Shared,
    pub decoder: Arc<dyn Decoder>,
    pub ratings: Arc<dyn RatingStore>,
    pub disk: Arc<ThumbnailDiskCache>,
    pub completions: Sender<Completion>,
    pub thumbnail_size: u32,
}

pub fn run_preview_job(ctx: JobContext, index: usize, item: Item, generation: u64) {
    let guard = InFlightGuard::new(Arc::clone(&ctx.shared), PoolKind::Preview, index, generation);

    let image = match ctx.decoder.decode_preview(&item) {
        Ok(img) => Some(Arc::new(img)),
        Err(e) => {
            tracing::debug!(index, path = %item.path().display(), error = %e, "preview decode failed");
            None
        }
    };

    let mut fresh = false;
    guard.finish(|state| {
        if let Some(img) = &image {
            if !state.previews.contains(index) {
                state.previews.put(index, Arc::clone(img));
                fresh = true;
            }
            // The user may have moved on while this was decoding.
            let current = state.current;
            state.previews.trim(current);
        }
    });

    let _ = ctx.completions.send(Completion::Preview {
        generation,
        index,
        image,
        fresh,
    });
}

pub fn run_thumbnail_job(ctx: JobContext, index: usize, item: Item, generation: u64) {
    let guard = InFlightGuard::new(Arc::clone(&ctx.shared), PoolKind::Thumbnail, index, generation);
    let original = item.original_index;

    // Rating lookups ride along with thumbnail production.
    let cached = ctx.shared.lock().ratings.get(&original).copied();
    let loaded = match cached {
        Some(r) => r,
        None => match ctx.ratings.read_rating(&item) {
            Ok(r) => r.unwrap_or(0),
            Err(e) => {
                tracing::warn!(path = %item.path().display(), error = %e, "rating read failed");
                0
            }
        },
    };

    let image = load_thumbnail(ctx.decoder.as_ref(), &ctx.disk, &item, ctx.thumbnail_size).map(Arc::new);

    let mut rating = loaded;
    let mut fresh = false;
    guard.finish(|state| {
        rating = *state.ratings.entry(original).or_insert(loaded);
        if image.is_some() {
            fresh = state.thumbnails.insert(index);
        }
    });

    let _ = ctx.completions.send(Completion::Thumbnail {
        generation,
        index,
        image,
        rating,
        fresh,
    });
}

/// Thumbnail for `item`, served from the disk cache when a fresh record
/// exists, otherwise decoded and written back.
pub fn load_thumbnail(
    decoder: &dyn Decoder,
    disk: &ThumbnailDiskCache,
    item: &Item,
    size: u32,
) -> Option<DecodedImage> {
    if let Some(bytes) = disk.get(item.path(), size) {
        match DecodedImage::from_encoded(&bytes) {
            Ok(img) => return Some(img),
            Err(e) => {
                tracing::debug!(path = %item.path().display(), error = %e, "unreadable thumbnail record");
                disk.invalidate(item.path(), size);
            }
        }
    }

    match decoder.decode_thumbnail(item, size) {
        Ok(img) => {
            store_thumbnail(disk, item, size, &img);
            Some(img)
        }
        Err(e) => {
            tracing::debug!(path = %item.path().display(), error = %e, "thumbnail decode failed");
            None
        }
    }
}

/// Write `img` as the disk record for `item`. Failures are logged only.
pub fn store_thumbnail(disk: &ThumbnailDiskCache, item: &Item, size: u32, img: &DecodedImage) {
    match img.encode_png() {
        Ok(bytes) => disk.set(item.path(), size, &bytes),
        Err(e) => tracing::warn!(path = %item.path().display(), error = %e, "thumbnail encode failed"),
    }
}
