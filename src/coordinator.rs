//! Navigation, filtering and background-loading orchestration.
//!
//! The [`Coordinator`] is driven from a single thread: the embedding
//! application calls its commands and calls [`Coordinator::pump`] from its
//! event loop. Decode work runs on two [`WorkerPool`]s and reports back
//! through a completion channel that `pump` drains. Presentation updates go
//! out as [`ViewerEvent`]s on a second channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use image::imageops::FilterType;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::config::Config;
use crate::decoder::{DecodedImage, Decoder, EmbeddedPreviewDecoder};
use crate::error::{ScanError, ViewerError};
use crate::item::{ActiveList, Item, MAX_RATING};
use crate::jobs::{run_preview_job, run_thumbnail_job, store_thumbnail, Completion, JobContext, Shared, SharedState};
use crate::rating::{RatingStore, XmpSidecarStore};
use crate::recent::RecentFolders;
use crate::scanner::{DateCache, Enumerator, FolderScanner};
use crate::thumbnail_cache::ThumbnailDiskCache;
use crate::tracker::{expand_range, neighbors, Debouncer, Sweep, SweepTimer};
use crate::worker::{PoolKind, WorkerPool};

/// Notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Full preview for the item at `index`, which is the current item.
    CurrentPreviewAvailable { index: usize, image: Arc<DecodedImage> },
    /// The current item could not be decoded; show a placeholder.
    CurrentPreviewFailed { index: usize },
    CurrentChanged {
        index: usize,
        total: usize,
        path: PathBuf,
        rating: u8,
    },
    /// `rating` is `None` when it has not been loaded yet.
    ThumbnailAvailable {
        index: usize,
        image: Arc<DecodedImage>,
        rating: Option<u8>,
    },
    LoadingProgress { percent: u8 },
    ScanProgress { current: usize, total: usize, percent: u8 },
    FolderLoaded { folder: Option<PathBuf>, count: usize },
    FolderEmpty { folder: PathBuf },
    FolderClosed,
    ScanFailed { folder: PathBuf, message: String },
    FilterApplied { level: u8, count: usize },
    RatingChanged { index: usize, rating: u8 },
    RatingPersistFailed { index: usize, message: String },
}

/// Folder lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerState {
    Empty,
    Scanning { folder: PathBuf },
    Ready { filter_level: u8 },
}

pub struct Coordinator {
    config: Config,
    shared: Shared,
    decoder: Arc<dyn Decoder>,
    ratings: Arc<dyn RatingStore>,
    enumerator: Arc<dyn Enumerator>,
    disk: Arc<ThumbnailDiskCache>,
    preview_pool: WorkerPool,
    thumbnail_pool: WorkerPool,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    events: Sender<ViewerEvent>,
    state: ViewerState,
    scan_id: u64,
    folder: Option<PathBuf>,
    sweep: Option<SweepTimer>,
    visible: Debouncer<(usize, usize)>,
    recent: Option<RecentFolders>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        decoder: impl Decoder,
        ratings: impl RatingStore,
        enumerator: impl Enumerator,
        disk: ThumbnailDiskCache,
    ) -> Result<(Self, Receiver<ViewerEvent>), ViewerError> {
        let preview_pool = WorkerPool::new(PoolKind::Preview, config.preview_workers)?;
        let thumbnail_pool = WorkerPool::new(PoolKind::Thumbnail, config.thumbnail_workers)?;
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let (events, events_rx) = crossbeam_channel::unbounded();

        let coordinator = Self {
            shared: Arc::new(Mutex::new(SharedState::new(config.window_size))),
            visible: Debouncer::new(config.debounce),
            config,
            decoder: Arc::new(decoder),
            ratings: Arc::new(ratings),
            enumerator: Arc::new(enumerator),
            disk: Arc::new(disk),
            preview_pool,
            thumbnail_pool,
            completion_tx,
            completion_rx,
            events,
            state: ViewerState::Empty,
            scan_id: 0,
            folder: None,
            sweep: None,
            recent: None,
        };
        Ok((coordinator, events_rx))
    }

    /// Coordinator with the bundled decoder, XMP ratings, folder scanner and
    /// the configured thumbnail cache directory.
    pub fn with_defaults(config: Config) -> Result<(Self, Receiver<ViewerEvent>), ViewerError> {
        let dir = config.thumbnail_cache_dir()?;
        let disk = ThumbnailDiskCache::open(&dir).map_err(|source| ViewerError::CacheDir { path: dir, source })?;
        let state_dir = config.state_dir().ok();
        let recent = state_dir.as_deref().map(RecentFolders::in_dir);
        let scanner = match state_dir.as_deref() {
            Some(dir) => FolderScanner::with_date_cache(DateCache::in_dir(dir)),
            None => FolderScanner::new(),
        };

        let (mut coordinator, events) = Self::new(
            config,
            EmbeddedPreviewDecoder::new(),
            XmpSidecarStore::new(),
            scanner,
            disk,
        )?;
        coordinator.recent = recent;
        Ok((coordinator, events))
    }

    /// Remember opened folders in `recent`.
    pub fn set_recent_folders(&mut self, recent: RecentFolders) {
        self.recent = Some(recent);
    }

    pub fn recent_folders(&self) -> Vec<PathBuf> {
        self.recent.as_ref().map(RecentFolders::load).unwrap_or_default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_index(&self) -> Option<usize> {
        let s = self.shared.lock();
        (!s.active.is_empty()).then_some(s.current)
    }

    pub fn current_item(&self) -> Option<Item> {
        let s = self.shared.lock();
        s.active.get(s.current).cloned()
    }

    pub fn filter_level(&self) -> u8 {
        self.shared.lock().active.filter_level()
    }

    /// Paths of the active list, in order.
    pub fn active_paths(&self) -> Vec<PathBuf> {
        let s = self.shared.lock();
        (0..s.active.len())
            .filter_map(|i| s.active.get(i).map(|it| it.path.clone()))
            .collect()
    }

    /// Cached rating for the item at an active-list position.
    pub fn rating(&self, index: usize) -> Option<u8> {
        let s = self.shared.lock();
        let original = s.active.get(index)?.original_index;
        s.ratings.get(&original).copied()
    }

    pub fn cached_previews(&self) -> Vec<usize> {
        self.shared.lock().previews.cached_indices()
    }

    pub fn preview_in_flight(&self) -> Vec<usize> {
        self.shared.lock().preview_in_flight.snapshot()
    }

    pub fn thumbnail_in_flight(&self) -> Vec<usize> {
        self.shared.lock().thumb_in_flight.snapshot()
    }

    pub fn thumbnails_delivered(&self) -> usize {
        self.shared.lock().thumbnails.len()
    }

    pub fn loading_percent(&self) -> u8 {
        self.shared.lock().loading_percent()
    }

    pub fn sweep(&self) -> Option<&Sweep> {
        self.sweep.as_ref().map(|t| &t.sweep)
    }

    /// No job queued or running, nothing left to drain, no sweep or range
    /// pass pending, and no scan running.
    pub fn is_idle(&self) -> bool {
        self.preview_pool.pending() == 0
            && self.thumbnail_pool.pending() == 0
            && self.completion_rx.is_empty()
            && self.sweep.as_ref().map_or(true, |t| t.sweep.is_finished())
            && !self.visible.is_pending()
            && !matches!(self.state, ViewerState::Scanning { .. })
    }

    /// Start scanning `folder` on a background thread. Results arrive via `pump`.
    pub fn open_folder(&mut self, folder: impl Into<PathBuf>) {
        let folder = folder.into();
        self.scan_id += 1;
        let scan_id = self.scan_id;
        self.state = ViewerState::Scanning { folder: folder.clone() };
        tracing::info!(folder = %folder.display(), "scanning folder");

        let enumerator = Arc::clone(&self.enumerator);
        let tx = self.completion_tx.clone();
        let scan_folder = folder.clone();
        let spawned = std::thread::Builder::new()
            .name("folder-scan".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    enumerator.scan(&scan_folder, &mut |current, total| {
                        let _ = progress_tx.send(Completion::ScanProgress {
                            scan_id,
                            current,
                            total,
                        });
                    })
                }))
                .unwrap_or_else(|_| {
                    Err(ScanError::Walk {
                        path: scan_folder.clone(),
                        message: "scanner panicked".to_string(),
                    })
                });
                let _ = tx.send(Completion::ScanFinished {
                    scan_id,
                    folder: scan_folder,
                    result,
                });
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to start folder scan");
            self.state = ViewerState::Empty;
            self.emit(ViewerEvent::ScanFailed {
                folder,
                message: e.to_string(),
            });
        }
    }

    /// Install an already enumerated list, as a finished scan would.
    pub fn load_items(&mut self, items: Vec<Item>) {
        self.install_list(None, items);
    }

    pub fn close_folder(&mut self) {
        self.scan_id += 1;
        self.shared.lock().reset(ActiveList::default());
        self.sweep = None;
        self.visible.cancel();
        self.folder = None;
        self.state = ViewerState::Empty;
        tracing::info!("folder closed");
        self.emit(ViewerEvent::FolderClosed);
    }

    /// Move by `delta` items. Moves that would leave the list are ignored.
    pub fn navigate(&mut self, delta: isize) -> bool {
        let target = {
            let s = self.shared.lock();
            s.current.checked_add_signed(delta).filter(|&t| t < s.active.len())
        };
        match target {
            Some(t) => {
                self.go_to(t);
                true
            }
            None => false,
        }
    }

    pub fn jump_to(&mut self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        self.go_to(index);
        true
    }

    /// Show only items rated `level` or higher; 0 shows everything.
    ///
    /// Every rating is resolved first, synchronously, so the filter sees the
    /// persisted values even for items whose thumbnail never loaded.
    pub fn set_filter(&mut self, level: u8) {
        if !matches!(self.state, ViewerState::Ready { .. }) {
            tracing::debug!(level, "filter ignored, no folder loaded");
            return;
        }
        let level = level.min(MAX_RATING);
        self.resolve_all_ratings();

        let (changed, count) = {
            let mut guard = self.shared.lock();
            let s = &mut *guard;
            let selected = s.active.get(s.current).map(|it| it.original_index);
            let before = s.active.visible_originals().to_vec();
            s.active.apply_filter(level, &s.ratings);
            let changed = s.active.visible_originals() != before.as_slice();
            if changed {
                s.invalidate_positions();
                s.current = selected.and_then(|o| s.active.position_of_original(o)).unwrap_or(0);
            }
            (changed, s.active.len())
        };

        if changed {
            // A pending range refers to positions in the old list.
            self.visible.cancel();
        }
        self.state = ViewerState::Ready { filter_level: level };
        tracing::info!(level, count, changed, "filter applied");
        self.emit(ViewerEvent::FilterApplied { level, count });

        if count == 0 {
            self.sweep = None;
            return;
        }
        if changed {
            self.show_current();
            self.preload_neighbors();
        }
        self.restart_sweep();
    }

    /// Rate the current item. Out-of-range values are ignored.
    pub fn rate(&mut self, value: u8) -> bool {
        if value > MAX_RATING {
            tracing::warn!(value, "rating out of range");
            return false;
        }
        let (index, item, total) = {
            let mut s = self.shared.lock();
            let Some(item) = s.active.get(s.current).cloned() else {
                return false;
            };
            s.ratings.insert(item.original_index, value);
            (s.current, item, s.active.len())
        };
        self.emit(ViewerEvent::RatingChanged { index, rating: value });

        if let Err(e) = self.ratings.write_rating(&item, value) {
            tracing::warn!(path = %item.path().display(), error = %e, "rating not persisted");
            self.emit(ViewerEvent::RatingPersistFailed {
                index,
                message: e.to_string(),
            });
        }

        if self.config.advance_after_rating && index + 1 < total {
            self.go_to(index + 1);
        }
        true
    }

    /// Filmstrip scrolled; acted on after the debounce quiet period.
    pub fn visible_range_changed(&mut self, first: usize, last: usize) {
        self.visible_range_changed_at(first, last, Instant::now());
    }

    pub fn visible_range_changed_at(&mut self, first: usize, last: usize, now: Instant) {
        self.visible.push((first, last), now);
    }

    /// Restart the progressive sweep from the current item.
    pub fn restart_sweep(&mut self) {
        self.restart_sweep_at(Instant::now());
    }

    pub fn restart_sweep_at(&mut self, now: Instant) {
        let (current, len) = {
            let s = self.shared.lock();
            (s.current, s.active.len())
        };
        if len == 0 {
            self.sweep = None;
            return;
        }
        tracing::debug!(start = current, len, "thumbnail sweep started");
        self.sweep = Some(SweepTimer::new(Sweep::new(current, len), now));
    }

    pub fn stop_sweep(&mut self) {
        if let Some(timer) = self.sweep.as_mut() {
            timer.sweep.finish();
        }
    }

    /// Drain worker results and run any due background work. Returns the
    /// number of completions handled.
    pub fn pump(&mut self) -> usize {
        self.pump_at(Instant::now())
    }

    pub fn pump_at(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.completion_rx.try_recv() {
            self.handle_completion(msg);
            handled += 1;
        }
        if let Some((first, last)) = self.visible.poll(now) {
            self.prioritize_range(first, last);
        }
        self.tick_sweep(now);
        handled
    }

    fn emit(&self, event: ViewerEvent) {
        let _ = self.events.send(event);
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            shared: Arc::clone(&self.shared),
            decoder: Arc::clone(&self.decoder),
            ratings: Arc::clone(&self.ratings),
            disk: Arc::clone(&self.disk),
            completions: self.completion_tx.clone(),
            thumbnail_size: self.config.thumbnail_size,
        }
    }

    fn install_list(&mut self, folder: Option<PathBuf>, items: Vec<Item>) {
        let count = items.len();
        self.shared.lock().reset(ActiveList::new(items));
        self.visible.cancel();
        self.sweep = None;
        self.folder = folder.clone();

        if count == 0 {
            self.state = ViewerState::Empty;
            if let Some(folder) = folder {
                self.emit(ViewerEvent::FolderEmpty { folder });
            }
            return;
        }

        self.state = ViewerState::Ready { filter_level: 0 };
        tracing::info!(count, "folder loaded");
        self.emit(ViewerEvent::FolderLoaded { folder, count });
        self.show_current();
        self.preload_neighbors();
        self.restart_sweep();
    }

    fn go_to(&mut self, index: usize) {
        self.shared.lock().current = index;
        self.show_current();
        self.preload_neighbors();
    }

    /// Present the current item, decoding it on this thread on a cache miss.
    fn show_current(&mut self) {
        let (index, item, total, cached, generation) = {
            let s = self.shared.lock();
            let Some(item) = s.active.get(s.current).cloned() else {
                return;
            };
            (s.current, item, s.active.len(), s.previews.get(s.current), s.generation)
        };

        let rating = self.resolve_rating(&item);
        self.emit(ViewerEvent::CurrentChanged {
            index,
            total,
            path: item.path.clone(),
            rating,
        });

        if let Some(image) = cached {
            self.emit(ViewerEvent::CurrentPreviewAvailable { index, image });
            return;
        }

        match self.decoder.decode_preview(&item) {
            Ok(img) => {
                let image = Arc::new(img);
                {
                    let mut s = self.shared.lock();
                    if s.generation == generation {
                        s.previews.put(index, Arc::clone(&image));
                    }
                }
                self.emit(ViewerEvent::CurrentPreviewAvailable {
                    index,
                    image: Arc::clone(&image),
                });
                self.derive_thumbnail(generation, index, &image);
            }
            Err(e) => {
                tracing::warn!(index, path = %item.path().display(), error = %e, "current preview failed");
                self.emit(ViewerEvent::CurrentPreviewFailed { index });
            }
        }
    }

    /// Submit preview jobs around the current item, then trim the cache.
    fn preload_neighbors(&self) {
        let mut jobs: SmallVec<[(usize, Item); 6]> = SmallVec::new();
        let generation = {
            let mut guard = self.shared.lock();
            let s = &mut *guard;
            let center = s.current;
            for idx in neighbors(center, s.active.len(), s.previews.radius()) {
                if s.previews.contains(idx) || !s.preview_in_flight.try_insert(idx) {
                    continue;
                }
                if let Some(item) = s.active.get(idx) {
                    jobs.push((idx, item.clone()));
                }
            }
            s.previews.trim(center);
            s.generation
        };

        for (idx, item) in jobs {
            let ctx = self.job_context();
            self.preview_pool
                .submit(move || run_preview_job(ctx, idx, item, generation));
        }
    }

    /// Submit thumbnail jobs for `indices` that are neither produced nor in flight.
    fn submit_thumbnails(&self, indices: impl IntoIterator<Item = usize>) -> usize {
        let mut jobs: Vec<(usize, Item)> = Vec::new();
        let generation = {
            let mut guard = self.shared.lock();
            let s = &mut *guard;
            for idx in indices {
                if s.thumbnails.contains(&idx) {
                    continue;
                }
                let Some(item) = s.active.get(idx) else {
                    continue;
                };
                if s.thumb_in_flight.try_insert(idx) {
                    jobs.push((idx, item.clone()));
                }
            }
            s.generation
        };

        let submitted = jobs.len();
        for (idx, item) in jobs {
            let ctx = self.job_context();
            self.thumbnail_pool
                .submit(move || run_thumbnail_job(ctx, idx, item, generation));
        }
        submitted
    }

    fn prioritize_range(&self, first: usize, last: usize) {
        let len = self.len();
        let Some(range) = expand_range(first, last, self.config.visible_buffer, len) else {
            return;
        };
        let submitted = self.submit_thumbnails(range.clone());
        tracing::debug!(first = *range.start(), last = *range.end(), submitted, "visible range prioritized");
    }

    fn tick_sweep(&mut self, now: Instant) {
        let Some(timer) = self.sweep.as_mut() else {
            return;
        };
        if timer.sweep.is_finished() || !timer.tick_due(now, self.config.sweep_interval) {
            return;
        }
        let batch = {
            let s = self.shared.lock();
            let skip = |idx: usize| s.thumbnails.contains(&idx) || s.thumb_in_flight.contains(idx);
            timer.sweep.next_batch(self.config.sweep_batch, skip)
        };
        let finished = timer.sweep.is_finished();

        self.submit_thumbnails(batch);
        if finished {
            tracing::debug!("thumbnail sweep finished");
        }
    }

    fn handle_completion(&mut self, msg: Completion) {
        match msg {
            Completion::Preview {
                generation,
                index,
                image,
                fresh,
            } => {
                let (live, current) = {
                    let s = self.shared.lock();
                    (s.generation == generation, s.current)
                };
                if !live {
                    tracing::trace!(index, "stale preview dropped");
                    return;
                }
                let Some(image) = image else {
                    return;
                };
                if !fresh {
                    tracing::trace!(index, "preview was already cached");
                    return;
                }
                if index == current {
                    self.emit(ViewerEvent::CurrentPreviewAvailable {
                        index,
                        image: Arc::clone(&image),
                    });
                }
                self.derive_thumbnail(generation, index, &image);
            }
            Completion::Thumbnail {
                generation,
                index,
                image,
                rating,
                fresh,
            } => {
                let percent = {
                    let s = self.shared.lock();
                    if s.generation != generation {
                        tracing::trace!(index, "stale thumbnail dropped");
                        return;
                    }
                    s.loading_percent()
                };
                if !fresh {
                    tracing::trace!(index, "thumbnail was already delivered");
                    return;
                }
                if let Some(image) = image {
                    self.emit(ViewerEvent::ThumbnailAvailable {
                        index,
                        image,
                        rating: Some(rating),
                    });
                    self.emit(ViewerEvent::LoadingProgress { percent });
                }
            }
            Completion::ScanProgress {
                scan_id,
                current,
                total,
            } => {
                if scan_id != self.scan_id || !matches!(self.state, ViewerState::Scanning { .. }) {
                    return;
                }
                let percent = if total == 0 { 0 } else { (current * 100 / total).min(100) as u8 };
                self.emit(ViewerEvent::ScanProgress {
                    current,
                    total,
                    percent,
                });
            }
            Completion::ScanFinished {
                scan_id,
                folder,
                result,
            } => {
                if scan_id != self.scan_id {
                    tracing::debug!(folder = %folder.display(), "superseded scan ignored");
                    return;
                }
                match result {
                    Ok(items) => {
                        if !items.is_empty() {
                            if let Some(recent) = &self.recent {
                                recent.add(&folder);
                            }
                        } else {
                            tracing::info!(folder = %folder.display(), "no RAW files found");
                        }
                        self.install_list(Some(folder), items);
                    }
                    Err(e) => {
                        tracing::warn!(folder = %folder.display(), error = %e, "scan failed");
                        self.state = ViewerState::Empty;
                        self.emit(ViewerEvent::ScanFailed {
                            folder,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Fill the filmstrip slot for `index` from a freshly decoded preview if
    /// no thumbnail has been produced for it yet. The result is also written
    /// to the disk cache on the thumbnail pool.
    fn derive_thumbnail(&self, generation: u64, index: usize, preview: &DecodedImage) {
        let (item, rating, percent) = {
            let mut s = self.shared.lock();
            if s.generation != generation {
                return;
            }
            let Some(item) = s.active.get(index).cloned() else {
                return;
            };
            if !s.thumbnails.insert(index) {
                return;
            }
            let rating = s.ratings.get(&item.original_index).copied();
            (item, rating, s.loading_percent())
        };
        let size = self.config.thumbnail_size;
        let thumb = Arc::new(preview.fit_within(size, FilterType::Triangle));

        let disk = Arc::clone(&self.disk);
        let record = Arc::clone(&thumb);
        self.thumbnail_pool
            .submit(move || store_thumbnail(&disk, &item, size, &record));

        self.emit(ViewerEvent::ThumbnailAvailable {
            index,
            image: thumb,
            rating,
        });
        self.emit(ViewerEvent::LoadingProgress { percent });
    }

    /// Cached rating, loading it from the store on first access.
    fn resolve_rating(&self, item: &Item) -> u8 {
        if let Some(r) = self.shared.lock().ratings.get(&item.original_index) {
            return *r;
        }
        let loaded = self.read_rating_or_zero(item);
        *self
            .shared
            .lock()
            .ratings
            .entry(item.original_index)
            .or_insert(loaded)
    }

    fn resolve_all_ratings(&self) {
        let missing: Vec<Item> = {
            let s = self.shared.lock();
            s.active
                .all_items()
                .iter()
                .filter(|it| !s.ratings.contains_key(&it.original_index))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        tracing::debug!(count = missing.len(), "loading ratings for filter");
        let loaded: Vec<(usize, u8)> = missing
            .iter()
            .map(|it| (it.original_index, self.read_rating_or_zero(it)))
            .collect();
        let mut s = self.shared.lock();
        for (original, rating) in loaded {
            s.ratings.entry(original).or_insert(rating);
        }
    }

    fn read_rating_or_zero(&self, item: &Item) -> u8 {
        match self.ratings.read_rating(item) {
            Ok(r) => r.unwrap_or(0),
            Err(e) => {
                tracing::warn!(path = %item.path().display(), error = %e, "rating read failed");
                0
            }
        }
    }
}
