//! Fakes and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tempfile::TempDir;

use raw_viewer::{
    Config, Coordinator, DecodeError, DecodedImage, Decoder, Enumerator, Item, RatingError, RatingStore, ScanError,
    ThumbnailDiskCache, ViewerEvent,
};

/// Colour derived from the first letter of the file name, so tests can tell
/// which list an image was decoded for.
pub fn colour_for(path: &Path) -> [u8; 4] {
    let first = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.bytes().next())
        .unwrap_or(b'?');
    [first, 0, 0, 255]
}

#[derive(Default)]
struct DecoderLog {
    previews: HashMap<PathBuf, usize>,
    thumbnails: Vec<PathBuf>,
}

/// Decoder that produces solid images, counts calls and can stall either
/// pool's workers on demand.
#[derive(Clone, Default)]
pub struct FakeDecoder {
    log: Arc<Mutex<DecoderLog>>,
    hold_workers: Arc<AtomicBool>,
    hold_thumbnail_workers: Arc<AtomicBool>,
    failing: Arc<Mutex<Vec<PathBuf>>>,
}

/// Block while `flag` is set and the calling thread's name starts with `pool`.
fn wait_on_pool(pool: &str, flag: &AtomicBool) {
    let on_pool = std::thread::current().name().is_some_and(|n| n.starts_with(pool));
    if !on_pool {
        return;
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, preview jobs on pool threads wait before decoding. The
    /// synchronous decode on the coordinating thread is never held.
    pub fn hold_preview_workers(&self, hold: bool) {
        self.hold_workers.store(hold, Ordering::SeqCst);
    }

    /// Same as [`FakeDecoder::hold_preview_workers`] for thumbnail jobs.
    pub fn hold_thumbnail_workers(&self, hold: bool) {
        self.hold_thumbnail_workers.store(hold, Ordering::SeqCst);
    }

    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().push(path.to_path_buf());
    }

    pub fn preview_calls(&self, path: &Path) -> usize {
        self.log.lock().previews.get(path).copied().unwrap_or(0)
    }

    pub fn thumbnail_calls(&self, path: &Path) -> usize {
        self.log.lock().thumbnails.iter().filter(|p| p.as_path() == path).count()
    }

    pub fn thumbnail_order(&self) -> Vec<PathBuf> {
        self.log.lock().thumbnails.clone()
    }

    fn should_fail(&self, path: &Path) -> bool {
        self.failing.lock().iter().any(|p| p == path)
    }
}

impl Decoder for FakeDecoder {
    fn decode_preview(&self, item: &Item) -> Result<DecodedImage, DecodeError> {
        *self.log.lock().previews.entry(item.path.clone()).or_insert(0) += 1;

        wait_on_pool("preview-worker", &self.hold_workers);

        if self.should_fail(item.path()) {
            return Err(DecodeError::NoEmbeddedPreview(item.path.clone()));
        }
        Ok(DecodedImage::solid(320, 240, colour_for(item.path())))
    }

    fn decode_thumbnail(&self, item: &Item, size: u32) -> Result<DecodedImage, DecodeError> {
        self.log.lock().thumbnails.push(item.path.clone());
        wait_on_pool("thumbnail-worker", &self.hold_thumbnail_workers);
        if self.should_fail(item.path()) {
            return Err(DecodeError::NoEmbeddedPreview(item.path.clone()));
        }
        Ok(DecodedImage::solid(size, size * 3 / 4, colour_for(item.path())))
    }
}

/// Rating store backed by a map, with switchable write failures.
#[derive(Clone, Default)]
pub struct MemoryRatings {
    values: Arc<Mutex<HashMap<PathBuf, u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryRatings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preset(&self, path: &Path, rating: u8) {
        self.values.lock().insert(path.to_path_buf(), rating);
    }

    pub fn stored(&self, path: &Path) -> Option<u8> {
        self.values.lock().get(path).copied()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl RatingStore for MemoryRatings {
    fn read_rating(&self, item: &Item) -> Result<Option<u8>, RatingError> {
        Ok(self.stored(item.path()))
    }

    fn write_rating(&self, item: &Item, rating: u8) -> Result<(), RatingError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RatingError::Io {
                path: item.path.with_extension("xmp"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume"),
            });
        }
        self.values.lock().insert(item.path.clone(), rating);
        Ok(())
    }
}

/// Enumerator returning a canned result, with one progress report per item.
#[derive(Clone)]
pub struct FakeEnumerator {
    result: Arc<Mutex<Result<Vec<Item>, String>>>,
}

impl FakeEnumerator {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            result: Arc::new(Mutex::new(Ok(items))),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Arc::new(Mutex::new(Err(message.to_string()))),
        }
    }

    pub fn set_items(&self, items: Vec<Item>) {
        *self.result.lock() = Ok(items);
    }
}

impl Enumerator for FakeEnumerator {
    fn scan(&self, folder: &Path, on_progress: &mut dyn FnMut(usize, usize)) -> Result<Vec<Item>, ScanError> {
        let result = self.result.lock().clone();
        match result {
            Ok(items) => {
                let total = items.len();
                for i in 0..total {
                    on_progress(i + 1, total);
                }
                Ok(items)
            }
            Err(message) => Err(ScanError::Walk {
                path: folder.to_path_buf(),
                message,
            }),
        }
    }
}

/// `n` small files named `<prefix>_NNN.nef` in a fresh temp dir.
pub fn photo_folder(n: usize, prefix: &str) -> (TempDir, Vec<Item>) {
    let dir = TempDir::new().unwrap();
    let items = photos_in(dir.path(), n, prefix);
    (dir, items)
}

pub fn photos_in(dir: &Path, n: usize, prefix: &str) -> Vec<Item> {
    (0..n)
        .map(|i| {
            let path = dir.join(format!("{prefix}_{i:03}.nef"));
            fs::write(&path, format!("raw {i}")).unwrap();
            Item::new(path, None, i)
        })
        .collect()
}

/// Config with a fast sweep so tests finish quickly.
pub fn fast_config() -> Config {
    Config {
        sweep_interval: Duration::from_millis(1),
        debounce: Duration::from_millis(20),
        ..Config::default()
    }
}

pub struct Harness {
    pub viewer: Coordinator,
    pub events: Receiver<ViewerEvent>,
    pub decoder: FakeDecoder,
    pub ratings: MemoryRatings,
    pub enumerator: FakeEnumerator,
    pub cache_dir: TempDir,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::with_enumerator(config, FakeEnumerator::with_items(Vec::new()))
    }

    pub fn with_enumerator(config: Config, enumerator: FakeEnumerator) -> Self {
        let decoder = FakeDecoder::new();
        let ratings = MemoryRatings::new();
        let cache_dir = TempDir::new().unwrap();
        let disk = ThumbnailDiskCache::open(cache_dir.path().join("thumbs")).unwrap();
        let (viewer, events) =
            Coordinator::new(config, decoder.clone(), ratings.clone(), enumerator.clone(), disk).unwrap();
        Self {
            viewer,
            events,
            decoder,
            ratings,
            enumerator,
            cache_dir,
        }
    }

    /// Pump until the pipeline has nothing left to do.
    pub fn settle(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            self.viewer.pump();
            if self.viewer.is_idle() {
                // One more pass picks up anything sent just before the check.
                self.viewer.pump();
                if self.viewer.is_idle() {
                    return;
                }
            }
            assert!(Instant::now() < deadline, "pipeline did not settle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        self.events.try_iter().collect()
    }
}
