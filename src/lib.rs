//! Core of a RAW photo browser: a windowed in-memory preview cache, a
//! persistent thumbnail cache, two decode pools and the coordinator that keeps
//! them fed while the user pages through a folder.

pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod item;
pub mod jobs;
pub mod metadata;
pub mod preview_cache;
pub mod rating;
pub mod recent;
pub mod scanner;
pub mod thumbnail_cache;
pub mod tracker;
pub mod worker;

pub use config::Config;
pub use coordinator::{Coordinator, ViewerEvent, ViewerState};
pub use decoder::{DecodedImage, Decoder, EmbeddedPreviewDecoder};
pub use error::{CacheIoError, ConfigError, DecodeError, PoolError, RatingError, ScanError, ViewerError};
pub use item::{ActiveList, Item, MAX_RATING};
pub use preview_cache::PreviewCache;
pub use rating::{RatingStore, XmpSidecarStore};
pub use recent::RecentFolders;
pub use scanner::{DateCache, Enumerator, FolderScanner};
pub use thumbnail_cache::ThumbnailDiskCache;
pub use tracker::{Debouncer, InFlightSet, Sweep};
pub use worker::{PoolKind, WorkerPool};
