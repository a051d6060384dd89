//! Error taxonomy for the preview/thumbnail pipeline.
//!
//! None of these are fatal to the process. Decode and cache errors are
//! recovered where they happen; scan and rating-write errors are surfaced to
//! the presentation layer as [`crate::coordinator::ViewerEvent`]s.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A source file could not be turned into pixels.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no embedded preview found in {0}")]
    NoEmbeddedPreview(PathBuf),
    #[error("unsupported or corrupt image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("decoder produced an empty image for {0}")]
    Empty(PathBuf),
}

/// Thumbnail disk cache read/write failure. Always treated as a cache miss.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("cache record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed mtime record {0}")]
    BadMtime(PathBuf),
    #[error("source file {0} has no usable modification time")]
    NoSourceMtime(PathBuf),
}

/// Folder enumeration failed; the coordinator stays in `Empty`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

/// Rating persistence failure.
#[derive(Debug, Error)]
pub enum RatingError {
    #[error("rating sidecar {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rating {0} is outside 0..=5")]
    OutOfRange(u8),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build {name} worker pool: {source}")]
    Build {
        name: &'static str,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not determine a cache directory for this platform")]
    NoCacheDir,
}

/// Errors raised while wiring a [`crate::coordinator::Coordinator`] together.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create thumbnail cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
