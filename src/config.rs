//! Pipeline configuration loaded from an INI file.
//! Unknown keys are ignored and out-of-range values are clamped, so a stale or
//! hand-edited file never prevents startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::error::ConfigError;

const DEFAULT_CONFIG_INI: &str = include_str!("../config.ini");

/// Number of previews kept warm around the current item (current included).
pub const DEFAULT_WINDOW_SIZE: usize = 7;
/// Concurrent decoders in each pool.
pub const DEFAULT_POOL_WORKERS: usize = 4;
/// Extra thumbnails requested on each side of the visible filmstrip range.
pub const DEFAULT_VISIBLE_BUFFER: usize = 5;
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_SWEEP_BATCH: usize = 5;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 100;
/// Filmstrip thumbnail edge in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Preview memory cache window; the cache keeps indices within `(window_size - 1) / 2`.
    pub window_size: usize,
    pub preview_workers: usize,
    pub thumbnail_workers: usize,
    pub visible_buffer: usize,
    /// Quiet period before a visible-range report is acted on.
    pub debounce: Duration,
    /// Thumbnail jobs submitted per sweep tick.
    pub sweep_batch: usize,
    pub sweep_interval: Duration,
    pub thumbnail_size: u32,
    /// Thumbnail disk cache directory. `None` means the platform cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Move to the next item after a rating is set.
    pub advance_after_rating: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            preview_workers: DEFAULT_POOL_WORKERS,
            thumbnail_workers: DEFAULT_POOL_WORKERS,
            visible_buffer: DEFAULT_VISIBLE_BUFFER,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            sweep_batch: DEFAULT_SWEEP_BATCH,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            cache_dir: None,
            advance_after_rating: true,
        }
    }
}

impl Config {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("dev", "raw-viewer", "raw-viewer")
    }

    /// Get settings file path (`config.ini` in the platform config directory).
    pub fn config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.ini"))
    }

    /// Directory holding the thumbnail records.
    pub fn thumbnail_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        Self::project_dirs()
            .map(|dirs| dirs.cache_dir().join("thumbs"))
            .ok_or(ConfigError::NoCacheDir)
    }

    /// Directory for small bookkeeping files (recent folders).
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        Self::project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .ok_or(ConfigError::NoCacheDir)
    }

    /// Load configuration from the platform config file, creating it from the
    /// bundled template on first run. Falls back to defaults when the platform
    /// has no config directory.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(config_path) = Self::config_path() else {
            tracing::warn!("no config directory for this platform, using defaults");
            return Ok(Self::default());
        };

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::write(&config_path, DEFAULT_CONFIG_INI) {
                tracing::warn!(path = %config_path.display(), error = %e, "could not write default config");
                return Ok(Self::parse_ini(DEFAULT_CONFIG_INI));
            }
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit INI file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse_ini(&content))
    }

    /// Parse INI content into Config
    pub fn parse_ini(content: &str) -> Self {
        let mut config = Config::default();

        let mut in_pipeline_section = false;
        let mut in_thumbnail_section = false;
        let mut in_rating_section = false;

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let section = &line[1..line.len() - 1];
                in_pipeline_section = section.eq_ignore_ascii_case("pipeline")
                    || section.eq_ignore_ascii_case("workers");
                in_thumbnail_section = section.eq_ignore_ascii_case("thumbnails")
                    || section.eq_ignore_ascii_case("thumbnail");
                in_rating_section = section.eq_ignore_ascii_case("ratings")
                    || section.eq_ignore_ascii_case("rating");
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if in_pipeline_section {
                match key.as_str() {
                    "window_size" | "preview_window" | "cache_size" => {
                        if let Ok(v) = value.parse::<usize>() {
                            config.window_size = v.clamp(1, 64);
                        }
                    }
                    "preview_workers" | "preview_threads" => {
                        if let Ok(v) = value.parse::<usize>() {
                            config.preview_workers = v.clamp(1, 32);
                        }
                    }
                    "thumbnail_workers" | "thumb_workers" | "thumbnail_threads" => {
                        if let Ok(v) = value.parse::<usize>() {
                            config.thumbnail_workers = v.clamp(1, 32);
                        }
                    }
                    _ => {}
                }
            }

            if in_thumbnail_section {
                match key.as_str() {
                    "size" | "thumbnail_size" => {
                        if let Ok(v) = value.parse::<u32>() {
                            config.thumbnail_size = v.clamp(16, 1024);
                        }
                    }
                    "visible_buffer" | "buffer" => {
                        if let Ok(v) = value.parse::<usize>() {
                            config.visible_buffer = v.min(100);
                        }
                    }
                    "debounce_ms" | "scroll_debounce_ms" => {
                        if let Ok(v) = value.parse::<u64>() {
                            config.debounce = Duration::from_millis(v.clamp(10, 2000));
                        }
                    }
                    "sweep_batch" | "batch_size" => {
                        if let Ok(v) = value.parse::<usize>() {
                            config.sweep_batch = v.clamp(1, 256);
                        }
                    }
                    "sweep_interval_ms" | "sweep_interval" => {
                        if let Ok(v) = value.parse::<u64>() {
                            config.sweep_interval = Duration::from_millis(v.clamp(1, 10_000));
                        }
                    }
                    "cache_dir" | "cache_directory" => {
                        if !value.is_empty() {
                            config.cache_dir = Some(PathBuf::from(value));
                        }
                    }
                    _ => {}
                }
            }

            if in_rating_section {
                if let "advance_after_rating" | "auto_advance" = key.as_str() {
                    if let Some(v) = parse_bool(value) {
                        config.advance_after_rating = v;
                    }
                }
            }
        }

        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_template_parses_to_defaults() {
        assert_eq!(Config::parse_ini(DEFAULT_CONFIG_INI), Config::default());
    }

    #[test]
    fn values_are_read_per_section_and_clamped() {
        let ini = "\
[pipeline]
window_size = 9
preview_workers = 0

[thumbnails]
size = 4096
debounce_ms = 50
cache_dir = /tmp/thumbs
; window_size here belongs to another section
window_size = 3

[ratings]
auto_advance = off
";
        let config = Config::parse_ini(ini);
        assert_eq!(config.window_size, 9);
        assert_eq!(config.preview_workers, 1);
        assert_eq!(config.thumbnail_size, 1024);
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/thumbs")));
        assert!(!config.advance_after_rating);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let config = Config::parse_ini("[pipeline]\nwindow_size = lots\nnot a pair\n[unknown]\nx=1\n");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/var/cache/rv")),
            ..Config::default()
        };
        assert_eq!(config.thumbnail_cache_dir().unwrap(), PathBuf::from("/var/cache/rv"));
    }
}
