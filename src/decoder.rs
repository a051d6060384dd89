//! Decoding a single source file into preview or thumbnail pixels.
//!
//! The pipeline treats decoding as an opaque, expensive call behind the
//! [`Decoder`] trait. [`EmbeddedPreviewDecoder`] is the default: camera RAW
//! files carry one or more JPEG renditions, and pulling the largest one out is
//! far cheaper than demosaicing the sensor data.

use std::borrow::Cow;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use memmap2::Mmap;

use crate::error::DecodeError;
use crate::item::Item;
use crate::metadata::{self, apply_orientation};

/// Upper bound on embedded JPEG candidates examined per file.
const MAX_JPEG_CANDIDATES: usize = 16;

/// Embedded JPEGs smaller than this are EXIF thumbnails, not previews.
const MIN_PREVIEW_JPEG_BYTES: usize = 32 * 1024;

/// Decoded RGBA pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl DecodedImage {
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            pixels: img.into_rgba8().into_raw(),
            width,
            height,
        }
    }

    /// A single-colour image. Handy for placeholders and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Decode bytes previously produced by [`DecodedImage::encode_png`] (or any
    /// format the `image` crate recognises).
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, image::ImageError> {
        image::load_from_memory(bytes).map(Self::from_dynamic)
    }

    /// Lossless encoding used for thumbnail disk records.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let Some(img) = image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone()) else {
            return Err(image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            )));
        };
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// Scale down to fit in a `max_side` square, keeping aspect ratio.
    pub fn fit_within(&self, max_side: u32, filter: FilterType) -> Self {
        let (width, height, pixels) = downscale_rgba_if_needed(self.width, self.height, &self.pixels, max_side, filter);
        Self {
            pixels: pixels.into_owned(),
            width,
            height,
        }
    }
}

/// Produces preview and thumbnail pixels for an item.
///
/// Implementations are called concurrently from worker threads on different
/// items, and once on the coordination thread for the current item on a
/// memory-cache miss.
pub trait Decoder: Send + Sync + 'static {
    fn decode_preview(&self, item: &Item) -> Result<DecodedImage, DecodeError>;

    /// Decode a thumbnail that fits in a `size` x `size` square.
    fn decode_thumbnail(&self, item: &Item, size: u32) -> Result<DecodedImage, DecodeError>;
}

/// Default decoder: embedded JPEG extraction with a plain `image::open` fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedPreviewDecoder;

impl EmbeddedPreviewDecoder {
    pub fn new() -> Self {
        Self
    }

    fn map_file(path: &Path) -> Result<Mmap, DecodeError> {
        let io_err = |source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        if file.metadata().map_err(io_err)?.len() == 0 {
            return Err(DecodeError::Empty(path.to_path_buf()));
        }
        // SAFETY: the map is read-only and dropped before this call returns to
        // the pipeline. A source file truncated underneath us can fault; RAW
        // originals are not rewritten in place while being browsed.
        unsafe { Mmap::map(&file) }.map_err(io_err)
    }

    /// Largest embedded JPEG that decodes, turned upright.
    fn largest_embedded(path: &Path) -> Result<DynamicImage, DecodeError> {
        let map = Self::map_file(path)?;
        let segments = find_jpeg_segments(&map, MAX_JPEG_CANDIDATES);
        let mut candidates = segments.clone();
        candidates.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)));

        for (start, end) in candidates {
            if end - start < MIN_PREVIEW_JPEG_BYTES {
                break;
            }
            if let Ok(img) = image::load_from_memory_with_format(&map[start..end], ImageFormat::Jpeg) {
                let orientation = embedded_orientation(&map, &segments, (start, end));
                return Ok(apply_orientation(img, orientation.unwrap_or(1)));
            }
        }
        Err(DecodeError::NoEmbeddedPreview(path.to_path_buf()))
    }

    /// Smallest embedded JPEG that still covers `size` on its short side,
    /// turned upright.
    fn smallest_embedded_covering(path: &Path, size: u32) -> Result<DynamicImage, DecodeError> {
        let map = Self::map_file(path)?;
        let segments = find_jpeg_segments(&map, MAX_JPEG_CANDIDATES);
        let mut candidates = segments.clone();
        candidates.sort_by_key(|(start, end)| end - start);

        for (start, end) in candidates {
            let Ok(img) = image::load_from_memory_with_format(&map[start..end], ImageFormat::Jpeg) else {
                continue;
            };
            let (w, h) = img.dimensions();
            if w.min(h) >= size {
                let orientation = embedded_orientation(&map, &segments, (start, end));
                return Ok(apply_orientation(img, orientation.unwrap_or(1)));
            }
        }
        Err(DecodeError::NoEmbeddedPreview(path.to_path_buf()))
    }

    /// Slow path for files the `image` crate can read directly (TIFF-based
    /// DNGs without a usable preview, or plain JPEG/PNG mixed into a folder).
    fn open_directly(path: &Path) -> Result<DynamicImage, DecodeError> {
        let img = image::open(path).map_err(|source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(apply_orientation(img, metadata::orientation_of_file(path).unwrap_or(1)))
    }
}

/// Orientation of an embedded stream: the container's own EXIF wins, then the
/// stream's, then that of any stream enclosing it (EXIF thumbnails carry none).
fn embedded_orientation(map: &[u8], segments: &[(usize, usize)], chosen: (usize, usize)) -> Option<u32> {
    metadata::orientation(map)
        .or_else(|| metadata::orientation(&map[chosen.0..chosen.1]))
        .or_else(|| {
            segments
                .iter()
                .filter(|&&(s, e)| s < chosen.0 && e >= chosen.1)
                .find_map(|&(s, e)| metadata::orientation(&map[s..e]))
        })
}

impl Decoder for EmbeddedPreviewDecoder {
    fn decode_preview(&self, item: &Item) -> Result<DecodedImage, DecodeError> {
        let img = match Self::largest_embedded(item.path()) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(path = %item.path().display(), error = %e, "embedded preview unavailable, decoding directly");
                Self::open_directly(item.path())?
            }
        };
        let decoded = DecodedImage::from_dynamic(img);
        if decoded.width == 0 || decoded.height == 0 {
            return Err(DecodeError::Empty(item.path.clone()));
        }
        Ok(decoded)
    }

    fn decode_thumbnail(&self, item: &Item, size: u32) -> Result<DecodedImage, DecodeError> {
        let img = match Self::smallest_embedded_covering(item.path(), size) {
            Ok(img) => img,
            Err(_) => match Self::largest_embedded(item.path()) {
                Ok(img) => img,
                Err(_) => Self::open_directly(item.path())?,
            },
        };
        let thumb = img.thumbnail(size, size);
        let decoded = DecodedImage::from_dynamic(thumb);
        if decoded.width == 0 || decoded.height == 0 {
            return Err(DecodeError::Empty(item.path.clone()));
        }
        Ok(decoded)
    }
}

/// Locate `[start, end)` byte ranges of JPEG streams. Each stream is walked
/// marker by marker from its SOI to its own EOI, so an EXIF thumbnail nested in
/// an APP1 segment neither truncates the outer stream nor hides itself: both
/// are reported. Stops after `limit` streams.
pub fn find_jpeg_segments(data: &[u8], limit: usize) -> Vec<(usize, usize)> {
    const SOI: &[u8] = b"\xff\xd8\xff";

    let mut segments = Vec::new();
    let mut pos = 0;
    while pos + SOI.len() <= data.len() && segments.len() < limit {
        if !data[pos..].starts_with(SOI) {
            pos += 1;
            continue;
        }
        if let Some(end) = jpeg_stream_end(data, pos) {
            segments.push((pos, end));
        }
        pos += SOI.len();
    }
    segments
}

/// End (exclusive) of the stream whose SOI sits at `start`, or `None` if the
/// marker structure breaks before an EOI.
fn jpeg_stream_end(data: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        // Fill bytes.
        while data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *data.get(pos + 1)?;
        pos += 2;
        match marker {
            0xD9 => return Some(pos),
            0x01 | 0xD0..=0xD7 => {}
            0x00 | 0xD8 => return None,
            _ => {
                let len = usize::from(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]));
                if len < 2 {
                    return None;
                }
                pos = pos.checked_add(len).filter(|&p| p <= data.len())?;
                if marker == 0xDA {
                    pos = skip_entropy_coded(data, pos)?;
                }
            }
        }
    }
}

/// Offset of the first real marker after entropy-coded data starting at `pos`.
/// Stuffed `FF 00` bytes and restart markers belong to the scan.
fn skip_entropy_coded(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        pos += data.get(pos..)?.iter().position(|&b| b == 0xFF)?;
        match *data.get(pos + 1)? {
            0x00 | 0xD0..=0xD7 => pos += 2,
            _ => return Some(pos),
        }
    }
}

/// Downscale RGBA pixel data if it exceeds `max_side`.
/// Uses Cow to avoid unnecessary allocations when no downscaling is needed.
fn downscale_rgba_if_needed(
    width: u32,
    height: u32,
    pixels: &[u8],
    max_side: u32,
    filter: FilterType,
) -> (u32, u32, Cow<'_, [u8]>) {
    if max_side == 0 || (width <= max_side && height <= max_side) {
        return (width, height, Cow::Borrowed(pixels));
    }

    // Preserve aspect ratio; clamp to at least 1x1.
    let scale = (max_side as f64 / width as f64).min(max_side as f64 / height as f64);
    let new_w = ((width as f64) * scale).round().max(1.0) as u32;
    let new_h = ((height as f64) * scale).round().max(1.0) as u32;

    let Some(img) = image::RgbaImage::from_raw(width, height, pixels.to_vec()) else {
        return (width, height, Cow::Borrowed(pixels));
    };

    let resized = image::imageops::resize(&img, new_w, new_h, filter);
    (new_w, new_h, Cow::Owned(resized.into_raw()))
}
