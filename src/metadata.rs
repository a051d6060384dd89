//! EXIF lookups: orientation for decoding, capture date for ordering.
//!
//! Everything here is best effort. Missing or unreadable metadata is `None`
//! and the caller falls back to something else.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, TimeZone};
use exif::{In, Reader, Tag, Value};
use image::DynamicImage;

/// Metadata sits at the start of TIFF-based RAW files. Parsing a prefix first
/// avoids copying the whole file when it is enough.
const EXIF_PREFIX_BYTES: usize = 512 * 1024;

const DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

fn read_exif(data: &[u8]) -> Option<exif::Exif> {
    let prefix = &data[..data.len().min(EXIF_PREFIX_BYTES)];
    match Reader::new().read_from_container(&mut Cursor::new(prefix)) {
        Ok(exif) => Some(exif),
        Err(_) if prefix.len() < data.len() => Reader::new().read_from_container(&mut Cursor::new(data)).ok(),
        Err(_) => None,
    }
}

fn read_exif_file(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut prefix = Vec::with_capacity(EXIF_PREFIX_BYTES);
    (&file).take(EXIF_PREFIX_BYTES as u64).read_to_end(&mut prefix).ok()?;
    if let Ok(exif) = Reader::new().read_from_container(&mut Cursor::new(&prefix)) {
        return Some(exif);
    }
    if prefix.len() < EXIF_PREFIX_BYTES {
        return None;
    }
    let file = File::open(path).ok()?;
    Reader::new().read_from_container(&mut BufReader::new(file)).ok()
}

fn orientation_of(exif: &exif::Exif) -> Option<u32> {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
}

/// EXIF orientation (1..=8) of a container held in memory.
pub fn orientation(data: &[u8]) -> Option<u32> {
    read_exif(data).as_ref().and_then(orientation_of)
}

pub fn orientation_of_file(path: &Path) -> Option<u32> {
    read_exif_file(path).as_ref().and_then(orientation_of)
}

/// Rotate and flip `img` so that it displays upright for `orientation`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// `DateTimeOriginal` of the file, read as local time.
pub fn capture_time(path: &Path) -> Option<SystemTime> {
    let exif = read_exif_file(path)?;
    let field = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)?;
    let Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let text = std::str::from_utf8(parts.first()?).ok()?;
    parse_exif_date(text)
}

fn parse_exif_date(text: &str) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(text.trim_end_matches('\0').trim(), DATE_FORMAT).ok()?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
        .unwrap_or_else(|| SystemTime::from(naive.and_utc()));
    Some(local)
}

/// Builders for small EXIF payloads used as test fixtures.
#[cfg(test)]
pub(crate) mod fixtures {
    fn entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value);
    }

    /// Little-endian TIFF block with an optional Orientation in IFD0 and an
    /// optional `DateTimeOriginal` (`"YYYY:MM:DD HH:MM:SS"`) in the Exif IFD.
    pub fn tiff_block(orientation: Option<u16>, taken: Option<&str>) -> Vec<u8> {
        let ifd0_entries = u16::from(orientation.is_some()) + u16::from(taken.is_some());
        let exif_at = 8 + 2 + 12 * u32::from(ifd0_entries) + 4;
        let date_at = exif_at + 2 + 12 + 4;

        let mut out = b"II*\0".to_vec();
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&ifd0_entries.to_le_bytes());
        if let Some(o) = orientation {
            let [lo, hi] = o.to_le_bytes();
            entry(&mut out, 0x0112, 3, 1, [lo, hi, 0, 0]);
        }
        if taken.is_some() {
            entry(&mut out, 0x8769, 4, 1, exif_at.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        if let Some(t) = taken {
            assert_eq!(t.len(), 19);
            out.extend_from_slice(&1u16.to_le_bytes());
            entry(&mut out, 0x9003, 2, 20, date_at.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(t.as_bytes());
            out.push(0);
        }
        out
    }

    /// APP1 segment carrying `tiff` followed by `trailer` (an embedded
    /// thumbnail, for instance).
    pub fn app1(tiff: &[u8], trailer: &[u8]) -> Vec<u8> {
        let len = u16::try_from(2 + 6 + tiff.len() + trailer.len()).unwrap();
        let mut seg = vec![0xFF, 0xE1];
        seg.extend_from_slice(&len.to_be_bytes());
        seg.extend_from_slice(b"Exif\0\0");
        seg.extend_from_slice(tiff);
        seg.extend_from_slice(trailer);
        seg
    }

    /// `jpeg` with `segment` inserted right after its SOI marker.
    pub fn insert_after_soi(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(segment);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// A JPEG container holding only EXIF, enough for metadata readers.
    pub fn exif_only_jpeg(tiff: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend(app1(tiff, &[]));
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }
}
