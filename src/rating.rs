//! Rating persistence.
//!
//! The pipeline only needs [`RatingStore`]; [`XmpSidecarStore`] is the default
//! backend and writes `xmp:Rating` into a `<stem>.xmp` sidecar next to the
//! RAW file, which other photo tools pick up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::RatingError;
use crate::item::{Item, MAX_RATING};

/// Durable per-item rating storage, keyed by item identity (its path), never
/// by list position.
pub trait RatingStore: Send + Sync + 'static {
    /// Persisted rating, `None` when the item was never rated.
    fn read_rating(&self, item: &Item) -> Result<Option<u8>, RatingError>;

    fn write_rating(&self, item: &Item, rating: u8) -> Result<(), RatingError>;
}

const XMP_TEMPLATE_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
      xmlns:xmp="http://ns.adobe.com/xap/1.0/"
      xmp:Rating=""#;

const XMP_TEMPLATE_TAIL: &str = r#""/>
  </rdf:RDF>
</x:xmpmeta>"#;

const RATING_ATTR: &str = "xmp:Rating=";
const RATING_ELEMENT: &str = "<xmp:Rating>";
const DESCRIPTION_TAG: &str = "<rdf:Description";

#[derive(Debug, Default, Clone, Copy)]
pub struct XmpSidecarStore;

impl XmpSidecarStore {
    pub fn new() -> Self {
        Self
    }

    /// Get XMP sidecar path for a RAW file.
    pub fn sidecar_path(raw_path: &Path) -> PathBuf {
        raw_path.with_extension("xmp")
    }
}

impl RatingStore for XmpSidecarStore {
    fn read_rating(&self, item: &Item) -> Result<Option<u8>, RatingError> {
        let path = Self::sidecar_path(item.path());
        match fs::read_to_string(&path) {
            Ok(content) => Ok(parse_rating(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(RatingError::Io { path, source }),
        }
    }

    fn write_rating(&self, item: &Item, rating: u8) -> Result<(), RatingError> {
        if rating > MAX_RATING {
            return Err(RatingError::OutOfRange(rating));
        }
        let path = Self::sidecar_path(item.path());
        let existing = match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(RatingError::Io { path, source }),
        };
        let content = match existing {
            Some(content) => update_rating(&content, rating),
            None => fresh_packet(rating),
        };
        fs::write(&path, content).map_err(|source| RatingError::Io { path, source })
    }
}

fn fresh_packet(rating: u8) -> String {
    format!("{XMP_TEMPLATE_HEAD}{rating}{XMP_TEMPLATE_TAIL}")
}

/// Rating from either the attribute form `xmp:Rating="N"` or the element form
/// `<xmp:Rating>N</xmp:Rating>`. Out-of-range digits are clamped.
pub fn parse_rating(content: &str) -> Option<u8> {
    if let Some(pos) = content.find(RATING_ATTR) {
        let rest = content[pos + RATING_ATTR.len()..].as_bytes();
        if let [quote @ (b'"' | b'\''), digit, close, ..] = rest {
            if digit.is_ascii_digit() && close == quote {
                return Some((digit - b'0').min(MAX_RATING));
            }
        }
    }
    if let Some(pos) = content.find(RATING_ELEMENT) {
        let rest = content[pos + RATING_ELEMENT.len()..].trim_start();
        if let Some(digit) = rest.bytes().next().filter(u8::is_ascii_digit) {
            return Some((digit - b'0').min(MAX_RATING));
        }
    }
    None
}

/// Rewrite the rating in an existing packet, keeping everything else intact.
fn update_rating(content: &str, rating: u8) -> String {
    let digit = char::from(b'0' + rating);

    if let Some(pos) = content.find(RATING_ATTR) {
        let value_start = pos + RATING_ATTR.len();
        let rest = content[value_start..].as_bytes();
        // `xmp:Rating="N"`, `xmp:Rating='N'` or an unquoted `xmp:Rating=N`.
        let digit_at = match rest {
            [b'"' | b'\'', d, ..] if d.is_ascii_digit() => Some(value_start + 1),
            [d, ..] if d.is_ascii_digit() => Some(value_start),
            _ => None,
        };
        if let Some(at) = digit_at {
            let mut out = String::with_capacity(content.len());
            out.push_str(&content[..at]);
            out.push(digit);
            out.push_str(&content[at + 1..]);
            return out;
        }
    }

    if let Some(pos) = content.find(DESCRIPTION_TAG) {
        // Insert before the tag closes, whether `>` or `/>`.
        if let Some(close) = content[pos..].find('>') {
            let mut at = pos + close;
            if content[..at].ends_with('/') {
                at -= 1;
            }
            let mut out = String::with_capacity(content.len() + 24);
            out.push_str(content[..at].trim_end());
            out.push_str(&format!("\n      {RATING_ATTR}\"{rating}\""));
            out.push_str(&content[at..]);
            return out;
        }
    }

    // Malformed packet: start over.
    fresh_packet(rating)
}
