//! Embedded image metadata, extracted once per source.
//!
//! Every derivation of a source reports the source's metadata: resizing or
//! converting an image does not change when or where it was taken. The
//! [`MetadataCache`] therefore keys entries by source signature and
//! extracts lazily, on the first request from any derivation.
//!
//! ## Extraction
//!
//! [`ExifExtractor`] reads EXIF with `rexif`:
//!
//! - **Date**: `DateTimeOriginal`, falling back to `DateTime`.
//! - **Location**: `GPSLatitude`/`GPSLongitude` (degrees, minutes, seconds)
//!   converted to signed decimal degrees using the `Ref` tags.
//! - **Tags**: every recognised tag, by name, in readable form.
//!
//! Formats without EXIF, or unreadable EXIF, yield `None`. Absent metadata
//! is an answer, not an error: the image itself stays usable.

use crate::media::Format;
use chrono::NaiveDateTime;
use rexif::{ExifData, ExifTag, TagValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

/// Metadata of a source image.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Metadata {
    pub date: Option<NaiveDateTime>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub tags: BTreeMap<String, String>,
}

/// Reads metadata out of encoded image bytes.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], format: Format) -> Option<Metadata>;
}

/// EXIF reader for JPEG and TIFF sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

fn find<'a>(exif: &'a ExifData, tag: ExifTag) -> Option<&'a TagValue> {
    exif.entries
        .iter()
        .find(|entry| entry.tag == tag)
        .map(|entry| &entry.value)
}

fn ascii(exif: &ExifData, tag: ExifTag) -> Option<String> {
    match find(exif, tag)? {
        TagValue::Ascii(s) => Some(s.trim_matches(char::from(0)).trim().to_string()),
        _ => None,
    }
}

/// Parse an EXIF timestamp such as `2017:10:27 19:59:51`.
pub fn parse_exif_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), EXIF_DATE_FORMAT).ok()
}

/// Degrees/minutes/seconds to decimal degrees, negated for `S` and `W`.
pub fn dms_to_degrees(dms: [f64; 3], reference: &str) -> f64 {
    let degrees = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    if matches!(reference.trim(), "S" | "W" | "s" | "w") {
        -degrees
    } else {
        degrees
    }
}

fn coordinate(exif: &ExifData, tag: ExifTag, reference: ExifTag) -> Option<f64> {
    let TagValue::URational(parts) = find(exif, tag)? else {
        return None;
    };
    let mut dms = [0.0; 3];
    for (slot, r) in dms.iter_mut().zip(parts.iter()) {
        if r.denominator == 0 {
            return None;
        }
        *slot = f64::from(r.numerator) / f64::from(r.denominator);
    }
    let reference = ascii(exif, reference).unwrap_or_default();
    Some(dms_to_degrees(dms, &reference))
}

fn from_exif(exif: &ExifData) -> Metadata {
    let date = ascii(exif, ExifTag::DateTimeOriginal)
        .or_else(|| ascii(exif, ExifTag::DateTime))
        .and_then(|s| parse_exif_date(&s));

    let tags = exif
        .entries
        .iter()
        .filter(|entry| entry.tag != ExifTag::UnknownToMe)
        .filter_map(|entry| {
            let value = entry.value_more_readable.trim();
            (!value.is_empty()).then(|| (format!("{:?}", entry.tag), value.to_string()))
        })
        .collect();

    Metadata {
        date,
        lat: coordinate(exif, ExifTag::GPSLatitude, ExifTag::GPSLatitudeRef),
        long: coordinate(exif, ExifTag::GPSLongitude, ExifTag::GPSLongitudeRef),
        tags,
    }
}

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, bytes: &[u8], format: Format) -> Option<Metadata> {
        if !matches!(format, Format::Jpeg | Format::Tiff) {
            return None;
        }
        let (result, _warnings) = rexif::parse_buffer_quiet(bytes);
        match result {
            Ok(exif) => Some(from_exif(&exif)),
            Err(e) => {
                debug!(error = ?e, "no readable EXIF");
                None
            }
        }
    }
}

type Slot = Arc<OnceLock<Option<Arc<Metadata>>>>;

/// Per-source metadata, extracted at most once per signature.
///
/// The map lock is only held to find or insert a slot; extraction runs
/// under the slot's own `OnceLock`, so sources never wait on each other.
#[derive(Default)]
pub struct MetadataCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, signature: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(signature.to_string()).or_default().clone()
    }

    /// Metadata for the source with `signature`, running `extract` only on
    /// the first request.
    pub fn get_or_extract(
        &self,
        signature: &str,
        extract: impl FnOnce() -> Option<Metadata>,
    ) -> Option<Arc<Metadata>> {
        self.slot(signature)
            .get_or_init(|| extract().map(Arc::new))
            .clone()
    }

    /// Number of sources with an entry.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
