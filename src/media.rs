//! Image format registry: extensions, media types, and codec traits.
//!
//! Format keywords double as option tokens (`"450x png"`), so the accepted
//! extension spellings here are part of the stable option grammar.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raster format the pipeline can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Webp,
    Tiff,
    Avif,
}

/// Extension spellings, first entry per format is the canonical one.
const EXTENSIONS: &[(&str, Format)] = &[
    ("jpg", Format::Jpeg),
    ("jpeg", Format::Jpeg),
    ("jpe", Format::Jpeg),
    ("jif", Format::Jpeg),
    ("jfif", Format::Jpeg),
    ("png", Format::Png),
    ("gif", Format::Gif),
    ("webp", Format::Webp),
    ("tif", Format::Tiff),
    ("tiff", Format::Tiff),
    ("avif", Format::Avif),
];

impl Format {
    /// Look up a format by file extension or format keyword (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Format> {
        let ext = ext.strip_prefix('.').unwrap_or(ext);
        EXTENSIONS
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|(_, f)| *f)
    }

    /// Extension used for files written in this format.
    pub fn default_extension(self) -> &'static str {
        EXTENSIONS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(e, _)| *e)
            .unwrap_or("bin")
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Webp => "image/webp",
            Format::Tiff => "image/tiff",
            Format::Avif => "image/avif",
        }
    }

    /// Whether the encoder takes a quality setting. Quality is always part
    /// of the derived key for these formats.
    pub fn uses_quality(self) -> bool {
        matches!(self, Format::Jpeg | Format::Avif)
    }

    /// Formats without an alpha channel get transparent pixels flattened
    /// onto the background colour.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Format::Jpeg)
    }

    /// Whether sources in this format can be decoded. AVIF is write-only.
    pub fn can_decode(self) -> bool {
        !matches!(self, Format::Avif)
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            Format::Jpeg => image::ImageFormat::Jpeg,
            Format::Png => image::ImageFormat::Png,
            Format::Gif => image::ImageFormat::Gif,
            Format::Webp => image::ImageFormat::WebP,
            Format::Tiff => image::ImageFormat::Tiff,
            Format::Avif => image::ImageFormat::Avif,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

/// Split `"a/sunset.jpg"` into (`"a"`, `"sunset"`, `"jpg"`).
///
/// The directory part is empty for bare names; the extension is empty
/// when there is none.
pub fn split_path(path: &str) -> (&str, &str, &str) {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    };
    match file.rfind('.') {
        Some(i) if i > 0 => (dir, &file[..i], &file[i + 1..]),
        _ => (dir, file, ""),
    }
}
