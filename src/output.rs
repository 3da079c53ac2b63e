//! CLI output formatting.
//!
//! Information-first display: every source leads with its positional index
//! and file name, and every derivation leads with the spec string that asked for
//! it, followed by `→` and the permalink it was published at. Dimensions,
//! media type and metadata follow as indented context lines.
//!
//! ```text
//! 001 sunset.jpg (900x562 image/jpeg)
//!     Taken: 2023-06-14 19:42:10
//!     resize 300x → /photos/sunset_4f1c…_48213_300x0_resize_q75_box.jpg
//!         300x187 image/jpeg
//!     fill 200x200 smart png → /photos/sunset_4f1c…_48213_200x200_fill_box_smart1.png
//!         200x200 image/png
//!
//! Derived 2 images from 1 source
//! Cache: 2 rendered
//! ```
//!
//! # Architecture
//!
//! Each block has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions do no I/O and never trigger rendering: permalinks are passed in
//! already resolved.

use crate::cache::CacheStats;
use crate::error::ImageError;
use crate::metadata::Metadata;
use crate::resource::Image;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn dims_line(image: &Image) -> String {
    format!("{}x{} {}", image.width(), image.height(), image.media_type())
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Header for a source image, plus its metadata context lines.
///
/// ```text
/// 001 sunset.jpg (900x562 image/jpeg)
///     Taken: 2023-06-14 19:42:10
///     Location: 36.59000, -4.37000
/// ```
pub fn format_source(index: usize, image: &Image, metadata: Option<&Metadata>) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} ({})",
        format_index(index),
        image.name(),
        dims_line(image)
    )];
    if let Some(meta) = metadata {
        if let Some(date) = meta.date {
            lines.push(format!("{}Taken: {}", indent(1), date.format("%Y-%m-%d %H:%M:%S")));
        }
        if let (Some(lat), Some(long)) = (meta.lat, meta.long) {
            lines.push(format!("{}Location: {:.5}, {:.5}", indent(1), lat, long));
        }
    }
    lines
}

pub fn print_source(index: usize, image: &Image, metadata: Option<&Metadata>) {
    for line in format_source(index, image, metadata) {
        println!("{}", line);
    }
}

// ============================================================================
// Derivations
// ============================================================================

/// One derivation: spec, permalink and the resulting dimensions.
pub fn format_derived(spec: &str, image: &Image, permalink: &str) -> Vec<String> {
    vec![
        format!("{}{} \u{2192} {}", indent(1), spec, permalink),
        format!("{}{}", indent(2), dims_line(image)),
    ]
}

pub fn print_derived(spec: &str, image: &Image, permalink: &str) {
    for line in format_derived(spec, image, permalink) {
        println!("{}", line);
    }
}

/// A derivation that could not be produced.
pub fn format_failure(spec: &str, err: &ImageError) -> Vec<String> {
    vec![format!("{}{} failed: {}", indent(1), spec, err)]
}

pub fn print_failure(spec: &str, err: &ImageError) {
    for line in format_failure(spec, err) {
        println!("{}", line);
    }
}

/// A derivation's file name, as printed by `key`.
pub fn format_key(image: &Image) -> String {
    format!("{} ({})", image.path(), dims_line(image))
}

// ============================================================================
// Summary
// ============================================================================

/// Closing lines: how much was derived and what the cache did.
pub fn format_summary(sources: usize, derived: usize, failed: usize, stats: &CacheStats) -> Vec<String> {
    let mut head = format!(
        "Derived {} from {}",
        plural(derived, "image"),
        plural(sources, "source")
    );
    if failed > 0 {
        head.push_str(&format!(", {} failed", failed));
    }
    vec![String::new(), head, format!("Cache: {}", stats)]
}

pub fn print_summary(sources: usize, derived: usize, failed: usize, stats: &CacheStats) {
    for line in format_summary(sources, derived, failed, stats) {
        println!("{}", line);
    }
}
