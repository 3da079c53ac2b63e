//! Dominant colours of an image.
//!
//! The image is scaled down to at most [`SAMPLE_EDGE`] pixels a side, then
//! every opaque pixel is counted into a 4-bit-per-channel histogram. The
//! most populated buckets, averaged, are the palette:
//!
//! ```text
//! pixels ─▶ 16×16×16 buckets ─▶ sort by count ─▶ mean colour per bucket
//! ```
//!
//! Ties go to the lower bucket index, so the result is deterministic.
//! Colours whose luminance equals one already picked are skipped, which
//! keeps every entry of a palette distinguishable by [`Color::luminance`].

use image::{DynamicImage, GenericImageView, RgbaImage};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Longest side of the sample the histogram is built from.
pub const SAMPLE_EDGE: u32 = 128;

/// Number of colours reported by [`Image::colors`](crate::Image::colors).
pub const PALETTE_SIZE: usize = 6;

/// An sRGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// `#rrggbb`.
    pub fn hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{r:02x}{g:02x}{b:02x}")
    }

    /// WCAG relative luminance, 0.0 (black) to 1.0 (white).
    pub fn luminance(self) -> f64 {
        let linear = |c: u8| {
            let c = f64::from(c) / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        };
        let [r, g, b] = self.0;
        0.2126 * linear(r) + 0.7152 * linear(g) + 0.0722 * linear(b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

#[derive(Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: [u64; 3],
}

fn bucket_index([r, g, b]: [u8; 3]) -> u16 {
    (u16::from(r >> 4) << 8) | (u16::from(g >> 4) << 4) | u16::from(b >> 4)
}

fn tally(rgba: &RgbaImage, opaque_only: bool) -> HashMap<u16, Bucket> {
    let mut buckets: HashMap<u16, Bucket> = HashMap::new();
    for px in rgba.pixels() {
        let [r, g, b, a] = px.0;
        if opaque_only && a < 128 {
            continue;
        }
        let bucket = buckets.entry(bucket_index([r, g, b])).or_default();
        bucket.count += 1;
        bucket.sum[0] += u64::from(r);
        bucket.sum[1] += u64::from(g);
        bucket.sum[2] += u64::from(b);
    }
    buckets
}

/// Up to `count` dominant colours, most common first.
///
/// Fully transparent images fall back to counting every pixel.
pub fn dominant_colors(img: &DynamicImage, count: usize) -> Vec<Color> {
    let (w, h) = img.dimensions();
    let sample = if w > SAMPLE_EDGE || h > SAMPLE_EDGE {
        img.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE)
    } else {
        img.clone()
    };
    let rgba = sample.to_rgba8();

    let mut buckets = tally(&rgba, true);
    if buckets.is_empty() {
        buckets = tally(&rgba, false);
    }

    let mut ranked: Vec<(u16, Bucket)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

    let mut palette: Vec<Color> = Vec::with_capacity(count);
    for (_, bucket) in ranked {
        if palette.len() == count {
            break;
        }
        let mean = |i: usize| ((bucket.sum[i] + bucket.count / 2) / bucket.count) as u8;
        let color = Color([mean(0), mean(1), mean(2)]);
        let luminance = color.luminance();
        if palette.iter().all(|c| c.luminance() != luminance) {
            palette.push(color);
        }
    }
    palette
}

type Slot = Arc<OnceLock<crate::Result<Arc<[Color]>>>>;

/// Palettes computed at most once per source signature.
///
/// Works like [`MetadataCache`](crate::metadata::MetadataCache): the map
/// lock only guards slot lookup, and a failed computation is remembered
/// like a successful one.
#[derive(Default)]
pub struct PaletteCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PaletteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        signature: &str,
        compute: impl FnOnce() -> crate::Result<Vec<Color>>,
    ) -> crate::Result<Arc<[Color]>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(signature.to_string()).or_default().clone()
        };
        slot.get_or_init(|| compute().map(Arc::from)).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Left `split` columns in `a`, the rest in `b`.
    fn two_tone(split: u32, a: [u8; 3], b: [u8; 3]) -> DynamicImage {
        let img = RgbaImage::from_fn(10, 10, |x, _| {
            let [r, g, bl] = if x < split { a } else { b };
            Rgba([r, g, bl, 255])
        });
        DynamicImage::ImageRgba8(img)
    }

    // =========================================================================
    // Color
    // =========================================================================

    #[test]
    fn hex_is_lowercase_with_hash() {
        assert_eq!(Color([0x2d, 0x2f, 0x33]).hex(), "#2d2f33");
        assert_eq!(Color([255, 255, 255]).to_string(), "#ffffff");
    }

    #[test]
    fn luminance_bounds_and_order() {
        assert_eq!(Color([0, 0, 0]).luminance(), 0.0);
        assert!((Color([255, 255, 255]).luminance() - 1.0).abs() < 1e-12);
        assert!(Color([0, 255, 0]).luminance() > Color([255, 0, 0]).luminance());
        assert!(Color([255, 0, 0]).luminance() > Color([0, 0, 255]).luminance());
    }

    // =========================================================================
    // dominant_colors
    // =========================================================================

    #[test]
    fn most_common_colour_first() {
        let img = two_tone(3, [200, 30, 30], [20, 40, 200]);
        assert_eq!(
            dominant_colors(&img, 6),
            vec![Color([20, 40, 200]), Color([200, 30, 30])]
        );
    }

    #[test]
    fn palette_is_capped_and_luminances_distinct() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        }));
        let palette = dominant_colors(&img, 6);
        assert_eq!(palette.len(), 6);
        for (i, a) in palette.iter().enumerate() {
            for b in &palette[i + 1..] {
                assert_ne!(a.luminance(), b.luminance());
            }
        }
        assert_eq!(palette, dominant_colors(&img, 6));
    }

    #[test]
    fn transparent_pixels_are_ignored() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(10, 10, |x, _| {
            if x < 8 {
                Rgba([255, 0, 0, 0])
            } else {
                Rgba([0, 0, 255, 255])
            }
        }));
        assert_eq!(dominant_colors(&img, 6), vec![Color([0, 0, 255])]);
    }

    #[test]
    fn fully_transparent_counts_everything() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        assert_eq!(dominant_colors(&img, 6), vec![Color([0, 0, 0])]);
    }

    // =========================================================================
    // PaletteCache
    // =========================================================================

    #[test]
    fn computes_once_per_signature() {
        let cache = PaletteCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Color([1, 2, 3])])
        };
        let a = cache.get_or_compute("sig", compute).unwrap();
        let b = cache.get_or_compute("sig", compute).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_compute("other", compute).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_remembered() {
        let cache = PaletteCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let err = cache
                .get_or_compute("sig", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ImageError::UnsupportedFormat("avif".into()))
                })
                .unwrap_err();
            assert_eq!(err, ImageError::UnsupportedFormat("avif".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
