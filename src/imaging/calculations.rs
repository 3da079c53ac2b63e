//! Dimension math for every action, with no pixels involved.
//!
//! Derived resources report their dimensions from these functions before
//! any pixel work happens, so they must agree exactly with what the
//! pipeline in [`operations`](super::operations) produces.

use crate::options::{Action, Anchor, Rotation, TransformOptions};

/// A sub-rectangle of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn round_px(v: f64) -> u32 {
    (v.round() as u32).max(1)
}

/// Dimensions after rotation.
pub fn rotated(dims: (u32, u32), rotation: Rotation) -> (u32, u32) {
    if rotation.swaps_axes() {
        (dims.1, dims.0)
    } else {
        dims
    }
}

/// Resize target: an unset side follows the source aspect ratio.
///
/// Both unset returns the source dimensions unchanged.
///
/// ```
/// # use image_derive::imaging::calculations::resize_dimensions;
/// assert_eq!(resize_dimensions((900, 562), (None, Some(200))), (320, 200));
/// assert_eq!(resize_dimensions((900, 562), (Some(200), None)), (200, 125));
/// ```
pub fn resize_dimensions(source: (u32, u32), target: (Option<u32>, Option<u32>)) -> (u32, u32) {
    let (src_w, src_h) = source;
    match target {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, round_px(src_h as f64 * w as f64 / src_w as f64)),
        (None, Some(h)) => (round_px(src_w as f64 * h as f64 / src_h as f64), h),
        (None, None) => source,
    }
}

/// Largest size that fits inside `bounds` keeping the aspect ratio.
///
/// Images already inside the bounds are not enlarged.
pub fn fit_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w <= max_w && src_h <= max_h {
        return source;
    }

    let src_aspect = src_w as f64 / src_h as f64;
    let max_aspect = max_w as f64 / max_h as f64;
    if src_aspect > max_aspect {
        (max_w, round_px(max_w as f64 / src_aspect))
    } else {
        (round_px(max_h as f64 * src_aspect), max_h)
    }
}

/// Intermediate size for fill: the smallest aspect-preserving scale that
/// covers `target`. One side matches exactly; the anchor crop trims the other.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // wider: match height
        let w = round_px(tgt_h as f64 * src_aspect).max(tgt_w);
        (w, tgt_h)
    } else {
        // taller: match width
        let h = round_px(tgt_w as f64 / src_aspect).max(tgt_h);
        (tgt_w, h)
    }
}

/// Crop size, clamped to the source bounds.
pub fn crop_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (target.0.min(source.0), target.1.min(source.1))
}

/// Place a rectangle of `size` inside `source` according to a fixed anchor.
///
/// [`Anchor::Smart`] has no fixed position; it is placed like
/// [`Anchor::Center`] here and resolved by the smart-crop selector instead.
pub fn anchor_rect(source: (u32, u32), size: (u32, u32), anchor: Anchor) -> Rect {
    let (w, h) = crop_dimensions(source, size);
    let free_x = source.0 - w;
    let free_y = source.1 - h;

    let x = match anchor {
        Anchor::Left | Anchor::TopLeft | Anchor::BottomLeft => 0,
        Anchor::Right | Anchor::TopRight | Anchor::BottomRight => free_x,
        _ => free_x / 2,
    };
    let y = match anchor {
        Anchor::Top | Anchor::TopLeft | Anchor::TopRight => 0,
        Anchor::Bottom | Anchor::BottomLeft | Anchor::BottomRight => free_y,
        _ => free_y / 2,
    };

    Rect {
        x,
        y,
        width: w,
        height: h,
    }
}

/// Output dimensions of one derivation step, computed without pixels.
///
/// Rotation is applied to the input first, so the requested size refers
/// to the rotated frame.
pub fn output_dimensions(source: (u32, u32), options: &TransformOptions) -> (u32, u32) {
    let src = rotated(source, options.rotation);
    match options.action {
        Action::Resize => resize_dimensions(src, (options.width, options.height)),
        Action::Fit => fit_dimensions(src, target(options, src)),
        Action::Fill => target(options, src),
        Action::Crop => crop_dimensions(src, target(options, src)),
        Action::Convert | Action::Filter => src,
    }
}

/// Largest buffer, in pixels, a single derivation step may allocate.
pub const MAX_PIXELS: u64 = 1 << 28;

pub fn pixel_count(dims: (u32, u32)) -> u64 {
    u64::from(dims.0) * u64::from(dims.1)
}

/// The largest frame a step holds in memory: its output, or for fill the
/// scaled cover it crops from.
pub fn peak_dimensions(source: (u32, u32), options: &TransformOptions) -> (u32, u32) {
    let out = output_dimensions(source, options);
    if options.action != Action::Fill {
        return out;
    }
    let cover = calculate_fill_dimensions(rotated(source, options.rotation), out);
    if pixel_count(cover) > pixel_count(out) {
        cover
    } else {
        out
    }
}

/// The requested box; sides left unset fall back to the source.
pub(crate) fn target(options: &TransformOptions, source: (u32, u32)) -> (u32, u32) {
    (
        options.width.unwrap_or(source.0),
        options.height.unwrap_or(source.1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Format;
    use crate::options::OptionDefaults;

    fn opts(spec: &str, action: Action) -> TransformOptions {
        TransformOptions::parse(spec, Some(action), &OptionDefaults::default(), Format::Jpeg)
            .unwrap()
    }

    // =========================================================================
    // resize / fit
    // =========================================================================

    #[test]
    fn resize_preserves_ratio_for_missing_side() {
        assert_eq!(resize_dimensions((900, 562), (None, Some(200))), (320, 200));
        assert_eq!(resize_dimensions((900, 562), (Some(200), None)), (200, 125));
        assert_eq!(resize_dimensions((900, 562), (Some(450), None)), (450, 281));
        assert_eq!(resize_dimensions((900, 562), (Some(225), None)), (225, 141));
    }

    #[test]
    fn resize_never_produces_zero() {
        assert_eq!(resize_dimensions((1000, 10), (Some(20), None)), (20, 1));
    }

    #[test]
    fn resize_both_unset_is_noop() {
        assert_eq!(resize_dimensions((900, 562), (None, None)), (900, 562));
    }

    #[test]
    fn fit_within_bounds() {
        assert_eq!(fit_dimensions((300, 200), (50, 50)), (50, 33));
        assert_eq!(fit_dimensions((50, 33), (10, 20)), (10, 7));
        assert_eq!(fit_dimensions((562, 900), (300, 200)), (125, 200));
    }

    #[test]
    fn fit_does_not_upscale() {
        assert_eq!(fit_dimensions((10, 7), (10, 20)), (10, 7));
    }

    // =========================================================================
    // fill / crop
    // =========================================================================

    #[test]
    fn fill_covers_target() {
        assert_eq!(calculate_fill_dimensions((900, 562), (200, 200)), (320, 200));
        assert_eq!(calculate_fill_dimensions((562, 900), (300, 200)), (300, 480));
    }

    #[test]
    fn fill_matching_aspect_is_plain_scale() {
        assert_eq!(calculate_fill_dimensions((900, 562), (450, 281)), (450, 281));
    }

    #[test]
    fn crop_clamps_to_source() {
        assert_eq!(crop_dimensions((900, 562), (300, 300)), (300, 300));
        assert_eq!(crop_dimensions((200, 100), (300, 300)), (200, 100));
    }

    #[test]
    fn anchor_rect_positions() {
        let src = (900, 562);
        let size = (300, 300);
        assert_eq!(anchor_rect(src, size, Anchor::TopLeft), Rect { x: 0, y: 0, width: 300, height: 300 });
        assert_eq!(anchor_rect(src, size, Anchor::TopRight), Rect { x: 600, y: 0, width: 300, height: 300 });
        assert_eq!(anchor_rect(src, size, Anchor::BottomLeft), Rect { x: 0, y: 262, width: 300, height: 300 });
        assert_eq!(anchor_rect(src, size, Anchor::Center), Rect { x: 300, y: 131, width: 300, height: 300 });
        assert_eq!(anchor_rect(src, size, Anchor::Bottom), Rect { x: 300, y: 262, width: 300, height: 300 });
    }

    // =========================================================================
    // output_dimensions
    // =========================================================================

    #[test]
    fn rotation_applies_before_resize() {
        assert_eq!(output_dimensions((900, 562), &opts("x200 r90", Action::Resize)), (125, 200));
        assert_eq!(output_dimensions((300, 200), &opts("r90", Action::Resize)), (200, 300));
    }

    #[test]
    fn output_dimensions_per_action() {
        let src = (900, 562);
        assert_eq!(output_dimensions(src, &opts("300x200", Action::Resize)), (300, 200));
        assert_eq!(output_dimensions(src, &opts("200x100", Action::Fill)), (200, 100));
        assert_eq!(output_dimensions(src, &opts("300x300", Action::Crop)), (300, 300));
        assert_eq!(output_dimensions(src, &opts("300x200", Action::Fit)), (300, 187));
        assert_eq!(output_dimensions(src, &opts("0x0", Action::Resize)), src);
    }

    #[test]
    fn peak_of_fill_is_the_cover() {
        let fill = opts("200x200", Action::Fill);
        assert_eq!(peak_dimensions((900, 562), &fill), (320, 200));
        let resize = opts("x200", Action::Resize);
        assert_eq!(peak_dimensions((900, 562), &resize), (320, 200));
        assert_eq!(pixel_count((65536, 65536)), 1 << 32);
    }

    #[test]
    fn oversized_targets_exceed_the_pixel_limit() {
        let tall = opts("x100000", Action::Resize);
        assert!(pixel_count(peak_dimensions((900, 562), &tall)) > MAX_PIXELS);
        let sliver = opts("100000x1", Action::Fill);
        assert_eq!(output_dimensions((900, 562), &sliver), (100000, 1));
        assert!(pixel_count(peak_dimensions((900, 562), &sliver)) > MAX_PIXELS);
    }
}
