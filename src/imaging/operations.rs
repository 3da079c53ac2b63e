//! The render pipeline: one derivation step from encoded input bytes to
//! encoded output bytes.
//!
//! ```text
//! decode → rotate → action → encode
//! ```
//!
//! The action stage turns [`TransformOptions`] into backend calls using
//! the pure functions in [`calculations`](super::calculations), so the
//! rendered size always equals [`output_dimensions`]. Backend errors are
//! mapped onto [`ImageError`]: an unsupported codec stays distinguishable,
//! everything else is a failed computation for `target`.

use super::backend::{BackendError, ImageBackend, Pixels};
use super::calculations::{
    Rect, anchor_rect, calculate_fill_dimensions, crop_dimensions, fit_dimensions,
    output_dimensions, resize_dimensions, target,
};
use super::palette::{Color, dominant_colors};
use super::params::{EncodeParams, ResizeParams};
use super::smart::SmartCropper;
use crate::error::ImageError;
use crate::media::Format;
use crate::options::{Action, Anchor, TransformOptions};
use std::sync::Arc;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;

/// Encoded output of one derivation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

fn map_backend(target: &str, err: BackendError) -> ImageError {
    match err {
        BackendError::Unsupported(format) => ImageError::UnsupportedFormat(format.to_string()),
        other => ImageError::computation(target, other),
    }
}

/// Get image dimensions using the backend.
pub fn get_dimensions(
    backend: &dyn ImageBackend,
    bytes: &[u8],
    format: Format,
    name: &str,
) -> Result<(u32, u32)> {
    let dims = backend
        .identify(bytes, format)
        .map_err(|e| map_backend(name, e))?;
    Ok((dims.width, dims.height))
}

/// Decode through the backend and pick up to `count` dominant colours of
/// the first frame.
pub fn dominant_colors_of(
    backend: &dyn ImageBackend,
    bytes: &[u8],
    format: Format,
    name: &str,
    count: usize,
) -> Result<Vec<Color>> {
    let pixels = backend
        .decode(bytes, format)
        .map_err(|e| map_backend(name, e))?;
    Ok(dominant_colors(&pixels.first_frame(), count))
}

fn resized(
    backend: &dyn ImageBackend,
    pixels: Pixels,
    size: (u32, u32),
    options: &TransformOptions,
) -> std::result::Result<Pixels, BackendError> {
    if pixels.dimensions() == size {
        return Ok(pixels);
    }
    backend.resize(
        pixels,
        &ResizeParams {
            width: size.0,
            height: size.1,
            filter: options.filter,
        },
    )
}

/// Pick the crop window, asking the smart cropper for `smart`.
fn window(
    cropper: &dyn SmartCropper,
    pixels: &Pixels,
    size: (u32, u32),
    anchor: Anchor,
) -> Rect {
    let source = pixels.dimensions();
    let size = crop_dimensions(source, size);
    if anchor != Anchor::Smart {
        return anchor_rect(source, size, anchor);
    }
    // Keep whatever the selector returns inside the frame at the exact size.
    let picked = cropper.select(pixels, size.0, size.1);
    Rect {
        x: picked.x.min(source.0 - size.0),
        y: picked.y.min(source.1 - size.1),
        width: size.0,
        height: size.1,
    }
}

fn cropped(
    backend: &dyn ImageBackend,
    cropper: &dyn SmartCropper,
    pixels: Pixels,
    size: (u32, u32),
    anchor: Anchor,
) -> std::result::Result<Pixels, BackendError> {
    if pixels.dimensions() == size {
        return Ok(pixels);
    }
    let rect = window(cropper, &pixels, size, anchor);
    backend.crop(pixels, rect)
}

fn apply_action(
    backend: &dyn ImageBackend,
    cropper: &dyn SmartCropper,
    pixels: Pixels,
    options: &TransformOptions,
) -> std::result::Result<Pixels, BackendError> {
    let src = pixels.dimensions();
    match options.action {
        Action::Resize => {
            let size = resize_dimensions(src, (options.width, options.height));
            resized(backend, pixels, size, options)
        }
        Action::Fit => {
            let size = fit_dimensions(src, target(options, src));
            resized(backend, pixels, size, options)
        }
        Action::Fill => {
            let size = target(options, src);
            let cover = calculate_fill_dimensions(src, size);
            let pixels = resized(backend, pixels, cover, options)?;
            cropped(backend, cropper, pixels, size, options.anchor)
        }
        Action::Crop => {
            let size = crop_dimensions(src, target(options, src));
            cropped(backend, cropper, pixels, size, options.anchor)
        }
        Action::Convert => Ok(pixels),
        Action::Filter => options
            .filters
            .iter()
            .try_fold(pixels, |px, f| backend.filter(px, f)),
    }
}

/// Render one derivation step.
///
/// `target` names the output in errors and logs.
pub fn render(
    backend: &dyn ImageBackend,
    cropper: &dyn SmartCropper,
    input: &[u8],
    input_format: Format,
    options: &TransformOptions,
    target: &str,
) -> Result<Rendered> {
    let err = |e: BackendError| map_backend(target, e);

    let pixels = backend.decode(input, input_format).map_err(err)?;
    let expected = output_dimensions(pixels.dimensions(), options);

    let pixels = backend.rotate(pixels, options.rotation).map_err(err)?;
    let pixels = apply_action(backend, cropper, pixels, options).map_err(err)?;

    let (width, height) = pixels.dimensions();
    if (width, height) != expected {
        return Err(ImageError::computation(
            target,
            format!("rendered {width}x{height}, expected {}x{}", expected.0, expected.1),
        ));
    }

    let bytes = backend
        .encode(
            &pixels,
            &EncodeParams {
                format: options.format,
                quality: options.encoder_quality(),
                background: options.effective_background(),
            },
        )
        .map_err(err)?;

    Ok(Rendered {
        bytes: bytes.into(),
        width,
        height,
        format: options.format,
    })
}
