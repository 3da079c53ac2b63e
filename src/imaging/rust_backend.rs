//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory_with_format` |
//! | Decode (GIF, incl. animation) | `image::codecs::gif::GifDecoder` frames |
//! | Resize (`box`) | `image::imageops::thumbnail` (area averaging) |
//! | Resize (others) | `DynamicImage::resize_exact` |
//! | Crop / rotate | `DynamicImage::crop_imm` / `rotate90/180/270` |
//! | Filters | [`Filter::apply`](super::filters::Filter::apply) |
//! | Encode → JPEG, PNG, GIF, WebP (lossless), TIFF, AVIF | `image::codecs::*` |
//!
//! AVIF is write-only: the `image` crate's `"avif"` feature provides the
//! rav1e encoder but no decoder, so AVIF sources report
//! [`BackendError::Unsupported`].

use super::backend::{BackendError, Dimensions, ImageBackend, Pixels};
use super::calculations::Rect;
use super::filters::Filter;
use super::params::{EncodeParams, ResizeParams};
use crate::media::Format;
use crate::options::{ResampleFilter, Rgb, Rotation};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame, ImageReader, RgbImage};
use std::io::Cursor;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

fn decode_err(format: Format, e: impl std::fmt::Display) -> BackendError {
    BackendError::Decode(format!("{}: {e}", format.media_type()))
}

fn encode_err(format: Format, e: impl std::fmt::Display) -> BackendError {
    BackendError::Encode(format!("{}: {e}", format.media_type()))
}

fn filter_type(filter: ResampleFilter) -> Option<FilterType> {
    match filter {
        ResampleFilter::Box => None,
        ResampleFilter::NearestNeighbor => Some(FilterType::Nearest),
        ResampleFilter::Linear => Some(FilterType::Triangle),
        ResampleFilter::CatmullRom => Some(FilterType::CatmullRom),
        ResampleFilter::Gaussian => Some(FilterType::Gaussian),
        ResampleFilter::Lanczos => Some(FilterType::Lanczos3),
    }
}

fn resample(img: DynamicImage, params: &ResizeParams) -> DynamicImage {
    match filter_type(params.filter) {
        Some(ft) => img.resize_exact(params.width, params.height, ft),
        None => img.thumbnail_exact(params.width, params.height),
    }
}

fn decode_gif(bytes: &[u8]) -> Result<Pixels, BackendError> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(|e| decode_err(Format::Gif, e))?;
    let mut frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| decode_err(Format::Gif, e))?;
    match frames.len() {
        0 => Err(decode_err(Format::Gif, "no frames")),
        1 => {
            let frame = frames.remove(0);
            Ok(Pixels::Still(DynamicImage::ImageRgba8(frame.into_buffer())))
        }
        _ => Ok(Pixels::Animated(frames)),
    }
}

/// Composite transparent pixels over a solid background.
fn flatten(img: &DynamicImage, background: Rgb) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = u32::from(px[3]);
        let mut rgb = [0u8; 3];
        for (c, slot) in rgb.iter_mut().enumerate() {
            let fg = u32::from(px[c]) * alpha;
            let bg = u32::from(background.0[c]) * (255 - alpha);
            *slot = ((fg + bg + 127) / 255) as u8;
        }
        out.put_pixel(x, y, image::Rgb(rgb));
    }
    DynamicImage::ImageRgb8(out)
}

fn encode_still(img: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
    let format = params.format;
    let quality = params.quality.map(|q| q.value()).unwrap_or(75);
    let mut buf = Vec::new();
    let result = match format {
        Format::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            flatten(img, params.background).write_with_encoder(encoder)
        }
        Format::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
        Format::Webp => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
        Format::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(Frame::new(img.to_rgba8()))
        }
        Format::Tiff => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Tiff),
        Format::Avif => {
            let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
                &mut buf, AVIF_SPEED, quality,
            );
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
        }
    };
    result.map_err(|e| encode_err(format, e))?;
    Ok(buf)
}

fn encode_animation(frames: &[Frame]) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| encode_err(Format::Gif, e))?;
        encoder
            .encode_frames(frames.iter().cloned())
            .map_err(|e| encode_err(Format::Gif, e))?;
    }
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8], format: Format) -> Result<Dimensions, BackendError> {
        if !format.can_decode() {
            return Err(BackendError::Unsupported(format));
        }
        let mut reader = ImageReader::new(Cursor::new(bytes));
        reader.set_format(format.to_image_format());
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| decode_err(format, e))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, bytes: &[u8], format: Format) -> Result<Pixels, BackendError> {
        match format {
            Format::Avif => Err(BackendError::Unsupported(format)),
            Format::Gif => decode_gif(bytes),
            _ => image::load_from_memory_with_format(bytes, format.to_image_format())
                .map(Pixels::Still)
                .map_err(|e| decode_err(format, e)),
        }
    }

    fn resize(&self, pixels: Pixels, params: &ResizeParams) -> Result<Pixels, BackendError> {
        Ok(pixels.map(|img| resample(img, params)))
    }

    fn crop(&self, pixels: Pixels, rect: Rect) -> Result<Pixels, BackendError> {
        let (w, h) = pixels.dimensions();
        if rect.x + rect.width > w || rect.y + rect.height > h {
            return Err(BackendError::ProcessingFailed(format!(
                "crop {rect:?} outside {w}x{h}"
            )));
        }
        Ok(pixels.map(|img| img.crop_imm(rect.x, rect.y, rect.width, rect.height)))
    }

    fn rotate(&self, pixels: Pixels, rotation: Rotation) -> Result<Pixels, BackendError> {
        // `image` rotates clockwise; rotation degrees are counter-clockwise.
        Ok(match rotation {
            Rotation::None => pixels,
            Rotation::Deg90 => pixels.map(|img| img.rotate270()),
            Rotation::Deg180 => pixels.map(|img| img.rotate180()),
            Rotation::Deg270 => pixels.map(|img| img.rotate90()),
        })
    }

    fn filter(&self, pixels: Pixels, filter: &Filter) -> Result<Pixels, BackendError> {
        Ok(pixels.map(|img| filter.apply(img)))
    }

    fn encode(&self, pixels: &Pixels, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        match (pixels, params.format) {
            (Pixels::Animated(frames), Format::Gif) => encode_animation(frames),
            (px, _) => encode_still(&px.first_frame(), params),
        }
    }
}
