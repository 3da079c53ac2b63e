//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the narrow interface the transform
//! pipeline drives: identify, decode, resize, crop, rotate, filter, and
//! encode. Codec and pixel algorithms live entirely behind it.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust on top of
//! the `image` crate. Tests use the recording `MockBackend` below, which
//! works on tiny placeholder buffers and never touches a real codec.

use super::calculations::Rect;
use super::filters::Filter;
use super::params::{EncodeParams, ResizeParams};
use crate::media::Format;
use crate::options::Rotation;
use image::{DynamicImage, Frame, GenericImageView};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0} is not supported by this backend")]
    Unsupported(Format),
    #[error("Decoding failed: {0}")]
    Decode(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Decoded pixel data: a single image or all frames of an animation.
#[derive(Clone)]
pub enum Pixels {
    Still(DynamicImage),
    /// Full-canvas frames with their delays. Never empty.
    Animated(Vec<Frame>),
}

impl Pixels {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Pixels::Still(img) => img.dimensions(),
            Pixels::Animated(frames) => frames
                .first()
                .map(|f| f.buffer().dimensions())
                .unwrap_or((0, 0)),
        }
    }

    /// The still image, or the first frame of an animation.
    pub fn first_frame(&self) -> DynamicImage {
        match self {
            Pixels::Still(img) => img.clone(),
            Pixels::Animated(frames) => frames
                .first()
                .map(|f| DynamicImage::ImageRgba8(f.buffer().clone()))
                .unwrap_or_else(|| DynamicImage::new_rgba8(0, 0)),
        }
    }

    /// Apply the same per-image operation to every frame.
    pub fn map(self, f: impl Fn(DynamicImage) -> DynamicImage) -> Pixels {
        match self {
            Pixels::Still(img) => Pixels::Still(f(img)),
            Pixels::Animated(frames) => Pixels::Animated(
                frames
                    .into_iter()
                    .map(|frame| {
                        let delay = frame.delay();
                        let out = f(DynamicImage::ImageRgba8(frame.into_buffer())).into_rgba8();
                        Frame::from_parts(out, 0, 0, delay)
                    })
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Pixels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        match self {
            Pixels::Still(_) => write!(f, "Pixels::Still({w}x{h})"),
            Pixels::Animated(frames) => {
                write!(f, "Pixels::Animated({w}x{h}, {} frames)", frames.len())
            }
        }
    }
}

/// Trait for image processing backends.
///
/// Every backend must implement all operations so the pipeline is
/// backend-agnostic. Implementations must be deterministic: identical
/// input pixels and parameters produce identical output bytes.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions without a full decode.
    fn identify(&self, bytes: &[u8], format: Format) -> Result<Dimensions, BackendError>;

    /// Decode encoded bytes into pixels.
    fn decode(&self, bytes: &[u8], format: Format) -> Result<Pixels, BackendError>;

    /// Resize to exact dimensions.
    fn resize(&self, pixels: Pixels, params: &ResizeParams) -> Result<Pixels, BackendError>;

    /// Cut out a sub-rectangle. The rectangle lies within the image.
    fn crop(&self, pixels: Pixels, rect: Rect) -> Result<Pixels, BackendError>;

    /// Rotate counter-clockwise.
    fn rotate(&self, pixels: Pixels, rotation: Rotation) -> Result<Pixels, BackendError>;

    /// Apply one filter of a filter chain.
    fn filter(&self, pixels: Pixels, filter: &Filter) -> Result<Pixels, BackendError>;

    /// Encode pixels into the target format.
    fn encode(&self, pixels: &Pixels, params: &EncodeParams) -> Result<Vec<u8>, BackendError>;
}
