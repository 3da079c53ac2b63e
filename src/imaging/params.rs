//! Parameter types for backend operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the pipeline in [`operations`](super::operations)
//! (which decides what to compute) and the [`backend`](super::backend)
//! (which does the pixel work). Keeping them plain data lets tests record
//! and compare them through a mock backend.

use crate::media::Format;
use crate::options::{Quality, ResampleFilter, Rgb};

/// Parameters for a resize to exact dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
    pub filter: ResampleFilter,
}

/// Parameters for encoding pixels into a file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub format: Format,
    /// Encoder quality; `None` for formats without a quality setting.
    pub quality: Option<Quality>,
    /// Colour transparent pixels are flattened onto for formats without alpha.
    pub background: Rgb,
}
