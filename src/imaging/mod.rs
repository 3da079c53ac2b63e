//! Image processing: dimension math, pixel operations, and codecs.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Decode / encode** | `image::codecs::*` (AVIF encode only) |
//! | **Resize** | `image::imageops` resampling filters |
//! | **Smart crop** | gradient-energy window search ([`EnergyCropper`]) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing backend operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Smart**: [`SmartCropper`] trait + [`EnergyCropper`]
//! - **Operations**: The render pipeline combining calculations + backend
//! - **Palette**: dominant colours, decoded through the backend

pub mod backend;
pub mod calculations;
pub mod filters;
pub mod operations;
pub mod palette;
mod params;
pub mod rust_backend;
pub mod smart;

pub use backend::{BackendError, Dimensions, ImageBackend, Pixels};
pub use calculations::{Rect, output_dimensions};
pub use filters::Filter;
pub use operations::{Rendered, dominant_colors_of, get_dimensions, render};
pub use palette::{Color, PaletteCache};
pub use params::{EncodeParams, ResizeParams};
pub use rust_backend::RustBackend;
pub use smart::{EnergyCropper, SmartCropper};
