//! # image-derive
//!
//! A content-addressed cache and transform pipeline for derived images in
//! static site builds. Ask for a resized, cropped, filled, fitted, filtered
//! or converted variant of a source image and get back a handle that knows
//! its dimensions immediately, renders on first use, and is shared with
//! every other request for the same variant.
//!
//! # Architecture
//!
//! ```text
//! spec "300x200 q80 png"
//!        │
//!        ▼
//!   options ──▶ fingerprint ──▶ artifact cache ──▶ Image handle
//!   (parse,      (source sig +    (one handle per      │ content() / rel_permalink()
//!    resolve)     option chain)    fingerprint)        ▼
//!                                               render once ──▶ publish sink
//!                                               (or hydrate from the persisted manifest)
//! ```
//!
//! Identity is derived from content, never from names: the SHA-256 of the
//! source bytes plus the canonical form of every option in the derivation
//! chain. Two requests that would produce the same pixels get the same
//! handle; two that would not, never do.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`options`] | Spec-string grammar, option defaults, canonical keys |
//! | [`fingerprint`] | Source signatures, derivation lineage, derived file names |
//! | [`cache`] | Single-flight artifact cache, persisted manifest, cache statistics |
//! | [`resource`] | The [`Image`] handle: lazy rendering and idempotent publishing |
//! | [`process`] | [`Processor`], one derivation session and its capabilities |
//! | [`imaging`] | Codec backend, output-dimension math, filters, smart crop, palette |
//! | [`metadata`] | EXIF date, location and tags, extracted once per source |
//! | [`publish`] | Publish sinks: filesystem and in-memory |
//! | [`media`] | Supported formats, extensions and media types |
//! | [`config`] | `config.toml` loading, validation and merging |
//! | [`error`] | The error taxonomy every operation reports through |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Lazy Rendering, Eager Dimensions
//!
//! Templates usually need `width` and `height` long before anyone needs the
//! bytes, and often never need the bytes of an intermediate step. A handle
//! computes its output dimensions from the parent's dimensions and the
//! options alone; pixel work waits for [`Image::content`] or
//! [`Image::rel_permalink`].
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding go through the `image` crate. No ImageMagick, no
//! libvips, no system packages. AVIF can be written but not read; an AVIF
//! source is reported as an unsupported format.
//!
//! ## Pluggable Capabilities
//!
//! The codec backend, smart-crop selector, metadata extractor and publish
//! sink are traits. [`process::Capabilities::with_sink`] wires the built-in
//! implementations; tests swap in recording mocks.

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod imaging;
pub mod media;
pub mod metadata;
pub mod options;
pub mod output;
pub mod process;
pub mod publish;
pub mod resource;

pub use error::{ImageError, Result};
pub use process::{Capabilities, Processor};
pub use resource::Image;
