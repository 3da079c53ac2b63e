//! Image handles: sources and their derivations.
//!
//! An [`Image`] is a cheap, clonable handle. Clones share one underlying
//! resource, and the session hands out the same resource for the same
//! fingerprint, so `==` on images is pointer equality.
//!
//! ## Lifecycle of a derived image
//!
//! ```text
//! created ──(content / rel_permalink)──▶ rendered ──▶ published
//!    │                                       │
//!    └ width, height, format known           └ or Failed, for every caller
//! ```
//!
//! Creation only computes identity and dimensions. The first access to the
//! content or permalink renders (or hydrates from the persisted manifest),
//! then publishes through the sink. Rendering happens at most once per
//! resource; its outcome, success or failure, is shared by every caller.
//! Publishing is separate: a failed publish is reported, the rendered bytes
//! stay in memory, and the next access tries to publish again.
//!
//! Sources are never modified. Their bytes are held behind an `Arc<[u8]>`
//! and only ever read.

use crate::cache::ManifestEntry;
use crate::cache::flight::Flight;
use crate::error::{ImageError, Result};
use crate::fingerprint::{Lineage, signature};
use crate::imaging::palette::PALETTE_SIZE;
use crate::imaging::{Color, Rendered, dominant_colors_of, output_dimensions, render};
use crate::media::Format;
use crate::metadata::Metadata;
use crate::options::TransformOptions;
use crate::process::Session;
use crate::publish::publish_once;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// An original image.
pub(crate) struct Source {
    pub(crate) path: String,
    pub(crate) bytes: Arc<[u8]>,
    pub(crate) signature: String,
    pub(crate) format: Format,
}

struct Derivation {
    parent: Image,
    options: TransformOptions,
    lineage: Lineage,
    fingerprint: String,
}

struct Inner {
    session: Arc<Session>,
    source: Arc<Source>,
    derivation: Option<Derivation>,
    path: String,
    width: u32,
    height: u32,
    format: Format,
    rendered: Flight<Rendered>,
    published: Mutex<bool>,
}

/// A source image or a derivation of one.
#[derive(Clone)]
pub struct Image(Arc<Inner>);

impl Image {
    pub(crate) fn source(session: Arc<Session>, source: Source, width: u32, height: u32) -> Self {
        let path = source.path.clone();
        let format = source.format;
        Image(Arc::new(Inner {
            session,
            rendered: Flight::new(path.clone()),
            source: Arc::new(source),
            derivation: None,
            path,
            width,
            height,
            format,
            published: Mutex::new(false),
        }))
    }

    /// Handle for `options` applied to `parent`. No pixel work happens here.
    pub(crate) fn derived(
        parent: &Image,
        options: TransformOptions,
        lineage: Lineage,
        fingerprint: String,
    ) -> Self {
        let source = Arc::clone(&parent.0.source);
        let path = lineage.derived_path(&source.path, &source.signature, source.bytes.len() as u64);
        let (width, height) = output_dimensions((parent.width(), parent.height()), &options);
        let format = options.format;
        Image(Arc::new(Inner {
            session: Arc::clone(&parent.0.session),
            rendered: Flight::new(path.clone()),
            source,
            derivation: Some(Derivation {
                parent: parent.clone(),
                options,
                lineage,
                fingerprint,
            }),
            path,
            width,
            height,
            format,
            published: Mutex::new(false),
        }))
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn format(&self) -> Format {
        self.0.format
    }

    pub fn media_type(&self) -> &'static str {
        self.0.format.media_type()
    }

    /// Logical name: the source's file name, kept through every derivation.
    pub fn name(&self) -> &str {
        let path = self.0.source.path.as_str();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Path relative to the publish root.
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Cache identity: the fingerprint of a derivation, or the signature of
    /// a source.
    pub fn fingerprint(&self) -> &str {
        match &self.0.derivation {
            Some(d) => &d.fingerprint,
            None => &self.0.source.signature,
        }
    }

    /// The image this one was derived from.
    pub fn parent(&self) -> Option<&Image> {
        self.0.derivation.as_ref().map(|d| &d.parent)
    }

    /// Options of the last derivation step.
    pub fn options(&self) -> Option<&TransformOptions> {
        self.0.derivation.as_ref().map(|d| &d.options)
    }

    pub fn is_source(&self) -> bool {
        self.0.derivation.is_none()
    }

    pub(crate) fn lineage(&self) -> Option<&Lineage> {
        self.0.derivation.as_ref().map(|d| &d.lineage)
    }

    pub(crate) fn source_path(&self) -> &str {
        &self.0.source.path
    }

    pub(crate) fn signature(&self) -> &str {
        &self.0.source.signature
    }

    /// Metadata of the source, shared by all of its derivations.
    pub fn metadata(&self) -> Option<Arc<Metadata>> {
        let session = &self.0.session;
        let source = &self.0.source;
        session.metadata.get_or_extract(&source.signature, || {
            session.extractor.extract(&source.bytes, source.format)
        })
    }

    /// Dominant colours of the source, most common first, with distinct
    /// luminances. Computed once per source and shared by its derivations;
    /// nothing is rendered or published.
    pub fn colors(&self) -> Result<Arc<[Color]>> {
        let session = &self.0.session;
        let source = &self.0.source;
        session.palettes.get_or_compute(&source.signature, || {
            dominant_colors_of(
                session.backend.as_ref(),
                &source.bytes,
                source.format,
                &source.path,
                PALETTE_SIZE,
            )
        })
    }

    /// Encoded bytes, rendering and publishing on first access.
    pub fn content(&self) -> Result<Arc<[u8]>> {
        let rendered = self.rendered()?;
        self.publish(&rendered)?;
        Ok(rendered.bytes)
    }

    /// Root-relative URL, rendering and publishing on first access.
    pub fn rel_permalink(&self) -> Result<String> {
        let rendered = self.rendered()?;
        self.publish(&rendered)?;
        Ok(format!("/{}", self.0.path))
    }

    /// Encoded bytes without publishing; used as input by derivations.
    fn rendered(&self) -> Result<Rendered> {
        let Some(derivation) = &self.0.derivation else {
            return Ok(Rendered {
                bytes: Arc::clone(&self.0.source.bytes),
                width: self.0.width,
                height: self.0.height,
                format: self.0.format,
            });
        };
        self.0.rendered.run(|| self.compute(derivation))
    }

    fn compute(&self, derivation: &Derivation) -> Result<Rendered> {
        let session = &self.0.session;
        if let Some(hit) = self.hydrate(derivation) {
            return Ok(hit);
        }

        let parent = &derivation.parent;
        let input = parent.rendered()?;
        let rendered = render(
            session.backend.as_ref(),
            session.cropper.as_ref(),
            &input.bytes,
            parent.format(),
            &derivation.options,
            &self.0.path,
        )?;
        session.stats.rendered();
        info!(
            path = %self.0.path,
            width = rendered.width,
            height = rendered.height,
            "rendered derived image"
        );
        Ok(rendered)
    }

    /// Restore a rendering published by an earlier session.
    fn hydrate(&self, derivation: &Derivation) -> Option<Rendered> {
        let session = &self.0.session;
        let manifest = session.manifest.as_ref()?;
        let (stored_path, entry) = {
            let manifest = manifest.lock().unwrap_or_else(PoisonError::into_inner);
            let (path, entry) = manifest.find_cached(&derivation.fingerprint, session.sink.as_ref())?;
            (path.to_string(), entry.clone())
        };
        if (entry.width, entry.height, entry.format) != (self.0.width, self.0.height, self.0.format) {
            return None;
        }
        let bytes = match session.sink.read(&stored_path) {
            Ok(Some(bytes)) if entry.matches(&bytes) => bytes,
            Ok(Some(_)) => {
                warn!(path = %stored_path, "published file changed since it was recorded");
                return None;
            }
            _ => return None,
        };
        if stored_path == self.0.path {
            session.stats.hydrated();
            debug!(path = %stored_path, "hydrated from manifest");
        } else {
            session.stats.copied();
            debug!(from = %stored_path, to = %self.0.path, "copied from manifest");
        }
        Some(Rendered {
            bytes: bytes.into(),
            width: entry.width,
            height: entry.height,
            format: entry.format,
        })
    }

    /// Publish once; a failure leaves the flag unset so the next call retries.
    fn publish(&self, rendered: &Rendered) -> Result<()> {
        let session = &self.0.session;
        let mut published = self
            .0
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *published {
            return Ok(());
        }

        let path = &self.0.path;
        let wrote = publish_once(session.sink.as_ref(), path, &rendered.bytes).map_err(|e| {
            warn!(path = %path, error = %e, "publish failed");
            ImageError::publish(path, e)
        })?;
        *published = true;
        debug!(path = %path, wrote, "published");

        if let (Some(derivation), Some(manifest)) = (&self.0.derivation, &session.manifest) {
            manifest
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    path.clone(),
                    ManifestEntry {
                        fingerprint: derivation.fingerprint.clone(),
                        width: rendered.width,
                        height: rendered.height,
                        format: rendered.format,
                        byte_len: rendered.bytes.len() as u64,
                        digest: signature(&rendered.bytes),
                    },
                );
        }
        Ok(())
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Image {}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("path", &self.0.path)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("format", &self.0.format)
            .finish()
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.path)
    }
}
