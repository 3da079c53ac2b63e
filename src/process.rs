//! Derivation sessions.
//!
//! A [`Processor`] is one build run: it owns the artifact cache, the
//! metadata cache, the persisted manifest, and the capabilities every
//! image needs (codec backend, smart cropper, metadata extractor, publish
//! sink). It is `Sync`; share it across worker threads by reference or
//! through an `Arc`.
//!
//! ## Requesting derivations
//!
//! ```text
//! processor.resize(&img, "300x")        ─┐
//! processor.fill(&img, "200x100 top")    │  parse + resolve options
//! processor.process(&img, "fit 50x50")   ├─▶ fingerprint(source, chain)
//! processor.filter(&img, [Grayscale])   ─┘     └▶ artifact cache (one handle per fingerprint)
//! ```
//!
//! Each call returns immediately with a handle that knows its dimensions.
//! Pixels are only computed when the handle's content or permalink is
//! first accessed; see [`resource`](crate::resource).
//!
//! Derivations of derivations chain: the options of every step are part
//! of the identity, and each step works from its parent's output.

use crate::cache::{ArtifactCache, CacheManifest, CacheStats, StatsCounter, manifest};
use crate::config::DeriveConfig;
use crate::error::{ImageError, Result};
use crate::fingerprint::{Lineage, signature};
use crate::imaging::calculations::{MAX_PIXELS, peak_dimensions, pixel_count};
use crate::imaging::{
    EnergyCropper, Filter, ImageBackend, PaletteCache, RustBackend, SmartCropper, get_dimensions,
};
use crate::media::Format;
use crate::metadata::{ExifExtractor, MetadataCache, MetadataExtractor};
use crate::options::{Action, OptionDefaults, TransformOptions};
use crate::publish::PublishSink;
use crate::resource::{Image, Source};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// The pluggable collaborators of a session.
#[derive(Clone)]
pub struct Capabilities {
    pub backend: Arc<dyn ImageBackend>,
    pub cropper: Arc<dyn SmartCropper>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub sink: Arc<dyn PublishSink>,
}

impl Capabilities {
    /// The built-in implementations, publishing to `sink`.
    pub fn with_sink(sink: Arc<dyn PublishSink>) -> Self {
        Self {
            backend: Arc::new(RustBackend::new()),
            cropper: Arc::new(EnergyCropper::new()),
            extractor: Arc::new(ExifExtractor),
            sink,
        }
    }
}

/// State shared by every image of a session.
pub(crate) struct Session {
    pub(crate) backend: Arc<dyn ImageBackend>,
    pub(crate) cropper: Arc<dyn SmartCropper>,
    pub(crate) extractor: Arc<dyn MetadataExtractor>,
    pub(crate) sink: Arc<dyn PublishSink>,
    pub(crate) defaults: OptionDefaults,
    pub(crate) manifest: Option<Mutex<CacheManifest>>,
    pub(crate) metadata: MetadataCache,
    pub(crate) palettes: PaletteCache,
    pub(crate) stats: StatsCounter,
}

/// One derivation session.
pub struct Processor {
    session: Arc<Session>,
    images: ArtifactCache<Image>,
}

impl Processor {
    /// Start a session. Loads the persisted manifest through the sink when
    /// `config.cache.persist_manifest` is set.
    pub fn new(config: &DeriveConfig, capabilities: Capabilities) -> Result<Self> {
        let defaults = config
            .imaging
            .option_defaults()
            .map_err(|e| ImageError::invalid_spec("config", e.to_string()))?;
        let manifest = config
            .cache
            .persist_manifest
            .then(|| Mutex::new(CacheManifest::load(capabilities.sink.as_ref())));
        Ok(Self::with_parts(capabilities, defaults, manifest))
    }

    /// Start a session with explicit option defaults and no persisted
    /// manifest.
    pub fn with_defaults(capabilities: Capabilities, defaults: OptionDefaults) -> Self {
        Self::with_parts(capabilities, defaults, None)
    }

    fn with_parts(
        capabilities: Capabilities,
        defaults: OptionDefaults,
        manifest: Option<Mutex<CacheManifest>>,
    ) -> Self {
        let Capabilities {
            backend,
            cropper,
            extractor,
            sink,
        } = capabilities;
        Self {
            session: Arc::new(Session {
                backend,
                cropper,
                extractor,
                sink,
                defaults,
                manifest,
                metadata: MetadataCache::new(),
                palettes: PaletteCache::new(),
                stats: StatsCounter::default(),
            }),
            images: ArtifactCache::new(),
        }
    }

    pub fn defaults(&self) -> &OptionDefaults {
        &self.session.defaults
    }

    /// Register a source image. `path` is its slash-separated location
    /// relative to the publish root; the extension picks the format.
    ///
    /// Adding the same bytes at the same path again returns the same image.
    pub fn add_source(&self, path: &str, bytes: impl Into<Arc<[u8]>>) -> Result<Image> {
        let path = path.trim_start_matches('/');
        let (_, _, ext) = crate::media::split_path(path);
        let format = Format::from_extension(ext)
            .ok_or_else(|| ImageError::UnsupportedFormat(format!("{path}: unknown extension")))?;
        let bytes: Arc<[u8]> = bytes.into();
        let signature = signature(&bytes);
        let key = format!("source:{signature}:{path}");

        let (image, reused) = self.images.get_or_create(&key, || {
            let (width, height) =
                get_dimensions(self.session.backend.as_ref(), &bytes, format, path)?;
            let source = Source {
                path: path.to_string(),
                bytes: Arc::clone(&bytes),
                signature: signature.clone(),
                format,
            };
            debug!(path, width, height, "source added");
            Ok(Image::source(Arc::clone(&self.session), source, width, height))
        })?;
        if reused {
            self.session.stats.reused();
        }
        Ok(image)
    }

    /// Scale to the given size; an unset side keeps the aspect ratio.
    pub fn resize(&self, image: &Image, spec: &str) -> Result<Image> {
        self.derive_spec(image, spec, Some(Action::Resize))
    }

    /// Cut a region of the given size at the anchor, without scaling.
    pub fn crop(&self, image: &Image, spec: &str) -> Result<Image> {
        self.derive_spec(image, spec, Some(Action::Crop))
    }

    /// Scale to cover the given size, then crop at the anchor.
    pub fn fill(&self, image: &Image, spec: &str) -> Result<Image> {
        self.derive_spec(image, spec, Some(Action::Fill))
    }

    /// Scale down to fit inside the given box, keeping the aspect ratio.
    pub fn fit(&self, image: &Image, spec: &str) -> Result<Image> {
        self.derive_spec(image, spec, Some(Action::Fit))
    }

    /// Apply a spec naming its own action (`"fill 200x100"`). A spec with
    /// neither action nor size converts format and/or rotates.
    pub fn process(&self, image: &Image, spec: &str) -> Result<Image> {
        self.derive_spec(image, spec, None)
    }

    /// Apply a filter chain in the given order.
    pub fn filter(&self, image: &Image, filters: impl IntoIterator<Item = Filter>) -> Result<Image> {
        let options = TransformOptions::filter_chain(
            filters.into_iter().collect(),
            &self.session.defaults,
            image.format(),
        );
        self.derive(image, options)
    }

    fn derive_spec(&self, image: &Image, spec: &str, action: Option<Action>) -> Result<Image> {
        let options = TransformOptions::parse(spec, action, &self.session.defaults, image.format())?;
        self.derive(image, options)
    }

    /// Look up or create the handle for `options` applied to `parent`.
    ///
    /// Handles are shared per source path and fingerprint. The fingerprint
    /// alone only depends on content, which is what the manifest matches on.
    pub fn derive(&self, parent: &Image, options: TransformOptions) -> Result<Image> {
        let (w, h) = peak_dimensions((parent.width(), parent.height()), &options);
        if pixel_count((w, h)) > MAX_PIXELS {
            return Err(ImageError::invalid_spec(
                &options.key(),
                format!("{w}x{h} exceeds the limit of {MAX_PIXELS} pixels"),
            ));
        }
        let lineage = match parent.lineage() {
            Some(lineage) => lineage.then(&options),
            None => Lineage::root(&options),
        };
        let fingerprint = lineage.fingerprint(parent.signature());
        // Same bytes at another path is another source: its derivations
        // publish next to it and keep its name.
        let key = format!("{}:{fingerprint}", parent.source_path());

        let (image, reused) = self.images.get_or_create(&key, || {
            Ok(Image::derived(parent, options, lineage, fingerprint.clone()))
        })?;
        if reused {
            self.session.stats.reused();
            debug!(path = %image.path(), "reused derived image");
        }
        Ok(image)
    }

    /// Persist the manifest of everything published so far. A no-op when
    /// the manifest is disabled.
    pub fn save_manifest(&self) -> Result<()> {
        let Some(manifest) = &self.session.manifest else {
            return Ok(());
        };
        manifest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save(self.session.sink.as_ref())
            .map_err(|e| ImageError::publish(manifest::MANIFEST_PATH, e))
    }

    pub fn stats(&self) -> CacheStats {
        self.session.stats.snapshot()
    }

    /// Number of distinct images (sources and derivations) requested.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, mock_bytes};
    use crate::metadata::Metadata;
    use crate::publish::MemorySink;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtractor(AtomicUsize);

    impl MetadataExtractor for CountingExtractor {
        fn extract(&self, _: &[u8], _: Format) -> Option<Metadata> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(Metadata {
                lat: Some(36.59),
                long: Some(-4.37),
                ..Metadata::default()
            })
        }
    }

    /// Sink that fails the first `n` writes.
    struct FlakySink {
        inner: MemorySink,
        failures: AtomicUsize,
    }

    impl PublishSink for FlakySink {
        fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(io::Error::other("disk full"));
            }
            self.inner.write(path, bytes)
        }

        fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
            self.inner.read(path)
        }

        fn size(&self, path: &str) -> Option<u64> {
            self.inner.size(path)
        }
    }

    struct Fixture {
        backend: Arc<MockBackend>,
        sink: Arc<MemorySink>,
        extractor: Arc<CountingExtractor>,
        processor: Processor,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(MemorySink::new());
        let extractor = Arc::new(CountingExtractor(AtomicUsize::new(0)));
        let processor = Processor::with_defaults(
            Capabilities {
                backend: backend.clone(),
                cropper: Arc::new(EnergyCropper),
                extractor: extractor.clone(),
                sink: sink.clone(),
            },
            OptionDefaults::default(),
        );
        Fixture {
            backend,
            sink,
            extractor,
            processor,
        }
    }

    fn sunset(p: &Processor) -> Image {
        p.add_source("a/sunset.jpg", mock_bytes(900, 562, Format::Jpeg))
            .unwrap()
    }

    fn renders(backend: &MockBackend) -> usize {
        backend.count(|op| matches!(op, RecordedOp::Encode { .. }))
    }

    // =========================================================================
    // Handles and identity
    // =========================================================================

    #[test]
    fn source_reports_intrinsic_properties() {
        let f = fixture();
        let img = sunset(&f.processor);
        assert_eq!((img.width(), img.height()), (900, 562));
        assert_eq!(img.media_type(), "image/jpeg");
        assert_eq!(img.name(), "sunset.jpg");
        assert!(img.is_source());
        assert_eq!(img, sunset(&f.processor));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let f = fixture();
        let err = f.processor.add_source("a/x.bmp", vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedFormat(_)));
    }

    #[test]
    fn same_spec_same_instance() {
        let f = fixture();
        let img = sunset(&f.processor);
        let a = f.processor.resize(&img, "300x200").unwrap();
        let b = f.processor.resize(&img, "300X200").unwrap();
        assert_eq!(a, b);
        assert_eq!(f.processor.stats().reused, 1);
    }

    #[test]
    fn same_bytes_at_two_paths_derive_separately() {
        let f = fixture();
        let a = sunset(&f.processor);
        let b = f
            .processor
            .add_source("b/dusk.jpg", mock_bytes(900, 562, Format::Jpeg))
            .unwrap();
        assert_ne!(a, b);

        let ra = f.processor.resize(&a, "30x").unwrap();
        let rb = f.processor.resize(&b, "30x").unwrap();
        assert_ne!(ra, rb);
        assert_eq!(ra.fingerprint(), rb.fingerprint());
        assert_eq!(rb.parent(), Some(&b));
        assert_eq!(rb.name(), "dusk.jpg");
        assert!(rb.path().starts_with("b/dusk_"), "{}", rb.path());
        assert!(rb.rel_permalink().unwrap().starts_with("/b/dusk_"));
        assert!(ra.rel_permalink().unwrap().starts_with("/a/sunset_"));
    }

    #[test]
    fn handles_are_lazy() {
        let f = fixture();
        let img = sunset(&f.processor);
        let resized = f.processor.resize(&img, "x200").unwrap();
        assert_eq!((resized.width(), resized.height()), (320, 200));
        assert_eq!(renders(&f.backend), 0);
        assert!(f.sink.paths().is_empty());
    }

    #[test]
    fn invalid_spec_surfaces_immediately() {
        let f = fixture();
        let img = sunset(&f.processor);
        assert!(matches!(
            f.processor.fill(&img, "200x"),
            Err(ImageError::InvalidSpec { .. })
        ));
        assert!(matches!(
            f.processor.resize(&img, "300x200 sideways"),
            Err(ImageError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn oversized_target_is_rejected_before_rendering() {
        let f = fixture();
        let img = sunset(&f.processor);
        for (spec, action) in [("x100000", Action::Resize), ("100000x1", Action::Fill)] {
            let result = f.processor.derive_spec(&img, spec, Some(action));
            assert!(matches!(result, Err(ImageError::InvalidSpec { .. })), "{spec}");
        }
        assert!(f.backend.get_operations().is_empty());
        assert_eq!(f.processor.len(), 1);

        let large = f.processor.resize(&img, "16000x").unwrap();
        assert_eq!((large.width(), large.height()), (16000, 9991));
    }

    // =========================================================================
    // Rendering and publishing
    // =========================================================================

    #[test]
    fn permalink_renders_and_publishes_once() {
        let f = fixture();
        let img = sunset(&f.processor);
        let resized = f.processor.resize(&img, "300x200").unwrap();

        let link = resized.rel_permalink().unwrap();
        assert_eq!(link, format!("/{}", resized.path()));
        assert!(link.starts_with("/a/sunset_"));
        assert!(link.ends_with("_300x200_resize_q75_box.jpg"));
        resized.content().unwrap();
        resized.rel_permalink().unwrap();

        assert_eq!(renders(&f.backend), 1);
        assert_eq!(f.sink.writes(), 1);
        assert_eq!(f.processor.stats().rendered, 1);
    }

    #[test]
    fn source_publishes_its_own_bytes() {
        let f = fixture();
        let img = sunset(&f.processor);
        assert_eq!(img.rel_permalink().unwrap(), "/a/sunset.jpg");
        assert_eq!(
            &*f.sink.get("a/sunset.jpg").unwrap(),
            &mock_bytes(900, 562, Format::Jpeg)[..]
        );
        assert_eq!(renders(&f.backend), 0);
    }

    #[test]
    fn chained_derivation_uses_parent_output() {
        let f = fixture();
        let img = sunset(&f.processor);
        let first = f.processor.fit(&img, "300x200").unwrap();
        let second = f.processor.fit(&first, "50x50").unwrap();
        assert_eq!((first.width(), first.height()), (300, 187));
        assert_eq!((second.width(), second.height()), (50, 31));
        assert_eq!(second.parent(), Some(&first));

        second.content().unwrap();
        let decodes: Vec<_> = f
            .backend
            .get_operations()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Decode { .. }))
            .collect();
        assert_eq!(
            decodes,
            vec![
                RecordedOp::Decode {
                    width: 900,
                    height: 562
                },
                RecordedOp::Decode {
                    width: 300,
                    height: 187
                },
            ]
        );
        // The intermediate was rendered but not published.
        assert_eq!(f.sink.paths(), vec![second.path().to_string()]);
    }

    #[test]
    fn computation_failure_is_sticky() {
        let backend = Arc::new(MockBackend {
            fail_encode: true,
            ..MockBackend::default()
        });
        let p = Processor::with_defaults(
            Capabilities {
                backend: backend.clone(),
                cropper: Arc::new(EnergyCropper),
                extractor: Arc::new(ExifExtractor),
                sink: Arc::new(MemorySink::new()),
            },
            OptionDefaults::default(),
        );
        let img = sunset(&p);
        let resized = p.resize(&img, "100x").unwrap();
        let first = resized.content().unwrap_err();
        let second = resized.rel_permalink().unwrap_err();
        assert_eq!(first, second);
        assert!(matches!(first, ImageError::ComputationFailed { .. }));
        assert_eq!(renders(&backend), 1);
    }

    #[test]
    fn publish_failure_is_retried_without_rerender() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(FlakySink {
            inner: MemorySink::new(),
            failures: AtomicUsize::new(1),
        });
        let p = Processor::with_defaults(
            Capabilities {
                backend: backend.clone(),
                cropper: Arc::new(EnergyCropper),
                extractor: Arc::new(ExifExtractor),
                sink: sink.clone(),
            },
            OptionDefaults::default(),
        );
        let img = sunset(&p);
        let resized = p.resize(&img, "100x50").unwrap();

        assert!(matches!(
            resized.rel_permalink(),
            Err(ImageError::PublishFailed { .. })
        ));
        let link = resized.rel_permalink().unwrap();
        assert!(sink.inner.get(&link[1..]).is_some());
        assert_eq!(renders(&backend), 1);
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    #[test]
    fn derivations_share_source_metadata() {
        let f = fixture();
        let img = sunset(&f.processor);
        let a = f.processor.resize(&img, "100x").unwrap();
        let b = f.processor.fill(&a, "20x20").unwrap();

        let m_src = img.metadata().unwrap();
        let m_a = a.metadata().unwrap();
        let m_b = b.metadata().unwrap();
        assert!(Arc::ptr_eq(&m_src, &m_a));
        assert!(Arc::ptr_eq(&m_a, &m_b));
        assert_eq!(m_b.lat, Some(36.59));
        assert_eq!(f.extractor.0.load(Ordering::SeqCst), 1);
        assert_eq!(renders(&f.backend), 0);
    }

    // =========================================================================
    // Persisted manifest
    // =========================================================================

    #[test]
    fn later_session_hydrates_from_manifest() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(MemorySink::new());
        let caps = Capabilities {
            backend: backend.clone(),
            cropper: Arc::new(EnergyCropper),
            extractor: Arc::new(ExifExtractor),
            sink: sink.clone(),
        };
        let config = DeriveConfig::default();

        let first = Processor::new(&config, caps.clone()).unwrap();
        let img = sunset(&first);
        let path = first.resize(&img, "300x").unwrap().rel_permalink().unwrap();
        first.save_manifest().unwrap();
        assert_eq!(renders(&backend), 1);

        let second = Processor::new(&config, caps).unwrap();
        let img = sunset(&second);
        let again = second.resize(&img, "300x").unwrap();
        assert_eq!(again.rel_permalink().unwrap(), path);
        assert_eq!(renders(&backend), 1);
        assert_eq!(second.stats().hydrated, 1);
        assert_eq!(second.stats().rendered, 0);
    }

    #[test]
    fn renamed_source_copies_from_manifest() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(MemorySink::new());
        let caps = Capabilities {
            backend: backend.clone(),
            cropper: Arc::new(EnergyCropper),
            extractor: Arc::new(ExifExtractor),
            sink: sink.clone(),
        };
        let config = DeriveConfig::default();

        let first = Processor::new(&config, caps.clone()).unwrap();
        let img = sunset(&first);
        first.resize(&img, "300x").unwrap().rel_permalink().unwrap();
        first.save_manifest().unwrap();

        let second = Processor::new(&config, caps).unwrap();
        let moved = second
            .add_source("b/dusk.jpg", mock_bytes(900, 562, Format::Jpeg))
            .unwrap();
        let link = second.resize(&moved, "300x").unwrap().rel_permalink().unwrap();
        assert!(link.starts_with("/b/dusk_"));
        assert_eq!(renders(&backend), 1);
        assert_eq!(second.stats().copied, 1);
    }

    #[test]
    fn tampered_published_file_is_rendered_again() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(MemorySink::new());
        let caps = Capabilities {
            backend: backend.clone(),
            cropper: Arc::new(EnergyCropper),
            extractor: Arc::new(ExifExtractor),
            sink: sink.clone(),
        };
        let config = DeriveConfig::default();

        let first = Processor::new(&config, caps.clone()).unwrap();
        let img = sunset(&first);
        let resized = first.resize(&img, "300x").unwrap();
        resized.rel_permalink().unwrap();
        first.save_manifest().unwrap();
        let good = sink.get(resized.path()).unwrap();

        // Same length, different bytes.
        let mut bad = good.to_vec();
        bad[0] ^= 0xff;
        sink.write(resized.path(), &bad).unwrap();

        let second = Processor::new(&config, caps).unwrap();
        let img = sunset(&second);
        let again = second.resize(&img, "300x").unwrap();
        assert_eq!(again.content().unwrap(), good);
        assert_eq!(second.stats().hydrated, 0);
        assert_eq!(second.stats().rendered, 1);
        assert_eq!(renders(&backend), 2);
        assert_eq!(sink.get(again.path()).unwrap(), good);
    }

    #[test]
    fn manifest_disabled_always_renders() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(MemorySink::new());
        let caps = Capabilities {
            backend: backend.clone(),
            cropper: Arc::new(EnergyCropper),
            extractor: Arc::new(ExifExtractor),
            sink,
        };
        let mut config = DeriveConfig::default();
        config.cache.persist_manifest = false;

        for _ in 0..2 {
            let p = Processor::new(&config, caps.clone()).unwrap();
            let img = sunset(&p);
            p.resize(&img, "300x").unwrap().content().unwrap();
            p.save_manifest().unwrap();
        }
        assert_eq!(renders(&backend), 2);
    }
}
