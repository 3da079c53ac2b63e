//! Session caches for derived images.
//!
//! Two tiers:
//!
//! - **[`ArtifactCache`]** (in memory): fingerprint → derived image handle.
//!   The first request for a fingerprint creates the handle; every later or
//!   concurrent request receives the very same instance. Nothing is
//!   evicted during a session.
//! - **[`CacheManifest`]** (persisted): fingerprint → previously published
//!   file, so a later session can hydrate a handle without rendering.
//!
//! The in-memory map is guarded by one mutex, held only long enough to find
//! or insert a per-fingerprint [`Flight`](flight::Flight). Creation runs
//! under that flight, so unrelated fingerprints never wait on each other
//! and a factory that asks for its own fingerprint gets
//! [`CyclicDerivation`](crate::error::ImageError::CyclicDerivation).

pub(crate) mod flight;
pub mod manifest;

pub use manifest::{CacheManifest, ManifestEntry};

use crate::error::Result;
use flight::Flight;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Fingerprint-keyed single-instance store.
pub struct ArtifactCache<T> {
    entries: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> Default for ArtifactCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ArtifactCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored value for `fingerprint`, creating it with `factory`
    /// if this is the first request.
    ///
    /// The second element is `true` when the value already existed (or was
    /// created by a concurrent caller).
    pub fn get_or_create(
        &self,
        fingerprint: &str,
        factory: impl FnOnce() -> Result<T>,
    ) -> Result<(T, bool)> {
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Flight::new(fingerprint)))
                .clone()
        };
        if let Some(value) = slot.peek() {
            return Ok((value, true));
        }
        let mut created = false;
        let value = slot.run(|| {
            created = true;
            factory()
        })?;
        Ok((value, !created))
    }

    /// The stored value, if one has been created.
    pub fn get(&self, fingerprint: &str) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(fingerprint).and_then(|slot| slot.peek())
    }

    /// Number of fingerprints requested so far.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Summary of cache behaviour for a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Derivations whose pixels were computed.
    pub rendered: u32,
    /// Derivations restored from the persisted manifest at the same path.
    pub hydrated: u32,
    /// Derivations restored from the manifest and copied to a new path.
    pub copied: u32,
    /// Requests answered by an existing in-memory instance.
    pub reused: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.rendered + self.hydrated + self.copied
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hydrated > 0 || self.copied > 0 {
            if self.copied > 0 {
                write!(
                    f,
                    "{} cached, {} copied, {} rendered ({} total)",
                    self.hydrated,
                    self.copied,
                    self.rendered,
                    self.total()
                )?;
            } else {
                write!(
                    f,
                    "{} cached, {} rendered ({} total)",
                    self.hydrated,
                    self.rendered,
                    self.total()
                )?;
            }
        } else {
            write!(f, "{} rendered", self.rendered)?;
        }
        if self.reused > 0 {
            write!(f, ", {} reused", self.reused)?;
        }
        Ok(())
    }
}

/// Thread-safe counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    rendered: AtomicU32,
    hydrated: AtomicU32,
    copied: AtomicU32,
    reused: AtomicU32,
}

impl StatsCounter {
    pub(crate) fn rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hydrated(&self) {
        self.hydrated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn copied(&self) {
        self.copied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            rendered: self.rendered.load(Ordering::Relaxed),
            hydrated: self.hydrated.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }
}
