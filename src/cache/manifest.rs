//! Persisted manifest of published derivations.
//!
//! Rendering is the expensive part of a derivation. The manifest lets a
//! new session skip it when an earlier session already published the same
//! artifact: an entry records which fingerprint produced a published path,
//! along with the dimensions, format, byte length, and SHA-256 digest it had.
//!
//! ## Cache keys
//!
//! Lookups are by fingerprint, not by path. A fingerprint is derived from
//! source content and canonical options only, so renaming a source keeps
//! the fingerprint while changing the derived path. The runtime
//! `content_index` maps fingerprints back to the stored path, and the
//! session copies the published bytes over instead of rendering again.
//!
//! A hit requires:
//! 1. An entry with the fingerprint exists
//! 2. The sink still holds a file at the stored path with the recorded
//!    byte length
//! 3. The bytes read back hash to the recorded digest
//!    ([`ManifestEntry::matches`], checked by the caller after reading)
//!
//! ## Storage
//!
//! The manifest is JSON stored through the publish sink at
//! [`MANIFEST_PATH`], next to the derived files it describes. A missing,
//! corrupt, or outdated manifest loads as empty; the cost is a re-render.

use crate::fingerprint::signature;
use crate::media::Format;
use crate::publish::PublishSink;
use std::collections::{BTreeMap, HashMap};
use std::io;
use tracing::warn;

/// Location of the manifest within the sink.
pub const MANIFEST_PATH: &str = "_gen/.derived-manifest.json";

/// Bump to invalidate every persisted manifest when the layout or the
/// fingerprint computation changes.
const MANIFEST_VERSION: u32 = 2;

/// One published derivation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub byte_len: u64,
    /// SHA-256 of the published bytes, lower-case hex.
    pub digest: String,
}

impl ManifestEntry {
    /// Whether `bytes` are exactly what was published.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.byte_len && signature(bytes) == self.digest
    }
}

/// Published path → entry, plus a fingerprint index built at load time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: BTreeMap<String, ManifestEntry>,
    /// Runtime reverse index: fingerprint → published path. Never serialized.
    #[serde(skip)]
    content_index: HashMap<String, String>,
}

impl CacheManifest {
    /// An empty manifest, used for `--no-cache` and first runs.
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
            content_index: HashMap::new(),
        }
    }

    /// Load from the sink, falling back to an empty manifest.
    pub fn load(sink: &dyn PublishSink) -> Self {
        let bytes = match sink.read(MANIFEST_PATH) {
            Ok(Some(b)) => b,
            Ok(None) => return Self::empty(),
            Err(e) => {
                warn!(path = MANIFEST_PATH, error = %e, "unreadable derivation manifest");
                return Self::empty();
            }
        };
        let mut manifest: Self = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = MANIFEST_PATH, error = %e, "corrupt derivation manifest");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest.content_index = build_content_index(&manifest.entries);
        manifest
    }

    /// Store through the sink.
    pub fn save(&self, sink: &dyn PublishSink) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        sink.write(MANIFEST_PATH, &json)
    }

    /// Look up a published artifact by fingerprint.
    ///
    /// Returns the stored path and its entry when the sink still holds the
    /// file at the recorded length. The path may differ from the one the
    /// caller is about to publish (e.g. after a source rename).
    pub fn find_cached(
        &self,
        fingerprint: &str,
        sink: &dyn PublishSink,
    ) -> Option<(&str, &ManifestEntry)> {
        let stored_path = self.content_index.get(fingerprint)?;
        let entry = self.entries.get(stored_path)?;
        (sink.size(stored_path) == Some(entry.byte_len)).then_some((stored_path.as_str(), entry))
    }

    /// Record a published artifact.
    ///
    /// An older entry with the same fingerprint under a different path is
    /// dropped, keeping the manifest clean when sources move.
    pub fn insert(&mut self, path: String, entry: ManifestEntry) {
        if let Some(old_path) = self.content_index.get(&entry.fingerprint)
            && *old_path != path
        {
            self.entries.remove(old_path.as_str());
        }
        self.content_index
            .insert(entry.fingerprint.clone(), path.clone());
        self.entries.insert(path, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_content_index(entries: &BTreeMap<String, ManifestEntry>) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(path, entry)| (entry.fingerprint.clone(), path.clone()))
        .collect()
}
