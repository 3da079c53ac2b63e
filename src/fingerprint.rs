//! Content-addressed identity for sources and derived images.
//!
//! Three values are derived here, all pure and deterministic across runs,
//! processes, and platforms:
//!
//! - **Signature**: SHA-256 of a source's bytes, hex encoded. Shared by
//!   every derivation of that source.
//! - **Fingerprint**: SHA-256 over the signature, the action of the last
//!   step, and the canonical form of every step in the chain. This is the
//!   cache key.
//! - **Derived path**: the published file name,
//!   `<dir>/<stem>_<sig prefix>_<source length>_<key>.<ext>`.
//!
//! ## Key hashing
//!
//! A single step whose option key is at most [`KEY_HASH_THRESHOLD`] bytes
//! keeps the key in clear text (`300x200_resize_q75_box`). A longer key, or
//! any nested chain, is replaced by the first 32 hex chars of SHA-256 over
//! the whole canonical chain. A fit of a fit therefore never collides with
//! a single fit to the same final size.

use crate::media::split_path;
use crate::options::{Action, TransformOptions};
use sha2::{Digest, Sha256};

/// Hex chars of the source signature embedded in derived file names.
pub const SIGNATURE_PREFIX: usize = 32;

/// Longest option key kept in clear text.
pub const KEY_HASH_THRESHOLD: usize = 64;

/// Longest source stem kept in derived file names, in chars.
pub const MAX_STEM: usize = 64;

/// Separates chain steps in hash input; never produced by a key.
const STEP_SEPARATOR: &str = "/";

fn hex_sha256(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of source bytes, lower-case hex.
pub fn signature(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// The derivation steps from a source to one derived image, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lineage {
    steps: Vec<String>,
    action: Action,
    key: String,
    ext: &'static str,
}

impl Lineage {
    /// A first-generation derivation.
    pub fn root(options: &TransformOptions) -> Self {
        Self {
            steps: vec![options.canonical()],
            action: options.action,
            key: options.key(),
            ext: options.format.default_extension(),
        }
    }

    /// The lineage of a derivation of an image with this lineage.
    pub fn then(&self, options: &TransformOptions) -> Self {
        let mut steps = self.steps.clone();
        steps.push(options.canonical());
        Self {
            steps,
            action: options.action,
            key: options.key(),
            ext: options.format.default_extension(),
        }
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Canonical steps joined into one string.
    pub fn canonical(&self) -> String {
        self.steps.join(STEP_SEPARATOR)
    }

    /// The key shown in the file name.
    pub fn file_key(&self) -> String {
        if self.steps.len() == 1 && self.key.len() <= KEY_HASH_THRESHOLD {
            return self.key.clone();
        }
        let mut digest = hex_sha256(&[self.canonical().as_bytes()]);
        digest.truncate(32);
        digest
    }

    /// Cache key for this lineage applied to the source with `signature`.
    pub fn fingerprint(&self, signature: &str) -> String {
        hex_sha256(&[
            signature.as_bytes(),
            self.action.as_str().as_bytes(),
            self.canonical().as_bytes(),
        ])
    }

    /// Published path of the derived file.
    ///
    /// ```
    /// # use image_derive::fingerprint::{Lineage, signature};
    /// # use image_derive::options::{Action, OptionDefaults, TransformOptions};
    /// # use image_derive::media::Format;
    /// let opts = TransformOptions::parse("300x200", Some(Action::Resize),
    ///     &OptionDefaults::default(), Format::Jpeg).unwrap();
    /// let sig = signature(b"pixels");
    /// let path = Lineage::root(&opts).derived_path("a/sunset.jpg", &sig, 6);
    /// assert!(path.starts_with("a/sunset_"));
    /// assert!(path.ends_with("_6_300x200_resize_q75_box.jpg"));
    /// ```
    pub fn derived_path(&self, source_path: &str, signature: &str, source_len: u64) -> String {
        let (dir, stem, _) = split_path(source_path);
        let stem: String = stem.chars().take(MAX_STEM).collect();
        let sig = &signature[..SIGNATURE_PREFIX.min(signature.len())];
        let file = format!(
            "{stem}_{sig}_{source_len}_{}.{}",
            self.file_key(),
            self.ext
        );
        if dir.is_empty() {
            file
        } else {
            format!("{dir}/{file}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Filter;
    use crate::media::Format;
    use crate::options::OptionDefaults;

    fn opts(spec: &str, action: Action) -> TransformOptions {
        TransformOptions::parse(spec, Some(action), &OptionDefaults::default(), Format::Jpeg)
            .unwrap()
    }

    fn sig() -> String {
        signature(b"sunset bytes")
    }

    // =========================================================================
    // Signature
    // =========================================================================

    #[test]
    fn signature_is_sha256_hex() {
        let s = signature(b"hello world");
        assert_eq!(
            s,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_ne!(signature(b"version 1"), signature(b"version 2"));
    }

    // =========================================================================
    // Fingerprint
    // =========================================================================

    #[test]
    fn equal_options_equal_fingerprint() {
        let a = Lineage::root(&opts("300x200 q80 topLeft", Action::Fill));
        let b = Lineage::root(&opts("topleft Q80 300X200", Action::Fill));
        assert_eq!(a.fingerprint(&sig()), b.fingerprint(&sig()));
    }

    #[test]
    fn any_difference_changes_fingerprint() {
        let base = Lineage::root(&opts("300x200", Action::Fill)).fingerprint(&sig());
        for (spec, action) in [
            ("300x201", Action::Fill),
            ("300x200", Action::Crop),
            ("300x200 q76", Action::Fill),
            ("300x200 png", Action::Fill),
            ("300x200 r90", Action::Fill),
            ("300x200 lanczos", Action::Fill),
            ("300x200 top", Action::Fill),
            ("300x200 #000", Action::Fill),
        ] {
            let other = Lineage::root(&opts(spec, action)).fingerprint(&sig());
            assert_ne!(base, other, "{spec} {action:?}");
        }
        let other_source = Lineage::root(&opts("300x200", Action::Fill)).fingerprint(&signature(b"x"));
        assert_ne!(base, other_source);
    }

    #[test]
    fn fit_of_fit_differs_from_direct_fit() {
        let direct = Lineage::root(&opts("10x20", Action::Fit));
        let nested = Lineage::root(&opts("50x50", Action::Fit)).then(&opts("10x20", Action::Fit));
        assert_ne!(direct.fingerprint(&sig()), nested.fingerprint(&sig()));
        assert_ne!(
            direct.derived_path("sunset.jpg", &sig(), 90587),
            nested.derived_path("sunset.jpg", &sig(), 90587)
        );
    }

    // =========================================================================
    // Derived paths
    // =========================================================================

    #[test]
    fn single_step_path_layout() {
        let path = Lineage::root(&opts("300x200", Action::Resize)).derived_path(
            "a/sunset.jpg",
            &sig(),
            90587,
        );
        assert_eq!(
            path,
            format!("a/sunset_{}_90587_300x200_resize_q75_box.jpg", &sig()[..32])
        );
    }

    #[test]
    fn conversion_changes_extension() {
        let path = Lineage::root(&opts("450x png", Action::Resize)).derived_path(
            "sunset.jpg",
            &sig(),
            90587,
        );
        assert!(path.ends_with("_90587_450x0_resize_box.png"), "{path}");
    }

    #[test]
    fn nested_chain_key_is_hashed() {
        let nested = Lineage::root(&opts("50x50", Action::Fit)).then(&opts("10x20", Action::Fit));
        let key = nested.file_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(nested.depth(), 2);
    }

    #[test]
    fn long_key_is_hashed() {
        let chain = TransformOptions::filter_chain(
            vec![
                Filter::GaussianBlur { sigma: 6.0 },
                Filter::UnsharpMask {
                    sigma: 1.5,
                    threshold: 4,
                },
                Filter::Brightness(30),
                Filter::Contrast(-12.5),
                Filter::Hue(90),
            ],
            &OptionDefaults::default(),
            Format::Jpeg,
        );
        assert!(chain.key().len() > KEY_HASH_THRESHOLD);
        assert_eq!(Lineage::root(&chain).file_key().len(), 32);

        let short = TransformOptions::filter_chain(
            vec![Filter::Grayscale],
            &OptionDefaults::default(),
            Format::Jpeg,
        );
        assert_eq!(Lineage::root(&short).file_key(), short.key());
    }

    #[test]
    fn long_stem_is_truncated() {
        let name = format!("{}.jpg", "a".repeat(200));
        let path = Lineage::root(&opts("10x", Action::Resize)).derived_path(&name, &sig(), 1);
        assert!(path.starts_with(&format!("{}_", "a".repeat(MAX_STEM))));
        assert!(!path.starts_with(&"a".repeat(MAX_STEM + 1)));
    }

    #[test]
    fn paths_are_deterministic() {
        let a = Lineage::root(&opts("300x200 smart", Action::Fill));
        let b = Lineage::root(&opts("300x200 smart", Action::Fill));
        assert_eq!(
            a.derived_path("x/y.png", &sig(), 3),
            b.derived_path("x/y.png", &sig(), 3)
        );
    }
}
