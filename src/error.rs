//! Error taxonomy for image derivation.
//!
//! Every failure a caller can observe is one of five kinds. Errors are
//! `Clone` because a single failed computation is handed to every waiter
//! of the same fingerprint, not just the caller that ran it.
//!
//! | Kind | Raised by | Retried? |
//! |---|---|---|
//! | [`InvalidSpec`](ImageError::InvalidSpec) | option parser | never |
//! | [`UnsupportedFormat`](ImageError::UnsupportedFormat) | media registry, codecs | never |
//! | [`CyclicDerivation`](ImageError::CyclicDerivation) | single-flight guard | never |
//! | [`ComputationFailed`](ImageError::ComputationFailed) | transform pipeline | not within a session |
//! | [`PublishFailed`](ImageError::PublishFailed) | publish sink | on the next request |

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("cyclic derivation: {0} depends on its own computation")]
    CyclicDerivation(String),
    #[error("failed to compute {target}: {message}")]
    ComputationFailed { target: String, message: String },
    #[error("failed to publish {path}: {message}")]
    PublishFailed { path: String, message: String },
}

impl ImageError {
    pub(crate) fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn computation(target: &str, message: impl ToString) -> Self {
        Self::ComputationFailed {
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn publish(path: &str, err: impl ToString) -> Self {
        Self::PublishFailed {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
