//! Error types for dataset acquisition
//!
//! Acquisition failures fall into three families with different remediation:
//! - transport: the bytes never arrived (retry the transfer)
//! - write: the bytes could not be stored (fix the disk)
//! - validation: the bytes arrived but are not the archive (fix the source URL)

use crate::digest::ContentDigest;
use std::path::{Path, PathBuf};

/// Errors raised while classifying an artifact
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Fewer bytes than the signature needs
    #[error("artifact truncated: {len} bytes, need at least {min}", min = crate::validator::MIN_ARTIFACT_LEN)]
    Truncated { len: usize },

    /// The artifact could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClassifyError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why fetched bytes were rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    /// An HTML page (typically a confirmation interstitial) instead of the archive
    #[error("received an html page instead of the archive: {preview:?}")]
    DeceptiveHtml { preview: String },

    /// Content without the archive signature
    #[error("content is not a recognised archive: {preview:?}")]
    Unrecognized { preview: String },

    /// Too short to carry a signature
    #[error("artifact truncated at {len} bytes")]
    Truncated { len: usize },

    /// Archive signature present but the digest differs from the pinned one
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        expected: ContentDigest,
        actual: ContentDigest,
    },
}

/// Errors raised by the network collaborator
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP client could not be constructed
    #[error("http client setup failed: {0}")]
    Client(String),

    /// Connection, DNS or timeout failure
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Server answered with a non-success status
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Body stream broke mid-transfer
    #[error("reading body from {url} failed: {message}")]
    Body { url: String, message: String },
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquireErrorKind {
    /// Retry the transfer
    Transport,
    /// Fix local storage
    Write,
    /// Fix the source
    Validation,
}

/// Dataset acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// Network collaborator failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Destination could not be written or read back
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transfer completed but the content is not the archive
    #[error("validation failed for {path}: {failure}")]
    Validation {
        path: PathBuf,
        #[source]
        failure: ValidationFailure,
    },
}

impl AcquireError {
    /// Create write error for path
    pub fn write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Kind of failure, for choosing a remediation
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AcquireErrorKind {
        match self {
            Self::Transport(_) => AcquireErrorKind::Transport,
            Self::Write { .. } => AcquireErrorKind::Write,
            Self::Validation { .. } => AcquireErrorKind::Validation,
        }
    }

    /// Validation failure details, if this is one
    #[inline]
    #[must_use]
    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            Self::Validation { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
