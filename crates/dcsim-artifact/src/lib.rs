//! DCSim Artifact
//!
//! Acquisition and byte-level validation of the workload trace archive.
//!
//! # Core Concepts
//!
//! - [`ArtifactValidator`]: classifies bytes as a valid archive, a disguised
//!   HTML page or unrecognised content
//! - [`DatasetAcquirer`]: streams the archive to disk and refuses to report
//!   success unless the validator accepts it
//! - [`ArchiveTransport`]: the network collaborator; [`HttpTransport`] in production
//! - [`ContentDigest`]: Blake3 digest of the fetched archive
//!
//! # Example
//!
//! ```rust,ignore
//! use dcsim_artifact::{DatasetAcquirer, HttpTransport};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(300))?);
//! let artifact = DatasetAcquirer::new(transport)
//!     .acquire("https://example.org/planetlab.zip", "data/planetlab.zip")
//!     .await?;
//! println!("archive digest: {}", artifact.digest);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod acquire;
mod digest;
mod error;
mod transport;
mod validator;

pub use acquire::{DatasetAcquirer, DownloadArtifact};
pub use digest::{ContentDigest, DigestBuilder, DigestError};
pub use error::{AcquireError, AcquireErrorKind, ClassifyError, TransportError, ValidationFailure};
pub use transport::{ArchiveTransport, ByteSource, HttpTransport};
pub use validator::{
    ArtifactKind, ArtifactValidator, Classification, ARCHIVE_MAGIC, MIN_ARTIFACT_LEN, PREVIEW_LEN,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
