//! Dataset acquisition
//!
//! Streams the archive from a transport into a `.part` file next to the
//! destination, then classifies what landed on disk. Only a valid archive is
//! renamed over the destination; a broken transfer, an HTML page or unknown
//! bytes are errors and the partial file is removed.

use crate::digest::{ContentDigest, DigestBuilder};
use crate::error::{AcquireError, ClassifyError, ValidationFailure};
use crate::transport::ArchiveTransport;
use crate::validator::{ArtifactKind, ArtifactValidator, Classification};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A validated archive on local disk
#[derive(Debug, Clone, Serialize)]
pub struct DownloadArtifact {
    /// Where the archive was written
    pub path: PathBuf,
    /// Bytes received
    pub bytes_written: u64,
    /// Blake3 digest of the received bytes
    pub digest: ContentDigest,
    /// Validator verdict (always valid for a returned artifact)
    pub classification: Classification,
}

/// Fetches the dataset archive and refuses anything that is not one
pub struct DatasetAcquirer {
    transport: Arc<dyn ArchiveTransport>,
    validator: ArtifactValidator,
    expected_digest: Option<ContentDigest>,
}

impl std::fmt::Debug for DatasetAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetAcquirer")
            .field("expected_digest", &self.expected_digest)
            .finish_non_exhaustive()
    }
}

impl DatasetAcquirer {
    /// Create an acquirer over a transport
    #[must_use]
    pub fn new(transport: Arc<dyn ArchiveTransport>) -> Self {
        Self {
            transport,
            validator: ArtifactValidator::new(),
            expected_digest: None,
        }
    }

    /// Pin the digest a valid archive must have
    #[must_use]
    pub fn with_expected_digest(mut self, digest: Option<ContentDigest>) -> Self {
        self.expected_digest = digest;
        self
    }

    /// Fetch `source_url` into `dest`
    ///
    /// A valid archive replaces whatever was at `dest`. On any error `dest`
    /// is left as it was and the partial download is removed.
    ///
    /// # Errors
    /// - [`AcquireError::Transport`] if the transfer fails
    /// - [`AcquireError::Write`] if the destination cannot be written or read back
    /// - [`AcquireError::Validation`] if the bytes are not a valid archive
    pub async fn acquire(
        &self,
        source_url: &str,
        dest: impl AsRef<Path>,
    ) -> Result<DownloadArtifact, AcquireError> {
        let dest = dest.as_ref();
        tracing::info!(url = source_url, dest = %dest.display(), "acquiring dataset archive");

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AcquireError::write(parent, e))?;
        }

        let partial = partial_path(dest);
        let fetched = match self.fetch(source_url, &partial, dest).await {
            Ok(fetched) => fetched,
            Err(err) => {
                discard(&partial).await;
                return Err(err);
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, dest).await {
            discard(&partial).await;
            return Err(AcquireError::write(dest, e));
        }
        let (bytes_written, digest, classification) = fetched;

        tracing::info!(
            dest = %dest.display(),
            bytes = bytes_written,
            digest = %digest.short(),
            "dataset archive validated"
        );

        Ok(DownloadArtifact {
            path: dest.to_path_buf(),
            bytes_written,
            digest,
            classification,
        })
    }

    /// Check an archive already on disk
    ///
    /// Returns `None` when `dest` is absent, not a valid archive, or does not
    /// match the pinned digest; the caller should fetch again in that case.
    ///
    /// # Errors
    /// Returns [`AcquireError::Write`] if an existing file cannot be read
    pub async fn existing(
        &self,
        dest: impl AsRef<Path>,
    ) -> Result<Option<DownloadArtifact>, AcquireError> {
        let dest = dest.as_ref();
        if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Ok(None);
        }

        let classification = match self.validator.classify_file(dest).await {
            Ok(classification) if classification.is_valid() => classification,
            Ok(_) | Err(ClassifyError::Truncated { .. }) => return Ok(None),
            Err(ClassifyError::Io { source, .. }) => return Err(AcquireError::write(dest, source)),
        };

        let mut file = tokio::fs::File::open(dest)
            .await
            .map_err(|e| AcquireError::write(dest, e))?;
        let mut digest = DigestBuilder::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await.map_err(|e| AcquireError::write(dest, e))?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
        }
        let bytes_written = digest.len();
        let digest = digest.finish();

        if self.expected_digest.is_some_and(|expected| expected != digest) {
            tracing::info!(dest = %dest.display(), "existing archive does not match pinned digest");
            return Ok(None);
        }

        Ok(Some(DownloadArtifact {
            path: dest.to_path_buf(),
            bytes_written,
            digest,
            classification,
        }))
    }

    /// Download into `partial` and accept it only as a valid archive
    ///
    /// Errors name `dest`, the path the caller asked for.
    async fn fetch(
        &self,
        source_url: &str,
        partial: &Path,
        dest: &Path,
    ) -> Result<(u64, ContentDigest, Classification), AcquireError> {
        let digest = self.transfer(source_url, partial).await?;
        let bytes_written = digest.len();
        let digest = digest.finish();

        let classification = match self.validator.classify_file(partial).await {
            Ok(classification) => classification,
            Err(ClassifyError::Truncated { len }) => {
                return Err(self.reject(dest, ValidationFailure::Truncated { len }));
            }
            Err(ClassifyError::Io { source, .. }) => return Err(AcquireError::write(dest, source)),
        };

        match classification.kind {
            ArtifactKind::Valid => {}
            ArtifactKind::DeceptiveHtml => {
                let preview = classification.preview.unwrap_or_default();
                return Err(self.reject(dest, ValidationFailure::DeceptiveHtml { preview }));
            }
            ArtifactKind::Unrecognized => {
                let preview = classification.preview.unwrap_or_default();
                return Err(self.reject(dest, ValidationFailure::Unrecognized { preview }));
            }
        }

        if let Some(expected) = self.expected_digest {
            if expected != digest {
                return Err(self.reject(
                    dest,
                    ValidationFailure::DigestMismatch {
                        expected,
                        actual: digest,
                    },
                ));
            }
        }

        Ok((bytes_written, digest, classification))
    }

    /// Stream the body into a truncated file
    async fn transfer(&self, source_url: &str, path: &Path) -> Result<DigestBuilder, AcquireError> {
        let mut source = self.transport.open(source_url).await?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| AcquireError::write(path, e))?;

        let mut digest = DigestBuilder::new();
        while let Some(chunk) = source.next_chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| AcquireError::write(path, e))?;
            digest.update(&chunk);
        }

        file.flush().await.map_err(|e| AcquireError::write(path, e))?;
        file.sync_all().await.map_err(|e| AcquireError::write(path, e))?;

        tracing::debug!(path = %path.display(), bytes = digest.len(), "transfer complete");
        Ok(digest)
    }

    fn reject(&self, dest: &Path, failure: ValidationFailure) -> AcquireError {
        tracing::warn!(dest = %dest.display(), %failure, "downloaded artifact rejected");
        AcquireError::Validation {
            path: dest.to_path_buf(),
            failure,
        }
    }
}

/// Sibling file a download lands in before it is accepted
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn discard(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %partial.display(), error = %e, "could not remove partial download");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AcquireErrorKind, TransportError};
    use crate::transport::{ByteSource, MockArchiveTransport};
    use bytes::Bytes;

    const SPLIT_ARCHIVE: &[&[u8]] = &[b"PK\x03\x04", b"payload"];
    const WHOLE_ARCHIVE: &[&[u8]] = &[b"PK\x03\x04payload"];
    const INTERSTITIAL: &[&[u8]] = &[b"<!DOCTYPE html><html>confirm</html>"];

    struct Chunks(Vec<Bytes>);

    #[async_trait::async_trait]
    impl ByteSource for Chunks {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    fn serving(chunks: &'static [&'static [u8]]) -> Arc<dyn ArchiveTransport> {
        let mut transport = MockArchiveTransport::new();
        transport.expect_open().returning(move |_| {
            let body = Chunks(chunks.iter().copied().map(Bytes::from_static).collect());
            Ok(Box::new(body) as Box<dyn ByteSource>)
        });
        Arc::new(transport)
    }

    #[tokio::test]
    async fn valid_archive_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data").join("planetlab.zip");
        let acquirer = DatasetAcquirer::new(serving(SPLIT_ARCHIVE));

        let artifact = acquirer.acquire("https://example.org/a.zip", &dest).await.unwrap();
        assert_eq!(artifact.bytes_written, 11);
        assert_eq!(artifact.digest, ContentDigest::compute(b"PK\x03\x04payload"));
        assert!(artifact.classification.is_valid());
    }

    #[tokio::test]
    async fn html_page_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("planetlab.zip");
        let acquirer = DatasetAcquirer::new(serving(INTERSTITIAL));

        let err = acquirer.acquire("https://example.org/a.zip", &dest).await.unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::Validation);
        assert!(matches!(
            err.validation_failure(),
            Some(ValidationFailure::DeceptiveHtml { .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockArchiveTransport::new();
        transport.expect_open().returning(|url| {
            Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
        });
        let acquirer = DatasetAcquirer::new(Arc::new(transport));

        let err = acquirer
            .acquire("https://example.org/a.zip", dir.path().join("a.zip"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::Transport);
    }

    struct BreaksAfter(Option<Bytes>);

    #[async_trait::async_trait]
    impl ByteSource for BreaksAfter {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            match self.0.take() {
                Some(chunk) => Ok(Some(chunk)),
                None => Err(TransportError::Body {
                    url: "https://example.org/a.zip".to_string(),
                    message: "connection reset".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn broken_body_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.zip");
        let mut transport = MockArchiveTransport::new();
        transport.expect_open().returning(|_| {
            let body = BreaksAfter(Some(Bytes::from_static(b"PK\x03\x04partial")));
            Ok(Box::new(body) as Box<dyn ByteSource>)
        });
        let acquirer = DatasetAcquirer::new(Arc::new(transport));

        let err = acquirer.acquire("https://example.org/a.zip", &dest).await.unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::Transport);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
        assert!(acquirer.existing(&dest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_download_keeps_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.zip");
        std::fs::write(&dest, b"PK\x03\x04previous").unwrap();

        let err = DatasetAcquirer::new(serving(INTERSTITIAL))
            .acquire("https://example.org/a.zip", &dest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::Validation);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK\x03\x04previous");
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn partial_path_is_a_sibling() {
        let partial = partial_path(Path::new("data/planetlab.zip"));
        assert_eq!(partial, PathBuf::from("data/planetlab.zip.part"));
    }

    #[tokio::test]
    async fn existing_archive_is_reused_only_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.zip");
        let acquirer = DatasetAcquirer::new(Arc::new(MockArchiveTransport::new()));

        assert!(acquirer.existing(&dest).await.unwrap().is_none());

        std::fs::write(&dest, b"<html>oops</html>").unwrap();
        assert!(acquirer.existing(&dest).await.unwrap().is_none());

        std::fs::write(&dest, b"PK\x03\x04payload").unwrap();
        let artifact = acquirer.existing(&dest).await.unwrap().unwrap();
        assert_eq!(artifact.bytes_written, 11);

        let pinned = DatasetAcquirer::new(Arc::new(MockArchiveTransport::new()))
            .with_expected_digest(Some(ContentDigest::compute(b"other")));
        assert!(pinned.existing(&dest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pinned_digest_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = DatasetAcquirer::new(serving(WHOLE_ARCHIVE))
            .with_expected_digest(Some(ContentDigest::compute(b"something else")));

        let err = acquirer
            .acquire("https://example.org/a.zip", dir.path().join("a.zip"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.validation_failure(),
            Some(ValidationFailure::DigestMismatch { .. })
        ));
    }
}
