//! Byte-level archive validation
//!
//! A link-sharing host that cannot serve the payload directly usually answers
//! with HTTP 200 and an HTML interstitial page. The transfer "succeeds", so the
//! only reliable detector is inspecting the leading bytes of what landed on
//! disk:
//! - the ZIP local-header prefix `PK` at offset 0 marks a real archive
//! - `<html` or `<!DOCTYPE` in the first 200 bytes marks a disguised page,
//!   whatever the first two bytes are

use crate::error::ClassifyError;
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Leading bytes of the expected container format
pub const ARCHIVE_MAGIC: [u8; 2] = [0x50, 0x4B];

/// Shortest artifact that can be classified at all
pub const MIN_ARTIFACT_LEN: usize = 4;

/// Number of leading bytes inspected for HTML markers and kept as preview
pub const PREVIEW_LEN: usize = 200;

const HTML_MARKERS: [&str; 2] = ["<html", "<!DOCTYPE"];

/// Verdict for a downloaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    /// Archive signature present, no HTML markers
    Valid,
    /// An HTML page served in place of the archive
    DeceptiveHtml,
    /// Neither an archive nor a recognisable error page
    Unrecognized,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Valid => "valid archive",
            Self::DeceptiveHtml => "html page disguised as archive",
            Self::Unrecognized => "unrecognized content",
        };
        f.write_str(label)
    }
}

/// Classification result with a diagnostic preview for rejected artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// The verdict
    pub kind: ArtifactKind,
    /// Lossy text of the first [`PREVIEW_LEN`] bytes, only kept when not valid
    pub preview: Option<String>,
}

impl Classification {
    /// Whether the artifact may be handed to decompression
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.kind == ArtifactKind::Valid
    }
}

/// Classifies downloaded bytes. Reads only; never moves or deletes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactValidator;

impl ArtifactValidator {
    /// Create a validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify an in-memory buffer
    ///
    /// # Errors
    /// Returns [`ClassifyError::Truncated`] when fewer than
    /// [`MIN_ARTIFACT_LEN`] bytes are available.
    pub fn classify(&self, bytes: &[u8]) -> Result<Classification, ClassifyError> {
        if bytes.len() < MIN_ARTIFACT_LEN {
            return Err(ClassifyError::Truncated { len: bytes.len() });
        }

        let head = &bytes[..bytes.len().min(PREVIEW_LEN)];
        let text = String::from_utf8_lossy(head);

        if HTML_MARKERS.iter().any(|marker| text.contains(marker)) {
            return Ok(Classification {
                kind: ArtifactKind::DeceptiveHtml,
                preview: Some(text.into_owned()),
            });
        }

        if head.starts_with(&ARCHIVE_MAGIC) {
            Ok(Classification {
                kind: ArtifactKind::Valid,
                preview: None,
            })
        } else {
            Ok(Classification {
                kind: ArtifactKind::Unrecognized,
                preview: Some(text.into_owned()),
            })
        }
    }

    /// Classify a file on disk by its leading bytes
    ///
    /// # Errors
    /// - [`ClassifyError::Io`] if the file cannot be opened or read
    /// - [`ClassifyError::Truncated`] if it holds fewer than
    ///   [`MIN_ARTIFACT_LEN`] bytes
    pub async fn classify_file(&self, path: impl AsRef<Path>) -> Result<Classification, ClassifyError> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ClassifyError::io(path, e))?;

        let mut head = vec![0u8; PREVIEW_LEN];
        let mut filled = 0;
        while filled < PREVIEW_LEN {
            let read = file
                .read(&mut head[filled..])
                .await
                .map_err(|e| ClassifyError::io(path, e))?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        head.truncate(filled);

        self.classify(&head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const INTERSTITIAL: &[u8] = b"<!DOCTYPE html><html><head><title>Google Drive - Virus scan warning</title>";

    #[test]
    fn zip_header_is_valid() {
        let mut bytes = vec![0x50, 0x4B, 0x03, 0x04];
        bytes.extend_from_slice(&[0u8; 400]);
        let verdict = ArtifactValidator::new().classify(&bytes).unwrap();
        assert_eq!(verdict.kind, ArtifactKind::Valid);
        assert!(verdict.preview.is_none());
        assert!(verdict.is_valid());
    }

    #[test]
    fn interstitial_page_is_deceptive() {
        let verdict = ArtifactValidator::new().classify(INTERSTITIAL).unwrap();
        assert_eq!(verdict.kind, ArtifactKind::DeceptiveHtml);
        assert!(verdict.preview.unwrap().contains("Virus scan warning"));
    }

    #[test]
    fn html_marker_wins_over_magic() {
        let bytes = b"PK<html><body>quota exceeded</body></html>";
        let verdict = ArtifactValidator::new().classify(bytes).unwrap();
        assert_eq!(verdict.kind, ArtifactKind::DeceptiveHtml);
    }

    #[test]
    fn markers_are_case_sensitive() {
        let verdict = ArtifactValidator::new().classify(b"<HTML><BODY>").unwrap();
        assert_eq!(verdict.kind, ArtifactKind::Unrecognized);
    }

    #[test]
    fn markers_past_preview_window_are_ignored() {
        let mut bytes = vec![0x50, 0x4B, 0x03, 0x04];
        bytes.extend(std::iter::repeat(b'x').take(PREVIEW_LEN));
        bytes.extend_from_slice(b"<html>");
        let verdict = ArtifactValidator::new().classify(&bytes).unwrap();
        assert_eq!(verdict.kind, ArtifactKind::Valid);
    }

    #[test]
    fn gzip_is_unrecognized_with_preview() {
        let bytes = [0x1F, 0x8B, 0x08, 0x00, b'a', b'b'];
        let verdict = ArtifactValidator::new().classify(&bytes).unwrap();
        assert_eq!(verdict.kind, ArtifactKind::Unrecognized);
        assert!(verdict.preview.is_some());
    }

    #[test]
    fn short_buffer_is_truncated() {
        let err = ArtifactValidator::new().classify(b"PK\x03").unwrap_err();
        assert!(matches!(err, ClassifyError::Truncated { len: 3 }));
    }

    #[tokio::test]
    async fn classify_file_reads_leading_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planetlab.zip");
        tokio::fs::write(&path, INTERSTITIAL).await.unwrap();

        let verdict = ArtifactValidator::new().classify_file(&path).await.unwrap();
        assert_eq!(verdict.kind, ArtifactKind::DeceptiveHtml);
        assert!(path.exists(), "classification must not remove the file");
    }

    #[tokio::test]
    async fn classify_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.zip");
        let err = ArtifactValidator::new().classify_file(&absent).await.unwrap_err();
        match err {
            ClassifyError::Io { path, source } => {
                assert_eq!(path, absent);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_magic_without_markers_is_valid(tail in proptest::collection::vec(0u8..0x3C, 2..512)) {
            // bytes below '<' can never form an HTML marker
            let mut bytes = ARCHIVE_MAGIC.to_vec();
            bytes.extend(tail);
            let verdict = ArtifactValidator::new().classify(&bytes).unwrap();
            prop_assert_eq!(verdict.kind, ArtifactKind::Valid);
        }

        #[test]
        fn prop_html_marker_always_deceptive(
            prefix in proptest::collection::vec(any::<u8>(), 0..100),
            use_doctype in any::<bool>(),
        ) {
            let mut bytes = prefix;
            let marker: &[u8] = if use_doctype { b"<!DOCTYPE" } else { b"<html" };
            bytes.extend_from_slice(marker);
            let verdict = ArtifactValidator::new().classify(&bytes).unwrap();
            prop_assert_eq!(verdict.kind, ArtifactKind::DeceptiveHtml);
        }

        #[test]
        fn prop_short_buffers_truncated(bytes in proptest::collection::vec(any::<u8>(), 0..MIN_ARTIFACT_LEN)) {
            let is_truncated = matches!(
                ArtifactValidator::new().classify(&bytes),
                Err(ClassifyError::Truncated { .. })
            );
            prop_assert!(is_truncated);
        }
    }
}
