//! Network collaborator for archive transfer
//!
//! The acquirer never talks HTTP itself; it pulls chunks from an
//! [`ArchiveTransport`]. [`HttpTransport`] is the production implementation.

use crate::error::TransportError;
use bytes::Bytes;
use std::time::Duration;

/// Opens a byte stream for a source URL
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Start the transfer and return the body as a chunk source
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, TransportError>;
}

/// Pull-based body stream
#[async_trait::async_trait]
pub trait ByteSource: Send {
    /// Next chunk, or `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// `reqwest`-backed transport. Follows redirects, rejects non-2xx statuses.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with an overall request timeout
    ///
    /// # Errors
    /// Returns [`TransportError::Client`] if the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dcsim-precalc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ArchiveTransport for HttpTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, TransportError> {
        tracing::debug!(url, "opening archive transfer");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            tracing::debug!(url, content_length = len, "archive transfer started");
        }

        Ok(Box::new(ResponseSource {
            url: url.to_string(),
            response,
        }))
    }
}

struct ResponseSource {
    url: String,
    response: reqwest::Response,
}

#[async_trait::async_trait]
impl ByteSource for ResponseSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.response
            .chunk()
            .await
            .map_err(|e| TransportError::Body {
                url: self.url.clone(),
                message: e.to_string(),
            })
    }
}
