//! Outbound delivery to the downstream build trigger endpoint.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use hook_relay_core::ForwardedHeaders;
use tracing::{debug, instrument};
use url::Url;

/// Response headers that describe the downstream connection rather than the
/// content. The server frames the relayed body itself.
const CONNECTION_HEADERS: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::HeaderName::from_static("keep-alive"),
];

/// One delivery to relay.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Path segment identifying the downstream pipeline
    pub target: String,
    pub headers: ForwardedHeaders,
    pub body: Bytes,
}

/// What the downstream answered, relayed to the original caller.
#[derive(Debug, Clone)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Failures reaching the downstream; any HTTP response is not a failure.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid downstream URL for target '{target}': {message}")]
    InvalidTarget { target: String, message: String },
}

/// Interface for relaying deliveries downstream
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<DownstreamResponse, ForwardError>;
}

/// Forwards deliveries over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpForwarder {
    /// Create a forwarder for `{base_url}/deliver/{target}`.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Downstream URL for a delivery target.
    ///
    /// The target is appended as a single, percent-encoded path segment.
    pub fn delivery_url(&self, target: &str) -> Result<Url, ForwardError> {
        let invalid = |message: String| ForwardError::InvalidTarget {
            target: target.to_string(),
            message,
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("deliver")
            .push(target);
        Ok(url)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    #[instrument(skip(self, request), fields(target = %request.target, body_len = request.body.len()))]
    async fn forward(&self, request: ForwardRequest) -> Result<DownstreamResponse, ForwardError> {
        let url = self.delivery_url(&request.target)?;

        let mut outbound = self.client.post(url);
        for (name, value) in request.headers.iter() {
            outbound = outbound.header(name, value);
        }

        let response = outbound.body(request.body).send().await?;
        let status = response.status();

        let mut headers = response.headers().clone();
        for name in &CONNECTION_HEADERS {
            headers.remove(name);
        }
        let body = response.bytes().await?;

        debug!(status = status.as_u16(), body_len = body.len(), "Downstream responded");
        Ok(DownstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
#[path = "forwarder_tests.rs"]
mod tests;
