//! GitHub meta endpoint: published source address ranges.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{http_error, parse_json, GitHubAppClient};
use crate::error::ApiError;

/// Subset of `GET /meta` used to authorize webhook traffic.
///
/// Entries are kept as published (CIDR blocks or bare addresses); parsing is
/// left to the caller so one malformed entry cannot discard the whole list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubMeta {
    /// Addresses GitHub delivers webhooks from.
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Addresses of GitHub Actions runners.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl GitHubMeta {
    /// All published ranges: `hooks` followed by `actions`.
    pub fn source_ranges(&self) -> Vec<String> {
        self.hooks
            .iter()
            .chain(self.actions.iter())
            .cloned()
            .collect()
    }
}

impl GitHubAppClient {
    /// Fetch GitHub's published address ranges.
    ///
    /// The meta endpoint is public; no assertion or token is sent.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::HttpError` on non-success responses and
    /// `ApiError::HttpClientError` / `ApiError::JsonError` for transport and
    /// decoding failures.
    #[instrument(skip(self))]
    pub async fn fetch_meta(&self) -> Result<GitHubMeta, ApiError> {
        let response = self.request(Method::GET, &["meta"]).send().await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let meta: GitHubMeta = parse_json(response).await?;
        info!(
            hooks = meta.hooks.len(),
            actions = meta.actions.len(),
            "Fetched GitHub source ranges"
        );
        Ok(meta)
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
