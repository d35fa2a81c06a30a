//! Installation-scoped lookups: user emails and repository default branches.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::{
    http_error, noreply_address, parse_json, repository_key, GitHubAppClient,
    InstallationLookups, BOT_SUFFIX, DEFAULT_BRANCH_FALLBACK,
};
use crate::auth::{InstallationId, InstallationToken};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    #[serde(default)]
    default_branch: Option<String>,
}

/// Installation-scoped GitHub client.
///
/// Holds at most one installation access token, exchanged on the first cache
/// miss and shared by every lookup made through this handle (and its clones).
/// Cache hits never trigger an exchange.
#[derive(Debug, Clone)]
pub struct InstallationClient {
    client: GitHubAppClient,
    installation_id: InstallationId,
    token: Arc<OnceCell<InstallationToken>>,
}

impl InstallationClient {
    pub(crate) fn new(client: GitHubAppClient, installation_id: InstallationId) -> Self {
        Self {
            client,
            installation_id,
            token: Arc::new(OnceCell::new()),
        }
    }

    /// Installation this client is scoped to.
    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// Public email of `username`.
    ///
    /// Bot accounts (login ending in `[bot]`) get their no-reply address
    /// without a network call. Otherwise the result of `GET /users/{username}`
    /// is cached, including `None` when the user publishes no email.
    ///
    /// # Errors
    ///
    /// Token exchange failures, non-success responses and transport errors
    /// are returned and nothing is cached.
    #[instrument(skip(self), fields(installation_id = %self.installation_id))]
    pub async fn fetch_user_email(&self, username: &str) -> Result<Option<String>, ApiError> {
        self.client
            .emails()
            .get_or_try_refresh(username.to_string(), || async move {
                if username.ends_with(BOT_SUFFIX) {
                    debug!(username, "Using no-reply address for bot account");
                    return Ok(Some(noreply_address(username)));
                }

                let token = self.access_token().await?;
                let response = self
                    .client
                    .request(Method::GET, &["users", username])
                    .bearer_auth(token.token())
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let error = http_error(response).await;
                    warn!(username, error = %error, "User lookup failed");
                    return Err(error);
                }

                let user: UserResponse = parse_json(response).await?;
                Ok(user.email)
            })
            .await
    }

    /// Default branch of `owner/repo`.
    ///
    /// A successful response without a `default_branch` field caches `main`.
    ///
    /// # Errors
    ///
    /// Token exchange failures, non-success responses and transport errors
    /// are returned and nothing is cached.
    #[instrument(skip(self), fields(installation_id = %self.installation_id))]
    pub async fn fetch_default_branch(&self, owner: &str, repo: &str) -> Result<String, ApiError> {
        self.client
            .branches()
            .get_or_try_refresh(repository_key(owner, repo), || async move {
                let token = self.access_token().await?;
                let response = self
                    .client
                    .request(Method::GET, &["repos", owner, repo])
                    .bearer_auth(token.token())
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let error = http_error(response).await;
                    warn!(
                        repository = %repository_key(owner, repo),
                        error = %error,
                        "Repository lookup failed"
                    );
                    return Err(error);
                }

                let repository: RepositoryResponse = parse_json(response).await?;
                Ok(repository
                    .default_branch
                    .unwrap_or_else(|| DEFAULT_BRANCH_FALLBACK.to_string()))
            })
            .await
    }

    async fn access_token(&self) -> Result<&InstallationToken, ApiError> {
        self.token
            .get_or_try_init(|| self.client.exchange_for_access_token(self.installation_id))
            .await
    }
}

#[async_trait]
impl InstallationLookups for InstallationClient {
    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String, ApiError> {
        self.fetch_default_branch(owner, repo).await
    }

    async fn user_email(&self, username: &str) -> Result<Option<String>, ApiError> {
        self.fetch_user_email(username).await
    }
}

#[cfg(test)]
#[path = "installation_tests.rs"]
mod tests;
