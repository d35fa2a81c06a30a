//! GitHub API client acting as a GitHub App.
//!
//! `GitHubAppClient` authenticates as the app itself (short-lived RS256
//! assertions) to resolve installations and exchange access tokens, and hands
//! out installation-scoped [`InstallationClient`]s for user and repository
//! lookups. Installation ids, default branches and user emails are each held
//! in their own [`TtlCache`] domain owned by the client.

mod installation;
mod meta;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::auth::{AppCredentials, InstallationId, InstallationToken};
use crate::cache::TtlCache;
use crate::error::ApiError;

pub use installation::InstallationClient;
pub use meta::GitHubMeta;

/// Suffix GitHub appends to bot account logins.
pub const BOT_SUFFIX: &str = "[bot]";

/// Domain of GitHub's per-user no-reply addresses.
pub const NOREPLY_DOMAIN: &str = "users.noreply.github.com";

/// Branch assumed when GitHub does not report a default branch.
pub const DEFAULT_BRANCH_FALLBACK: &str = "main";

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// The deterministic no-reply address for `username`.
///
/// # Examples
///
/// ```
/// use github_app_client::client::noreply_address;
///
/// assert_eq!(
///     noreply_address("dependabot[bot]"),
///     "dependabot[bot]@users.noreply.github.com"
/// );
/// ```
pub fn noreply_address(username: &str) -> String {
    format!("{}@{}", username, NOREPLY_DOMAIN)
}

/// Cache key for repository-scoped lookups.
pub fn repository_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

// ============================================================================
// Configuration
// ============================================================================

/// Time-to-live for each identity cache domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityCacheTtls {
    pub installation: Duration,
    pub branch: Duration,
    pub email: Duration,
}

impl Default for IdentityCacheTtls {
    fn default() -> Self {
        Self {
            installation: Duration::from_secs(3600),
            branch: Duration::from_secs(3600),
            email: Duration::from_secs(3600),
        }
    }
}

/// Configuration for GitHub API client behavior.
///
/// # Examples
///
/// ```
/// use github_app_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_timeout(Duration::from_secs(10))
///     .with_github_api_url("http://127.0.0.1:9999");
/// assert_eq!(config.github_api_url, "http://127.0.0.1:9999");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for API requests (required by GitHub)
    pub user_agent: String,
    /// Request timeout duration
    pub timeout: Duration,
    /// GitHub API base URL
    pub github_api_url: String,
    /// Cache lifetimes for installation, branch and email lookups
    pub cache_ttls: IdentityCacheTtls,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("hook-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            github_api_url: "https://api.github.com".to_string(),
            cache_ttls: IdentityCacheTtls::default(),
        }
    }
}

impl ClientConfig {
    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the GitHub API base URL. A trailing slash is ignored.
    pub fn with_github_api_url(mut self, url: impl Into<String>) -> Self {
        self.github_api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the cache lifetimes.
    pub fn with_cache_ttls(mut self, cache_ttls: IdentityCacheTtls) -> Self {
        self.cache_ttls = cache_ttls;
        self
    }
}

// ============================================================================
// Lookup seams
// ============================================================================

/// App-level identity operations needed to enrich a webhook payload.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the installation of the app on `owner/repo`.
    async fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, ApiError>;

    /// Open an installation-scoped lookup handle.
    fn installation_scope(&self, installation_id: InstallationId) -> Arc<dyn InstallationLookups>;
}

/// Installation-scoped lookups.
#[async_trait]
pub trait InstallationLookups: Send + Sync {
    /// Default branch of `owner/repo`.
    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String, ApiError>;

    /// Public email of `username`; `None` when the user publishes none.
    async fn user_email(&self, username: &str) -> Result<Option<String>, ApiError>;
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

struct ClientInner {
    credentials: AppCredentials,
    http_client: reqwest::Client,
    api_base: Url,
    config: ClientConfig,
    installations: TtlCache<String, InstallationId>,
    branches: TtlCache<String, String>,
    emails: TtlCache<String, Option<String>>,
}

/// GitHub API client authenticated as a GitHub App.
///
/// Cheap to clone; clones share the HTTP connection pool and all caches.
#[derive(Clone)]
pub struct GitHubAppClient {
    inner: Arc<ClientInner>,
}

impl GitHubAppClient {
    /// Create a client for `credentials`.
    ///
    /// # Errors
    ///
    /// - `ApiError::InvalidBaseUrl` if `github_api_url` is not an absolute
    ///   URL that can carry a path
    /// - `ApiError::HttpClientError` if the HTTP client cannot be built (for
    ///   example when no TLS backend is available)
    pub fn new(credentials: AppCredentials, config: ClientConfig) -> Result<Self, ApiError> {
        let invalid_base = |message: String| ApiError::InvalidBaseUrl {
            url: config.github_api_url.clone(),
            message,
        };
        let api_base =
            Url::parse(&config.github_api_url).map_err(|e| invalid_base(e.to_string()))?;
        if api_base.cannot_be_a_base() {
            return Err(invalid_base("URL cannot carry a path".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        let ttls = config.cache_ttls;
        Ok(Self {
            inner: Arc::new(ClientInner {
                credentials,
                http_client,
                api_base,
                installations: TtlCache::new("installations", ttls.installation),
                branches: TtlCache::new("branches", ttls.branch),
                emails: TtlCache::new("emails", ttls.email),
                config,
            }),
        })
    }

    pub(crate) fn branches(&self) -> &TtlCache<String, String> {
        &self.inner.branches
    }

    pub(crate) fn emails(&self) -> &TtlCache<String, Option<String>> {
        &self.inner.emails
    }

    /// Resolve the installation id of the app on `owner/repo`.
    ///
    /// Served from the installation cache when fresh; otherwise a new
    /// assertion is minted and `GET /repos/{owner}/{repo}/installation` is
    /// called.
    ///
    /// # Errors
    ///
    /// - `ApiError::InstallationNotFound` for any non-success response
    /// - `ApiError::HttpClientError` for transport failures
    #[instrument(skip(self))]
    pub async fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, ApiError> {
        self.inner
            .installations
            .get_or_try_refresh(repository_key(owner, repo), || {
                self.fetch_installation(owner, repo)
            })
            .await
    }

    async fn fetch_installation(&self, owner: &str, repo: &str) -> Result<InstallationId, ApiError> {
        let assertion = self.inner.credentials.mint_assertion()?;
        let response = self
            .request(Method::GET, &["repos", owner, repo, "installation"])
            .bearer_auth(assertion.token())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(
                repository = %repository_key(owner, repo),
                status = status.as_u16(),
                "Failed to find installation for repository"
            );
            return Err(ApiError::InstallationNotFound {
                repository: repository_key(owner, repo),
                status: status.as_u16(),
            });
        }

        let installation: InstallationResponse = parse_json(response).await?;
        info!(
            repository = %repository_key(owner, repo),
            installation_id = installation.id,
            "Resolved installation for repository"
        );
        Ok(InstallationId::new(installation.id))
    }

    /// Exchange a freshly minted assertion for an installation access token.
    ///
    /// Tokens are not cached: every call mints a new assertion and performs a
    /// new exchange.
    ///
    /// # Errors
    ///
    /// - `ApiError::TokenExchangeFailed` for any non-success response
    /// - `ApiError::HttpClientError` for transport failures
    #[instrument(skip(self))]
    pub async fn exchange_for_access_token(
        &self,
        installation_id: InstallationId,
    ) -> Result<InstallationToken, ApiError> {
        let assertion = self.inner.credentials.mint_assertion()?;
        let installation = installation_id.to_string();
        let response = self
            .request(Method::POST, &["app", "installations", &installation, "access_tokens"])
            .bearer_auth(assertion.token())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(
                installation_id = %installation_id,
                status = status.as_u16(),
                "Failed to exchange assertion for installation token"
            );
            return Err(ApiError::TokenExchangeFailed {
                installation_id,
                status: status.as_u16(),
            });
        }

        let body: AccessTokenResponse = parse_json(response).await?;
        let token = InstallationToken::new(body.token, installation_id, body.expires_at);
        debug!(
            installation_id = %installation_id,
            expires_at = ?token.expires_at(),
            "Exchanged assertion for installation token"
        );
        Ok(token)
    }

    /// Create an installation-scoped client.
    ///
    /// No network call is made until a lookup misses its cache.
    pub fn installation(&self, installation_id: InstallationId) -> InstallationClient {
        InstallationClient::new(self.clone(), installation_id)
    }

    /// Build a request against the GitHub API with the standard headers.
    ///
    /// Each segment is percent-encoded on its own, so values taken from a
    /// payload cannot add path components or a query.
    pub(crate) fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.inner.api_base.clone();
        // `new` rejects bases that cannot carry a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        self.inner
            .http_client
            .request(method, url)
            .header("Accept", GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

impl std::fmt::Debug for GitHubAppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubAppClient")
            .field("app_id", &self.inner.credentials.app_id())
            .field("github_api_url", &self.inner.config.github_api_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for GitHubAppClient {
    async fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, ApiError> {
        GitHubAppClient::resolve_installation(self, owner, repo).await
    }

    fn installation_scope(&self, installation_id: InstallationId) -> Arc<dyn InstallationLookups> {
        Arc::new(self.installation(installation_id))
    }
}

/// Read a response body and deserialize it as JSON.
pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Turn a non-success response into `ApiError::HttpError`.
pub(crate) async fn http_error(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error body".to_string());
    ApiError::HttpError { status, message }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
