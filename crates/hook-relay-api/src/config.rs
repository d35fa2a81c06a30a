//! Configuration types for the relay service.
//!
//! Every section deserializes with defaults so a layered source (files plus
//! environment) only needs to name what differs. [`ServiceConfig::validate`]
//! is run once after loading.

use std::path::PathBuf;
use std::time::Duration;

use github_app_client::{AppCredentials, ClientConfig, GitHubAppId, IdentityCacheTtls};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigError;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// GitHub App identity and API settings
    pub github: GitHubConfig,

    /// Downstream build trigger endpoint
    pub downstream: DownstreamConfig,

    /// Cache lifetimes
    pub cache: CacheConfig,

    /// Security settings
    pub security: SecurityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the loaded configuration for values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first problem found as `ConfigError::Missing` or
    /// `ConfigError::Invalid`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port must be between 1 and 65535"));
        }
        if self.server.max_body_size == 0 {
            return Err(invalid("server.max_body_size must be greater than zero"));
        }

        match self.github.app_id {
            None => {
                return Err(ConfigError::Missing {
                    key: "github.app_id".to_string(),
                })
            }
            Some(0) => return Err(invalid("github.app_id must be a positive integer")),
            Some(_) => {}
        }

        let inline_key = self
            .github
            .private_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        match (inline_key, self.github.private_key_path.is_some()) {
            (false, false) => {
                return Err(ConfigError::Missing {
                    key: "github.private_key or github.private_key_path".to_string(),
                })
            }
            (true, true) => {
                return Err(invalid(
                    "github.private_key and github.private_key_path are mutually exclusive",
                ))
            }
            _ => {}
        }

        validate_http_url("github.api_url", &self.github.api_url)?;
        validate_http_url("downstream.base_url", &self.downstream.base_url)?;

        if self.downstream.timeout_seconds == 0 || self.downstream.connect_timeout_seconds == 0 {
            return Err(invalid("downstream timeouts must be greater than zero"));
        }

        let ttls = [
            ("cache.ip_ranges_ttl_seconds", self.cache.ip_ranges_ttl_seconds),
            ("cache.installation_ttl_seconds", self.cache.installation_ttl_seconds),
            ("cache.branch_ttl_seconds", self.cache.branch_ttl_seconds),
            ("cache.email_ttl_seconds", self.cache.email_ttl_seconds),
        ];
        if let Some((key, _)) = ttls.iter().find(|(_, seconds)| *seconds == 0) {
            return Err(invalid(&format!("{} must be greater than zero", key)));
        }

        Ok(())
    }

    /// GitHub client settings derived from the `github` and `cache` sections.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_user_agent(self.github.user_agent.clone())
            .with_github_api_url(self.github.api_url.clone())
            .with_cache_ttls(self.cache.identity_ttls())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(&format!("{} is not a valid URL: {}", key, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(&format!(
            "{} must use http or https, not {}",
            key, scheme
        ))),
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl ServerConfig {
    /// `host:port` string for binding the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4567,
            shutdown_timeout_seconds: 30,
            max_body_size: 25 * 1024 * 1024, // GitHub caps payloads at 25MB
        }
    }
}

/// GitHub App configuration
///
/// Exactly one of `private_key` (inline PEM) or `private_key_path` must be set.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API base URL
    pub api_url: String,

    /// GitHub App id
    pub app_id: Option<u64>,

    /// PEM-encoded RSA private key
    #[serde(skip_serializing)]
    pub private_key: Option<String>,

    /// File holding the PEM-encoded RSA private key
    pub private_key_path: Option<PathBuf>,

    /// User agent sent on every GitHub request
    pub user_agent: String,
}

impl GitHubConfig {
    /// The private key PEM, read from disk when configured by path.
    ///
    /// # Errors
    ///
    /// `ConfigError::PrivateKeyUnreadable` when the file cannot be read and
    /// `ConfigError::Missing` when no key is configured.
    pub fn private_key_pem(&self) -> Result<String, ConfigError> {
        if let Some(pem) = self.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(pem.to_string());
        }

        let path = self
            .private_key_path
            .as_ref()
            .ok_or_else(|| ConfigError::Missing {
                key: "github.private_key or github.private_key_path".to_string(),
            })?;
        std::fs::read_to_string(path).map_err(|e| ConfigError::PrivateKeyUnreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load and parse the app credentials.
    ///
    /// # Errors
    ///
    /// Fails when the app id or key is missing, the key file is unreadable,
    /// or the key is not a valid RSA private key.
    pub fn app_credentials(&self) -> Result<AppCredentials, ConfigError> {
        let app_id = self.app_id.ok_or_else(|| ConfigError::Missing {
            key: "github.app_id".to_string(),
        })?;
        let pem = self.private_key_pem()?;
        Ok(AppCredentials::from_pem(GitHubAppId::new(app_id), &pem)?)
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            app_id: None,
            private_key: None,
            private_key_path: None,
            user_agent: "hook-relay".to_string(),
        }
    }
}

// Security: Don't expose the private key in debug output
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("app_id", &self.app_id)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field("private_key_path", &self.private_key_path)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Downstream endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL; deliveries go to `{base_url}/deliver/{target}`
    pub base_url: String,

    /// Whole-request timeout in seconds
    pub timeout_seconds: u64,

    /// Connection establishment timeout in seconds
    pub connect_timeout_seconds: u64,
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://webhook.buildkite.com".to_string(),
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

/// Cache lifetimes, in seconds, per cache domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ip_ranges_ttl_seconds: u64,
    pub installation_ttl_seconds: u64,
    pub branch_ttl_seconds: u64,
    pub email_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn ip_ranges_ttl(&self) -> Duration {
        Duration::from_secs(self.ip_ranges_ttl_seconds)
    }

    pub fn identity_ttls(&self) -> IdentityCacheTtls {
        IdentityCacheTtls {
            installation: Duration::from_secs(self.installation_ttl_seconds),
            branch: Duration::from_secs(self.branch_ttl_seconds),
            email: Duration::from_secs(self.email_ttl_seconds),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ip_ranges_ttl_seconds: 3600,
            installation_ttl_seconds: 3600,
            branch_ttl_seconds: 3600,
            email_ttl_seconds: 3600,
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Host names accepted in the `Host` header (empty = any).
    /// A leading dot matches the domain and all its subdomains.
    pub allowed_hosts: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
