//! GitHub App authentication types.
//!
//! This module provides:
//! - ID types (`GitHubAppId`, `InstallationId`)
//! - Application credentials (app id plus RSA signing key)
//! - Token types (`AppAssertion`, `InstallationToken`)
//!
//! Token strings are never exposed in `Debug` output.

use chrono::{DateTime, Utc};
use jsonwebtoken::EncodingKey;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub mod jwt;

pub use jwt::{AppAssertion, AssertionClaims, ASSERTION_BACKDATE_SECS, ASSERTION_LIFETIME_SECS};

// ============================================================================
// Core ID Types
// ============================================================================

/// GitHub App identifier assigned during app registration.
///
/// # Examples
///
/// ```
/// use github_app_client::auth::GitHubAppId;
///
/// let app_id = GitHubAppId::new(123456);
/// assert_eq!(app_id.as_u64(), 123456);
/// assert_eq!(app_id.to_string(), "123456");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitHubAppId(u64);

impl GitHubAppId {
    /// Create a new GitHub App ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GitHubAppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GitHub App installation identifier.
///
/// Assigned by GitHub when the app is installed on an account; used to obtain
/// installation access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create a new installation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Process-wide GitHub App credentials.
///
/// Loaded once at startup and never refreshed. The private key is parsed into
/// a signing key immediately so a malformed key fails at load time rather
/// than on the first comment event.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: GitHubAppId,
    signing_key: EncodingKey,
}

impl AppCredentials {
    /// Create credentials from an app id and a PEM-encoded RSA private key.
    ///
    /// Both PKCS#1 (`BEGIN RSA PRIVATE KEY`) and PKCS#8 (`BEGIN PRIVATE KEY`)
    /// encodings are accepted.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPrivateKey` if the PEM is empty, lacks
    /// BEGIN/END markers, or does not contain an RSA key.
    pub fn from_pem(app_id: GitHubAppId, pem: &str) -> Result<Self, AuthError> {
        let pem = pem.trim();

        if pem.is_empty() {
            return Err(AuthError::InvalidPrivateKey {
                message: "PEM string cannot be empty".to_string(),
            });
        }

        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(AuthError::InvalidPrivateKey {
                message: "Invalid PEM format: missing BEGIN/END markers".to_string(),
            });
        }

        let signing_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::InvalidPrivateKey {
                message: format!("Failed to parse RSA private key: {}", e),
            })?;

        Ok(Self {
            app_id,
            signing_key,
        })
    }

    /// The GitHub App this credential set belongs to.
    pub fn app_id(&self) -> GitHubAppId {
        self.app_id
    }

    pub(crate) fn signing_key(&self) -> &EncodingKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("signing_key", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Installation Token
// ============================================================================

/// Installation-scoped access token.
///
/// Obtained by exchanging an [`AppAssertion`]. The relay never caches these
/// beyond a single transformation.
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    installation_id: InstallationId,
    expires_at: Option<DateTime<Utc>>,
}

impl InstallationToken {
    /// Create a new installation token.
    pub fn new(
        token: String,
        installation_id: InstallationId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token,
            installation_id,
            expires_at,
        }
    }

    /// Token string for the `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Installation this token is scoped to.
    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// Expiry reported by GitHub, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

// Security: Don't expose token in debug output
impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("installation_id", &self.installation_id)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
