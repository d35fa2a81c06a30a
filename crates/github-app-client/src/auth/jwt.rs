//! Application assertion (JWT) generation for GitHub App authentication.
//!
//! # GitHub Requirements
//!
//! - JWTs must use RS256 algorithm (RSA Signature with SHA-256)
//! - `exp` may be at most 10 minutes after `iat`
//! - `iat` is backdated by 60 seconds to tolerate clock drift between this
//!   host and GitHub; GitHub rejects assertions issued "in the future"
//!
//! A fresh assertion is minted for every installation lookup and token
//! exchange. Assertions are never cached.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use serde::{Deserialize, Serialize};

use crate::auth::{AppCredentials, GitHubAppId};
use crate::error::AuthError;

/// Seconds `iat` is moved into the past.
pub const ASSERTION_BACKDATE_SECS: i64 = 60;

/// Seconds `exp` lies after the current time.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Claims carried by the application assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Issuer: the GitHub App id.
    pub iss: String,
}

impl AssertionClaims {
    /// Build claims for `app_id` relative to `now`.
    pub fn for_app(app_id: GitHubAppId, now: DateTime<Utc>) -> Self {
        Self {
            iat: (now - Duration::seconds(ASSERTION_BACKDATE_SECS)).timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
            iss: app_id.to_string(),
        }
    }
}

/// Signed application assertion.
///
/// The token string is never exposed in Debug output.
#[derive(Clone)]
pub struct AppAssertion {
    token: String,
    app_id: GitHubAppId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AppAssertion {
    /// Encoded JWT for the `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// App this assertion authenticates as.
    pub fn app_id(&self) -> GitHubAppId {
        self.app_id
    }

    /// Backdated issue time carried in the `iat` claim.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry carried in the `exp` claim.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for AppAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAssertion")
            .field("app_id", &self.app_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl AppCredentials {
    /// Mint a new RS256 assertion valid from 60 seconds ago until 10 minutes from now.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AssertionSigningFailed` if signing fails.
    pub fn mint_assertion(&self) -> Result<AppAssertion, AuthError> {
        self.mint_assertion_at(Utc::now())
    }

    /// Mint an assertion relative to an explicit `now`.
    pub(crate) fn mint_assertion_at(&self, now: DateTime<Utc>) -> Result<AppAssertion, AuthError> {
        let claims = AssertionClaims::for_app(self.app_id(), now);

        let token = encode(&Header::new(Algorithm::RS256), &claims, self.signing_key()).map_err(
            |e| AuthError::AssertionSigningFailed {
                message: format!("Failed to encode JWT: {}", e),
            },
        )?;

        Ok(AppAssertion {
            token,
            app_id: self.app_id(),
            issued_at: now - Duration::seconds(ASSERTION_BACKDATE_SECS),
            expires_at: now + Duration::seconds(ASSERTION_LIFETIME_SECS),
        })
    }
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
