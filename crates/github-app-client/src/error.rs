//! Error types for GitHub App client operations.
//!
//! Errors carry enough context to log a useful message at the point where the
//! relay decides to fall back.

use thiserror::Error;

use crate::auth::InstallationId;

/// Failures while building or signing the application assertion.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid private key format or data (non-retryable).
    #[error("Invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// Signing the assertion failed (non-retryable).
    #[error("Assertion signing failed: {message}")]
    AssertionSigningFailed { message: String },
}

/// Errors during GitHub API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP error response from GitHub API.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// The app is not installed on the repository, or the lookup was refused.
    #[error("Installation not found for repository {repository} (status {status})")]
    InstallationNotFound { repository: String, status: u16 },

    /// The assertion could not be exchanged for an installation access token.
    #[error("Access token exchange failed for installation {installation_id} (status {status})")]
    TokenExchangeFailed {
        installation_id: InstallationId,
        status: u16,
    },

    /// Failed to parse JSON response from GitHub API.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, timeout).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// The configured API base URL is unusable.
    #[error("Invalid GitHub API URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// The application assertion could not be produced.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
