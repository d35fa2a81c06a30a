//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use github_app_client::AuthError;
use tracing::{error, warn};

use crate::forwarder::ForwardError;

/// Relay handler errors with HTTP status code mapping
///
/// Downstream error statuses are not errors here; they are relayed to the
/// caller unchanged. Only failures of the relay itself map to this type:
///
/// - `403 Forbidden`: the delivery did not come from a GitHub address, or the
///   `Host` header is not permitted. No detail is returned to the caller.
/// - `500 Internal Server Error`: the downstream could not be reached. The
///   body carries the transport error so the sender's delivery log shows it.
#[derive(Debug, thiserror::Error)]
pub enum RelayHandlerError {
    /// Source address outside GitHub's published ranges
    #[error("Forbidden")]
    Forbidden,

    /// `Host` header not in `security.allowed_hosts`
    #[error("Host not permitted")]
    HostNotPermitted { host: String },

    /// Transport-level failure talking to the downstream
    #[error("Proxy error: {0}")]
    ForwardingFailed(#[from] ForwardError),
}

impl IntoResponse for RelayHandlerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::HostNotPermitted { host } => {
                warn!(host = %host, "Rejected request for unlisted host");
                StatusCode::FORBIDDEN
            }
            Self::ForwardingFailed(e) => {
                error!(error = %e, "Failed to forward delivery downstream");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl ServiceError {
    /// Process exit code for this failure: 1 bind, 2 serve, 3 configuration.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Cannot read private key from {path}: {message}")]
    PrivateKeyUnreadable { path: String, message: String },

    #[error("Invalid GitHub App credentials: {0}")]
    Credentials(#[from] AuthError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
