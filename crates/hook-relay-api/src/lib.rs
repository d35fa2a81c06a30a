//! # Hook Relay HTTP Service
//!
//! HTTP server that receives GitHub webhook deliveries, authenticates them by
//! source address, rewrites comment events into push envelopes, and relays
//! them to the downstream build trigger endpoint.
//!
//! This service provides:
//! - `POST /webhook/{delivery_target}`: the relay endpoint
//! - `GET /health`: source range cache status
//! - `GET /metrics`: Prometheus metrics

pub mod config;
pub mod errors;
pub mod forwarder;
pub mod metrics;

pub use config::{
    CacheConfig, DownstreamConfig, GitHubConfig, LoggingConfig, SecurityConfig, ServerConfig,
    ServiceConfig,
};
pub use errors::{ConfigError, RelayHandlerError, ServiceError};
pub use forwarder::{DownstreamResponse, ForwardError, ForwardRequest, Forwarder, HttpForwarder};
pub use metrics::RelayMetrics;

use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use hook_relay_core::{ForwardedHeaders, IpAllowlist, PayloadTransformer, RequestOrigin};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Header carrying the request correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub allowlist: Arc<IpAllowlist>,
    pub transformer: PayloadTransformer,
    pub forwarder: Arc<dyn Forwarder>,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        allowlist: Arc<IpAllowlist>,
        transformer: PayloadTransformer,
        forwarder: Arc<dyn Forwarder>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            allowlist,
            transformer,
            forwarder,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_body_size;

    Router::new()
        .route("/webhook/{delivery_target}", post(handle_webhook))
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    host_authorization_middleware,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
///
/// Serves until SIGINT or SIGTERM, then stops accepting connections and waits
/// up to `server.shutdown_timeout_seconds` for in-flight requests.
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let address = state.config.server.bind_address();
    let shutdown_timeout = Duration::from_secs(state.config.server.shutdown_timeout_seconds);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    let app = create_router(state);
    let shutdown_started = Arc::new(Notify::new());
    let trigger = shutdown_started.clone();

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_shutdown_signal().await;
        info!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "Initiating graceful shutdown"
        );
        trigger.notify_one();
    })
    .into_future();

    let drain_deadline = async {
        shutdown_started.notified().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = drain_deadline => {
            warn!("In-flight requests did not finish before the shutdown timeout");
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Relay one GitHub delivery.
///
/// 1. Authenticate the source address against GitHub's published ranges
/// 2. Rewrite comment events into push envelopes
/// 3. Forward to `{downstream}/deliver/{delivery_target}`
/// 4. Return the downstream's status, headers and body
#[instrument(skip_all, fields(delivery_target = %delivery_target))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(delivery_target): Path<String>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayHandlerError> {
    let metrics = &state.metrics;
    metrics.webhook_requests_total.inc();
    let _timer = metrics.webhook_duration_seconds.start_timer();

    let inbound = header_map_to_strings(&headers);
    let peer_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let origin = RequestOrigin::from_headers(&inbound, peer_addr);

    if !state.allowlist.is_authorized(&origin).await {
        metrics.webhook_rejected_total.inc();
        return Err(RelayHandlerError::Forbidden);
    }

    let event_type = inbound
        .get("x-github-event")
        .map(String::as_str)
        .unwrap_or_default();
    let outcome = state.transformer.transform(event_type, body).await;
    if outcome.is_rewritten() {
        metrics.webhook_rewritten_total.inc();
    }

    let request = ForwardRequest {
        target: delivery_target,
        headers: ForwardedHeaders::from_http_headers(&inbound),
        body: outcome.into_body(),
    };

    let downstream = match state.forwarder.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            metrics.webhook_forward_failures_total.inc();
            return Err(RelayHandlerError::ForwardingFailed(e));
        }
    };

    metrics.record_downstream_status(downstream.status.as_u16());
    info!(
        event_type = %event_type,
        status = downstream.status.as_u16(),
        "Relayed delivery downstream"
    );

    let mut response = Response::new(Body::from(downstream.body));
    *response.status_mut() = downstream.status;
    *response.headers_mut() = downstream.headers;
    Ok(response)
}

/// Lowercased header names to string values; non-UTF-8 values are dropped.
///
/// Repeated headers are joined with `", "` in arrival order, so the first
/// `x-forwarded-for` hop stays first.
fn header_map_to_strings(headers: &HeaderMap) -> HashMap<String, String> {
    let mut joined: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        joined
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    joined
}

// ============================================================================
// Health and Metrics
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub github_ips_cached: bool,
    pub timestamp: String,
}

/// Healthy once a non-empty source range list has been loaded.
///
/// Always answers 200; the state is carried in `status`.
#[instrument(skip(state))]
async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let cached = state.allowlist.is_cached();

    let response = HealthResponse {
        status: if cached { "healthy" } else { "unhealthy" }.to_string(),
        github_ips_cached: cached,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    Json(response)
}

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let body = state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Uses the caller's `x-correlation-id` when present, otherwise generates
/// one, and echoes it on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Reject requests whose `Host` is not listed in `security.allowed_hosts`.
async fn host_authorization_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RelayHandlerError> {
    let allowed_hosts = &state.config.security.allowed_hosts;
    if allowed_hosts.is_empty() {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .map(strip_port)
        .unwrap_or_default()
        .to_ascii_lowercase();

    if is_host_permitted(&host, allowed_hosts) {
        Ok(next.run(request).await)
    } else {
        Err(RelayHandlerError::HostNotPermitted { host })
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn is_host_permitted(host: &str, allowed_hosts: &[String]) -> bool {
    if host.is_empty() {
        return false;
    }

    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.to_ascii_lowercase();
        match allowed.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(&allowed),
            None => host == allowed,
        }
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
