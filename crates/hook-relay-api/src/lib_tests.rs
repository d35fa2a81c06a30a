//! Router-level tests for the relay endpoint, health, metrics and middleware.

use super::*;
use async_trait::async_trait;
use axum::http::Request as HttpRequest;
use github_app_client::client::{IdentityProvider, InstallationLookups};
use github_app_client::{ApiError, InstallationId};
use hook_relay_core::{IpRangeSet, IpRangeSource};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use tower::ServiceExt;

// ============================================================================
// Test Doubles
// ============================================================================

struct StaticRanges(Result<Vec<&'static str>, u16>);

#[async_trait]
impl IpRangeSource for StaticRanges {
    async fn fetch_ranges(&self) -> Result<IpRangeSet, ApiError> {
        match &self.0 {
            Ok(ranges) => Ok(ranges.iter().map(|r| r.to_string()).collect()),
            Err(status) => Err(ApiError::HttpError {
                status: *status,
                message: "unavailable".to_string(),
            }),
        }
    }
}

/// Identity double for the acme/widgets repository.
struct AcmeIdentity;

struct AcmeLookups;

#[async_trait]
impl IdentityProvider for AcmeIdentity {
    async fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, ApiError> {
        if owner == "acme" && repo == "widgets" {
            Ok(InstallationId::new(42))
        } else {
            Err(ApiError::InstallationNotFound {
                repository: format!("{}/{}", owner, repo),
                status: 404,
            })
        }
    }

    fn installation_scope(&self, _installation_id: InstallationId) -> Arc<dyn InstallationLookups> {
        Arc::new(AcmeLookups)
    }
}

#[async_trait]
impl InstallationLookups for AcmeLookups {
    async fn default_branch(&self, _owner: &str, _repo: &str) -> Result<String, ApiError> {
        Ok("develop".to_string())
    }

    async fn user_email(&self, _username: &str) -> Result<Option<String>, ApiError> {
        Ok(Some("alice@example.com".to_string()))
    }
}

/// Forwarder that records requests and answers with a fixed response.
struct RecordingForwarder {
    requests: Mutex<Vec<ForwardRequest>>,
    fail: bool,
}

impl RecordingForwarder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn requests(&self) -> Vec<ForwardRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<DownstreamResponse, ForwardError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ForwardError::InvalidTarget {
                target: request.target,
                message: "connection refused".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert("x-downstream", "buildkite".parse().unwrap());
        Ok(DownstreamResponse {
            status: StatusCode::CREATED,
            headers,
            body: Bytes::from_static(b"{\"id\":\"build-1\"}"),
        })
    }
}

struct TestApp {
    router: Router,
    forwarder: Arc<RecordingForwarder>,
    metrics: Arc<RelayMetrics>,
}

fn test_app_with(
    ranges: Result<Vec<&'static str>, u16>,
    forwarder: Arc<RecordingForwarder>,
    configure: impl FnOnce(&mut ServiceConfig),
) -> TestApp {
    let mut config = ServiceConfig::default();
    configure(&mut config);

    let allowlist = Arc::new(IpAllowlist::new(
        Arc::new(StaticRanges(ranges)),
        Duration::from_secs(3600),
    ));
    let transformer = PayloadTransformer::new(Arc::new(AcmeIdentity));
    let metrics = RelayMetrics::new().unwrap();

    let state = AppState::new(
        config,
        allowlist,
        transformer,
        forwarder.clone(),
        metrics.clone(),
    );
    TestApp {
        router: create_router(state),
        forwarder,
        metrics,
    }
}

fn test_app() -> TestApp {
    test_app_with(Ok(vec!["192.30.252.0/22"]), RecordingForwarder::new(), |_| {})
}

fn github_peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 30, 252, 10)), 443))
}

fn outside_peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 443))
}

fn delivery(event: &str, body: &str, peer: ConnectInfo<SocketAddr>) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri("/webhook/pipeline-1")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "delivery-1")
        .extension(peer)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

// ============================================================================
// Relay Endpoint
// ============================================================================

mod webhook_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_from_github_is_relayed_verbatim() {
        let app = test_app();
        let body = r#"{"ref":"refs/heads/main","after":"abc"}"#;

        let response = app
            .router
            .oneshot(delivery("push", body, github_peer()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-downstream").unwrap(), "buildkite");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"{\"id\":\"build-1\"}"));

        let requests = app.forwarder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target, "pipeline-1");
        assert_eq!(requests[0].body, Bytes::from(body));
        assert_eq!(requests[0].headers.get("X-GitHub-Event"), Some("push"));
        assert_eq!(requests[0].headers.get("X-GitHub-Delivery"), Some("delivery-1"));
    }

    /// The downstream is never contacted for an unauthenticated delivery.
    #[tokio::test]
    async fn test_delivery_from_outside_github_is_forbidden() {
        let app = test_app();

        let response = app
            .router
            .oneshot(delivery("push", "{}", outside_peer()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"Forbidden"));
        assert!(app.forwarder.requests().is_empty());
        assert_eq!(app.metrics.webhook_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn test_forwarded_for_header_is_used_for_authentication() {
        let app = test_app();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/webhook/pipeline-1")
            .header("x-forwarded-for", "192.30.252.77, 10.0.0.1")
            .header("x-github-event", "ping")
            .extension(outside_peer())
            .body(Body::from("{}"))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    /// Each proxy hop may append its own header line; the first line names
    /// the original client.
    #[tokio::test]
    async fn test_repeated_forwarded_for_headers_keep_first_hop() {
        let app = test_app();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/webhook/pipeline-1")
            .header("x-forwarded-for", "192.30.252.10")
            .header("x-forwarded-for", "203.0.113.5")
            .header("x-github-event", "ping")
            .extension(outside_peer())
            .body(Body::from("{}"))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(app.forwarder.requests().len(), 1);
    }

    /// Fail closed when GitHub's ranges have never been loaded.
    #[tokio::test]
    async fn test_everything_is_forbidden_without_ranges() {
        let app = test_app_with(Err(503), RecordingForwarder::new(), |_| {});

        let response = app
            .router
            .oneshot(delivery("push", "{}", github_peer()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_peer_address_is_forbidden() {
        let app = test_app();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/webhook/pipeline-1")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_comment_is_rewritten_and_announced_as_push() {
        let app = test_app();
        let body = serde_json::json!({
            "action": "created",
            "comment": { "user": { "login": "alice" } },
            "repository": { "name": "widgets", "owner": { "login": "acme" } }
        })
        .to_string();

        let response = app
            .router
            .oneshot(delivery("issue_comment", &body, github_peer()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let requests = app.forwarder.requests();
        assert_eq!(requests[0].headers.get("X-GitHub-Event"), Some("push"));
        let envelope: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(envelope["ref"], "refs/heads/develop");
        assert_eq!(envelope["head_commit"]["author"]["email"], "alice@example.com");
        assert_eq!(app.metrics.webhook_rewritten_total.get(), 1);
    }

    #[tokio::test]
    async fn test_forwarding_failure_is_a_proxy_error() {
        let app = test_app_with(
            Ok(vec!["192.30.252.0/22"]),
            RecordingForwarder::failing(),
            |_| {},
        );

        let response = app
            .router
            .oneshot(delivery("push", "{}", github_peer()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).starts_with("Proxy error: "));
        assert_eq!(app.metrics.webhook_forward_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let app = test_app_with(Ok(vec!["192.30.252.0/22"]), RecordingForwarder::new(), |c| {
            c.server.max_body_size = 16;
        });

        let response = app
            .router
            .oneshot(delivery("push", &"x".repeat(64), github_peer()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.forwarder.requests().is_empty());
    }
}

// ============================================================================
// Health and Metrics
// ============================================================================

mod health_tests {
    use super::*;

    async fn get_health(router: Router) -> (StatusCode, HealthResponse) {
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let health = serde_json::from_slice(&body_bytes(response).await).unwrap();
        (status, health)
    }

    /// Unhealthy is reported in the body; the endpoint itself still answers.
    #[tokio::test]
    async fn test_unhealthy_before_ranges_are_loaded() {
        let app = test_app();

        let (status, health) = get_health(app.router).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "unhealthy");
        assert!(!health.github_ips_cached);
        assert!(chrono::DateTime::parse_from_rfc3339(&health.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_healthy_after_ranges_are_loaded() {
        let app = test_app();
        app.router
            .clone()
            .oneshot(delivery("push", "{}", github_peer()))
            .await
            .unwrap();

        let (status, health) = get_health(app.router).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "healthy");
        assert!(health.github_ips_cached);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_counters() {
        let app = test_app();
        app.router
            .clone()
            .oneshot(delivery("push", "{}", github_peer()))
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(
                HttpRequest::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(text.contains("webhook_requests_total 1"));
        assert!(text.contains("downstream_responses_total{status=\"201\"} 1"));
    }
}

// ============================================================================
// Middleware
// ============================================================================

mod middleware_tests {
    use super::*;

    fn health_request(host: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/health");
        if let Some(host) = host {
            builder = builder.header("host", host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_correlation_id_is_generated() {
        let app = test_app();

        let response = app.router.oneshot(health_request(None)).await.unwrap();

        let id = response.headers().get(CORRELATION_ID_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_correlation_id_is_echoed() {
        let app = test_app();
        let request = HttpRequest::builder()
            .uri("/health")
            .header(CORRELATION_ID_HEADER, "trace-123")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "trace-123"
        );
    }

    #[tokio::test]
    async fn test_any_host_allowed_when_list_empty() {
        let app = test_app();

        let response = app
            .router
            .oneshot(health_request(Some("whatever.example.org")))
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unlisted_host_is_rejected() {
        let app = test_app_with(Ok(vec![]), RecordingForwarder::new(), |c| {
            c.security.allowed_hosts = vec!["relay.example.com".to_string()];
        });

        let response = app
            .router
            .oneshot(health_request(Some("evil.example.org")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_bytes(response).await,
            Bytes::from_static(b"Host not permitted")
        );
    }

    #[tokio::test]
    async fn test_listed_host_with_port_is_accepted() {
        let app = test_app_with(Ok(vec![]), RecordingForwarder::new(), |c| {
            c.security.allowed_hosts = vec!["Relay.Example.com".to_string()];
        });

        let response = app
            .router
            .oneshot(health_request(Some("relay.example.com:4567")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("relay.example.com:4567"), "relay.example.com");
        assert_eq!(strip_port("relay.example.com"), "relay.example.com");
        assert_eq!(strip_port("[::1]:4567"), "[::1]");
        assert_eq!(strip_port("127.0.0.1:80"), "127.0.0.1");
    }

    #[test]
    fn test_leading_dot_matches_subdomains() {
        let allowed = vec![".example.com".to_string()];
        assert!(is_host_permitted("example.com", &allowed));
        assert!(is_host_permitted("relay.example.com", &allowed));
        assert!(!is_host_permitted("badexample.com", &allowed));
        assert!(!is_host_permitted("", &allowed));
    }
}
