//! Common test utilities for hook-relay integration tests
//!
//! Every test runs the real client, allowlist, transformer and forwarder
//! against two `wiremock` servers: one standing in for the GitHub API and one
//! for the downstream build trigger endpoint.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use github_app_client::GitHubAppClient;
use hook_relay_api::{AppState, HttpForwarder, RelayMetrics, ServiceConfig};
use hook_relay_core::{IpAllowlist, PayloadTransformer};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_PRIVATE_KEY_PEM: &str =
    include_str!("../../../github-app-client/test-data/test-app-key.pem");

/// Published GitHub hook range used by the tests.
pub const GITHUB_HOOK_RANGE: &str = "192.30.252.0/22";

/// An address inside [`GITHUB_HOOK_RANGE`].
pub const GITHUB_ADDRESS: &str = "192.30.252.41";

/// An address outside every published range.
pub const OUTSIDE_ADDRESS: &str = "203.0.113.9";

pub struct TestRelay {
    pub github: MockServer,
    pub downstream: MockServer,
    pub state: AppState,
}

impl TestRelay {
    /// Start both mock servers and build relay state pointed at them.
    ///
    /// No mocks are mounted; tests mount what they expect to be called.
    pub async fn start() -> Self {
        let github = MockServer::start().await;
        let downstream = MockServer::start().await;
        let state = build_state(&github.uri(), &downstream.uri());

        Self {
            github,
            downstream,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        hook_relay_api::create_router(self.state.clone())
    }
}

pub fn build_state(github_url: &str, downstream_url: &str) -> AppState {
    let mut config = ServiceConfig::default();
    config.github.api_url = github_url.to_string();
    config.github.app_id = Some(123);
    config.github.private_key = Some(TEST_PRIVATE_KEY_PEM.to_string());
    config.downstream.base_url = downstream_url.to_string();
    config.validate().unwrap();

    let credentials = config.github.app_credentials().unwrap();
    let github = Arc::new(GitHubAppClient::new(credentials, config.client_config()).unwrap());
    let allowlist = Arc::new(IpAllowlist::new(
        github.clone(),
        config.cache.ip_ranges_ttl(),
    ));
    let forwarder = Arc::new(
        HttpForwarder::new(
            config.downstream.base_url.clone(),
            config.downstream.timeout(),
            config.downstream.connect_timeout(),
        )
        .unwrap(),
    );

    AppState::new(
        config,
        allowlist,
        PayloadTransformer::new(github),
        forwarder,
        RelayMetrics::new().unwrap(),
    )
}

// ============================================================================
// GitHub API mocks
// ============================================================================

/// Serve `/meta` with the given hook ranges.
pub async fn mount_meta(github: &MockServer, hooks: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verifiable_password_authentication": false,
            "hooks": hooks,
            "actions": ["4.148.0.0/16"]
        })))
        .mount(github)
        .await;
}

/// Installation 42 on acme/widgets, default branch `develop`, and user
/// `alice` with public email `alice@example.com`.
pub async fn mount_acme_identity(github: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/installation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "account": { "login": "acme" }
        })))
        .mount(github)
        .await;

    Mock::given(method("POST"))
        .and(path("/app/installations/42/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_integration",
            "expires_at": "2099-01-01T00:00:00Z"
        })))
        .mount(github)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/widgets",
            "default_branch": "develop"
        })))
        .mount(github)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "alice",
            "email": "alice@example.com"
        })))
        .mount(github)
        .await;
}

// ============================================================================
// Requests
// ============================================================================

/// A delivery as GitHub would send it, arriving from `peer`.
pub fn delivery_request(target: &str, event: &str, body: &str, peer: &str) -> Request<Body> {
    let peer_ip: IpAddr = peer.parse().unwrap();

    Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", target))
        .header("content-type", "application/json")
        .header("user-agent", "GitHub-Hookshot/abc123")
        .header("x-github-event", event)
        .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
        .header("x-github-hook-id", "292430182")
        .extension(ConnectInfo(SocketAddr::new(peer_ip, 50_000)))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn comment_payload(commenter: &str) -> String {
    json!({
        "action": "created",
        "issue": { "number": 7, "title": "Build please" },
        "comment": {
            "id": 1001,
            "body": "/build",
            "user": { "login": commenter }
        },
        "repository": {
            "name": "widgets",
            "full_name": "acme/widgets",
            "owner": { "login": "acme" }
        }
    })
    .to_string()
}

pub async fn read_body(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}
