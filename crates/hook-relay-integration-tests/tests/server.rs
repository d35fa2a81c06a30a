//! Tests against a listening server, exercising real peer addresses.

mod common;

use common::*;
use std::net::SocketAddr;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Serve the relay on an ephemeral local port and return its address.
async fn serve(relay: &TestRelay) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = relay.router();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    address
}

/// Verify the peer address authenticates when no proxy headers are present.
#[tokio::test]
async fn test_loopback_peer_inside_ranges_is_relayed() {
    let relay = TestRelay::start().await;
    mount_meta(&relay.github, &["127.0.0.0/8"]).await;
    Mock::given(method("POST"))
        .and(path("/deliver/local"))
        .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
        .expect(1)
        .mount(&relay.downstream)
        .await;
    let address = serve(&relay).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/webhook/local", address))
        .header("X-GitHub-Event", "push")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "queued");
}

/// Verify a proxy header takes precedence over the peer address.
#[tokio::test]
async fn test_forwarded_address_outside_ranges_is_rejected() {
    let relay = TestRelay::start().await;
    mount_meta(&relay.github, &["127.0.0.0/8"]).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&relay.downstream)
        .await;
    let address = serve(&relay).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/webhook/local", address))
        .header("X-Forwarded-For", OUTSIDE_ADDRESS)
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}
