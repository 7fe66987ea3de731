//! HTTP surface tests: auth endpoints with throttling, room injection
//! edge cases, stats, health.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc};

use serde_json::{Value, json};

use {
    fluxlive_auth::{InMemoryUserProvider, SessionStore, SessionTokenGuard},
    fluxlive_components::register_all,
    fluxlive_config::LiveConfig,
    fluxlive_gateway::AppState,
    fluxlive_live::LiveRuntime,
};

async fn spawn_app(config: LiveConfig) -> SocketAddr {
    let sessions = Arc::new(SessionStore::new(config.session_lifetime()));
    let provider = Arc::new(InMemoryUserProvider::new());
    provider
        .seed("root", "super-secret", ["admin"], ["users.delete"])
        .unwrap();

    let guard = Arc::new(SessionTokenGuard::new(Arc::clone(&sessions)));
    let runtime = Arc::new(LiveRuntime::new(config.clone(), guard));
    register_all(&runtime);

    let state = AppState::new(runtime, sessions, provider, config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(fluxlive_gateway::server::serve_on(
        listener,
        state,
        std::future::pending(),
    ));
    addr
}

#[tokio::test]
async fn health_reports_ok() {
    let addr = spawn_app(LiveConfig::default()).await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn login_sets_the_session_cookie_and_returns_a_bearer_token() {
    let addr = spawn_app(LiveConfig::default()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "root", "password": "super-secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("fluxstack_session="));
    assert!(cookie.contains("HttpOnly"));

    let body: Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap();
    assert!(!token.is_empty());
    assert_eq!(body["user"]["username"], json!("root"));

    // The bearer token resolves through /auth/me.
    let me: Value = http
        .get(format!("http://{addr}/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user"]["roles"], json!(["admin"]));
}

#[tokio::test]
async fn me_without_a_session_is_unauthorized() {
    let addr = spawn_app(LiveConfig::default()).await;
    let response = reqwest::get(format!("http://{addr}/auth/me")).await.unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = spawn_app(LiveConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "root", "password": "nope-nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!("AUTH_INVALID"));
}

#[tokio::test]
async fn login_is_rate_limited_per_key() {
    let mut config = LiveConfig::default();
    config.rate_limit_max = 2;
    let addr = spawn_app(config).await;
    let http = reqwest::Client::new();

    for _ in 0..2 {
        let response = http
            .post(format!("http://{addr}/auth/login"))
            .json(&json!({ "username": "root", "password": "wrong-wrong" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    let response = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "root", "password": "wrong-wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!("RATE_LIMIT_EXCEEDED"));

    // A different username is an independent throttle key.
    let response = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "other", "password": "wrong-wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn register_then_login() {
    let addr = spawn_app(LiveConfig::default()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{addr}/auth/register"))
        .json(&json!({ "username": "alice", "password": "long-enough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Duplicates conflict.
    let response = http
        .post(format!("http://{addr}/auth/register"))
        .json(&json!({ "username": "alice", "password": "long-enough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Short passwords are refused.
    let response = http
        .post(format!("http://{addr}/auth/register"))
        .json(&json!({ "username": "bob", "password": "short" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "alice", "password": "long-enough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn logout_invalidates_the_token() {
    let addr = spawn_app(LiveConfig::default()).await;
    let http = reqwest::Client::new();

    let login: Value = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "root", "password": "super-secret" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    let response = http
        .post(format!("http://{addr}/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = http
        .get(format!("http://{addr}/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn room_injection_edge_cases() {
    let addr = spawn_app(LiveConfig::default()).await;
    let http = reqwest::Client::new();

    // Messages into a room nobody ever joined: 404.
    let response = http
        .post(format!("http://{addr}/rooms/ghost/messages"))
        .json(&json!({ "text": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Empty text: 400.
    let response = http
        .post(format!("http://{addr}/rooms/ghost/messages"))
        .json(&json!({ "text": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Emit into an empty room is a no-op with zero notified.
    let body: Value = http
        .post(format!("http://{addr}/rooms/ghost/emit"))
        .json(&json!({ "event": "cursor:moved", "data": { "x": 1 } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["notified"], json!(0));

    // Missing event name: 400.
    let response = http
        .post(format!("http://{addr}/rooms/ghost/emit"))
        .json(&json!({ "event": "", "data": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn stats_shape_is_stable() {
    let addr = spawn_app(LiveConfig::default()).await;
    let stats: Value = reqwest::get(format!("http://{addr}/rooms/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats["rooms"].is_object());
    assert!(stats["events"]["emitted"].is_u64());
    assert!(stats["events"]["delivered"].is_u64());
    assert!(stats["events"]["dropped"].is_u64());
}
