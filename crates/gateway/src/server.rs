use std::net::SocketAddr;

use {
    axum::{Json, Router, routing::get},
    serde_json::json,
    tower_http::{
        cors::CorsLayer,
        limit::RequestBodyLimitLayer,
        trace::TraceLayer,
    },
    tracing::info,
};

use fluxlive_protocol::MAX_PAYLOAD_BYTES;

use crate::{auth_routes, room_routes, state::AppState, ws};

/// Assemble the full router: WebSocket upgrade, room surface, auth
/// surface, health.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/health", get(health))
        .nest("/rooms", room_routes::router())
        .nest("/auth", auth_routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_PAYLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind = format!("{}:{}", state.config.bind, state.config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "gateway listening");
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener. Tests bind port 0 and read the
/// local address back.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
