use {
    axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::debug,
};

use fluxlive_protocol::error_codes;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/{room_id}/messages", post(post_message).get(get_messages))
        .route("/{room_id}/emit", post(emit))
}

// ── Bodies ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageBody {
    #[serde(default)]
    user: Option<String>,
    text: String,
}

#[derive(Deserialize)]
struct EmitBody {
    event: String,
    #[serde(default)]
    data: Value,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Inject a `message:new` event into a room on behalf of an external
/// producer. The message lands in the room's bounded log first.
async fn post_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Response {
    if body.text.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PAYLOAD,
            "text is required",
        );
    }

    match state
        .runtime
        .inject_room_message(&room_id, body.user, body.text)
    {
        Ok(notified) => {
            debug!(room = %room_id, notified, "external message injected");
            Json(json!({ "notified": notified })).into_response()
        },
        Err(_) => unknown_room(&room_id),
    }
}

/// Inject an arbitrary event into a room under the `room-relay` sentinel.
async fn emit(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<EmitBody>,
) -> Response {
    if body.event.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PAYLOAD,
            "event is required",
        );
    }

    let notified = state
        .runtime
        .inject_room_event(&room_id, &body.event, body.data);
    Json(json!({ "notified": notified })).into_response()
}

async fn get_messages(State(state): State<AppState>, Path(room_id): Path<String>) -> Response {
    match state.runtime.room_messages(&room_id) {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(_) => unknown_room(&room_id),
    }
}

async fn stats(State(state): State<AppState>) -> Response {
    Json(state.runtime.stats()).into_response()
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn unknown_room(room_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown room: {room_id}") })),
    )
        .into_response()
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "code": code, "message": message.into() })),
    )
        .into_response()
}
