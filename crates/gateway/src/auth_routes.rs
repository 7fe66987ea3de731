use std::{collections::HashSet, net::SocketAddr};

use {
    axum::{
        Json, Router,
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    secrecy::{ExposeSecret, SecretString},
    serde::Deserialize,
    serde_json::json,
    tracing::{debug, info, warn},
};

use {
    fluxlive_auth::{AuthContext, ThrottleDecision},
    fluxlive_protocol::error_codes,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/register", post(register))
        .route("/me", get(me))
}

// ── Bodies ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: SecretString,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<Credentials>,
) -> Response {
    let throttle_key = format!("{}:{}", addr.ip(), body.username);
    if let ThrottleDecision::Denied { retry_after } = state.throttle.check(&throttle_key) {
        let retry_secs = retry_after.as_secs().max(1);
        warn!(username = %body.username, "login throttled");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "code": error_codes::RATE_LIMIT_EXCEEDED,
                "message": "too many login attempts",
                "retryAfterSeconds": retry_secs,
            })),
        )
            .into_response();
        if let Ok(value) = retry_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let verified = state
        .provider
        .verify(&body.username, body.password.expose_secret())
        .await;
    let user = match verified {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!(username = %body.username, "login rejected");
            return error_response(
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_INVALID,
                "invalid credentials",
            );
        },
        Err(err) => {
            warn!(username = %body.username, error = %err, "user provider failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "authentication backend failed",
            );
        },
    };

    state.throttle.clear(&throttle_key);
    let context = AuthContext::from(&user);
    let token = state.sessions.create(context);
    info!(username = %user.username, "login ok");

    let cookie = format!(
        "{}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        state.config.session_cookie_name, state.config.session_lifetime_seconds
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "token": token,
            "user": {
                "id": user.id,
                "username": user.username,
                "roles": user.roles,
                "permissions": user.permissions,
            },
        })),
    )
        .into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&state, &headers) {
        state.sessions.delete(&token);
    }
    let cookie = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        state.config.session_cookie_name
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn register(State(state): State<AppState>, Json(body): Json<Credentials>) -> Response {
    if body.username.trim().is_empty() || body.password.expose_secret().len() < 8 {
        return error_response(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PAYLOAD,
            "username required and password must be at least 8 characters",
        );
    }

    let created = state
        .provider
        .register(
            &body.username,
            body.password.expose_secret(),
            HashSet::from(["user".to_string()]),
            HashSet::new(),
        )
        .await;
    match created {
        Ok(user) => {
            info!(username = %user.username, "user registered");
            (
                StatusCode::CREATED,
                Json(json!({ "user": { "id": user.id, "username": user.username } })),
            )
                .into_response()
        },
        Err(fluxlive_auth::Error::UserExists { username }) => error_response(
            StatusCode::CONFLICT,
            error_codes::INVALID_PAYLOAD,
            format!("user already exists: {username}"),
        ),
        Err(err) => {
            warn!(error = %err, "registration failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "registration failed",
            )
        },
    }
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(context) =
        session_token(&state, &headers).and_then(|token| state.resolve_session(&token))
    else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            error_codes::AUTH_REQUIRED,
            "not authenticated",
        );
    };

    Json(json!({
        "user": {
            "id": context.subject,
            "roles": context.roles,
            "permissions": context.permissions,
        },
    }))
    .into_response()
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Bearer header first, session cookie second.
fn session_token(state: &AppState, headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }

    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    parse_cookie(cookie_header, &state.config.session_cookie_name).map(str::to_string)
}

/// Pull one cookie's value out of a Cookie header string. Only an exact
/// name match counts; `fluxstack_session_old=x` is not `fluxstack_session`.
fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "code": code, "message": message.into() })),
    )
        .into_response()
}
