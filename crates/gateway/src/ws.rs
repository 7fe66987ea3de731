use std::sync::Arc;

use {
    axum::{
        extract::{
            State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::Response,
    },
    futures::stream::StreamExt,
    tokio::time::{Duration, timeout},
    tracing::{debug, info, warn},
};

use fluxlive_live::ClientSink;
use fluxlive_protocol::{Envelope, MAX_PAYLOAD_BYTES, SYSTEM_COMPONENT};

use crate::{connection::Connection, state::AppState};

/// WebSocket close code for internal/protocol violations.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// How long the writer gets to drain after the inbound loop ends.
const WRITER_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// One WebSocket connection through its full lifecycle: register with the
/// runtime → inbound loop → cleanup.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn_id = fluxlive_common::id::connection_id();
    info!(conn_id = %conn_id, "ws: new connection");

    let (ws_tx, mut ws_rx) = socket.split();
    let (connection, write_handle) = Connection::spawn(conn_id.clone(), ws_tx);
    state.runtime.connect(Arc::clone(&connection) as Arc<dyn ClientSink>);

    // ── Inbound loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(conn_id = %conn_id, error = %err, "ws: read error");
                break;
            },
        };

        // A frame over the limit is a connection-level violation.
        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: frame too large");
            connection.close(CLOSE_INTERNAL_ERROR, "frame too large");
            break;
        }

        match Envelope::decode(&text) {
            Ok(envelope) => {
                state.runtime.handle_frame(&conn_id, envelope).await;
            },
            Err(err) => {
                debug!(conn_id = %conn_id, error = %err, "ws: invalid frame");
                connection.send(Envelope::error(
                    SYSTEM_COMPONENT,
                    err.code(),
                    err.to_string(),
                    None,
                ));
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    state.runtime.disconnect(&conn_id).await;
    drop(connection);
    let abort = write_handle.abort_handle();
    if timeout(WRITER_DRAIN_DEADLINE, write_handle).await.is_err() {
        debug!(conn_id = %conn_id, "ws: writer did not drain in time");
        abort.abort();
    }

    info!(conn_id = %conn_id, "ws: connection closed");
}
