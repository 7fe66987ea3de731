//! WebSocket transport and HTTP surface for the live-component runtime.
//!
//! One axum router serves the `/ws` upgrade, the room injection/stats
//! endpoints, and the auth endpoints. Each WebSocket connection gets a
//! single writer task fed by one bounded FIFO queue; event frames stop
//! being admitted at the event budget while control frames may use the
//! reserved headroom above it, so request/response traffic does not
//! starve under broadcast load.

pub mod auth_routes;
pub mod connection;
pub mod room_routes;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{router, serve},
    state::AppState,
};
