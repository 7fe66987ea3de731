//! Reference components for the live runtime: a room-shared counter, a
//! room chat, and an auth-gated admin panel.
//!
//! These double as usage documentation: each declares its public action
//! set and auth policy in a [`ComponentDef`](fluxlive_live::ComponentDef),
//! decodes payloads into typed argument structs, and mutates state only
//! through the dispatch context.

mod admin_panel;
mod chat_room;
mod counter;

use {
    fluxlive_live::{ActionError, LiveRuntime},
    serde::de::DeserializeOwned,
    serde_json::Value,
};

pub use {
    admin_panel::{ADMIN_PANEL, AdminPanel},
    chat_room::{CHAT_ROOM, ChatRoom},
    counter::{COUNTER, Counter},
};

/// Register every reference component on a runtime.
pub fn register_all(runtime: &LiveRuntime) {
    runtime.register(&COUNTER, || Box::new(Counter));
    runtime.register(&CHAT_ROOM, || Box::new(ChatRoom::default()));
    runtime.register(&ADMIN_PANEL, || Box::new(AdminPanel));
}

/// Decode an action payload into its argument struct. A null payload is
/// treated as an empty object so argument structs with defaults work for
/// bare calls.
pub(crate) fn parse_args<T: DeserializeOwned>(payload: Value) -> Result<T, ActionError> {
    let payload = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(ActionError::from)
}
