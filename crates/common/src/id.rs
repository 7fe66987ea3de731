//! Opaque id minting for connections and component instances.

/// Mint a fresh connection id.
#[must_use]
pub fn connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mint a fresh component instance id.
///
/// Instance ids are opaque to clients; the `inst_` prefix only makes them
/// recognizable in logs next to client-chosen mount ids.
#[must_use]
pub fn instance_id() -> String {
    format!("inst_{}", uuid::Uuid::new_v4().simple())
}
