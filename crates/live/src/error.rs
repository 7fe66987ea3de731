use fluxlive_protocol::error_codes;

/// Crate-wide result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced through the runtime's service API (the HTTP
/// injection paths). Wire-level failures never reach this type; the
/// registry answers those with correlated ERROR frames instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown room: {id}")]
    UnknownRoom { id: String },
}

// ── Action errors ────────────────────────────────────────────────────────────

/// Failure produced by a component action, carried back to the client as a
/// correlated ERROR frame with a stable code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ActionError {
    pub code: &'static str,
    pub message: String,
}

impl ActionError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The action ran but could not complete.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_codes::ACTION_FAILED, message)
    }

    /// The payload did not have the shape the action expects.
    #[must_use]
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PAYLOAD, message)
    }

    /// The caller lacks a role or permission this action requires.
    #[must_use]
    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(error_codes::AUTH_DENIED, message)
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_payload(err.to_string())
    }
}
