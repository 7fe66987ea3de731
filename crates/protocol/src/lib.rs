//! Live-component WebSocket protocol definitions.
//!
//! All communication uses JSON envelopes over WebSocket. A single
//! [`Envelope`] shape carries every message kind; optional fields are
//! omitted on the wire. Correlation ids (`requestId` / `responseId`) are
//! opaque strings minted by the requesting peer; the server only echoes
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest inbound frame accepted before the connection is closed with 1011.
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KiB

/// Writer-queue slots reserved for control frames (responses, errors)
/// above the event budget.
pub const CONTROL_QUEUE_CAPACITY: usize = 64;

/// Writer-queue depth at which event frames (state updates, broadcasts)
/// stop being admitted.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Component id used for frames not tied to a specific instance (AUTH,
/// connection-level errors).
pub const SYSTEM_COMPONENT: &str = "system";

/// Component id for server-injected room events. Instructs the client not
/// to apply its broadcast echo filter.
pub const ROOM_RELAY: &str = "room-relay";

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const AUTH_INVALID: &str = "AUTH_INVALID";
    pub const AUTH_DENIED: &str = "AUTH_DENIED";
    pub const AUTH_TIMEOUT: &str = "AUTH_TIMEOUT";
    pub const COMPONENT_NOT_FOUND: &str = "COMPONENT_NOT_FOUND";
    pub const ACTION_NOT_PUBLIC: &str = "ACTION_NOT_PUBLIC";
    pub const ACTION_FAILED: &str = "ACTION_FAILED";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

// ── Message kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Mount,
    Unmount,
    CallAction,
    ActionResponse,
    PropertyUpdate,
    StateUpdate,
    Broadcast,
    Error,
    Auth,
}

impl MessageKind {
    /// Whether frames of this kind ride the control queue rather than the
    /// droppable event queue.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::ActionResponse | Self::Error | Self::Auth)
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The wire envelope shared by every message kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub component_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prop: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expect_response: bool,
}

impl Envelope {
    fn base(kind: MessageKind, component_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            component_id: component_id.into(),
            action: None,
            prop: None,
            payload,
            timestamp: now_ms(),
            user_id: None,
            room: None,
            request_id: None,
            response_id: None,
            expect_response: false,
        }
    }

    /// Server → client full-state flush.
    #[must_use]
    pub fn state_update(component_id: impl Into<String>, state: Value) -> Self {
        Self::base(
            MessageKind::StateUpdate,
            component_id,
            serde_json::json!({ "state": state }),
        )
    }

    /// Room event fanned out to a subscriber. `component_id` is the emitter's
    /// instance id, or [`ROOM_RELAY`] for server-injected events.
    #[must_use]
    pub fn broadcast(
        component_id: impl Into<String>,
        room: impl Into<String>,
        event: impl Into<String>,
        data: Value,
    ) -> Self {
        let mut env = Self::base(
            MessageKind::Broadcast,
            component_id,
            serde_json::json!({ "type": event.into(), "data": data }),
        );
        env.room = Some(room.into());
        env
    }

    /// Correlated reply to a request that set `expectResponse`.
    #[must_use]
    pub fn action_response(
        component_id: impl Into<String>,
        response_id: impl Into<String>,
        result: Value,
    ) -> Self {
        let mut env = Self::base(
            MessageKind::ActionResponse,
            component_id,
            serde_json::json!({ "result": result }),
        );
        env.response_id = Some(response_id.into());
        env
    }

    /// Error frame, correlated when `response_id` is set.
    #[must_use]
    pub fn error(
        component_id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        response_id: Option<String>,
    ) -> Self {
        let mut env = Self::base(
            MessageKind::Error,
            component_id,
            serde_json::json!({ "code": code, "message": message.into() }),
        );
        env.response_id = response_id;
        env
    }

    /// Structural validation beyond what serde enforces. Returns the first
    /// violation found.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.component_id.is_empty() {
            return Err(ProtocolError::MissingComponentId(self.kind));
        }
        match self.kind {
            MessageKind::Mount => {
                MountPayload::from_value(&self.payload)?;
            },
            MessageKind::CallAction => {
                if self.action.as_deref().unwrap_or("").is_empty() {
                    return Err(ProtocolError::MissingAction);
                }
            },
            MessageKind::PropertyUpdate => {
                PropertyUpdatePayload::from_value(&self.payload)?;
            },
            MessageKind::Auth => {
                AuthPayload::from_value(&self.payload)?;
            },
            _ => {},
        }
        Ok(())
    }

    /// Decode a frame from wire text, enforcing structural validation.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let env: Self = serde_json::from_str(text).map_err(ProtocolError::Decode)?;
        env.validate()?;
        Ok(env)
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Typed payload views ──────────────────────────────────────────────────────

/// Payload of a MOUNT frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPayload {
    pub component: String,
    #[serde(default)]
    pub props: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Payload of a PROPERTY_UPDATE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyUpdatePayload {
    pub key: String,
    pub value: Value,
}

/// Payload of an AUTH frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// Payload of an ERROR frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Payload of a BROADCAST frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastBody {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

macro_rules! payload_view {
    ($ty:ty, $kind:expr) => {
        impl $ty {
            pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
                serde_json::from_value(value.clone())
                    .map_err(|_| ProtocolError::InvalidPayload($kind))
            }
        }
    };
}

payload_view!(MountPayload, MessageKind::Mount);
payload_view!(PropertyUpdatePayload, MessageKind::PropertyUpdate);
payload_view!(AuthPayload, MessageKind::Auth);
payload_view!(ErrorBody, MessageKind::Error);
payload_view!(BroadcastBody, MessageKind::Broadcast);

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("missing componentId on {0:?} frame")]
    MissingComponentId(MessageKind),

    #[error("CALL_ACTION frame missing action name")]
    MissingAction,

    #[error("payload fails structural validation for {0:?}")]
    InvalidPayload(MessageKind),
}

impl ProtocolError {
    /// The stable wire code this decode failure maps to.
    #[must_use]
    pub fn code(&self) -> &'static str {
        error_codes::INVALID_PAYLOAD
    }
}
