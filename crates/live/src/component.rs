use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tracing::warn,
};

use fluxlive_auth::AuthContext;

use crate::{
    bus::{RoomEventCallback, SubscriptionId},
    error::ActionError,
    instance::InstanceCell,
    runtime::Services,
};

pub type ActionResult<T = Value> = Result<T, ActionError>;

// ── Declarative policies ─────────────────────────────────────────────────────

/// Component-level auth policy, declared at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentAuth {
    /// Mounting requires an authenticated connection.
    pub required: bool,
    /// Roles the caller must hold to mount.
    pub roles: &'static [&'static str],
}

impl ComponentAuth {
    /// No requirements: any connection may mount.
    pub const OPEN: Self = Self {
        required: false,
        roles: &[],
    };

    /// Authenticated connections only.
    pub const AUTHENTICATED: Self = Self {
        required: true,
        roles: &[],
    };

    #[must_use]
    pub const fn roles(roles: &'static [&'static str]) -> Self {
        Self {
            required: true,
            roles,
        }
    }
}

/// Per-action auth policy. Actions without an entry inherit the
/// component policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionAuth {
    pub roles: &'static [&'static str],
    pub permissions: &'static [&'static str],
}

impl ActionAuth {
    #[must_use]
    pub const fn permissions(permissions: &'static [&'static str]) -> Self {
        Self {
            roles: &[],
            permissions,
        }
    }
}

// ── Component definition ─────────────────────────────────────────────────────

/// The compile-time face of a component: its name, the closed set of
/// actions reachable from the wire, its auth policies, and its default
/// state shape. Registered with the registry alongside a constructor.
pub struct ComponentDef {
    pub name: &'static str,
    /// The allow-list. Anything not named here is unreachable from the
    /// wire and dispatch rejects it with `ACTION_NOT_PUBLIC`.
    pub public_actions: &'static [&'static str],
    pub auth: ComponentAuth,
    pub action_auth: &'static [(&'static str, ActionAuth)],
    /// Initial state shape and default values. Mount merges client props
    /// over this; PROPERTY_UPDATE validates keys against it.
    pub default_state: fn() -> Map<String, Value>,
}

impl ComponentDef {
    #[must_use]
    pub fn is_public(&self, action: &str) -> bool {
        self.public_actions.contains(&action)
    }

    #[must_use]
    pub fn action_policy(&self, action: &str) -> Option<&ActionAuth> {
        self.action_auth
            .iter()
            .find(|(name, _)| *name == action)
            .map(|(_, policy)| policy)
    }

    /// Whether `key` is part of the declared state shape.
    #[must_use]
    pub fn has_state_key(&self, key: &str) -> bool {
        (self.default_state)().contains_key(key)
    }
}

// ── Component trait ──────────────────────────────────────────────────────────

/// A server-resident component: state lives in the hosting
/// [`InstanceCell`]; the implementation supplies behavior.
///
/// `call` receives the action name (already checked against the
/// allow-list) and its decoded payload. Implementations typically parse
/// the pair into a crate-local action enum and switch on it. State
/// mutations go through the context and flush as a single STATE_UPDATE
/// when the dispatch completes.
#[async_trait]
pub trait LiveComponent: Send + 'static {
    fn def(&self) -> &'static ComponentDef;

    /// Registration phase, run once after the instance is constructed and
    /// has joined its room. Register room-event handlers here.
    fn on_mount(&mut self, cx: &mut Cx<'_>) {
        let _ = cx;
    }

    /// Handle one public action.
    async fn call(&mut self, cx: &mut Cx<'_>, action: &str, payload: Value) -> ActionResult;

    /// The connection's AuthContext was replaced (AUTH frame). Components
    /// that cache identity-derived state may re-initialize here.
    fn on_auth_changed(&mut self, cx: &mut Cx<'_>) {
        let _ = cx;
    }

    /// Invoked by the registry before the instance is dropped. May emit a
    /// final room event.
    fn on_destroy(&mut self, cx: &mut Cx<'_>) {
        let _ = cx;
    }
}

// ── Dispatch context ─────────────────────────────────────────────────────────

pub(crate) struct QueuedEvent {
    pub room: String,
    pub name: String,
    pub payload: Value,
}

pub(crate) struct CxOutcome {
    pub changed: bool,
    pub events: Vec<QueuedEvent>,
}

/// Handle given to component code for one dispatch (mount, action,
/// auth-change, destroy).
///
/// State writes and event emissions are buffered: deltas coalesce into at
/// most one STATE_UPDATE per dispatch, and room events dispatch after the
/// state flush so remote subscribers observe the emitter's post-state.
/// Room joins and handler registrations take effect immediately, which is
/// why a join-then-emit within one dispatch includes the joiner in the
/// member set.
pub struct Cx<'a> {
    cell: &'a Arc<InstanceCell>,
    services: &'a Arc<Services>,
    caller: AuthContext,
    delta: Map<String, Value>,
    silent_delta: Map<String, Value>,
    events: Vec<QueuedEvent>,
}

impl<'a> Cx<'a> {
    pub(crate) fn new(
        cell: &'a Arc<InstanceCell>,
        services: &'a Arc<Services>,
        caller: AuthContext,
    ) -> Self {
        Self {
            cell,
            services,
            caller,
            delta: Map::new(),
            silent_delta: Map::new(),
            events: Vec::new(),
        }
    }

    // ── Identity ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.cell.id
    }

    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.cell.room.as_deref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.cell.user_id.as_deref()
    }

    /// The AuthContext attached to this invocation.
    #[must_use]
    pub fn caller(&self) -> &AuthContext {
        &self.caller
    }

    // ── State ────────────────────────────────────────────────────────────

    /// Current state as seen by this dispatch: committed state with the
    /// pending deltas merged over it.
    #[must_use]
    pub fn state(&self) -> Map<String, Value> {
        let mut state = self.cell.state_snapshot();
        for (key, value) in &self.silent_delta {
            state.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.delta {
            state.insert(key.clone(), value.clone());
        }
        state
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.delta.get(key) {
            return Some(value.clone());
        }
        if let Some(value) = self.silent_delta.get(key) {
            return Some(value.clone());
        }
        self.cell.state_snapshot().get(key).cloned()
    }

    /// Merge a partial state object. Flushed as one STATE_UPDATE when the
    /// dispatch completes.
    pub fn set_state(&mut self, delta: Value) {
        match delta {
            Value::Object(map) => self.delta.extend(map),
            other => warn!(
                component = self.cell.def.name,
                instance = %self.cell.id,
                "set_state expects an object, got {other}"
            ),
        }
    }

    /// Merge a partial state object without emitting a STATE_UPDATE.
    pub fn set_state_silently(&mut self, delta: Value) {
        match delta {
            Value::Object(map) => self.silent_delta.extend(map),
            other => warn!(
                component = self.cell.def.name,
                instance = %self.cell.id,
                "set_state_silently expects an object, got {other}"
            ),
        }
    }

    // ── Room events ──────────────────────────────────────────────────────

    /// Emit a room event to this instance's room. Dispatched after the
    /// state flush; the emitter is excluded from delivery. No-op when the
    /// instance has no room.
    pub fn emit_room_event(&mut self, name: impl Into<String>, payload: Value) {
        let Some(room) = self.cell.room.clone() else {
            return;
        };
        self.events.push(QueuedEvent {
            room,
            name: name.into(),
            payload,
        });
    }

    /// Atomically apply a state delta and emit a room event carrying the
    /// post-state through the next STATE_UPDATE.
    pub fn emit_room_event_with_state(
        &mut self,
        name: impl Into<String>,
        payload: Value,
        delta: Value,
    ) {
        self.set_state(delta);
        self.emit_room_event(name, payload);
    }

    /// Register a handler for `event` in this instance's room. The handler
    /// runs synchronously on the fanout path, outside the instance lock,
    /// and must not block. Dropped automatically on destroy.
    pub fn on_room_event(
        &mut self,
        event: impl Into<String>,
        handler: RoomEventCallback,
    ) -> Option<SubscriptionId> {
        let room = self.cell.room.clone()?;
        Some(self.subscribe_in(&room, &event.into(), handler))
    }

    /// Remove a handler registered through this instance.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.services.bus.unsubscribe(id);
        self.cell.forget_subscription(id);
    }

    /// Operations on an explicit room (not necessarily the mount room).
    #[must_use]
    pub fn in_room(&mut self, id: impl Into<String>) -> RoomCx<'_, 'a> {
        RoomCx {
            room: id.into(),
            cx: self,
        }
    }

    // ── Room state scratchpad ────────────────────────────────────────────

    /// Read a scratchpad key from this instance's room.
    #[must_use]
    pub fn room_get(&self, key: &str) -> Option<Value> {
        let room = self.cell.room.as_deref()?;
        self.services.rooms.state_get(room, key)
    }

    /// Write a scratchpad key in this instance's room. No-op without a room.
    pub fn room_set(&self, key: &str, value: Value) {
        if let Some(room) = self.cell.room.as_deref() {
            self.services.rooms.state_set(room, key, value);
        }
    }

    /// The room manager, for scratchpad access to explicit rooms.
    #[must_use]
    pub fn rooms(&self) -> &crate::rooms::RoomManager {
        &self.services.rooms
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn subscribe_in(
        &mut self,
        room: &str,
        event: &str,
        handler: RoomEventCallback,
    ) -> SubscriptionId {
        let id = self
            .services
            .bus
            .subscribe(room, event, self.cell, handler);
        self.cell.remember_subscription(id);
        id
    }

    /// Apply buffered deltas to the cell and hand back what happened. The
    /// caller decides whether to flush a frame and dispatches the events.
    pub(crate) fn finish(self) -> CxOutcome {
        let mut changed = false;
        if !self.silent_delta.is_empty() {
            self.cell.apply_delta(self.silent_delta);
        }
        if !self.delta.is_empty() {
            changed = self.cell.apply_delta(self.delta);
        }
        CxOutcome {
            changed,
            events: self.events,
        }
    }
}

/// Scoped operations on one explicit room: `cx.in_room("lobby").join()`.
pub struct RoomCx<'b, 'a> {
    room: String,
    cx: &'b mut Cx<'a>,
}

impl RoomCx<'_, '_> {
    /// Join this instance to the room. Immediate and idempotent; cancels
    /// any pending destruction of the room.
    pub fn join(&mut self) {
        self.cx
            .services
            .rooms
            .join(&self.room, &self.cx.cell.id);
        self.cx.cell.remember_room(&self.room);
    }

    /// Leave the room. Immediate; schedules deferred destruction when the
    /// member set empties.
    pub fn leave(&mut self) {
        self.cx
            .services
            .rooms
            .leave(&self.room, &self.cx.cell.id);
        self.cx.cell.forget_room(&self.room);
    }

    /// Emit an event into this room (queued until the dispatch completes).
    pub fn emit(&mut self, name: impl Into<String>, payload: Value) {
        self.cx.events.push(QueuedEvent {
            room: self.room.clone(),
            name: name.into(),
            payload,
        });
    }

    /// Register a handler for an event in this room.
    pub fn on(&mut self, event: impl Into<String>, handler: RoomEventCallback) -> SubscriptionId {
        let room = self.room.clone();
        self.cx.subscribe_in(&room, &event.into(), handler)
    }
}
