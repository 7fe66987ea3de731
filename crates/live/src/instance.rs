use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde_json::{Map, Value},
    tokio::sync::Mutex as AsyncMutex,
    tracing::debug,
};

use fluxlive_auth::AuthContext;
use fluxlive_protocol::Envelope;

use crate::{bus::SubscriptionId, component::ComponentDef, sink::ClientSink};

/// Host cell for one mounted component instance.
///
/// The cell owns what the runtime needs without locking the component
/// itself: the state map (with its bounded history), the auth context,
/// room membership bookkeeping, and the destroyed flag. The component
/// value sits behind its own async mutex; that lock is the per-instance
/// action serialization point.
pub struct InstanceCell {
    pub id: String,
    pub def: &'static ComponentDef,
    pub conn_id: String,
    /// The mount room, if any. Dynamic joins live in `joined_rooms`.
    pub room: Option<String>,
    pub user_id: Option<String>,
    auth: Mutex<AuthContext>,
    sink: Arc<dyn ClientSink>,
    state: Mutex<StateCell>,
    pub(crate) component: AsyncMutex<Box<dyn crate::component::LiveComponent>>,
    destroyed: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    joined_rooms: Mutex<HashSet<String>>,
}

struct StateCell {
    map: Map<String, Value>,
    history: VecDeque<Map<String, Value>>,
    max_history: usize,
}

impl InstanceCell {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        def: &'static ComponentDef,
        sink: Arc<dyn ClientSink>,
        component: Box<dyn crate::component::LiveComponent>,
        initial_state: Map<String, Value>,
        room: Option<String>,
        user_id: Option<String>,
        auth: AuthContext,
        max_history: usize,
    ) -> Arc<Self> {
        let joined = room.iter().cloned().collect();
        Arc::new(Self {
            conn_id: sink.connection_id().to_string(),
            id,
            def,
            room,
            user_id,
            auth: Mutex::new(auth),
            sink,
            state: Mutex::new(StateCell {
                map: initial_state,
                history: VecDeque::new(),
                max_history,
            }),
            component: AsyncMutex::new(component),
            destroyed: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            joined_rooms: Mutex::new(joined),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Mark the instance dead. All further flushes and emissions become
    /// no-ops. Idempotent.
    pub(crate) fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn auth(&self) -> AuthContext {
        self.auth
            .lock()
            .map(|guard| AuthContext::clone(&guard))
            .unwrap_or_default()
    }

    pub(crate) fn replace_auth(&self, context: AuthContext) {
        if let Ok(mut auth) = self.auth.lock() {
            *auth = context;
        }
    }

    // ── State ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn state_snapshot(&self) -> Map<String, Value> {
        self.state.lock().map(|s| s.map.clone()).unwrap_or_default()
    }

    /// Merge a delta into the state map. Returns whether anything actually
    /// changed. No-op on a destroyed instance.
    pub(crate) fn apply_delta(&self, delta: Map<String, Value>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let mut changed = false;
        for (key, value) in delta {
            if state.map.get(&key) != Some(&value) {
                state.map.insert(key, value);
                changed = true;
            }
        }
        changed
    }

    /// Send a STATE_UPDATE carrying the full current state to the owning
    /// connection and record the snapshot in the history ring. No-op on a
    /// destroyed instance.
    pub(crate) fn flush(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let snapshot = {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            let snapshot = state.map.clone();
            if state.max_history > 0 {
                if state.history.len() == state.max_history {
                    state.history.pop_front();
                }
                state.history.push_back(snapshot.clone());
            }
            snapshot
        };
        let accepted = self
            .sink
            .send(Envelope::state_update(&self.id, Value::Object(snapshot)));
        if !accepted {
            debug!(instance = %self.id, "state update dropped, connection degraded or gone");
        }
        accepted
    }

    /// Merge and flush in one step. Used by room-event handlers, which run
    /// outside the action path and outside the instance lock.
    pub fn update_state(&self, delta: Value) -> bool {
        let Value::Object(map) = delta else {
            return false;
        };
        if self.apply_delta(map) {
            return self.flush();
        }
        false
    }

    /// State snapshots retained for the stats surface, oldest first.
    #[must_use]
    pub fn state_history(&self) -> Vec<Map<String, Value>> {
        self.state
            .lock()
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Send a frame to the owning connection unless the instance is
    /// destroyed.
    pub(crate) fn send(&self, frame: Envelope) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.sink.send(frame)
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────

    pub(crate) fn remember_subscription(&self, id: SubscriptionId) {
        if self.is_destroyed() {
            return;
        }
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.push(id);
        }
    }

    pub(crate) fn forget_subscription(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.retain(|s| *s != id);
        }
    }

    pub(crate) fn take_subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscriptions
            .lock()
            .map(|mut subs| std::mem::take(&mut *subs))
            .unwrap_or_default()
    }

    pub(crate) fn remember_room(&self, room: &str) {
        if let Ok(mut rooms) = self.joined_rooms.lock() {
            rooms.insert(room.to_string());
        }
    }

    pub(crate) fn forget_room(&self, room: &str) {
        if let Ok(mut rooms) = self.joined_rooms.lock() {
            rooms.remove(room);
        }
    }

    #[must_use]
    pub fn joined_rooms(&self) -> Vec<String> {
        self.joined_rooms
            .lock()
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}
