use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use {serde::Serialize, serde_json::Value, tracing::warn};

use crate::instance::InstanceCell;

// ── Types ────────────────────────────────────────────────────────────────────

/// A named, payload-carrying message dispatched to the members of a room.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room: String,
    pub name: String,
    pub payload: Value,
    /// Component id of the emitting instance; `None` for server-injected
    /// events (`room-relay` on the wire).
    pub emitter: Option<String>,
}

/// Handle to one registered room-event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A handler invoked synchronously on the dispatch path. Receives the
/// owning instance cell (upgraded from a weak reference) and the event.
/// Must not block; state writes go through `InstanceCell::update_state`.
pub type RoomEventCallback = Arc<dyn Fn(&Arc<InstanceCell>, &RoomEvent) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    cell: Weak<InstanceCell>,
    callback: RoomEventCallback,
}

/// Cumulative delivery counters, exposed through the stats surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BusStats {
    pub emitted: u64,
    pub delivered: u64,
    pub dropped: u64,
}

// ── Bus ──────────────────────────────────────────────────────────────────────

/// Registration table and local-dispatch half of the room event bus.
///
/// Handlers are keyed by `(room, event)` and held through weak references,
/// so a destroyed instance's handlers drop out deterministically. Remote
/// fanout (BROADCAST frames to member connections) lives in
/// [`crate::runtime::Services::dispatch_event`], which composes this table
/// with the room manager's member snapshots.
#[derive(Default)]
pub struct RoomEventBus {
    handlers: Mutex<HashMap<(String, String), Vec<HandlerEntry>>>,
    index: Mutex<HashMap<u64, (String, String)>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RoomEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `(room, event)`. Invocation order is
    /// registration order.
    pub fn subscribe(
        &self,
        room: &str,
        event: &str,
        cell: &Arc<InstanceCell>,
        callback: RoomEventCallback,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = (room.to_string(), event.to_string());
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.entry(key.clone()).or_default().push(HandlerEntry {
                id,
                cell: Arc::downgrade(cell),
                callback,
            });
        }
        if let Ok(mut index) = self.index.lock() {
            index.insert(id, key);
        }
        SubscriptionId(id)
    }

    /// Remove one registration. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some(key) = self.index.lock().ok().and_then(|mut i| i.remove(&id.0)) else {
            return;
        };
        if let Ok(mut handlers) = self.handlers.lock() {
            if let Some(entries) = handlers.get_mut(&key) {
                entries.retain(|entry| entry.id != id.0);
                if entries.is_empty() {
                    handlers.remove(&key);
                }
            }
        }
    }

    /// Invoke every live handler registered for the event, in registration
    /// order, excluding the emitter's own handlers. A panicking handler is
    /// caught and logged; siblings still fire. Returns how many handlers
    /// ran.
    pub fn dispatch_local(&self, event: &RoomEvent, exclude: Option<&str>) -> usize {
        let key = (event.room.clone(), event.name.clone());
        let snapshot: Vec<(u64, Weak<InstanceCell>, RoomEventCallback)> = {
            let Ok(mut handlers) = self.handlers.lock() else {
                return 0;
            };
            let Some(entries) = handlers.get_mut(&key) else {
                return 0;
            };
            // Prune registrations whose instance is gone.
            entries.retain(|entry| entry.cell.strong_count() > 0);
            entries
                .iter()
                .map(|e| (e.id, e.cell.clone(), Arc::clone(&e.callback)))
                .collect()
        };

        let mut invoked = 0;
        for (_, weak, callback) in snapshot {
            let Some(cell) = weak.upgrade() else {
                continue;
            };
            if cell.is_destroyed() {
                continue;
            }
            if exclude.is_some_and(|id| id == cell.id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(&cell, event))).is_err() {
                warn!(
                    room = %event.room,
                    event = %event.name,
                    instance = %cell.id,
                    "room event handler panicked; siblings unaffected"
                );
            } else {
                invoked += 1;
            }
        }
        invoked
    }

    /// Whether anything is registered for `(room, event)`.
    #[must_use]
    pub fn has_handlers(&self, room: &str, event: &str) -> bool {
        self.handlers
            .lock()
            .map(|h| h.contains_key(&(room.to_string(), event.to_string())))
            .unwrap_or(false)
    }

    // ── Counters ─────────────────────────────────────────────────────────

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
