use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::Value,
    tracing::debug,
};

// ── Types ────────────────────────────────────────────────────────────────────

/// One entry in a room's bounded chat log.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

struct RoomSlot {
    inner: Mutex<RoomInner>,
}

struct RoomInner {
    members: HashSet<String>,
    scratchpad: HashMap<String, Value>,
    messages: VecDeque<RoomMessage>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Bumped on join and on empty-leave; a pending destruction only fires
    /// if the epoch it captured is still current.
    destroy_epoch: u64,
}

/// Per-room membership, scratchpad state, and lifecycle.
///
/// Rooms are created implicitly on first join. When the member set
/// empties, destruction is deferred by the grace period and cancelled if
/// a join lands inside the window, so the scratchpad survives re-joins
/// within the grace.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<RoomSlot>>>>,
    grace: Duration,
    max_messages: usize,
}

impl RoomManager {
    #[must_use]
    pub fn new(grace: Duration, max_messages: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            grace,
            max_messages,
        }
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Subscribe a component instance to a room. Idempotent; creates the
    /// room on first join and cancels any pending destruction.
    pub fn join(&self, room: &str, component_id: &str) {
        let slot = self.slot_or_create(room);
        if let Ok(mut inner) = slot.inner.lock() {
            inner.members.insert(component_id.to_string());
            inner.destroy_epoch += 1;
            inner.updated_at = Utc::now();
        }
    }

    /// Unsubscribe a component instance. When the member set empties, a
    /// deferred destruction is scheduled after the grace period.
    pub fn leave(&self, room: &str, component_id: &str) {
        let Some(slot) = self.slot(room) else {
            return;
        };
        let schedule = {
            let Ok(mut inner) = slot.inner.lock() else {
                return;
            };
            inner.members.remove(component_id);
            inner.updated_at = Utc::now();
            if inner.members.is_empty() {
                inner.destroy_epoch += 1;
                Some(inner.destroy_epoch)
            } else {
                None
            }
        };
        if let Some(epoch) = schedule {
            self.schedule_destruction(room.to_string(), epoch);
        }
    }

    /// Snapshot of the room's member component-ids. Fanout iterates this
    /// snapshot so joins and leaves may proceed concurrently.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        self.slot(room)
            .and_then(|slot| {
                slot.inner
                    .lock()
                    .ok()
                    .map(|inner| inner.members.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn exists(&self, room: &str) -> bool {
        self.slot(room).is_some()
    }

    // ── Scratchpad ───────────────────────────────────────────────────────

    #[must_use]
    pub fn state_get(&self, room: &str, key: &str) -> Option<Value> {
        let slot = self.slot(room)?;
        let inner = slot.inner.lock().ok()?;
        inner.scratchpad.get(key).cloned()
    }

    /// Write a scratchpad key. Creates the room if needed so components
    /// can stage shared state ahead of other members joining.
    pub fn state_set(&self, room: &str, key: &str, value: Value) {
        let slot = self.slot_or_create(room);
        if let Ok(mut inner) = slot.inner.lock() {
            inner.scratchpad.insert(key.to_string(), value);
            inner.updated_at = Utc::now();
        }
    }

    /// Read-modify-write on one scratchpad key, under the room lock.
    /// Returns the stored value.
    pub fn state_update(
        &self,
        room: &str,
        key: &str,
        f: impl FnOnce(Option<&Value>) -> Value,
    ) -> Value {
        let slot = self.slot_or_create(room);
        match slot.inner.lock() {
            Ok(mut inner) => {
                let next = f(inner.scratchpad.get(key));
                inner.scratchpad.insert(key.to_string(), next.clone());
                inner.updated_at = Utc::now();
                next
            },
            Err(_) => f(None),
        }
    }

    // ── Message log ──────────────────────────────────────────────────────

    /// Append to the room's bounded chat log. Returns false when the room
    /// does not exist.
    pub fn append_message(&self, room: &str, message: RoomMessage) -> bool {
        let Some(slot) = self.slot(room) else {
            return false;
        };
        let Ok(mut inner) = slot.inner.lock() else {
            return false;
        };
        if self.max_messages > 0 && inner.messages.len() == self.max_messages {
            inner.messages.pop_front();
        }
        inner.messages.push_back(message);
        inner.updated_at = Utc::now();
        true
    }

    #[must_use]
    pub fn messages(&self, room: &str) -> Option<Vec<RoomMessage>> {
        let slot = self.slot(room)?;
        let inner = slot.inner.lock().ok()?;
        Some(inner.messages.iter().cloned().collect())
    }

    // ── Stats ────────────────────────────────────────────────────────────

    /// (members, scratchpad keys) per live room.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, (usize, usize)> {
        let Ok(rooms) = self.rooms.read() else {
            return HashMap::new();
        };
        rooms
            .iter()
            .filter_map(|(id, slot)| {
                let inner = slot.inner.lock().ok()?;
                Some((id.clone(), (inner.members.len(), inner.scratchpad.len())))
            })
            .collect()
    }

    #[must_use]
    pub fn created_at(&self, room: &str) -> Option<DateTime<Utc>> {
        let slot = self.slot(room)?;
        slot.inner.lock().ok().map(|inner| inner.created_at)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn slot(&self, room: &str) -> Option<Arc<RoomSlot>> {
        self.rooms.read().ok()?.get(room).cloned()
    }

    fn slot_or_create(&self, room: &str) -> Arc<RoomSlot> {
        if let Some(slot) = self.slot(room) {
            return slot;
        }
        let mut rooms = match self.rooms.write() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(rooms.entry(room.to_string()).or_insert_with(|| {
            let now = Utc::now();
            Arc::new(RoomSlot {
                inner: Mutex::new(RoomInner {
                    members: HashSet::new(),
                    scratchpad: HashMap::new(),
                    messages: VecDeque::new(),
                    created_at: now,
                    updated_at: now,
                    destroy_epoch: 0,
                }),
            })
        }))
    }

    fn schedule_destruction(&self, room: String, epoch: u64) {
        let rooms = Arc::clone(&self.rooms);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Ok(mut map) = rooms.write() else {
                return;
            };
            let destroy = map.get(&room).is_some_and(|slot| {
                slot.inner
                    .lock()
                    .map(|inner| inner.members.is_empty() && inner.destroy_epoch == epoch)
                    .unwrap_or(false)
            });
            if destroy {
                map.remove(&room);
                debug!(room = %room, "empty room destroyed after grace period");
            }
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn manager(grace_ms: u64) -> RoomManager {
        RoomManager::new(Duration::from_millis(grace_ms), 3)
    }

    #[tokio::test]
    async fn join_is_idempotent_and_members_snapshot() {
        let rooms = manager(1000);
        rooms.join("lobby", "c1");
        rooms.join("lobby", "c1");
        rooms.join("lobby", "c2");

        let mut members = rooms.members("lobby");
        members.sort();
        assert_eq!(members, vec!["c1", "c2"]);
        assert!(rooms.members("nowhere").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_destroyed_after_grace() {
        let rooms = manager(200);
        rooms.join("temp", "c1");
        rooms.state_set("temp", "k", serde_json::json!(1));
        rooms.leave("temp", "c1");

        // Still alive inside the grace window.
        assert!(rooms.exists("temp"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!rooms.exists("temp"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_during_grace_cancels_destruction() {
        let rooms = manager(200);
        rooms.join("temp", "c1");
        rooms.state_set("temp", "count", serde_json::json!(7));
        rooms.leave("temp", "c1");

        tokio::time::sleep(Duration::from_millis(100)).await;
        rooms.join("temp", "c2");
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The scratchpad survived the near-destruction.
        assert!(rooms.exists("temp"));
        assert_eq!(rooms.state_get("temp", "count"), Some(serde_json::json!(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn second_emptying_reschedules() {
        let rooms = manager(200);
        rooms.join("temp", "c1");
        rooms.leave("temp", "c1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Rejoin cancels, leave again restarts the clock.
        rooms.join("temp", "c1");
        rooms.leave("temp", "c1");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rooms.exists("temp"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rooms.exists("temp"));
    }

    #[tokio::test]
    async fn scratchpad_update_is_read_modify_write() {
        let rooms = manager(1000);
        let next = rooms.state_update("r", "count", |old| {
            let current = old.and_then(Value::as_i64).unwrap_or(0);
            serde_json::json!(current + 1)
        });
        assert_eq!(next, serde_json::json!(1));
        let next = rooms.state_update("r", "count", |old| {
            let current = old.and_then(Value::as_i64).unwrap_or(0);
            serde_json::json!(current + 1)
        });
        assert_eq!(next, serde_json::json!(2));
    }

    #[tokio::test]
    async fn message_log_is_bounded() {
        let rooms = manager(1000);
        rooms.join("chat", "c1");
        for i in 0..5 {
            rooms.append_message("chat", RoomMessage {
                user: None,
                text: format!("m{i}"),
                timestamp: i,
            });
        }
        let messages = rooms.messages("chat").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text, "m2");
        assert_eq!(messages[2].text, "m4");
    }

    #[tokio::test]
    async fn append_to_unknown_room_is_rejected() {
        let rooms = manager(1000);
        assert!(!rooms.append_message("ghost", RoomMessage {
            user: None,
            text: "hello".into(),
            timestamp: 0,
        }));
    }
}
