use std::{collections::HashMap, sync::Arc};

use {
    dashmap::DashMap,
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
};

use {
    fluxlive_auth::{AuthContext, TokenGuard},
    fluxlive_config::LiveConfig,
    fluxlive_protocol::{
        AuthPayload, Envelope, MessageKind, ROOM_RELAY, SYSTEM_COMPONENT, error_codes, now_ms,
    },
};

use crate::{
    bus::{BusStats, RoomEvent, RoomEventBus},
    component::{ComponentDef, LiveComponent, QueuedEvent},
    error::{Error, Result},
    instance::InstanceCell,
    registry::ComponentRegistry,
    rooms::{RoomManager, RoomMessage},
    sink::ClientSink,
};

// ── Shared services ──────────────────────────────────────────────────────────

/// The runtime's shared interior: room manager, event bus, the global
/// instance index, and configuration. Handed by reference to dispatch
/// contexts and the registry.
pub struct Services {
    pub rooms: Arc<RoomManager>,
    pub bus: RoomEventBus,
    pub config: LiveConfig,
    pub(crate) instances: DashMap<String, Arc<InstanceCell>>,
}

impl Services {
    #[must_use]
    pub fn instance(&self, id: &str) -> Option<Arc<InstanceCell>> {
        self.instances.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Fan one room event out: server-side handlers first (synchronously,
    /// in registration order), then BROADCAST frames to every member's
    /// connection except the emitter. Returns how many frames were
    /// accepted.
    pub fn dispatch_event(
        &self,
        room: &str,
        name: &str,
        payload: Value,
        emitter: Option<&str>,
    ) -> usize {
        self.bus.record_emitted();
        let event = RoomEvent {
            room: room.to_string(),
            name: name.to_string(),
            payload,
            emitter: emitter.map(str::to_string),
        };
        self.bus.dispatch_local(&event, emitter);

        let frame_component = emitter.unwrap_or(ROOM_RELAY);
        let mut notified = 0;
        for member in self.rooms.members(room) {
            if emitter.is_some_and(|id| id == member) {
                continue;
            }
            let Some(cell) = self.instance(&member) else {
                continue;
            };
            let frame = Envelope::broadcast(frame_component, room, &event.name, event.payload.clone());
            if cell.send(frame) {
                self.bus.record_delivered();
                notified += 1;
            } else {
                self.bus.record_dropped();
            }
        }
        notified
    }

    pub(crate) fn dispatch_queued(&self, emitter: &str, events: Vec<QueuedEvent>) {
        for event in events {
            self.dispatch_event(&event.room, &event.name, event.payload, Some(emitter));
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub members: usize,
    #[serde(rename = "stateKeys")]
    pub state_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub rooms: HashMap<String, RoomStats>,
    pub events: BusStats,
}

// ── Runtime ──────────────────────────────────────────────────────────────────

struct ConnEntry {
    sink: Arc<dyn ClientSink>,
    auth: AuthContext,
}

/// The live-component runtime: one value owning the registry, the room
/// manager, and the event bus. The transport layer holds it in an `Arc`
/// and calls [`handle_frame`](Self::handle_frame) for every decoded
/// inbound envelope.
pub struct LiveRuntime {
    services: Arc<Services>,
    registry: ComponentRegistry,
    guard: Arc<dyn TokenGuard>,
    connections: DashMap<String, ConnEntry>,
}

impl LiveRuntime {
    #[must_use]
    pub fn new(config: LiveConfig, guard: Arc<dyn TokenGuard>) -> Self {
        let rooms = Arc::new(RoomManager::new(
            config.room_destruction_grace(),
            config.max_chat_messages_per_room,
        ));
        Self {
            services: Arc::new(Services {
                rooms,
                bus: RoomEventBus::new(),
                config,
                instances: DashMap::new(),
            }),
            registry: ComponentRegistry::new(),
            guard,
            connections: DashMap::new(),
        }
    }

    /// Register a component constructor under its declared name. Called at
    /// startup, before the first connection.
    pub fn register(
        &self,
        def: &'static ComponentDef,
        ctor: impl Fn() -> Box<dyn LiveComponent> + Send + Sync + 'static,
    ) {
        self.registry.register(def, ctor);
    }

    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        self.registry.component_names()
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    /// Attach a freshly opened connection. Connections start
    /// unauthenticated.
    pub fn connect(&self, sink: Arc<dyn ClientSink>) {
        let conn_id = sink.connection_id().to_string();
        self.connections.insert(conn_id, ConnEntry {
            sink,
            auth: AuthContext::unauthenticated(),
        });
    }

    /// Tear down a connection: unmount every instance it owns (outbound
    /// frames suppressed) and forget its auth state.
    pub async fn disconnect(&self, conn_id: &str) {
        self.registry
            .cleanup_connection(&self.services, conn_id)
            .await;
        self.connections.remove(conn_id);
    }

    /// The connection's current AuthContext (the unauthenticated sentinel
    /// when it never sent AUTH).
    #[must_use]
    pub fn connection_auth(&self, conn_id: &str) -> AuthContext {
        self.connections
            .get(conn_id)
            .map(|entry| entry.auth.clone())
            .unwrap_or_default()
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    /// Route one decoded, validated envelope. Unknown connections are
    /// dropped with a log line; every client-visible failure is sent back
    /// as a correlated ERROR frame instead of surfacing here.
    pub async fn handle_frame(&self, conn_id: &str, envelope: Envelope) {
        let Some((sink, auth)) = self
            .connections
            .get(conn_id)
            .map(|entry| (Arc::clone(&entry.sink), entry.auth.clone()))
        else {
            warn!(conn_id, kind = ?envelope.kind, "frame for unknown connection");
            return;
        };

        match envelope.kind {
            MessageKind::Mount => {
                self.registry
                    .mount(&self.services, &sink, auth, envelope)
                    .await;
            },
            MessageKind::Unmount => {
                self.registry
                    .unmount(&self.services, &sink, conn_id, envelope)
                    .await;
            },
            MessageKind::CallAction => {
                self.registry
                    .call_action(&self.services, &sink, conn_id, envelope)
                    .await;
            },
            MessageKind::PropertyUpdate => {
                self.registry
                    .property_update(&self.services, &sink, conn_id, envelope)
                    .await;
            },
            MessageKind::Auth => {
                self.authenticate(conn_id, &sink, envelope).await;
            },
            kind => {
                debug!(conn_id, ?kind, "ignoring client frame of server-only kind");
            },
        }
    }

    async fn authenticate(&self, conn_id: &str, sink: &Arc<dyn ClientSink>, envelope: Envelope) {
        let request_id = envelope.request_id.clone();
        let token = match AuthPayload::from_value(&envelope.payload) {
            Ok(payload) => payload.token,
            Err(_) => {
                sink.send(Envelope::error(
                    SYSTEM_COMPONENT,
                    error_codes::INVALID_PAYLOAD,
                    "AUTH payload requires a token",
                    request_id,
                ));
                return;
            },
        };

        let deadline = self.services.config.auth_timeout();
        let validated = tokio::time::timeout(deadline, self.guard.validate(&token)).await;
        match validated {
            Err(_) => {
                warn!(conn_id, "guard validation timed out");
                sink.send(Envelope::error(
                    SYSTEM_COMPONENT,
                    error_codes::AUTH_TIMEOUT,
                    "authentication timed out",
                    request_id,
                ));
            },
            Ok(Err(err)) => {
                // Prior context is preserved on failure.
                debug!(conn_id, error = %err, "token rejected");
                sink.send(Envelope::error(
                    SYSTEM_COMPONENT,
                    error_codes::AUTH_INVALID,
                    "invalid token",
                    request_id,
                ));
            },
            Ok(Ok(context)) => {
                if let Some(mut entry) = self.connections.get_mut(conn_id) {
                    entry.auth = context.clone();
                }
                self.registry
                    .auth_changed(&self.services, conn_id, context.clone())
                    .await;
                if envelope.expect_response
                    && let Some(request_id) = request_id
                {
                    sink.send(Envelope::action_response(
                        SYSTEM_COMPONENT,
                        request_id,
                        serde_json::json!({
                            "authenticated": true,
                            "userId": context.subject,
                        }),
                    ));
                }
            },
        }
    }

    // ── Server-side injection (HTTP surface) ─────────────────────────────

    /// Inject an arbitrary event into a room under the `room-relay`
    /// sentinel (no sender exclusion). Returns the notified count.
    #[must_use]
    pub fn inject_room_event(&self, room: &str, event: &str, data: Value) -> usize {
        self.services.dispatch_event(room, event, data, None)
    }

    /// Append to the room's message log and fan out `message:new`.
    /// Returns the notified count.
    pub fn inject_room_message(
        &self,
        room: &str,
        user: Option<String>,
        text: String,
    ) -> Result<usize> {
        let message = RoomMessage {
            user,
            text,
            timestamp: now_ms(),
        };
        if !self.services.rooms.append_message(room, message.clone()) {
            return Err(Error::UnknownRoom {
                id: room.to_string(),
            });
        }
        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        Ok(self.services.dispatch_event(room, "message:new", payload, None))
    }

    pub fn room_messages(&self, room: &str) -> Result<Vec<RoomMessage>> {
        self.services
            .rooms
            .messages(room)
            .ok_or_else(|| Error::UnknownRoom {
                id: room.to_string(),
            })
    }

    // ── Introspection ────────────────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        let rooms = self
            .services
            .rooms
            .stats()
            .into_iter()
            .map(|(id, (members, state_keys))| {
                (id, RoomStats {
                    members,
                    state_keys,
                })
            })
            .collect();
        RuntimeStats {
            rooms,
            events: self.services.bus.stats(),
        }
    }

    /// Live instances of one component, process-wide.
    #[must_use]
    pub fn instance_count(&self, component: &str) -> usize {
        self.services
            .instances
            .iter()
            .filter(|entry| entry.def.name == component)
            .count()
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomManager {
        &self.services.rooms
    }

    /// Look up a live instance cell by id.
    #[must_use]
    pub fn instance(&self, id: &str) -> Option<Arc<InstanceCell>> {
        self.services.instance(id)
    }
}
