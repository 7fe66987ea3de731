use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, RwLock},
};

use {
    futures::FutureExt,
    serde_json::Map,
    tracing::{debug, error, info, warn},
};

use {
    fluxlive_auth::AuthContext,
    fluxlive_protocol::{
        Envelope, MountPayload, PropertyUpdatePayload, ROOM_RELAY, SYSTEM_COMPONENT, error_codes,
    },
};

use crate::{
    component::{ComponentDef, Cx, LiveComponent},
    gate,
    instance::InstanceCell,
    runtime::Services,
    sink::ClientSink,
};

// ── Registry ─────────────────────────────────────────────────────────────────

type Constructor = Box<dyn Fn() -> Box<dyn LiveComponent> + Send + Sync>;

struct ComponentEntry {
    def: &'static ComponentDef,
    ctor: Constructor,
}

/// Name → constructor table plus per-connection mount bookkeeping.
///
/// The global id index lives in [`Services`] so the event bus can resolve
/// member ids without reaching back into the registry.
pub struct ComponentRegistry {
    constructors: RwLock<HashMap<String, ComponentEntry>>,
    conn_mounts: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            conn_mounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        def: &'static ComponentDef,
        ctor: impl Fn() -> Box<dyn LiveComponent> + Send + Sync + 'static,
    ) {
        let mut constructors = match self.constructors.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        constructors.insert(def.name.to_string(), ComponentEntry {
            def,
            ctor: Box::new(ctor),
        });
    }

    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    // ── Mount ────────────────────────────────────────────────────────────

    pub(crate) async fn mount(
        &self,
        services: &Arc<Services>,
        sink: &Arc<dyn ClientSink>,
        caller: AuthContext,
        envelope: Envelope,
    ) {
        let request_id = envelope.request_id.clone();
        let mount = match MountPayload::from_value(&envelope.payload) {
            Ok(mount) => mount,
            Err(_) => {
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::INVALID_PAYLOAD,
                    "MOUNT payload requires a component name",
                    request_id,
                ));
                return;
            },
        };

        let constructed = {
            let Ok(constructors) = self.constructors.read() else {
                return;
            };
            let Some(entry) = constructors.get(&mount.component) else {
                debug!(component = %mount.component, "mount of unknown component");
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::COMPONENT_NOT_FOUND,
                    format!("unknown component: {}", mount.component),
                    request_id,
                ));
                return;
            };

            if let Err(denial) = gate::check_mount(entry.def, &caller) {
                debug!(
                    component = %mount.component,
                    code = denial.code(),
                    "mount denied by auth gate"
                );
                sink.send(Envelope::error(
                    &envelope.component_id,
                    denial.code(),
                    denial.message(),
                    request_id,
                ));
                return;
            }

            (entry.def, (entry.ctor)())
        };
        let (def, component) = constructed;

        // Default state with client props merged over it.
        let mut initial_state = (def.default_state)();
        initial_state.extend(mount.props.clone());

        let id = self.choose_id(services, &envelope.component_id);
        let user_id = envelope.user_id.clone().or_else(|| caller.subject.clone());
        let cell = InstanceCell::new(
            id.clone(),
            def,
            Arc::clone(sink),
            component,
            initial_state,
            mount.room.clone(),
            user_id,
            caller.clone(),
            services.config.max_state_history,
        );

        services.instances.insert(id.clone(), Arc::clone(&cell));
        if let Ok(mut mounts) = self.conn_mounts.lock() {
            mounts
                .entry(cell.conn_id.clone())
                .or_default()
                .insert(id.clone());
        }
        if let Some(room) = &mount.room {
            services.rooms.join(room, &id);
        }

        // Registration phase, then the mount STATE_UPDATE, then any events
        // the hook queued.
        let events = {
            let mut component = cell.component.lock().await;
            let mut cx = Cx::new(&cell, services, caller);
            component.on_mount(&mut cx);
            cx.finish().events
        };
        cell.flush();
        services.dispatch_queued(&cell.id, events);

        info!(
            component = def.name,
            instance = %id,
            conn_id = %cell.conn_id,
            room = mount.room.as_deref().unwrap_or(""),
            "component mounted"
        );

        if envelope.expect_response
            && let Some(request_id) = request_id
        {
            sink.send(Envelope::action_response(
                &id,
                request_id,
                serde_json::json!({ "componentId": id }),
            ));
        }
    }

    fn choose_id(&self, services: &Services, requested: &str) -> String {
        let reserved = requested.is_empty()
            || requested == SYSTEM_COMPONENT
            || requested == ROOM_RELAY;
        if !reserved && !services.instances.contains_key(requested) {
            return requested.to_string();
        }
        fluxlive_common::id::instance_id()
    }

    // ── Unmount ──────────────────────────────────────────────────────────

    pub(crate) async fn unmount(
        &self,
        services: &Arc<Services>,
        sink: &Arc<dyn ClientSink>,
        conn_id: &str,
        envelope: Envelope,
    ) {
        let request_id = envelope.request_id.clone();
        match services.instance(&envelope.component_id) {
            Some(cell) if cell.conn_id != conn_id => {
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::COMPONENT_NOT_FOUND,
                    "instance not owned by this connection",
                    request_id,
                ));
                return;
            },
            Some(cell) => {
                self.unmount_instance(services, &cell, false).await;
            },
            // Idempotent: unmounting an unknown instance succeeds quietly.
            None => {},
        }

        if envelope.expect_response
            && let Some(request_id) = request_id
        {
            sink.send(Envelope::action_response(
                &envelope.component_id,
                request_id,
                serde_json::json!({ "unmounted": true }),
            ));
        }
    }

    /// Shared destruction path. `suppress_frames` marks the instance dead
    /// before the destroy hook runs so nothing is written to a connection
    /// that is already gone; final room events still reach other members.
    async fn unmount_instance(
        &self,
        services: &Arc<Services>,
        cell: &Arc<InstanceCell>,
        suppress_frames: bool,
    ) {
        if suppress_frames {
            cell.destroy();
        }

        let events = {
            let mut component = cell.component.lock().await;
            let mut cx = Cx::new(cell, services, cell.auth());
            component.on_destroy(&mut cx);
            cx.finish().events
        };

        cell.destroy();
        for subscription in cell.take_subscriptions() {
            services.bus.unsubscribe(subscription);
        }
        services.dispatch_queued(&cell.id, events);

        for room in cell.joined_rooms() {
            services.rooms.leave(&room, &cell.id);
        }
        services.instances.remove(&cell.id);
        if let Ok(mut mounts) = self.conn_mounts.lock() {
            if let Some(set) = mounts.get_mut(&cell.conn_id) {
                set.remove(&cell.id);
                if set.is_empty() {
                    mounts.remove(&cell.conn_id);
                }
            }
        }

        info!(
            component = cell.def.name,
            instance = %cell.id,
            conn_id = %cell.conn_id,
            "component unmounted"
        );
    }

    // ── CALL_ACTION ──────────────────────────────────────────────────────

    pub(crate) async fn call_action(
        &self,
        services: &Arc<Services>,
        sink: &Arc<dyn ClientSink>,
        conn_id: &str,
        envelope: Envelope,
    ) {
        let request_id = envelope.request_id.clone();
        let Some(action) = envelope.action.clone() else {
            return;
        };
        let Some(cell) = self.owned_instance(services, sink, conn_id, &envelope) else {
            return;
        };

        if !cell.def.is_public(&action) {
            debug!(
                component = cell.def.name,
                instance = %cell.id,
                action = %action,
                "action not in the public allow-list"
            );
            sink.send(Envelope::error(
                &cell.id,
                error_codes::ACTION_NOT_PUBLIC,
                format!("action not public: {action}"),
                request_id,
            ));
            return;
        }

        let caller = cell.auth();
        if let Err(denial) =
            gate::check_action(cell.def, &action, &caller, services.config.admin_permission_bypass)
        {
            debug!(
                component = cell.def.name,
                instance = %cell.id,
                action = %action,
                code = denial.code(),
                "action denied by auth gate"
            );
            sink.send(Envelope::error(
                &cell.id,
                denial.code(),
                denial.message(),
                request_id,
            ));
            return;
        }

        // Per-instance serialization: the lock spans the call and the
        // state flush that follows it.
        let mut component = cell.component.lock().await;
        if cell.is_destroyed() {
            sink.send(Envelope::error(
                &cell.id,
                error_codes::COMPONENT_NOT_FOUND,
                "instance already unmounted",
                request_id,
            ));
            return;
        }

        let mut cx = Cx::new(&cell, services, caller);
        let outcome = AssertUnwindSafe(component.call(&mut cx, &action, envelope.payload))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                let finished = cx.finish();
                if finished.changed {
                    cell.flush();
                }
                services.dispatch_queued(&cell.id, finished.events);
                if envelope.expect_response
                    && let Some(request_id) = request_id
                {
                    sink.send(Envelope::action_response(&cell.id, request_id, result));
                }
            },
            Ok(Err(action_error)) => {
                // Pending state deltas are discarded with the context.
                debug!(
                    component = cell.def.name,
                    instance = %cell.id,
                    action = %action,
                    code = action_error.code,
                    "action failed"
                );
                sink.send(Envelope::error(
                    &cell.id,
                    action_error.code,
                    action_error.message,
                    request_id,
                ));
            },
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    component = cell.def.name,
                    instance = %cell.id,
                    action = %action,
                    request_id = request_id.as_deref().unwrap_or(""),
                    user_id = cell.user_id.as_deref().unwrap_or(""),
                    detail = %detail,
                    "action handler panicked"
                );
                let message = if services.config.production {
                    "internal error".to_string()
                } else {
                    format!("action panicked: {detail}")
                };
                sink.send(Envelope::error(
                    &cell.id,
                    error_codes::INTERNAL_ERROR,
                    message,
                    request_id,
                ));
            },
        }
    }

    // ── PROPERTY_UPDATE ──────────────────────────────────────────────────

    /// The synthetic `setValue({key, value})` action, with the same auth
    /// discipline and the same per-instance serialization as real actions.
    pub(crate) async fn property_update(
        &self,
        services: &Arc<Services>,
        sink: &Arc<dyn ClientSink>,
        conn_id: &str,
        envelope: Envelope,
    ) {
        let request_id = envelope.request_id.clone();
        let update = match PropertyUpdatePayload::from_value(&envelope.payload) {
            Ok(update) => update,
            Err(_) => {
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::INVALID_PAYLOAD,
                    "PROPERTY_UPDATE payload requires key and value",
                    request_id,
                ));
                return;
            },
        };
        let Some(cell) = self.owned_instance(services, sink, conn_id, &envelope) else {
            return;
        };

        if !cell.def.has_state_key(&update.key) {
            sink.send(Envelope::error(
                &cell.id,
                error_codes::INVALID_PAYLOAD,
                format!("unknown state key: {}", update.key),
                request_id,
            ));
            return;
        }

        let caller = cell.auth();
        if let Err(denial) = gate::check_action(
            cell.def,
            "setValue",
            &caller,
            services.config.admin_permission_bypass,
        ) {
            sink.send(Envelope::error(
                &cell.id,
                denial.code(),
                denial.message(),
                request_id,
            ));
            return;
        }

        let _component = cell.component.lock().await;
        if cell.is_destroyed() {
            return;
        }
        let mut delta = Map::new();
        delta.insert(update.key.clone(), update.value.clone());
        if cell.apply_delta(delta) {
            cell.flush();
        }

        if envelope.expect_response
            && let Some(request_id) = request_id
        {
            sink.send(Envelope::action_response(
                &cell.id,
                request_id,
                serde_json::json!({ "key": update.key, "value": update.value }),
            ));
        }
    }

    // ── Disconnect cleanup ───────────────────────────────────────────────

    /// Unmount everything a closed connection owned. Frames to the dead
    /// socket are suppressed; room events from destroy hooks still fan out
    /// to surviving members.
    pub(crate) async fn cleanup_connection(&self, services: &Arc<Services>, conn_id: &str) {
        let ids: Vec<String> = self
            .conn_mounts
            .lock()
            .ok()
            .and_then(|mut mounts| mounts.remove(conn_id))
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for id in ids {
            if let Some(cell) = services.instance(&id) {
                self.unmount_instance(services, &cell, true).await;
            }
        }
    }

    // ── Auth replacement ─────────────────────────────────────────────────

    /// A connection's AuthContext was replaced: update every mounted
    /// instance and give each component its re-initialization hook.
    pub(crate) async fn auth_changed(
        &self,
        services: &Arc<Services>,
        conn_id: &str,
        context: AuthContext,
    ) {
        let ids: Vec<String> = self
            .conn_mounts
            .lock()
            .ok()
            .and_then(|mounts| mounts.get(conn_id).cloned())
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for id in ids {
            let Some(cell) = services.instance(&id) else {
                continue;
            };
            cell.replace_auth(context.clone());
            let (changed, events) = {
                let mut component = cell.component.lock().await;
                let mut cx = Cx::new(&cell, services, context.clone());
                component.on_auth_changed(&mut cx);
                let finished = cx.finish();
                (finished.changed, finished.events)
            };
            if changed {
                cell.flush();
            }
            services.dispatch_queued(&cell.id, events);
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Resolve the envelope's instance and enforce connection ownership.
    /// Sends the ERROR frame itself when the lookup fails.
    fn owned_instance(
        &self,
        services: &Services,
        sink: &Arc<dyn ClientSink>,
        conn_id: &str,
        envelope: &Envelope,
    ) -> Option<Arc<InstanceCell>> {
        let cell = services.instance(&envelope.component_id);
        match cell {
            Some(cell) if cell.conn_id == conn_id => Some(cell),
            Some(_) => {
                warn!(
                    conn_id,
                    instance = %envelope.component_id,
                    "instance not owned by this connection"
                );
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::COMPONENT_NOT_FOUND,
                    "instance not owned by this connection",
                    envelope.request_id.clone(),
                ));
                None
            },
            None => {
                sink.send(Envelope::error(
                    &envelope.component_id,
                    error_codes::COMPONENT_NOT_FOUND,
                    format!("unknown instance: {}", envelope.component_id),
                    envelope.request_id.clone(),
                ));
                None
            },
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
