use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Map, Value, json},
};

use {
    fluxlive_live::{
        ActionError, ActionResult, ComponentAuth, ComponentDef, Cx, LiveComponent, RoomEventCallback,
        RoomMessage, SubscriptionId,
    },
    fluxlive_protocol::now_ms,
};

use crate::parse_args;

/// Messages kept in the component's own state. The room-level log has its
/// own configured bound.
const LOCAL_MESSAGE_CAP: usize = 100;

/// Room chat: members exchange `message:new` events and mirror them into
/// their own state; the room manager keeps the shared bounded log that
/// late joiners and the HTTP surface read.
pub static CHAT_ROOM: ComponentDef = ComponentDef {
    name: "ChatRoom",
    public_actions: &["sendMessage", "switchRoom", "loadHistory"],
    auth: ComponentAuth::OPEN,
    action_auth: &[],
    default_state: defaults,
};

fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("messages".into(), json!([]));
    map.insert("activeRoom".into(), Value::Null);
    map
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SwitchArgs {
    room: String,
}

/// Mirror incoming `message:new` events into the instance's own state.
fn mirror_callback() -> RoomEventCallback {
    Arc::new(|cell, event| {
        let mut messages = cell
            .state_snapshot()
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        messages.push(event.payload.clone());
        if messages.len() > LOCAL_MESSAGE_CAP {
            messages.remove(0);
        }
        cell.update_state(json!({ "messages": messages }));
    })
}

/// The mirror subscription follows the active room; `switchRoom` moves it.
#[derive(Default)]
pub struct ChatRoom {
    mirror: Option<SubscriptionId>,
}

#[async_trait]
impl LiveComponent for ChatRoom {
    fn def(&self) -> &'static ComponentDef {
        &CHAT_ROOM
    }

    fn on_mount(&mut self, cx: &mut Cx<'_>) {
        let mount_room = cx.room().map(str::to_string);
        if let Some(room) = mount_room {
            cx.set_state_silently(json!({ "activeRoom": room }));
        }
        self.mirror = cx.on_room_event("message:new", mirror_callback());
    }

    async fn call(&mut self, cx: &mut Cx<'_>, action: &str, payload: Value) -> ActionResult {
        match action {
            "sendMessage" => {
                let args: SendArgs = parse_args(payload)?;
                if args.text.trim().is_empty() {
                    return Err(ActionError::invalid_payload("message text is empty"));
                }
                let Some(room) = self.active_room(cx) else {
                    return Err(ActionError::failed("not in a room"));
                };

                let message = RoomMessage {
                    user: cx.user_id().map(str::to_string),
                    text: args.text,
                    timestamp: now_ms(),
                };
                cx.rooms().append_message(&room, message.clone());
                let payload = serde_json::to_value(&message)?;

                let mut messages = cx
                    .get("messages")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                messages.push(payload.clone());
                if messages.len() > LOCAL_MESSAGE_CAP {
                    messages.remove(0);
                }
                cx.set_state(json!({ "messages": messages }));
                cx.in_room(room.as_str()).emit("message:new", payload);
                Ok(json!({ "sent": true }))
            },
            "switchRoom" => {
                let args: SwitchArgs = parse_args(payload)?;
                if let Some(previous) = self.active_room(cx)
                    && previous != args.room
                {
                    cx.in_room(previous).leave();
                }
                cx.in_room(args.room.as_str()).join();
                // The mirror must listen where the instance now lives.
                if let Some(stale) = self.mirror.take() {
                    cx.unsubscribe(stale);
                }
                self.mirror = Some(
                    cx.in_room(args.room.as_str())
                        .on("message:new", mirror_callback()),
                );
                // Deliberately silent: switching rooms is not a state change
                // the client needs a frame for.
                cx.set_state_silently(json!({ "activeRoom": args.room }));
                Ok(json!({ "room": args.room }))
            },
            "loadHistory" => {
                let Some(room) = self.active_room(cx) else {
                    return Ok(json!({ "messages": [] }));
                };
                let history = cx.rooms().messages(&room).unwrap_or_default();
                let history = serde_json::to_value(&history)?;
                cx.set_state(json!({ "messages": history }));
                Ok(json!({ "loaded": true }))
            },
            _ => Err(ActionError::invalid_payload(action)),
        }
    }
}

impl ChatRoom {
    fn active_room(&self, cx: &Cx<'_>) -> Option<String> {
        cx.get("activeRoom")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| cx.room().map(str::to_string))
    }
}
