use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Map, Value, json},
};

use fluxlive_live::{ActionResult, ComponentAuth, ComponentDef, Cx, LiveComponent};

use crate::parse_args;

/// Room-shared counter. The authoritative count lives in the room
/// scratchpad so it survives unmounts (until room destruction) and every
/// member converges on the same value.
pub static COUNTER: ComponentDef = ComponentDef {
    name: "Counter",
    public_actions: &["increment", "decrement", "reset"],
    auth: ComponentAuth::OPEN,
    action_auth: &[],
    default_state: defaults,
};

fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("count".into(), json!(0));
    map.insert("lastUpdatedBy".into(), Value::Null);
    map
}

#[derive(Debug, Deserialize)]
struct StepArgs {
    #[serde(default = "default_step")]
    amount: i64,
}

fn default_step() -> i64 {
    1
}

pub struct Counter;

#[async_trait]
impl LiveComponent for Counter {
    fn def(&self) -> &'static ComponentDef {
        &COUNTER
    }

    fn on_mount(&mut self, cx: &mut Cx<'_>) {
        // Pick up the shared value so the mount flush already shows it.
        if let Some(count) = cx.room_get("count") {
            cx.set_state(json!({ "count": count }));
        }
    }

    async fn call(&mut self, cx: &mut Cx<'_>, action: &str, payload: Value) -> ActionResult {
        let step = match action {
            "increment" => parse_args::<StepArgs>(payload)?.amount,
            "decrement" => -parse_args::<StepArgs>(payload)?.amount,
            "reset" => {
                return Ok(self.apply(cx, 0));
            },
            _ => return Err(fluxlive_live::ActionError::invalid_payload(action)),
        };

        let count = match cx.room().map(str::to_string) {
            Some(room) => cx
                .rooms()
                .state_update(&room, "count", |old| {
                    let current = old.and_then(Value::as_i64).unwrap_or(0);
                    json!(current + step)
                })
                .as_i64()
                .unwrap_or(step),
            None => cx.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + step,
        };

        Ok(self.apply(cx, count))
    }
}

impl Counter {
    fn apply(&self, cx: &mut Cx<'_>, count: i64) -> Value {
        if cx.room().is_some() {
            cx.room_set("count", json!(count));
        }
        cx.emit_room_event_with_state(
            "COUNT_CHANGED",
            json!({ "count": count }),
            json!({ "count": count, "lastUpdatedBy": cx.user_id() }),
        );
        json!({ "count": count })
    }
}
