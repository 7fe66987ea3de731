use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Map, Value, json},
};

use {
    fluxlive_live::{
        ActionAuth, ActionError, ActionResult, ComponentAuth, ComponentDef, Cx, LiveComponent,
    },
    fluxlive_protocol::now_ms,
};

use crate::parse_args;

/// Admin-only panel over a demo user table. Mounting requires the `admin`
/// role; destructive actions additionally require per-action permissions.
pub static ADMIN_PANEL: ComponentDef = ComponentDef {
    name: "AdminPanel",
    public_actions: &["listUsers", "deleteUser", "restoreUsers"],
    auth: ComponentAuth::roles(&["admin"]),
    action_auth: &[
        ("deleteUser", ActionAuth::permissions(&["users.delete"])),
        ("restoreUsers", ActionAuth::permissions(&["users.write"])),
    ],
    default_state: defaults,
};

fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("users".into(), seed_users());
    map.insert("auditLog".into(), json!([]));
    map
}

fn seed_users() -> Value {
    json!([
        { "id": "1", "name": "Alice", "role": "admin" },
        { "id": "2", "name": "Bob", "role": "user" },
        { "id": "3", "name": "Carol", "role": "user" },
    ])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    user_id: String,
}

pub struct AdminPanel;

#[async_trait]
impl LiveComponent for AdminPanel {
    fn def(&self) -> &'static ComponentDef {
        &ADMIN_PANEL
    }

    async fn call(&mut self, cx: &mut Cx<'_>, action: &str, payload: Value) -> ActionResult {
        match action {
            "listUsers" => Ok(json!({ "users": cx.get("users").unwrap_or(json!([])) })),
            "deleteUser" => {
                let args: DeleteArgs = parse_args(payload)?;
                let users = cx
                    .get("users")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                let before = users.len();
                let users: Vec<Value> = users
                    .into_iter()
                    .filter(|u| u["id"] != json!(args.user_id))
                    .collect();
                if users.len() == before {
                    return Err(ActionError::failed(format!(
                        "no such user: {}",
                        args.user_id
                    )));
                }
                let audit = self.audit(cx, "deleteUser", &args.user_id);
                cx.set_state(json!({ "users": users, "auditLog": audit }));
                Ok(json!({ "deleted": args.user_id }))
            },
            "restoreUsers" => {
                let audit = self.audit(cx, "restoreUsers", "*");
                cx.set_state(json!({ "users": seed_users(), "auditLog": audit }));
                Ok(json!({ "restored": true }))
            },
            _ => Err(ActionError::invalid_payload(action)),
        }
    }
}

impl AdminPanel {
    fn audit(&self, cx: &Cx<'_>, action: &str, target: &str) -> Value {
        let mut log = cx
            .get("auditLog")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        log.push(json!({
            "action": action,
            "target": target,
            "by": cx.caller().subject,
            "at": now_ms(),
        }));
        Value::Array(log)
    }
}
