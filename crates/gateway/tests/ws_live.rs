//! Wire-level tests: real sockets against a bound gateway, JSON frames
//! over tokio-tungstenite, HTTP injection with reqwest.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{net::TcpStream, time::timeout},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    fluxlive_auth::{InMemoryUserProvider, SessionStore, SessionTokenGuard},
    fluxlive_components::register_all,
    fluxlive_config::LiveConfig,
    fluxlive_gateway::AppState,
    fluxlive_live::LiveRuntime,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_app() -> SocketAddr {
    let config = LiveConfig::default();
    let sessions = Arc::new(SessionStore::new(config.session_lifetime()));
    let provider = Arc::new(InMemoryUserProvider::new());
    provider
        .seed("root", "super-secret", ["admin"], ["users.delete"])
        .unwrap();

    let guard = Arc::new(SessionTokenGuard::new(Arc::clone(&sessions)));
    let runtime = Arc::new(LiveRuntime::new(config.clone(), guard));
    register_all(&runtime);

    let state = AppState::new(runtime, sessions, provider, config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(fluxlive_gateway::server::serve_on(
        listener,
        state,
        std::future::pending(),
    ));
    addr
}

async fn ws_client(addr: SocketAddr) -> WsClient {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut WsClient, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("read ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn mount_frame(id: &str, component: &str, room: Option<&str>, user: &str) -> Value {
    json!({
        "type": "MOUNT",
        "componentId": id,
        "payload": { "component": component, "props": {}, "room": room },
        "timestamp": 0,
        "userId": user,
        "requestId": format!("mount-{id}"),
        "expectResponse": true,
    })
}

#[tokio::test]
async fn mount_streams_state_then_the_response() {
    let addr = spawn_app().await;
    let mut client = ws_client(addr).await;

    send(&mut client, mount_frame("c1", "Counter", None, "A")).await;

    let state_update = next_frame(&mut client).await;
    assert_eq!(state_update["type"], json!("STATE_UPDATE"));
    assert_eq!(state_update["componentId"], json!("c1"));
    assert_eq!(state_update["payload"]["state"]["count"], json!(0));

    let response = next_frame(&mut client).await;
    assert_eq!(response["type"], json!("ACTION_RESPONSE"));
    assert_eq!(response["responseId"], json!("mount-c1"));
    assert_eq!(response["payload"]["result"]["componentId"], json!("c1"));
}

#[tokio::test]
async fn call_action_round_trip_over_the_wire() {
    let addr = spawn_app().await;
    let mut client = ws_client(addr).await;
    send(&mut client, mount_frame("c1", "Counter", None, "A")).await;
    let _ = next_frame(&mut client).await; // state
    let _ = next_frame(&mut client).await; // mount response

    send(
        &mut client,
        json!({
            "type": "CALL_ACTION",
            "componentId": "c1",
            "action": "increment",
            "timestamp": 0,
            "requestId": "q1",
            "expectResponse": true,
        }),
    )
    .await;

    let state_update = next_frame(&mut client).await;
    assert_eq!(state_update["type"], json!("STATE_UPDATE"));
    assert_eq!(state_update["payload"]["state"]["count"], json!(1));

    let response = next_frame(&mut client).await;
    assert_eq!(response["responseId"], json!("q1"));
    assert_eq!(response["payload"]["result"]["count"], json!(1));
}

#[tokio::test]
async fn room_broadcast_reaches_the_other_socket() {
    let addr = spawn_app().await;
    let mut alice = ws_client(addr).await;
    let mut bob = ws_client(addr).await;

    send(&mut alice, mount_frame("ca", "Counter", Some("r"), "A")).await;
    let _ = next_frame(&mut alice).await;
    let _ = next_frame(&mut alice).await;
    send(&mut bob, mount_frame("cb", "Counter", Some("r"), "B")).await;
    let _ = next_frame(&mut bob).await;
    let _ = next_frame(&mut bob).await;

    send(
        &mut alice,
        json!({
            "type": "CALL_ACTION",
            "componentId": "ca",
            "action": "increment",
            "timestamp": 0,
        }),
    )
    .await;

    let broadcast = next_frame(&mut bob).await;
    assert_eq!(broadcast["type"], json!("BROADCAST"));
    assert_eq!(broadcast["componentId"], json!("ca"));
    assert_eq!(broadcast["payload"]["type"], json!("COUNT_CHANGED"));
    assert_eq!(broadcast["payload"]["data"]["count"], json!(1));

    // Alice sees only her own STATE_UPDATE.
    let update = next_frame(&mut alice).await;
    assert_eq!(update["type"], json!("STATE_UPDATE"));
    assert_eq!(update["payload"]["state"]["lastUpdatedBy"], json!("A"));
}

#[tokio::test]
async fn http_injection_notifies_every_member() {
    let addr = spawn_app().await;
    let mut clients = Vec::new();
    for i in 0..3 {
        let mut client = ws_client(addr).await;
        send(
            &mut client,
            mount_frame(&format!("c{i}"), "ChatRoom", Some("chat"), &format!("u{i}")),
        )
        .await;
        let _ = next_frame(&mut client).await;
        let _ = next_frame(&mut client).await;
        clients.push(client);
    }

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/rooms/chat/messages"))
        .json(&json!({ "user": "bot", "text": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["notified"], json!(3));

    for client in &mut clients {
        // Each member sees the relay broadcast; the handler-driven
        // STATE_UPDATE follows on the event queue.
        loop {
            let frame = next_frame(client).await;
            if frame["type"] == json!("BROADCAST") {
                assert_eq!(frame["componentId"], json!("room-relay"));
                assert_eq!(frame["payload"]["type"], json!("message:new"));
                assert_eq!(frame["payload"]["data"]["text"], json!("hi"));
                break;
            }
        }
    }

    let log: Value = http
        .get(format!("http://{addr}/rooms/chat/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(log["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_frames_get_an_error_without_dropping_the_connection() {
    let addr = spawn_app().await;
    let mut client = ws_client(addr).await;

    send(&mut client, json!({ "type": "EXPLODE", "componentId": "x" })).await;
    let error = next_frame(&mut client).await;
    assert_eq!(error["type"], json!("ERROR"));
    assert_eq!(error["payload"]["code"], json!("INVALID_PAYLOAD"));

    // The connection still works.
    send(&mut client, mount_frame("c1", "Counter", None, "A")).await;
    let state_update = next_frame(&mut client).await;
    assert_eq!(state_update["type"], json!("STATE_UPDATE"));
}

#[tokio::test]
async fn ws_auth_unlocks_gated_components() {
    let addr = spawn_app().await;
    let http = reqwest::Client::new();

    let login: Value = http
        .post(format!("http://{addr}/auth/login"))
        .json(&json!({ "username": "root", "password": "super-secret" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    let mut client = ws_client(addr).await;

    // Unauthenticated mount is refused.
    send(&mut client, mount_frame("ap", "AdminPanel", None, "root")).await;
    let error = next_frame(&mut client).await;
    assert_eq!(error["type"], json!("ERROR"));
    assert_eq!(error["payload"]["code"], json!("AUTH_REQUIRED"));

    // AUTH with the session token, then the mount succeeds.
    send(
        &mut client,
        json!({
            "type": "AUTH",
            "componentId": "system",
            "payload": { "token": token },
            "timestamp": 0,
            "requestId": "a1",
            "expectResponse": true,
        }),
    )
    .await;
    let auth_ok = next_frame(&mut client).await;
    assert_eq!(auth_ok["type"], json!("ACTION_RESPONSE"));
    assert_eq!(auth_ok["payload"]["result"]["authenticated"], json!(true));

    send(&mut client, mount_frame("ap", "AdminPanel", None, "root")).await;
    let state_update = next_frame(&mut client).await;
    assert_eq!(state_update["type"], json!("STATE_UPDATE"));
    assert_eq!(
        state_update["payload"]["state"]["users"]
            .as_array()
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn disconnect_frees_room_membership_for_stats() {
    let addr = spawn_app().await;
    let http = reqwest::Client::new();

    let mut client = ws_client(addr).await;
    send(&mut client, mount_frame("c1", "Counter", Some("r"), "A")).await;
    let _ = next_frame(&mut client).await;
    let _ = next_frame(&mut client).await;

    let stats: Value = http
        .get(format!("http://{addr}/rooms/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["rooms"]["r"]["members"], json!(1));

    drop(client);
    // Give the server a moment to run disconnect cleanup.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats: Value = http
        .get(format!("http://{addr}/rooms/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["rooms"]["r"]["members"], json!(0));
}
