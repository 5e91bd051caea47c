//! Integration tests for the WebSocket handshake, presence, relay and heartbeat.

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use chatezy_server::chat::relay::MessageRelay;
use chatezy_server::config::{Config, HeartbeatConfig};
use chatezy_server::error::ChatError;
use chatezy_server::uploads::store::{BlobStore, FsBlobStore};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base_url: String,
    addr: SocketAddr,
    jwt_secret: Vec<u8>,
}

async fn start_test_server() -> TestServer {
    start_test_server_with(HeartbeatConfig::default()).await
}

/// Helper: start the server on a random port with the given liveness timing.
async fn start_test_server_with(heartbeat: HeartbeatConfig) -> TestServer {
    start_custom_server(heartbeat, None).await
}

/// Attachment store that takes `delay` to write each file.
struct SlowBlobStore {
    inner: FsBlobStore,
    delay: Duration,
}

impl BlobStore for SlowBlobStore {
    fn save(&self, data: &[u8], extension_hint: &str) -> Result<String, ChatError> {
        std::thread::sleep(self.delay);
        self.inner.save(data, extension_hint)
    }

    fn remove(&self, reference: &str) -> Result<(), ChatError> {
        self.inner.remove(reference)
    }
}

async fn start_custom_server(
    heartbeat: HeartbeatConfig,
    upload_delay: Option<Duration>,
) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chatezy_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = chatezy_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let config = Config {
        data_dir: data_dir.clone(),
        heartbeat,
        ..Default::default()
    };
    let mut state = chatezy_server::state::AppState::new(db, jwt_secret.clone(), &config);
    if let Some(delay) = upload_delay {
        let blobs: Arc<dyn BlobStore> = Arc::new(SlowBlobStore {
            inner: FsBlobStore::new(&state.uploads_dir),
            delay,
        });
        state.relay = MessageRelay::new(state.connections.clone(), state.messages.clone(), blobs);
    }

    let app = chatezy_server::routes::build_router(state).expect("Failed to build router");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        jwt_secret,
    }
}

/// Register a user and return (user_id, token).
async fn register_user(base_url: &str, username: &str) -> (String, String) {
    let resp = reqwest::Client::new()
        .post(format!("{}/register", base_url))
        .json(&json!({ "username": username, "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {}", username);
    let body: Value = resp.json().await.unwrap();
    (
        body["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Next JSON text frame, skipping control frames. Panics after 2s.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Usernames in the next presence push.
async fn next_presence(ws: &mut WsStream) -> Vec<String> {
    loop {
        let value = next_json(ws).await;
        if let Some(online) = value.get("online") {
            return online
                .as_array()
                .unwrap()
                .iter()
                .map(|entry| entry["username"].as_str().unwrap().to_string())
                .collect();
        }
    }
}

/// Next chat push, skipping presence updates.
async fn next_chat(ws: &mut WsStream) -> Value {
    loop {
        let value = next_json(ws).await;
        if value.get("online").is_none() {
            return value;
        }
    }
}

/// Assert no chat push arrives within `window`.
async fn assert_no_chat(ws: &mut WsStream, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert!(value.get("online").is_some(), "Unexpected chat push: {}", value);
            }
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("Connection ended unexpectedly: {:?}", other),
        }
    }
}

/// Read until the server's Close frame and return its code.
async fn expect_close(ws: &mut WsStream) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) => panic!("Close frame without a code"),
            Some(Ok(_)) => continue,
            other => panic!("Expected a close frame, got {:?}", other),
        }
    }
}

async fn fetch_history(base_url: &str, token: &str, other_user: &str) -> Vec<Value> {
    let resp = reqwest::Client::new()
        .get(format!("{}/messages/{}", base_url, other_user))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn fetch_online(base_url: &str, token: &str) -> Vec<String> {
    let resp = reqwest::Client::new()
        .get(format!("{}/online", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["online"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["username"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_ws_invalid_token_closes_4002() {
    let server = start_test_server().await;

    let mut ws = connect(server.addr, "garbage").await;
    assert_eq!(expect_close(&mut ws).await, 4002);

    // No token at all
    let url = format!("ws://{}/ws", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    assert_eq!(expect_close(&mut ws).await, 4002);
}

#[tokio::test]
async fn test_ws_expired_token_closes_4001() {
    let server = start_test_server().await;

    let now = chrono::Utc::now().timestamp();
    let claims = chatezy_server::auth::jwt::SessionClaims {
        sub: uuid::Uuid::now_v7().to_string(),
        username: "ghost".to_string(),
        iat: now - 7200,
        exp: now - 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&server.jwt_secret),
    )
    .unwrap();

    let mut ws = connect(server.addr, &token).await;
    assert_eq!(expect_close(&mut ws).await, 4001);
}

#[tokio::test]
async fn test_ws_cookie_authentication() {
    let server = start_test_server().await;
    let (_, token) = register_user(&server.base_url, "alice").await;

    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("cookie", format!("token={}", token).parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    assert_eq!(next_presence(&mut ws).await, vec!["alice"]);
}

#[tokio::test]
async fn test_presence_on_join_and_leave() {
    let server = start_test_server().await;
    let (_, alice_token) = register_user(&server.base_url, "alice").await;
    let (_, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    assert_eq!(next_presence(&mut alice).await, vec!["alice"]);

    let mut bob = connect(server.addr, &bob_token).await;
    assert_eq!(next_presence(&mut bob).await, vec!["alice", "bob"]);
    assert_eq!(next_presence(&mut alice).await, vec!["alice", "bob"]);

    bob.close(None).await.unwrap();
    assert_eq!(next_presence(&mut alice).await, vec!["alice"]);
    assert_eq!(fetch_online(&server.base_url, &alice_token).await, vec!["alice"]);
}

#[tokio::test]
async fn test_presence_deduplicates_devices() {
    let server = start_test_server().await;
    let (_, alice_token) = register_user(&server.base_url, "alice").await;

    let mut laptop = connect(server.addr, &alice_token).await;
    assert_eq!(next_presence(&mut laptop).await, vec!["alice"]);

    let mut phone = connect(server.addr, &alice_token).await;
    assert_eq!(next_presence(&mut phone).await, vec!["alice"]);
    assert_eq!(next_presence(&mut laptop).await, vec!["alice"]);

    // One device leaving keeps the user online
    phone.close(None).await.unwrap();
    assert_eq!(next_presence(&mut laptop).await, vec!["alice"]);
}

#[tokio::test]
async fn test_message_relayed_to_recipient_only() {
    let server = start_test_server().await;
    let (alice_id, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    next_presence(&mut alice).await;
    let mut bob = connect(server.addr, &bob_token).await;
    next_presence(&mut bob).await;

    alice
        .send(Message::Text(
            json!({ "recipient": bob_id, "text": "hi bob" }).to_string().into(),
        ))
        .await
        .unwrap();

    let push = next_chat(&mut bob).await;
    assert_eq!(push["sender"], alice_id.as_str());
    assert_eq!(push["recipient"], bob_id.as_str());
    assert_eq!(push["text"], "hi bob");
    assert!(uuid::Uuid::parse_str(push["id"].as_str().unwrap()).is_ok());
    assert!(push.get("attachmentRef").is_none());

    // No echo to the sender
    assert_no_chat(&mut alice, Duration::from_millis(300)).await;

    let history = fetch_history(&server.base_url, &bob_token, &alice_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], push["id"]);
}

#[tokio::test]
async fn test_message_reaches_every_device() {
    let server = start_test_server().await;
    let (_, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    let mut bob_laptop = connect(server.addr, &bob_token).await;
    let mut bob_phone = connect(server.addr, &bob_token).await;
    next_presence(&mut alice).await;
    next_presence(&mut bob_laptop).await;
    next_presence(&mut bob_phone).await;

    alice
        .send(Message::Text(
            json!({ "recipient": bob_id, "text": "both of you" }).to_string().into(),
        ))
        .await
        .unwrap();

    let first = next_chat(&mut bob_laptop).await;
    let second = next_chat(&mut bob_phone).await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["text"], "both of you");
}

#[tokio::test]
async fn test_offline_recipient_gets_history() {
    let server = start_test_server().await;
    let (alice_id, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    next_presence(&mut alice).await;

    for text in ["first", "second"] {
        alice
            .send(Message::Text(
                json!({ "recipient": bob_id, "text": text }).to_string().into(),
            ))
            .await
            .unwrap();
    }

    // Messages are persisted asynchronously; poll until both are there
    let mut history = Vec::new();
    for _ in 0..40 {
        history = fetch_history(&server.base_url, &bob_token, &alice_id).await;
        if history.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["text"], "first");
    assert_eq!(history[1]["text"], "second");
    assert!(history[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_invalid_recipient_dropped_connection_survives() {
    let server = start_test_server().await;
    let (alice_id, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    next_presence(&mut alice).await;
    let mut bob = connect(server.addr, &bob_token).await;
    next_presence(&mut bob).await;

    let frames = [
        json!({ "recipient": "not-a-uuid", "text": "lost" }).to_string(),
        json!({ "recipient": bob_id }).to_string(),
        "{ not json".to_string(),
        json!({ "recipient": bob_id, "text": "delivered" }).to_string(),
    ];
    for frame in frames {
        alice.send(Message::Text(frame.into())).await.unwrap();
    }

    let push = next_chat(&mut bob).await;
    assert_eq!(push["text"], "delivered");

    let history = fetch_history(&server.base_url, &bob_token, &alice_id).await;
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_attachment_saved_and_served() {
    let server = start_test_server().await;
    let (_, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    next_presence(&mut alice).await;
    let mut bob = connect(server.addr, &bob_token).await;
    next_presence(&mut bob).await;

    let data = base64::engine::general_purpose::STANDARD.encode(b"hello attachment");
    alice
        .send(Message::Text(
            json!({
                "recipient": bob_id,
                "attachment": { "name": "notes.txt", "data": data },
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let push = next_chat(&mut bob).await;
    assert!(push.get("text").is_none());
    let reference = push["attachmentRef"].as_str().unwrap().to_string();
    assert!(reference.ends_with(".txt"));

    let resp = reqwest::Client::new()
        .get(format!("{}/uploads/{}", server.base_url, reference))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello attachment");
}

#[tokio::test]
async fn test_client_ping_gets_single_pong() {
    let server = start_test_server().await;
    let (_, token) = register_user(&server.base_url, "alice").await;

    let mut ws = connect(server.addr, &token).await;
    next_presence(&mut ws).await;

    ws.send(Message::Ping(b"are-you-there".to_vec().into()))
        .await
        .unwrap();

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for pong")
            .unwrap()
            .unwrap();
        if let Message::Pong(payload) = msg {
            assert_eq!(payload.as_ref(), b"are-you-there");
            break;
        }
    }

    // Exactly one pong per ping
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, ws.next()).await {
        assert!(!matches!(msg, Message::Pong(_)), "duplicate pong");
    }
}

#[tokio::test]
async fn test_silent_client_dropped_after_missed_pong() {
    let server = start_test_server_with(HeartbeatConfig {
        ping_interval_ms: 100,
        pong_timeout_ms: 50,
    })
    .await;
    let (_, token) = register_user(&server.base_url, "alice").await;

    let mut ws = connect(server.addr, &token).await;

    // Not polling the stream means the client never answers the ping
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(expect_close(&mut ws).await, 1001);
    assert!(fetch_online(&server.base_url, &token).await.is_empty());
}

#[tokio::test]
async fn test_responsive_client_stays_online() {
    let server = start_test_server_with(HeartbeatConfig {
        ping_interval_ms: 100,
        pong_timeout_ms: 1000,
    })
    .await;
    let (_, token) = register_user(&server.base_url, "alice").await;

    let mut ws = connect(server.addr, &token).await;
    next_presence(&mut ws).await;

    // Keep reading so the client answers every ping
    let mut pings = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, ws.next()).await {
        if matches!(msg, Message::Ping(_)) {
            pings += 1;
        }
    }

    assert!(pings >= 2, "expected several probes, got {}", pings);
    assert_eq!(fetch_online(&server.base_url, &token).await, vec!["alice"]);
}

#[tokio::test]
async fn test_slow_upload_does_not_starve_liveness_check() {
    let server = start_custom_server(
        HeartbeatConfig {
            ping_interval_ms: 100,
            pong_timeout_ms: 400,
        },
        Some(Duration::from_millis(1500)),
    )
    .await;
    let (_, alice_token) = register_user(&server.base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&server.base_url, "bob").await;

    let mut alice = connect(server.addr, &alice_token).await;
    next_presence(&mut alice).await;
    let mut bob = connect(server.addr, &bob_token).await;
    next_presence(&mut bob).await;

    let data = base64::engine::general_purpose::STANDARD.encode(b"big file");
    alice
        .send(Message::Text(
            json!({
                "recipient": bob_id,
                "attachment": { "name": "big.bin", "data": data },
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    // Alice keeps answering pings while her upload is being written
    let alice_reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = alice.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let push = next_chat(&mut bob).await;
    assert!(push["attachmentRef"].as_str().unwrap().ends_with(".bin"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!alice_reader.is_finished(), "alice was disconnected during the upload");
    assert_eq!(
        fetch_online(&server.base_url, &bob_token).await,
        vec!["alice", "bob"]
    );
    alice_reader.abort();
}
