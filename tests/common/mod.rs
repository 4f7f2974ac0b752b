// Common test utilities for integration tests
// A wiremock REST backend and a local websocket server stand in for the service
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;

use anyhow::{anyhow, Result};
use log::{debug, LevelFilter};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration as TokioDuration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatz::{AppEvent, ChatClient, ClientConfig, MemoryStorage, SessionStorage, Update};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// How long a test waits for something asynchronous to happen
pub const WAIT: TokioDuration = TokioDuration::from_secs(5);

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn user_json(id: &str, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{}@x.com", username),
        "avatar_color": "#3366cc",
        "is_online": true,
    })
}

/// A persisted message as the backend serializes it (naive UTC timestamp)
pub fn message_json(id: &str, sender: &str, receiver: &str, content: &str) -> Value {
    json!({
        "id": id,
        "sender_id": sender,
        "receiver_id": receiver,
        "content": content,
        "timestamp": "2025-01-01T12:00:00.000000",
        "is_read": false,
    })
}

/// A `message` frame as pushed over the live channel
pub fn push_frame(sender: &str, receiver: &str, content: &str) -> String {
    json!({
        "type": "message",
        "sender_id": sender,
        "receiver_id": receiver,
        "content": content,
        "timestamp": "2025-01-01T12:00:01.000000",
    })
    .to_string()
}

pub fn auth_json(token: &str, id: &str, username: &str) -> Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "user": user_json(id, username),
    })
}

/// Mount a successful `/login` for the given email and password
pub async fn mount_login(server: &MockServer, email: &str, password: &str, token: &str, id: &str, username: &str) {
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_json(json!({ "email": email, "password": password })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_json(token, id, username)))
        .mount(server)
        .await;
}

/// Mount `GET /users` returning the given contacts, checking the bearer token
pub async fn mount_contacts(server: &MockServer, token: &str, contacts: Value) {
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(contacts))
        .mount(server)
        .await;
}

/// Client configuration pointing REST at `server` and the live channel at `live`
pub fn config_for(server: &MockServer, live: Option<&LiveServer>) -> ClientConfig {
    let config = ClientConfig::new(&server.uri()).expect("mock server uri");
    let mut config = match live {
        Some(live) => config.with_live_base(&live.base_url()).expect("live server url"),
        None => config,
    };
    config.request_timeout = TokioDuration::from_secs(2);
    config
}

pub fn client_with(config: ClientConfig, storage: Box<dyn SessionStorage>) -> (ChatClient, mpsc::UnboundedReceiver<AppEvent>) {
    ChatClient::new(config, storage).expect("client")
}

pub fn memory_client(config: ClientConfig) -> (ChatClient, mpsc::UnboundedReceiver<AppEvent>) {
    client_with(config, Box::new(MemoryStorage::new()))
}

/// Apply events to the client until one produces an update matching `pred`
pub async fn wait_for_update<F>(
    client: &mut ChatClient,
    events_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    mut pred: F,
) -> Result<Update>
where
    F: FnMut(&Update) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, events_rx.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for update"))?
            .ok_or_else(|| anyhow!("event channel closed"))?;
        let update = client.handle_event(event);
        debug!("Applied update {:?}", update);
        if pred(&update) {
            return Ok(update);
        }
    }
}

/// Apply events until the client reaches a state matching `pred`
pub async fn wait_until<F>(
    client: &mut ChatClient,
    events_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    mut pred: F,
) -> Result<()>
where
    F: FnMut(&ChatClient) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !pred(&*client) {
        let event = tokio::time::timeout_at(deadline, events_rx.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for client state"))?
            .ok_or_else(|| anyhow!("event channel closed"))?;
        client.handle_event(event);
    }
    Ok(())
}

/// Apply whatever events arrive within `window`
pub async fn drain_for(
    client: &mut ChatClient,
    events_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    window: TokioDuration,
) -> Vec<Update> {
    let mut updates = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events_rx.recv()).await {
        updates.push(client.handle_event(event));
    }
    updates
}

/// A connection accepted by [`LiveServer`]
pub struct LiveConnection {
    pub path: String,
    pub ws: WebSocketStream<tokio::net::TcpStream>,
}

impl LiveConnection {
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        use futures_util::SinkExt;
        self.ws.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    /// Next text frame sent by the client
    pub async fn next_text(&mut self) -> Result<String> {
        use futures_util::StreamExt;
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .map_err(|_| anyhow!("timed out waiting for a client frame"))?
                .ok_or_else(|| anyhow!("client went away"))??;
            if let WsMessage::Text(text) = frame {
                return Ok(text);
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// Local websocket server standing in for the backend's `/ws/{id}` endpoint
pub struct LiveServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<LiveConnection>,
}

impl LiveServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut request_path = String::new();
                let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                    request_path = req.uri().path().to_string();
                    Ok(resp)
                };
                let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                match handshake {
                    Ok(ws) => {
                        if tx.send(LiveConnection { path: request_path, ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Test live server handshake failed: {}", e),
                }
            }
        });

        Ok(LiveServer { addr, accepted })
    }

    /// Base url to hand to `ClientConfig::with_live_base`
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept(&mut self) -> Result<LiveConnection> {
        self.accept_within(WAIT).await
    }

    pub async fn accept_within(&mut self, window: TokioDuration) -> Result<LiveConnection> {
        timeout(window, self.accepted.recv())
            .await
            .map_err(|_| anyhow!("no live connection within {:?}", window))?
            .ok_or_else(|| anyhow!("live server stopped"))
    }
}
