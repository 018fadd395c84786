//! Shared utilities for integration testing.
//!
//! Mock upstreams bind ephemeral ports on 127.0.0.1 and record every
//! request payload they receive.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use stream_relay::config::{RelayConfig, UpstreamConfig, UpstreamKind};
use stream_relay::gateway::Gateway;
use stream_relay::lifecycle::{startup, Shutdown};

/// A running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/v1/chat", self.addr)
    }

    /// Payloads received so far, oldest first.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[derive(Clone)]
struct SseState {
    requests: Arc<Mutex<Vec<Value>>>,
    frames: Arc<Vec<String>>,
}

/// Agent-style upstream.
///
/// - `POST /v1/chat-messages` answers with `frames` as SSE `data:` lines
/// - `POST /v1/blocking` answers with one JSON document
/// - `POST /v1/unauthorized` answers 401
/// - `POST /v1/broken` answers 500
pub async fn start_sse_upstream(frames: Vec<Value>) -> MockUpstream {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = SseState {
        requests: requests.clone(),
        frames: Arc::new(frames.iter().map(Value::to_string).collect()),
    };

    let app = Router::new()
        .route("/v1/chat-messages", post(sse_handler))
        .route("/v1/blocking", post(blocking_handler))
        .route("/v1/unauthorized", post(|| async { StatusCode::UNAUTHORIZED }))
        .route(
            "/v1/broken",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded") }),
        )
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream { addr, requests }
}

async fn sse_handler(
    State(state): State<SseState>,
    Json(body): Json<Value>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    state.requests.lock().unwrap().push(body);
    let events: Vec<Result<Event, Infallible>> = state
        .frames
        .iter()
        .map(|frame| Ok(Event::default().data(frame.clone())))
        .collect();
    Sse::new(stream::iter(events))
}

async fn blocking_handler(State(state): State<SseState>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().unwrap().push(body);
    Json(json!({
        "event": "message",
        "answer": "blocking answer",
        "conversation_id": "conv-1",
    }))
}

/// Envelope-style WebSocket upstream.
///
/// Each connection reads one request frame, then sends `replies` in order
/// and closes.
pub async fn start_ws_upstream(replies: Vec<Value>) -> MockUpstream {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let replies: Arc<Vec<String>> = Arc::new(replies.iter().map(Value::to_string).collect());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let replies = replies.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(socket).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        recorded.lock().unwrap().push(value);
                    }
                }
                for reply in replies.iter() {
                    if ws.send(Message::Text(reply.clone().into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws.close(None).await;
            });
        }
    });

    MockUpstream { addr, requests }
}

/// WebSocket endpoint that rejects every handshake with 401.
pub async fn start_ws_rejecting() -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let reject = |_req: &Request, _res: Response| -> Result<Response, ErrorResponse> {
                    let mut rejection = ErrorResponse::new(Some("unauthorized".to_string()));
                    *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(rejection)
                };
                let _ = tokio_tungstenite::accept_hdr_async(socket, reject).await;
            });
        }
    });

    MockUpstream {
        addr,
        requests: Arc::new(Mutex::new(Vec::new())),
    }
}

/// Event-stream upstream that writes `chunks` verbatim, one write each.
///
/// Bypasses any HTTP framework so the body can carry bytes that are not
/// valid UTF-8. Each connection drains the request, answers, then closes.
pub async fn start_raw_sse_upstream(chunks: Vec<Vec<u8>>) -> MockUpstream {
    serve_raw_sse(chunks, false).await
}

/// Like [`start_raw_sse_upstream`], but the connection stays open and
/// silent after the last chunk.
pub async fn start_stalling_sse_upstream(chunks: Vec<Vec<u8>>) -> MockUpstream {
    serve_raw_sse(chunks, true).await
}

async fn serve_raw_sse(chunks: Vec<Vec<u8>>, stall: bool) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let chunks = Arc::new(chunks);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chunks = chunks.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                if let Some(body) = read_http_body(&mut socket).await {
                    recorded.lock().unwrap().push(body);
                }
                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks.iter() {
                    if socket.write_all(chunk).await.is_err() || socket.flush().await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                if stall {
                    // Hold the socket until the peer hangs up.
                    let mut sink = [0u8; 64];
                    while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
                    return;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream { addr, requests }
}

async fn read_http_body(socket: &mut tokio::net::TcpStream) -> Option<Value> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(split) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..split]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body = &buf[split + 4..];
        if body.len() >= length {
            return serde_json::from_slice(&body[..length]).ok();
        }
    }
}

/// Dify-style streaming frames producing `answer` split into `parts`.
pub fn agent_frames(parts: &[&str]) -> Vec<Value> {
    let mut frames = vec![json!({"event": "workflow_started", "task_id": "t-1"})];
    frames.extend(parts.iter().map(|p| json!({"event": "message", "answer": p})));
    frames.push(json!({"event": "message_end", "metadata": {}}));
    frames
}

pub fn sse_upstream_config(name: &str, url: String) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        kind: UpstreamKind::Sse,
        url,
        api_key: None,
        user: "admin".to_string(),
        connect_timeout_secs: 5,
        app_id: None,
        chat: Default::default(),
    }
}

pub fn ws_upstream_config(name: &str, url: String) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        kind: UpstreamKind::Websocket,
        url,
        api_key: None,
        user: "admin".to_string(),
        connect_timeout_secs: 5,
        app_id: Some("app-1".to_string()),
        chat: Default::default(),
    }
}

/// A relay listening on an ephemeral port.
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub shutdown: Shutdown,
    pub server: tokio::task::JoinHandle<()>,
}

impl RunningRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_relay(mut config: RelayConfig) -> RunningRelay {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = false;

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    let gateway = Arc::new(Gateway::from_config(&config).unwrap().with_shutdown(&shutdown));
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_gateway = gateway.clone();
    let server = tokio::spawn(async move {
        let _ = startup::serve(server_gateway, &config, listener, stop).await;
    });

    RunningRelay {
        addr,
        gateway,
        shutdown,
        server,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
