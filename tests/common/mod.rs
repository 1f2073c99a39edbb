//! Shared utilities for relay integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Request,
    },
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use forward_relay::net::ConnectionId;
use forward_relay::{Observer, Phase, Relay, RelayConfig, RelayError, RelayHandle};
use hyper::{Method, StatusCode};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Start a mock upstream application on an ephemeral port.
///
/// Routes:
/// - `GET /health` → `200 {"ok":true}`
/// - `/echo` → streams the request body back
/// - `GET /id/{n}` → body `n`
/// - `GET /headers` → reflects `host` and `x-client-token`, adds `x-upstream`
/// - `GET /ws` → WebSocket echo
pub async fn start_mock_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "ok": true })) }))
        .route("/echo", any(echo_body))
        .route("/id/{n}", get(|Path(n): Path<u32>| async move { n.to_string() }))
        .route("/headers", get(reflect_headers))
        .route("/ws", get(ws_echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo_body(request: Request) -> Response {
    Response::new(Body::new(request.into_body()))
}

async fn reflect_headers(headers: HeaderMap) -> impl IntoResponse {
    let mut response = HeaderMap::new();
    response.insert("x-upstream", HeaderValue::from_static("mock"));
    if let Some(host) = headers.get("host") {
        response.insert("x-seen-host", host.clone());
    }
    if let Some(token) = headers.get("x-client-token") {
        response.insert("x-seen-token", token.clone());
    }
    (StatusCode::OK, response, "headers")
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
            if socket.send(message).await.is_err() {
                break;
            }
        }
    })
}

/// Start a raw TCP upstream that reads requests but never answers.
///
/// The counter tracks upstream connections that are still open.
pub async fn start_silent_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let open = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&open);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    (addr, open)
}

/// Read one request head from a raw socket.
async fn read_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// Start a raw TCP upstream that answers every connection's first request
/// with the exact bytes of `response`.
///
/// With `hang_up` it closes the connection shortly after answering, otherwise
/// it keeps it open until the peer leaves.
pub async fn start_scripted_upstream(response: &'static [u8], hang_up: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(response).await;
                if hang_up {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return;
                }
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Start a raw TCP upstream that reads a request and resets the connection
/// without answering.
pub async fn start_resetting_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                // Zero linger turns the close into an RST.
                let _ = socket.set_linger(Some(Duration::ZERO));
                drop(socket);
            });
        }
    });

    addr
}

/// An upstream whose accept queue is full, so new connects hang.
pub struct SaturatedUpstream {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
}

pub async fn start_saturated_upstream() -> SaturatedUpstream {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => break,
        }
    }

    SaturatedUpstream {
        addr,
        _listener: listener,
        _queued: queued,
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn relay_config(upstream: SocketAddr) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    config.timeouts.connect_secs = 2;
    config.timeouts.drain_secs = 2;
    config
}

/// Bind and start a relay in front of `upstream`.
pub async fn start_relay(upstream: SocketAddr) -> RelayHandle {
    Relay::bind(relay_config(upstream)).await.unwrap().start()
}

/// Bind and start a relay reporting to `observer`.
pub async fn start_observed_relay(
    upstream: SocketAddr,
    observer: Arc<RecordingObserver>,
) -> RelayHandle {
    Relay::bind(relay_config(upstream))
        .await
        .unwrap()
        .with_observer(observer)
        .start()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Observer that remembers what it saw.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub requests: Mutex<Vec<(String, String)>>,
    pub upgrades: AtomicUsize,
    pub closed: AtomicUsize,
    pub errors: Mutex<Vec<Phase>>,
}

impl RecordingObserver {
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<Phase> {
        self.errors.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Observer for RecordingObserver {
    fn on_request_received(&self, _id: ConnectionId, method: &Method, path: &str) {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string()));
    }

    fn on_upgrade(&self, _id: ConnectionId, _path: &str) {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_closed(&self, _id: ConnectionId, _lifetime: Duration) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _id: ConnectionId, error: &RelayError) {
        self.errors.lock().unwrap().push(error.phase());
    }
}
