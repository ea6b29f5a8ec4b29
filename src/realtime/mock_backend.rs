//! In-process backend used by the supervisor and client tests
//!
//! Serves `/ws` with axum, records every control frame a client sends,
//! answers `subscribe_printer` and `ping` the way the real backend does, and
//! lets a test push arbitrary text frames or close every connection. Two
//! misbehaving endpoints cover the failure paths: one that drops every
//! connection before the handshake and one that stops reading after it.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{accept_async, WebSocketStream};

use super::messages::OutboundFrame;

/// Poll `condition` until it holds, panicking after five seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not reached within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct BackendState {
    /// Connections accepted so far; connection numbers start at 1
    connections: AtomicUsize,
    frames: Mutex<Vec<(usize, OutboundFrame)>>,
    close_codes: Mutex<Vec<Option<u16>>>,
    push_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
}

pub(crate) struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub(crate) async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(4);
        let state = Arc::new(BackendState {
            connections: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            close_codes: Mutex::new(Vec::new()),
            push_tx,
            kick_tx,
        });

        let app = Router::new()
            .route("/ws", get(websocket_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// HTTP base URL a client would be configured with
    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Frames received on the given connection, in arrival order
    pub(crate) fn frames(&self, connection: usize) -> Vec<OutboundFrame> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == connection)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Close codes sent by clients that closed their connection
    pub(crate) fn close_codes(&self) -> Vec<Option<u16>> {
        self.state.close_codes.lock().unwrap().clone()
    }

    /// Send a raw text frame to every open connection
    pub(crate) fn push(&self, text: &str) {
        let _ = self.state.push_tx.send(text.to_string());
    }

    /// Close every open connection from the server side
    pub(crate) fn kick(&self) {
        let _ = self.state.kick_tx.send(());
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut pushed = state.push_tx.subscribe();
    let mut kicked = state.kick_tx.subscribe();
    // Counted only once this connection can see pushes and kicks
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;

    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<OutboundFrame>(&text) else {
                        continue;
                    };
                    let reply = match &frame {
                        OutboundFrame::SubscribePrinter { printer_id } => {
                            format!(r#"{{"type":"subscribed","printer_id":"{}"}}"#, printer_id)
                        }
                        OutboundFrame::UnsubscribePrinter { printer_id } => {
                            format!(r#"{{"type":"unsubscribed","printer_id":"{}"}}"#, printer_id)
                        }
                        OutboundFrame::Ping => r#"{"type":"pong"}"#.to_string(),
                    };
                    state.frames.lock().unwrap().push((connection, frame));
                    if sender.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    state
                        .close_codes
                        .lock()
                        .unwrap()
                        .push(frame.map(|f| f.code));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            text = pushed.recv() => {
                if let Ok(text) = text {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            _ = kicked.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Accepts TCP connections and drops them before the WebSocket handshake
pub(crate) struct RefusingEndpoint {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    accepts_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Instant>>,
    task: JoinHandle<()>,
}

impl RefusingEndpoint {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (accepts_tx, accepts_rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = accepts_tx.send(Instant::now());
                drop(stream);
            }
        });

        Self {
            addr,
            accepted,
            accepts_rx: tokio::sync::Mutex::new(accepts_rx),
            task,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the next connection attempt and return when it arrived
    pub(crate) async fn next_accept(&self) -> Instant {
        self.accepts_rx.lock().await.recv().await.unwrap()
    }
}

impl Drop for RefusingEndpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Completes the WebSocket handshake, then never reads from the socket
pub(crate) struct StalledPeer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StalledPeer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut held: Vec<WebSocketStream<tokio::net::TcpStream>> = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(socket) = accept_async(stream).await {
                    held.push(socket);
                }
            }
        });

        Self { addr, task }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for StalledPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
