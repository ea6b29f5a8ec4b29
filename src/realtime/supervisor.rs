//! Connection Supervisor
//!
//! Owns the single WebSocket connection to the backend. One connection task
//! runs per `connect` call and loops through establish → replay → receive →
//! backoff until it is told to stop or runs out of reconnect attempts.
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected
//!      ^                        |                    |
//!      |                     failure              failure
//!      +--- attempts exhausted --+---- backoff ------+
//! ```

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use super::dispatcher::EventDispatcher;
use super::error::{RealtimeError, RealtimeResult};
use super::messages::{decode, OutboundFrame};
use super::registry::SubscriptionRegistry;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Configuration for the connection supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Automatic reconnects after a failure before giving up
    pub max_reconnect_attempts: u32,
    /// Delay unit; attempt `n` waits `n * backoff_step`
    pub backoff_step: Duration,
    /// Interval between keepalive pings, `None` to disable
    pub keepalive_interval: Option<Duration>,
    /// Path segment appended to the base URL
    pub ws_path: String,
    /// How long a graceful close may wait on a peer that is not reading
    pub close_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            backoff_step: Duration::from_secs(2),
            keepalive_interval: Some(Duration::from_secs(30)),
            ws_path: "/ws".to_string(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of the reconnect bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectStatus {
    /// Automatic attempts made since the last successful connection
    pub attempts: u32,
    /// When the pending reconnect fires, if one is scheduled
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Derive the WebSocket endpoint from an HTTP(S) base URL
///
/// `http` becomes `ws`, `https` becomes `wss`; `ws`/`wss` are kept. `path`
/// is appended to the base path, query and fragment are dropped.
pub fn endpoint_url(base_url: &str, path: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|e| RealtimeError::invalid_endpoint(base_url, e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::invalid_endpoint(
                base_url,
                format!("unsupported scheme '{}'", other),
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::invalid_endpoint(base_url, "cannot change scheme"))?;

    if url.host_str().is_none() {
        return Err(RealtimeError::invalid_endpoint(base_url, "missing host"));
    }

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Linear backoff: attempt 1 waits one step, attempt 5 waits five
pub fn backoff_delay(attempt: u32, step: Duration) -> Duration {
    step.saturating_mul(attempt)
}

/// State shared between the supervisor handle and its connection task
struct Shared {
    config: SupervisorConfig,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<EventDispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect: Mutex<ReconnectStatus>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    fn update_reconnect(&self, attempts: u32, next_retry_at: Option<DateTime<Utc>>) {
        let mut status = self.reconnect.lock().unwrap_or_else(|e| e.into_inner());
        status.attempts = attempts;
        status.next_retry_at = next_retry_at;
    }
}

/// A running connection task and the means to stop it
struct Session {
    endpoint: Url,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Session {
    async fn stop(self) {
        // The task may already have finished after exhausting its attempts
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(endpoint = %self.endpoint, "Connection task panicked");
            }
        }
    }
}

/// Keeps one logical connection alive and feeds the dispatcher
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: SupervisorConfig,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                dispatcher,
                state_tx,
                reconnect: Mutex::new(ReconnectStatus::default()),
            }),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Start connecting to the backend at `base_url`
    ///
    /// Any previous connection or pending reconnect is cancelled first.
    /// Returns once the connection task is running; transport failures are
    /// retried in the background and never reported here. Only a base URL
    /// that cannot be turned into a WebSocket endpoint is an error.
    pub async fn connect(&self, base_url: &str) -> RealtimeResult<()> {
        let endpoint = endpoint_url(base_url, &self.shared.config.ws_path)?;

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            tracing::debug!(endpoint = %previous.endpoint, "Replacing existing connection");
            previous.stop().await;
        }

        self.shared.update_reconnect(0, None);
        self.shared.set_state(ConnectionState::Connecting);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            endpoint.clone(),
            shutdown_rx,
        ));

        *session = Some(Session {
            endpoint,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Close the connection and cancel any pending reconnect
    ///
    /// Sends a normal close frame when connected. Calling this while already
    /// disconnected does nothing.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                tracing::info!(endpoint = %session.endpoint, "Disconnecting");
                session.stop().await;
            }
            None => tracing::trace!("Disconnect requested while not connected"),
        }
        self.shared.update_reconnect(0, None);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Queue a ping frame; false when there is no live connection
    pub async fn ping(&self) -> bool {
        self.shared.registry.send(OutboundFrame::Ping).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        self.shared
            .reconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Endpoint of the current or last connection task
    pub async fn endpoint(&self) -> Option<Url> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.endpoint.clone())
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.take() {
                session.task.abort();
            }
        }
    }
}

/// Connection task: establish, serve, back off, repeat
async fn run_connection(
    shared: Arc<Shared>,
    endpoint: Url,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let max_attempts = shared.config.max_reconnect_attempts;
    let mut attempts: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let connection_id = Uuid::new_v4();
        tracing::info!(
            connection_id = %connection_id,
            endpoint = %endpoint,
            attempt = attempts,
            "Connecting to backend"
        );

        let established = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = tokio_tungstenite::connect_async(endpoint.as_str()) => result,
        };

        let failure = match established {
            Ok((socket, _response)) => {
                attempts = 0;
                shared.update_reconnect(0, None);

                match serve(&shared, socket, connection_id, &mut shutdown_rx).await {
                    Ok(()) => break,
                    Err(e) => e,
                }
            }
            Err(e) => RealtimeError::from(e),
        };

        // Failure handler
        shared.set_state(ConnectionState::Disconnected);
        shared.dispatcher.publish_connectivity(false);

        if attempts >= max_attempts {
            tracing::warn!(
                endpoint = %endpoint,
                error = %failure,
                attempts,
                "Reconnect attempts exhausted, staying disconnected"
            );
            shared.update_reconnect(attempts, None);
            return;
        }

        attempts += 1;
        let delay = backoff_delay(attempts, shared.config.backoff_step);
        let retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        shared.update_reconnect(attempts, Some(retry_at));

        tracing::warn!(
            connection_id = %connection_id,
            error = %failure,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Connection failed, scheduling reconnect"
        );

        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

/// Run one established connection until shutdown (Ok) or failure (Err)
async fn serve(
    shared: &Shared,
    socket: Socket,
    connection_id: Uuid,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> RealtimeResult<()> {
    let (mut sink, mut stream) = socket.split();
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();

    let replay = shared.registry.attach(link_tx).await;
    shared.set_state(ConnectionState::Connected);
    tracing::info!(
        connection_id = %connection_id,
        subscriptions = replay.len(),
        "Connected to backend"
    );

    let replayed = tokio::select! {
        _ = &mut *shutdown_rx => None,
        replayed = replay_subscriptions(&mut sink, replay) => Some(replayed),
    };
    let result = match replayed {
        None => Ok(()),
        Some(Ok(())) => {
            shared.dispatcher.publish_connectivity(true);
            receive_loop(
                shared,
                &mut sink,
                &mut stream,
                &mut link_rx,
                connection_id,
                shutdown_rx,
            )
            .await
        }
        Some(Err(e)) => Err(e),
    };

    shared.registry.detach().await;

    if result.is_ok() {
        let close = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        let closing = sink.send(Message::Close(Some(close)));
        match tokio::time::timeout(shared.config.close_timeout, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Close frame not sent")
            }
            Err(_) => tracing::warn!(
                connection_id = %connection_id,
                timeout_ms = shared.config.close_timeout.as_millis() as u64,
                "Peer not reading, dropping connection without close handshake"
            ),
        }
        shared.set_state(ConnectionState::Disconnected);
        shared.dispatcher.publish_connectivity(false);
        tracing::info!(connection_id = %connection_id, "Disconnected from backend");
    }

    result
}

/// Re-establish server-side subscriptions, in registry order
async fn replay_subscriptions(sink: &mut SocketSink, printer_ids: Vec<String>) -> RealtimeResult<()> {
    for printer_id in printer_ids {
        send_frame(sink, &OutboundFrame::subscribe(printer_id)).await?;
    }
    Ok(())
}

async fn receive_loop(
    shared: &Shared,
    sink: &mut SocketSink,
    stream: &mut SocketStream,
    link_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    connection_id: Uuid,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> RealtimeResult<()> {
    let mut keepalive = shared.config.keepalive_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return Ok(()),
            Some(frame) = link_rx.recv() => {
                tokio::select! {
                    _ = &mut *shutdown_rx => return Ok(()),
                    sent = send_frame(sink, &frame) => sent?,
                }
            }
            _ = tick(&mut keepalive) => {
                tokio::select! {
                    _ = &mut *shutdown_rx => return Ok(()),
                    sent = send_frame(sink, &OutboundFrame::Ping) => sent?,
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => dispatch_text(shared, &text, connection_id),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => dispatch_text(shared, &text, connection_id),
                    Err(_) => tracing::debug!(
                        connection_id = %connection_id,
                        "Dropping non UTF-8 binary frame"
                    ),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Err(RealtimeError::Closed {
                        reason: frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)),
                    });
                }
                // Ping/pong are answered by the transport
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(RealtimeError::Closed { reason: None }),
            },
        }
    }
}

fn dispatch_text(shared: &Shared, text: &str, connection_id: Uuid) {
    match decode(text) {
        Some(event) => {
            tracing::trace!(connection_id = %connection_id, kind = event.kind(), "Inbound event");
            shared.dispatcher.publish(event, connection_id);
        }
        None => tracing::debug!(connection_id = %connection_id, "Dropped malformed frame"),
    }
}

async fn send_frame(sink: &mut SocketSink, frame: &OutboundFrame) -> RealtimeResult<()> {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, ?frame, "Failed to encode frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await?;
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
