//! Event Dispatcher
//!
//! Fans decoded events out to every interested consumer. The receive loop
//! only enqueues; a single delivery task updates the last-value channel,
//! the broadcast streams and the registered observers, so consumers never
//! stall the network side and observers never run concurrently. Observer
//! callbacks run on Tokio's blocking pool, off the async worker threads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::InboundEvent;

/// An inbound event as delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedEvent {
    #[serde(flatten)]
    pub event: InboundEvent,
    /// When the frame was decoded
    pub received_at: DateTime<Utc>,
    /// Connection instance the frame arrived on
    pub connection_id: Uuid,
}

/// Callback-style consumer of dispatched events
///
/// Called one notification at a time, in dispatch order, on a blocking-pool
/// thread. A slow observer delays later notifications to observers but never
/// the receive loop or the broadcast streams. A panic inside an observer is
/// logged and does not affect other observers.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &ReceivedEvent);

    fn on_connection_status(&self, _connected: bool) {}
}

/// Handle returned by [`EventDispatcher::add_observer`]
pub type ObserverId = Uuid;

/// Configuration for the event dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of the raw event and connectivity broadcast channels
    pub broadcast_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

enum Delivery {
    Event(ReceivedEvent),
    Connectivity(bool),
    Flush(oneshot::Sender<()>),
}

type ObserverList = Arc<RwLock<Vec<(ObserverId, Arc<dyn EventObserver>)>>>;

/// One-to-many publisher for inbound events and connectivity changes
pub struct EventDispatcher {
    queue: mpsc::UnboundedSender<Delivery>,
    latest_rx: watch::Receiver<Option<ReceivedEvent>>,
    events_tx: broadcast::Sender<ReceivedEvent>,
    connectivity_tx: broadcast::Sender<bool>,
    observers: ObserverList,
    task: JoinHandle<()>,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its delivery task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (latest_tx, latest_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(config.broadcast_capacity);
        let (connectivity_tx, _) = broadcast::channel(config.broadcast_capacity);
        let observers: ObserverList = Arc::new(RwLock::new(Vec::new()));

        let task = tokio::spawn(deliver(
            queue_rx,
            latest_tx,
            events_tx.clone(),
            connectivity_tx.clone(),
            Arc::clone(&observers),
        ));

        Self {
            queue,
            latest_rx,
            events_tx,
            connectivity_tx,
            observers,
            task,
        }
    }

    /// Queue an inbound event for delivery
    pub(crate) fn publish(&self, event: InboundEvent, connection_id: Uuid) {
        let received = ReceivedEvent {
            event,
            received_at: Utc::now(),
            connection_id,
        };
        if self.queue.send(Delivery::Event(received)).is_err() {
            tracing::warn!("Event dispatcher stopped, dropping event");
        }
    }

    /// Queue a connected/disconnected notification
    pub(crate) fn publish_connectivity(&self, connected: bool) {
        if self.queue.send(Delivery::Connectivity(connected)).is_err() {
            tracing::warn!("Event dispatcher stopped, dropping connectivity change");
        }
    }

    /// Wait until everything queued so far has been delivered
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(Delivery::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Raw stream of events; only events dispatched after this call are seen
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReceivedEvent> {
        self.events_tx.subscribe()
    }

    /// Stream of connectivity changes (`true` = connected)
    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<bool> {
        self.connectivity_tx.subscribe()
    }

    /// Most recently dispatched event
    pub fn latest(&self) -> Option<ReceivedEvent> {
        self.latest_rx.borrow().clone()
    }

    /// Last-value-wins view of the dispatched events
    pub fn watch_latest(&self) -> watch::Receiver<Option<ReceivedEvent>> {
        self.latest_rx.clone()
    }

    /// Register an observer for all future notifications
    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        tracing::debug!(observer_id = %id, "Observer registered");
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Delivery task: the single execution context observers run on
async fn deliver(
    mut queue_rx: mpsc::UnboundedReceiver<Delivery>,
    latest_tx: watch::Sender<Option<ReceivedEvent>>,
    events_tx: broadcast::Sender<ReceivedEvent>,
    connectivity_tx: broadcast::Sender<bool>,
    observers: ObserverList,
) {
    while let Some(delivery) = queue_rx.recv().await {
        match delivery {
            Delivery::Event(event) => {
                latest_tx.send_replace(Some(event.clone()));
                // No receivers is fine
                let _ = events_tx.send(event.clone());

                let targets = snapshot(&observers);
                if !targets.is_empty() {
                    run_observers(move || {
                        for (id, observer) in targets {
                            notify(id, || observer.on_event(&event));
                        }
                    })
                    .await;
                }
            }
            Delivery::Connectivity(connected) => {
                let _ = connectivity_tx.send(connected);

                let targets = snapshot(&observers);
                if !targets.is_empty() {
                    run_observers(move || {
                        for (id, observer) in targets {
                            notify(id, || observer.on_connection_status(connected));
                        }
                    })
                    .await;
                }
            }
            Delivery::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Run observer callbacks on the blocking pool and wait for them
async fn run_observers(f: impl FnOnce() + Send + 'static) {
    if let Err(e) = tokio::task::spawn_blocking(f).await {
        tracing::error!(error = %e, "Observer delivery failed");
    }
}

fn snapshot(observers: &ObserverList) -> Vec<(ObserverId, Arc<dyn EventObserver>)> {
    observers.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn notify(id: ObserverId, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(observer_id = %id, "Observer panicked, continuing delivery");
    }
}
