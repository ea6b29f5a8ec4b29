//! Real-time client facade
//!
//! Bundles the registry, dispatcher and supervisor and ties their lifetime
//! together: create one per signed-in session, call [`RealtimeClient::shutdown`]
//! on logout or app termination.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::dispatcher::{EventDispatcher, EventObserver, ObserverId, ReceivedEvent};
use super::error::RealtimeResult;
use super::registry::SubscriptionRegistry;
use super::supervisor::{ConnectionState, ConnectionSupervisor, ReconnectStatus};
use crate::config::{BaseUrlProvider, RealtimeConfig};

/// Control surface of the real-time channel
pub struct RealtimeClient {
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<EventDispatcher>,
    supervisor: ConnectionSupervisor,
}

impl RealtimeClient {
    /// Create a disconnected client; must be called within a Tokio runtime
    pub fn new(config: &RealtimeConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new(config.dispatcher()));
        let supervisor = ConnectionSupervisor::new(
            config.supervisor(),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
        );

        Self {
            registry,
            dispatcher,
            supervisor,
        }
    }

    /// Connect to the backend at `base_url` (http(s) or ws(s))
    pub async fn connect(&self, base_url: &str) -> RealtimeResult<()> {
        self.supervisor.connect(base_url).await
    }

    /// Connect using the base URL the provider currently holds
    pub async fn connect_with<P: BaseUrlProvider + ?Sized>(&self, provider: &P) -> RealtimeResult<()> {
        self.supervisor.connect(&provider.base_url()).await
    }

    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await
    }

    /// Disconnect, forget all subscriptions and deliver what is still queued
    pub async fn shutdown(&self) {
        self.supervisor.disconnect().await;
        self.registry.clear().await;
        self.dispatcher.flush().await;
        tracing::info!("Real-time client shut down");
    }

    /// Request live status for a printer; false if already requested
    pub async fn subscribe(&self, printer_id: &str) -> bool {
        self.registry.subscribe(printer_id).await
    }

    /// Stop live status for a printer; false if it was not requested
    pub async fn unsubscribe(&self, printer_id: &str) -> bool {
        self.registry.unsubscribe(printer_id).await
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.registry.entries().await
    }

    /// Send an application-level ping; false when not connected
    pub async fn ping(&self) -> bool {
        self.supervisor.ping().await
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        self.supervisor.reconnect_status()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ReceivedEvent> {
        self.dispatcher.subscribe_events()
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<bool> {
        self.dispatcher.subscribe_connectivity()
    }

    pub fn latest_event(&self) -> Option<ReceivedEvent> {
        self.dispatcher.latest()
    }

    pub fn watch_latest_event(&self) -> watch::Receiver<Option<ReceivedEvent>> {
        self.dispatcher.watch_latest()
    }

    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        self.dispatcher.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.dispatcher.remove_observer(id)
    }
}
