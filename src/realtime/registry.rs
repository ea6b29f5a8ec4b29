//! Subscription Registry
//!
//! Tracks which printers the client wants live `printer_status` events for.
//! The set survives disconnects; the supervisor replays it on every
//! successful connection.

use tokio::sync::{mpsc, RwLock};

use super::messages::OutboundFrame;

/// Outbound queue of the live connection, drained by its connection task
pub(crate) type OutboundLink = mpsc::UnboundedSender<OutboundFrame>;

/// Desired printer subscriptions, independent of connection state
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Printer ids in insertion order, unique
    entries: Vec<String>,
    /// Present only while a connection is live
    link: Option<OutboundLink>,
}

impl RegistryInner {
    fn send(&self, frame: OutboundFrame) {
        if let Some(link) = &self.link {
            if link.send(frame).is_err() {
                tracing::debug!("Connection task gone, frame will be replayed on reconnect");
            }
        }
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a printer to the registry
    ///
    /// Sends a `subscribe_printer` frame right away when connected. Returns
    /// false if the printer was already registered.
    pub async fn subscribe(&self, printer_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.entries.iter().any(|id| id == printer_id) {
            return false;
        }
        inner.entries.push(printer_id.to_string());
        inner.send(OutboundFrame::subscribe(printer_id));

        tracing::debug!(
            printer_id = %printer_id,
            live = inner.link.is_some(),
            "Subscribed to printer"
        );
        true
    }

    /// Remove a printer from the registry
    ///
    /// Sends an `unsubscribe_printer` frame right away when connected.
    /// Returns false if the printer was not registered.
    pub async fn unsubscribe(&self, printer_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(pos) = inner.entries.iter().position(|id| id == printer_id) else {
            return false;
        };
        inner.entries.remove(pos);
        inner.send(OutboundFrame::unsubscribe(printer_id));

        tracing::debug!(
            printer_id = %printer_id,
            live = inner.link.is_some(),
            "Unsubscribed from printer"
        );
        true
    }

    /// Snapshot of the registered printer ids, in registry order
    pub async fn entries(&self) -> Vec<String> {
        self.inner.read().await.entries.clone()
    }

    pub async fn contains(&self, printer_id: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .any(|id| id == printer_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Drop every entry without sending frames (client teardown)
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Attach a live connection and return the entries to replay
    ///
    /// Done under the write lock: a concurrent `subscribe` is either part of
    /// the returned snapshot or sent through `link` afterwards.
    pub(crate) async fn attach(&self, link: OutboundLink) -> Vec<String> {
        let mut inner = self.inner.write().await;
        inner.link = Some(link);
        inner.entries.clone()
    }

    /// Detach the live connection; later changes are only recorded
    pub(crate) async fn detach(&self) {
        self.inner.write().await.link = None;
    }

    #[cfg(test)]
    pub(crate) async fn is_attached(&self) -> bool {
        self.inner.read().await.link.is_some()
    }

    /// Queue a frame on the live connection, if any
    pub(crate) async fn send(&self, frame: OutboundFrame) -> bool {
        let inner = self.inner.read().await;
        match &inner.link {
            Some(link) => link.send(frame).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.subscribe("p1").await);
        assert!(!registry.subscribe("p1").await);
        assert!(registry.subscribe("p2").await);
        assert_eq!(registry.entries().await, vec!["p1", "p2"]);

        assert!(registry.unsubscribe("p1").await);
        assert!(!registry.unsubscribe("p1").await);
        assert_eq!(registry.entries().await, vec!["p2"]);
        assert!(registry.contains("p2").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_no_frames_while_detached() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("p1").await;
        registry.unsubscribe("p1").await;
        registry.subscribe("p2").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let replay = registry.attach(tx).await;
        assert_eq!(replay, vec!["p2"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_sent_while_attached() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.attach(tx).await;
        assert!(registry.is_attached().await);

        registry.subscribe("p1").await;
        registry.subscribe("p1").await;
        registry.unsubscribe("p1").await;
        registry.unsubscribe("p1").await;

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::subscribe("p1"));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::unsubscribe("p1"));
        assert!(rx.try_recv().is_err());

        registry.detach().await;
        registry.subscribe("p3").await;
        assert!(rx.try_recv().is_err());
        assert!(!registry.send(OutboundFrame::Ping).await);
    }

    #[tokio::test]
    async fn test_content_independent_of_connection_drops() {
        let registry = SubscriptionRegistry::new();
        let ops: &[(&str, bool)] = &[
            ("a", true),
            ("b", true),
            ("c", true),
            ("b", false),
            ("d", true),
            ("a", false),
            ("b", true),
            ("c", false),
            ("c", true),
        ];

        let mut expected: Vec<String> = Vec::new();
        for (i, (id, sub)) in ops.iter().enumerate() {
            // Connection flaps every few operations
            if i % 3 == 0 {
                let (tx, _rx) = mpsc::unbounded_channel();
                registry.attach(tx).await;
            } else if i % 3 == 2 {
                registry.detach().await;
            }

            if *sub {
                registry.subscribe(id).await;
                if !expected.iter().any(|e| e == id) {
                    expected.push(id.to_string());
                }
            } else {
                registry.unsubscribe(id).await;
                expected.retain(|e| e != id);
            }
        }

        let mut actual = registry.entries().await;
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected);
        assert_eq!(actual, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("p1").await;
        registry.clear().await;
        assert!(registry.is_empty().await);
    }
}
