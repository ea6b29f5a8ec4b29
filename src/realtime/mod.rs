//! Real-Time Update Channel
//!
//! Keeps a live WebSocket connection to the fleet backend and turns its
//! frames into typed events.
//!
//! ## Architecture
//!
//! - **Messages**: frame codec for inbound events and outbound control frames
//! - **SubscriptionRegistry**: printers the client wants live status for
//! - **ConnectionSupervisor**: connection lifecycle, receive loop, backoff
//! - **EventDispatcher**: fan-out to streams and observers
//! - **RealtimeClient**: the four above behind one handle
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleetwatch::config::RealtimeConfig;
//! use fleetwatch::realtime::RealtimeClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RealtimeClient::new(&RealtimeConfig::default());
//!     let mut events = client.subscribe_events();
//!
//!     client.subscribe("printer-1").await;
//!     client.connect("http://localhost:8000").await?;
//!
//!     while let Ok(received) = events.recv().await {
//!         println!("{:?}", received.event);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod client;
mod dispatcher;
mod error;
mod messages;
mod registry;
mod supervisor;

#[cfg(test)]
mod mock_backend;

pub use client::RealtimeClient;
pub use dispatcher::{DispatcherConfig, EventDispatcher, EventObserver, ObserverId, ReceivedEvent};
pub use error::{RealtimeError, RealtimeResult};
pub use messages::{decode, InboundEvent, OutboundFrame};
pub use registry::SubscriptionRegistry;
pub use supervisor::{
    backoff_delay, endpoint_url, ConnectionState, ConnectionSupervisor, ReconnectStatus,
    SupervisorConfig,
};
