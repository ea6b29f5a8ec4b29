//! # Fleetwatch
//!
//! Real-time update channel for a 3D-printer fleet monitoring backend.
//!
//! ## Features
//!
//! - **Single connection**: one WebSocket per client, derived from the backend's HTTP base URL
//! - **Resilient**: linear backoff reconnects with a bounded attempt budget
//! - **Subscription replay**: printer subscriptions survive drops and are re-sent on reconnect
//! - **Typed events**: tagged JSON frames decoded into [`InboundEvent`], malformed frames never fatal
//! - **Fan-out**: broadcast streams, a last-value channel and callback observers
//!
//! ## Modules
//!
//! - [`realtime`]: codec, registry, supervisor, dispatcher and the client facade
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetwatch::{Config, RealtimeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let client = RealtimeClient::new(&config.realtime);
//!
//!     client.subscribe("printer-1").await;
//!     client.connect_with(&config).await?;
//!
//!     let mut events = client.subscribe_events();
//!     if let Ok(received) = events.recv().await {
//!         println!("{} at {}", received.event.kind(), received.received_at);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod realtime;

// Re-export top-level types for convenience
pub use realtime::{
    ConnectionState, EventObserver, InboundEvent, OutboundFrame, RealtimeClient, RealtimeError,
    RealtimeResult, ReceivedEvent, ReconnectStatus,
};

pub use config::{
    generate_default_config, BaseUrlProvider, Config, ConfigError, LoggingConfig,
    RealtimeConfig, ServerConfig,
};
