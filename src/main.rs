//! Fleetwatch CLI
//!
//! Watches the fleet backend's real-time channel from the terminal:
//! - Stream live printer/job/system events as JSON lines
//! - Print the WebSocket endpoint derived from a base URL
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleetwatch::config::{generate_default_config, Config, LoggingConfig};
use fleetwatch::realtime::{endpoint_url, ConnectionState, RealtimeClient};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live event stream for a 3D-printer fleet")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides config and FLEETWATCH_BASE_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print events until interrupted
    Watch {
        /// Printers to receive live status for
        printers: Vec<String>,
    },

    /// Show the WebSocket endpoint for the configured base URL
    Endpoint,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(url) = cli.url {
        config.server.base_url = url;
    }

    match cli.command {
        Commands::Watch { printers } => {
            init_logging(&config.logging);
            watch(&config, printers).await
        }
        Commands::Endpoint => {
            let url = endpoint_url(&config.server.base_url, &config.realtime.ws_path)?;
            println!("{}", url);
            Ok(())
        }
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    eprintln!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fleetwatch={}", logging.level).into());
    let json = logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn watch(config: &Config, printers: Vec<String>) -> anyhow::Result<()> {
    tracing::info!("Fleetwatch v{}", env!("CARGO_PKG_VERSION"));

    let client = RealtimeClient::new(&config.realtime);
    let mut events = client.subscribe_events();

    for printer in &printers {
        client.subscribe(printer).await;
    }
    client.connect_with(config).await?;

    let max_attempts = config.realtime.max_reconnect_attempts;
    let mut health = tokio::time::interval(Duration::from_secs(1));
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let outcome = loop {
        tokio::select! {
            _ = &mut interrupted => {
                tracing::info!("Interrupted");
                break Ok(());
            }
            received = events.recv() => match received {
                Ok(received) => println!("{}", serde_json::to_string(&received)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output fell behind, events skipped");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = health.tick() => {
                let status = client.reconnect_status();
                if client.state() == ConnectionState::Disconnected
                    && status.next_retry_at.is_none()
                    && status.attempts >= max_attempts
                {
                    break Err(anyhow::anyhow!(
                        "backend unreachable after {} reconnect attempts",
                        status.attempts
                    ));
                }
            }
        }
    };

    client.shutdown().await;
    outcome
}
