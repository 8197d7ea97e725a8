//! BOSH gateway
//!
//! Bidirectional streams over synchronous HTTP, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     BOSH GATEWAY                     │
//!                    │                                                      │
//!   POST /http-bind  │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐   │
//!   ─────────────────┼─▶│  http   │──▶│ envelope │──▶│  SessionManager  │   │
//!                    │  │ server  │   │  codec   │   └────────┬─────────┘   │
//!                    │  └─────────┘   └──────────┘            │             │
//!                    │                                        ▼             │
//!                    │                               ┌──────────────────┐   │
//!                    │                               │ SessionRegistry  │   │
//!                    │                               │  sid → Session   │   │
//!                    │                               └────────┬─────────┘   │
//!                    │                                        │             │
//!   held response    │  ┌─────────┐                  ┌────────▼─────────┐   │
//!   ◀────────────────┼──│  slot   │◀─────────────────│     Session      │   │
//!                    │  └─────────┘   outbound queue └────────┬─────────┘   │
//!                    │                                        │ inbound     │
//!                    │                               ┌────────▼─────────┐   │
//!                    │                               │  PacketRouter    │──┼──▶ component
//!                    │                               └──────────────────┘   │
//!                    │                                                      │
//!                    │  config (watch/reload) · sweeper · admin · metrics   │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bosh_gateway::bosh::SessionRegistry;
use bosh_gateway::config::loader::load_or_default;
use bosh_gateway::config::watcher::ConfigWatcher;
use bosh_gateway::config::RoutingMode;
use bosh_gateway::http::HttpServer;
use bosh_gateway::lifecycle::{signals, Shutdown};
use bosh_gateway::observability::{logging, metrics};
use bosh_gateway::routing::{ChannelRouter, DiscardComponent, EchoComponent};

#[derive(Parser)]
#[command(name = "bosh-gateway")]
#[command(about = "Long-polling HTTP session gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `[listener] bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bosh-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        path = %config.bosh.path,
        max_wait_secs = config.bosh.max_wait_secs,
        hold_requests = config.bosh.hold_requests,
        concurrent_requests = config.bosh.concurrent_requests,
        routing = ?config.routing.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match args.config.as_deref() {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let (router, events) = ChannelRouter::new();
    let registry = Arc::new(SessionRegistry::new(config.bosh.clone(), Arc::new(router)));
    let component = match config.routing.mode {
        RoutingMode::Echo => tokio::spawn(
            EchoComponent::new(registry.clone(), events).run(shutdown.subscribe()),
        ),
        RoutingMode::Discard => {
            tokio::spawn(DiscardComponent::new(events).run(shutdown.subscribe()))
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, registry);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    let _ = component.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
