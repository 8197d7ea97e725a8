//! Shared utilities for integration testing.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bosh_gateway::bosh::SessionRegistry;
use bosh_gateway::config::GatewayConfig;
use bosh_gateway::http::HttpServer;
use bosh_gateway::lifecycle::Shutdown;
use bosh_gateway::routing::{ChannelRouter, EchoComponent};

/// A gateway running in the background with echo routing.
pub struct TestGateway {
    pub url: String,
    pub registry: Arc<SessionRegistry>,
    /// Feeds the server's reload loop.
    pub config_updates: mpsc::UnboundedSender<GatewayConfig>,
    pub shutdown: Shutdown,
    pub server: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    /// Sessions currently holding at least `held` requests.
    #[allow(dead_code)]
    pub async fn wait_for_held(&self, held: usize) {
        for _ in 0..200 {
            if self.registry.snapshot().iter().any(|s| s.held_slots >= held) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no session reached {held} held requests");
    }
}

/// Config tuned for fast tests: short waits, fast sweeps, no metrics.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.bosh.max_wait_secs = 2;
    config.bosh.max_inactivity_secs = 5;
    config.sweep.interval_ms = 100;
    config.timeouts.request_secs = 10;
    config.observability.metrics_enabled = false;
    config
}

/// Start a gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}{}", addr, config.bosh.path);

    let shutdown = Shutdown::new();
    let (router, events) = ChannelRouter::new();
    let registry = Arc::new(SessionRegistry::new(config.bosh.clone(), Arc::new(router)));
    tokio::spawn(EchoComponent::new(registry.clone(), events).run(shutdown.subscribe()));

    let (config_updates, updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(config, registry.clone());
    let server_shutdown = shutdown.subscribe();

    let server = tokio::spawn(async move {
        let _ = server.run(listener, updates, server_shutdown).await;
    });

    TestGateway {
        url,
        registry,
        config_updates,
        shutdown,
        server,
    }
}

/// Plain HTTP client for hand-written bodies.
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
