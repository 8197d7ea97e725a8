//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the bind endpoint
//! - Wire up middleware (request ID, tracing, body limit)
//! - Bound each request by the live `timeouts.request_secs`
//! - Decode envelopes and hand them to the session manager
//! - Map session errors to protocol conditions and status codes
//! - Run the sweeper, the admin listener and config reloads alongside
//! - Release held requests on shutdown before draining connections

use arc_swap::ArcSwap;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::admin;
use crate::bosh::error::BoshError;
use crate::bosh::manager::SessionManager;
use crate::bosh::registry::SessionRegistry;
use crate::config::GatewayConfig;
use crate::http::envelope;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::net::connection::{ConnectionHandle, ConnectionTracker};
use crate::observability::metrics;

/// Content type of responses when the session did not negotiate one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub connections: ConnectionTracker,
    /// Latest validated configuration; swapped on reload.
    pub config: Arc<ArcSwap<GatewayConfig>>,
}

impl AppState {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.manager.registry()
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server around `registry`. Inbound payloads go to
    /// the registry's router.
    pub fn new(config: GatewayConfig, registry: Arc<SessionRegistry>) -> Self {
        registry.update_policy(config.bosh.clone());

        let state = AppState {
            manager: SessionManager::new(registry),
            connections: ConnectionTracker::new(),
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
        };

        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            state,
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The request timeout is applied in [`bind_handler`] from the live
    /// config, so a reload takes effect on the next request.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route(&config.bosh.path, post(bind_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            path = %self.config.bosh.path,
            "HTTP server starting"
        );

        let registry = self.state.registry().clone();

        tokio::spawn(
            registry
                .clone()
                .run_sweeper(self.config.sweep.interval(), shutdown.resubscribe()),
        );

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_app = admin::setup_admin_router(self.state.clone());
            let mut admin_shutdown = shutdown.resubscribe();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin_app)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API server error");
                }
            });
        }

        let live_config = self.state.config.clone();
        let reload_registry = registry.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(config) = config_updates.recv() => {
                        apply_reload(&live_config, &reload_registry, config);
                    }
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, releasing held requests");
                registry.shutdown();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry().clone()
    }
}

fn apply_reload(live: &ArcSwap<GatewayConfig>, registry: &SessionRegistry, config: GatewayConfig) {
    let current = live.load_full();
    if current.listener.bind_address != config.listener.bind_address
        || current.bosh.path != config.bosh.path
    {
        tracing::warn!("Listener address and bind path changes require a restart");
    }
    if config.timeouts.request_secs <= current.bosh.max_wait_secs {
        tracing::warn!(
            request_secs = config.timeouts.request_secs,
            previous_max_wait_secs = current.bosh.max_wait_secs,
            "Request timeout is shorter than the wait of existing sessions"
        );
    }

    let policy = config.bosh.clone();
    live.store(Arc::new(config));
    registry.update_policy(policy);
    tracing::info!("Configuration reloaded");
}

/// Handle one request on the bind endpoint.
async fn bind_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _guard = state.connections.track();
    let request_id = request_id(&headers).to_string();

    let request = match envelope::decode(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(request_id = %request_id, peer = %peer, error = %e, "Undecodable request");
            metrics::record_request("rejected");
            return xml_response(
                StatusCode::BAD_REQUEST,
                DEFAULT_CONTENT_TYPE,
                envelope::encode_error("error", "bad-request"),
            );
        }
    };

    tracing::debug!(
        request_id = %request_id,
        sid = request.sid.as_deref().unwrap_or("-"),
        rid = request.rid,
        payload = request.payload.len(),
        "Bind request"
    );

    let transport = ConnectionHandle::new(Some(peer));
    let timeout = Duration::from_secs(state.config.load().timeouts.request_secs);
    let outcome = match tokio::time::timeout(timeout, state.manager.process(request, &transport)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(request_id = %request_id, timeout_secs = timeout.as_secs(), "Request timed out");
            metrics::record_request("timeout");
            return xml_response(
                StatusCode::REQUEST_TIMEOUT,
                DEFAULT_CONTENT_TYPE,
                envelope::encode_error("error", "internal-server-error"),
            );
        }
    };
    let content_type = transport
        .content_type()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    match outcome {
        Ok(reply) => {
            metrics::record_request(reply.outcome());
            xml_response(StatusCode::OK, &content_type, envelope::encode_reply(reply))
        }
        Err(err) => {
            let (status, kind) = error_status(&err);
            tracing::debug!(request_id = %request_id, error = %err, status = status.as_u16(), "Request rejected");
            metrics::record_request("rejected");
            xml_response(status, &content_type, envelope::encode_error(kind, err.condition()))
        }
    }
}

/// Status code and body `type` for a session error.
pub fn error_status(err: &BoshError) -> (StatusCode, &'static str) {
    match err {
        BoshError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "terminate"),
        BoshError::OverActivity { .. } => (StatusCode::FORBIDDEN, "terminate"),
        BoshError::OutOfOrderRequest { .. }
        | BoshError::MissingRequestId
        | BoshError::PauseTooLong { .. }
        | BoshError::BadRequest(_) => (StatusCode::BAD_REQUEST, "error"),
    }
}

fn xml_response(status: StatusCode, content_type: &str, body: String) -> Response {
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}
