//! `RelayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::HealthReport;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::RelayContext;
use crate::websocket::registry::ClientRegistry;
use crate::websocket::session::{SessionSettings, run_ws_session};

/// Path of the `WebSocket` upgrade endpoint.
pub const WS_PATH: &str = "/websocket";

/// State cloned into every route handler.
#[derive(Clone)]
pub struct AppState {
    /// Registry and router shared by every session.
    pub relay: Arc<RelayContext>,
    /// Shutdown token and session tracker.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Startup time, for `/health` uptime.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The notification relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    relay: Arc<RelayContext>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let relay = Arc::new(RelayContext::new(registry, config.fanout_policy));
        Self {
            config: Arc::new(config),
            relay,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from the given Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Routes: the upgrade endpoint plus the diagnostics endpoints.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(WS_PATH, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/clients", get(clients_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the server task,
    /// which finishes after [`ShutdownCoordinator::trigger`].
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        Ok((local_addr, handle))
    }

    /// Registry of connected clients.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.relay.registry
    }

    /// Shutdown handle shared with every session.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /websocket. Origins are not checked.
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let settings = SessionSettings {
        outbound_buffer: state.config.outbound_buffer,
        flush_timeout: state.config.flush_timeout(),
    };
    let relay = state.relay.clone();
    let shutdown = state.shutdown.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| warn!(%peer, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            let token = shutdown.token();
            shutdown.track_session(run_ws_session(socket, peer, relay, settings, token))
        })
}

/// GET /health: uptime and client counts.
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(&state.relay.registry, state.start_time).await)
}

/// `/clients` response body.
#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    /// One display string per connected client.
    pub clients: Vec<String>,
}

/// GET /clients
async fn clients_handler(State(state): State<AppState>) -> Json<ClientsResponse> {
    Json(ClientsResponse {
        clients: state.relay.registry.snapshot().await,
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
