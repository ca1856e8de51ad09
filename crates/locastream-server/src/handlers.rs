//! HTTP and WebSocket handlers for the locastream server.
//!
//! The upgrade handler turns each WebSocket into a connection handle and
//! hands it to the hub for the rest of its life.

use crate::config::Config;
use crate::metrics::{self, MetricsObserver};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use locastream_core::Hub;
use locastream_transport::{AxumConnection, Connection};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Viewer page served at `/` and `/home`.
const VIEWER_HTML: &str = include_str!("../static/viewer.html");

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Hub::with_config(config.hub.to_hub_config())
            .with_observer(Arc::new(MetricsObserver));

        Self { hub, config }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/", get(home_handler))
        .route("/home", get(home_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Location streaming server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve until `signal` resolves, then close every live connection.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let draining = Arc::clone(&state);
    axum::serve(
        listener,
        app(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        info!("Shutting down server...");
        draining.hub.shutdown().await;
    })
    .await?;

    // Upgrades accepted between the signal and the listener closing.
    let late = state.hub.shutdown().await;
    if late > 0 {
        debug!(connections = late, "Closed late connections");
    }

    info!("Server gracefully stopped");
    Ok(())
}

/// Wait for ctrl-c.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count(),
    }))
}

/// Viewer page handler. A WebSocket upgrade on the same path joins the hub.
async fn home_handler(
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| handle_websocket(socket, addr, state))
            .into_response(),
        None => Html(VIEWER_HTML).into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, addr, state))
}

/// Handle a WebSocket connection for its whole lifetime.
async fn handle_websocket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let conn = AxumConnection::new(socket, Some(addr));
    let id = conn.id().clone();

    debug!(connection = %id, remote = %addr, "WebSocket connected");

    let summary = state.hub.serve(Arc::new(conn)).await;

    debug!(
        connection = %id,
        received = summary.received,
        rejected = summary.rejected,
        "WebSocket disconnected"
    );
}
