//! `ArchonServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::GatewayError;
use crate::gateway::handshake::{HandshakeQuery, authenticate, check_capacity};
use crate::gateway::protocol::{SearchCompleted, UploadProgress};
use crate::gateway::{Broadcaster, Gateway, run_session};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection and room tables.
    pub gateway: Arc<Gateway>,
    /// Event fan-out handle.
    pub broadcaster: Broadcaster,
    /// Fires once to stop the listener and every session.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// A running listener.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl ServerHandle {
    /// The bound address (resolves port `0`).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Fire the shutdown token and give sessions up to `grace` to close.
    ///
    /// Returns `false` if the listener had to be aborted.
    pub async fn stop(self, grace: Duration) -> bool {
        self.shutdown.cancel();
        drain(self.task, grace).await
    }
}

async fn drain(task: JoinHandle<()>, grace: Duration) -> bool {
    let abort = task.abort_handle();
    if tokio::time::timeout(grace, task).await.is_ok() {
        info!("gateway stopped");
        true
    } else {
        warn!(grace_secs = grace.as_secs(), "gateway did not stop in time, aborting");
        abort.abort();
        false
    }
}

/// The Archon realtime gateway server.
pub struct ArchonServer {
    config: Arc<ServerConfig>,
    gateway: Arc<Gateway>,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ArchonServer {
    /// Create a server with empty connection and room tables.
    pub fn new(config: ServerConfig) -> Self {
        let gateway = Arc::new(Gateway::new(config.send_queue_capacity));
        Self {
            config: Arc::new(config),
            broadcaster: Broadcaster::new(gateway.clone()),
            gateway,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: self.gateway.clone(),
            broadcaster: self.broadcaster.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/presence", get(presence_handler))
            .route(
                "/broadcast/projects/{project_id}/upload-progress",
                post(upload_progress_handler),
            )
            .route(
                "/broadcast/projects/{project_id}/search-completed",
                post(search_completed_handler),
            )
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `host:port` and serve until the shutdown token fires.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.clone();

        info!(%addr, max_connections = self.config.max_connections, "gateway listening");

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                    info!("gateway listener shutting down");
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "gateway listener failed");
            }
        });

        Ok(ServerHandle {
            addr,
            task,
            shutdown: self.shutdown.clone(),
        })
    }

    /// Connection and room tables.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Event fan-out handle.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Stop accepting clients and close every session. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`ArchonServer::shutdown`] has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(values))
}

/// GET /ws?user_id=..
///
/// The identity and the connection limit are checked before the upgrade
/// so a refused client never becomes a connection.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match authenticate(&query) {
        Ok(identity) => identity,
        Err(e) => return reject(e, "identity"),
    };
    if let Err(e) = check_capacity(state.gateway.connection_count(), state.config.max_connections)
    {
        return reject(e, "capacity");
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let gateway = state.gateway.clone();
    let heartbeat = state.config.heartbeat();
    let token = state.shutdown.clone();
    upgrade.on_upgrade(move |socket| run_session(socket, identity, gateway, heartbeat, token))
}

fn reject(err: GatewayError, reason: &'static str) -> Response {
    warn!(reason, error = %err, "handshake rejected");
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
    err.into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.gateway.connection_count(),
        state.gateway.room_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /presence
async fn presence_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "users": state.gateway.online_identities(),
        "connections": state.gateway.connection_count(),
    }))
}

/// POST /broadcast/projects/{project_id}/upload-progress
async fn upload_progress_handler(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(progress): Json<UploadProgress>,
) -> impl IntoResponse {
    let recipients = state.broadcaster.upload_progress(&project_id, progress);
    (StatusCode::ACCEPTED, Json(json!({ "recipients": recipients })))
}

/// POST /broadcast/projects/{project_id}/search-completed
async fn search_completed_handler(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(done): Json<SearchCompleted>,
) -> impl IntoResponse {
    let recipients = state.broadcaster.search_completed(&project_id, done);
    (StatusCode::ACCEPTED, Json(json!({ "recipients": recipients })))
}
