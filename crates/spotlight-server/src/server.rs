use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::connection::{self, Heartbeat};
use crate::router::MessageRouter;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub heartbeat: Heartbeat,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/animation", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    router: Arc<MessageRouter>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let state = AppState {
        router: Arc::clone(&router),
        heartbeat: Heartbeat {
            interval: config.heartbeat_interval(),
            timeout: config.client_timeout(),
        },
        shutdown: shutdown.clone(),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        store = router.capacity().store_name(),
        modes = ?router.capacity().catalog().names(),
        "spotlight server started"
    );

    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        grace: config.shutdown_grace(),
        router,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    grace: Duration,
    router: Arc<MessageRouter>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting, close every socket, stop every effect and release
    /// every reservation this process holds.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.router.shutdown(self.grace).await;
        if tokio::time::timeout(self.grace, self.server).await.is_err() {
            tracing::warn!("server task did not stop within grace period");
        }
        tracing::info!("spotlight server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session, rx) = state.router.connect();
    connection::handle_ws_connection(
        socket,
        session,
        rx,
        state.router,
        state.heartbeat,
        state.shutdown,
    )
    .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let router = &state.router;
    let status = if state.shutdown.is_cancelled() {
        "stopping"
    } else {
        "healthy"
    };
    let body = serde_json::json!({
        "status": status,
        "sessions": router.sessions().len(),
        "running_effects": router.supervisor().running_count(),
        "capacity_store": router.capacity().store_name(),
        "modes": router.capacity().catalog().names(),
    });
    let code = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.metrics().snapshot())
}
