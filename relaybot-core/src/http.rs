//! Operational HTTP surface: health, metrics, cache/history admin actions and
//! a direct `GET /gpt/{text}` entry point into the response generator.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_server::{Handle, Server};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use relaybot_common::models::MetricsSnapshot;

use crate::Error;
use crate::services::response_generator::ResponseGenerator;
use crate::state::BotState;

/// User key the cooldown-free HTTP caller is tracked under.
pub const HTTP_USER_KEY: &str = "http:api";

#[derive(Clone)]
pub struct AdminState {
    pub name: String,
    pub state: Arc<BotState>,
    pub generator: Arc<ResponseGenerator>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/reset-history", post(reset_history))
        .route("/cache/clear", post(clear_cache))
        .route("/gpt/{text}", get(gpt))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Running admin server; dropping it leaves the server up until `stop`.
pub struct AdminServer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AdminServer {
    /// Stops accepting connections and waits for in-flight requests.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Admin server task ended abnormally: {:?}", e);
        }
    }
}

pub async fn start_admin_server(addr: SocketAddr, state: AdminState) -> Result<AdminServer, Error> {
    let app = router(state);

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    let handle = Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown_recv.await;
        handle_clone.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
    });

    let server = Server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service());

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Admin server error: {}", e);
        }
        info!("Admin server shut down.");
    });

    match handle.listening().await {
        Some(bound) => info!("Admin server listening on http://{}", bound),
        None => {
            task.abort();
            return Err(Error::Platform(format!("Admin server failed to bind {}", addr)));
        }
    }

    Ok(AdminServer { shutdown: shutdown_send, task })
}

async fn index(State(app): State<AdminState>) -> Json<Value> {
    Json(json!({
        "name": app.name,
        "status": "running",
    }))
}

async fn health(State(app): State<AdminState>) -> Json<Value> {
    let started = app.state.metrics().started_at();
    Json(json!({
        "status": "ok",
        "uptime_secs": (Utc::now() - started).num_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics(State(app): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(app.state.metrics_snapshot())
}

async fn reset_history(State(app): State<AdminState>) -> Json<Value> {
    app.state.reset_history();
    Json(json!({ "message": "Conversation history reset successfully" }))
}

async fn clear_cache(State(app): State<AdminState>) -> Json<Value> {
    let cleared = app.state.clear_cache();
    Json(json!({ "message": "Cache cleared", "cleared": cleared }))
}

async fn gpt(
    State(app): State<AdminState>,
    Path(text): Path<String>,
) -> Result<String, (StatusCode, String)> {
    match app.generator.generate(&text, HTTP_USER_KEY).await {
        Ok(generation) => Ok(generation.text),
        Err(e) if e.is_rejection() => Err((StatusCode::TOO_MANY_REQUESTS, e.to_string())),
        Err(e) => {
            error!("Error in /gpt: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "An error occurred while processing your request.".to_string()))
        }
    }
}
