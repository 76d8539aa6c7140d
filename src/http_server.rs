/// HTTP Server Module
///
/// Read-only status endpoints for monitoring a running bot.

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use tower_http::cors::CorsLayer;

use crate::status::{BotStatus, SharedStatus};

pub const SERVICE_NAME: &str = "hype_poster";

#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
}

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status_endpoint))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339()
    })))
}

/// Current bot status snapshot
async fn status_endpoint(State(state): State<AppState>) -> Json<BotStatus> {
    Json(state.status.snapshot().await)
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("Status server listening on port {}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
