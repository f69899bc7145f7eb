use crate::client_config::ClientRegistry;
use crate::config::Config;
use crate::errors::AppError;
use crate::jobs::{JobQueue, JobStatus};
use crate::telegram::TelegramMessenger;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Telegram retries an update for up to a day when the webhook is slow.
const SEEN_UPDATE_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Per-client config files.
    pub registry: ClientRegistry,
    /// Outgoing Telegram client (acks, help text, menus).
    pub messenger: TelegramMessenger,
    /// Background worker for reports and exports.
    pub jobs: JobQueue,
    /// `update_id`s already handled, so redelivered updates are ignored.
    pub seen_updates: Cache<i64, ()>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: ClientRegistry,
        messenger: TelegramMessenger,
        jobs: JobQueue,
    ) -> Self {
        Self {
            config,
            registry,
            messenger,
            jobs,
            seen_updates: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(SEEN_UPDATE_TTL)
                .build(),
        }
    }
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/jobs/:id
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status: JobStatus = state
        .jobs
        .status(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

    Ok(Json(json!({
        "job_id": id,
        "state": status,
    })))
}
