//! Kommo Analytics Bot Library
//!
//! This library provides the core functionality for the Kommo analytics bot:
//! lead fetching from the Kommo CRM, period aggregation, Telegram report
//! composition, CSV exports and the Telegram webhook surface.
//!
//! # Modules
//!
//! - `api`: HTTP surface (health, job status, Telegram webhook).
//! - `core`: Analytics, periods, reports and exports.
//! - `integrations`: Kommo and Telegram clients.
//! - `analytics`: Lead aggregation and ratios.
//! - `circuit_breaker`: Circuit breaker for Telegram delivery.
//! - `client_config`: Per-client JSON config files and chat resolution.
//! - `commands`: Chat command grammar and inline menus.
//! - `config`: Process configuration.
//! - `contact_format`: Phone/e-mail validation and normalization.
//! - `errors`: Error handling types.
//! - `exports`: Categorized CSV exports.
//! - `field_extractor`: Custom field lookup.
//! - `handlers`: HTTP request handlers and shared state.
//! - `jobs`: Background job queue.
//! - `kommo_client`: Kommo REST client.
//! - `lead_fetcher`: Windowed lead queries.
//! - `models`: Core data models.
//! - `orchestrator`: Per-client report and export delivery.
//! - `periods`: Report periods and time windows.
//! - `report_formatter`: Telegram Markdown report templates.
//! - `scheduler`: Fortnightly export trigger.
//! - `telegram`: Telegram Bot API client.
//! - `telegram_models`: Telegram payload models.
//! - `webhook_handler`: Telegram webhook handler.

pub mod api;
pub mod core;
pub mod integrations;

pub mod analytics;
pub mod circuit_breaker;
pub mod client_config;
pub mod commands;
pub mod config;
pub mod contact_format;
pub mod errors;
pub mod exports;
pub mod field_extractor;
pub mod handlers;
pub mod jobs;
pub mod kommo_client;
pub mod lead_fetcher;
pub mod models;
pub mod orchestrator;
pub mod periods;
pub mod report_formatter;
pub mod scheduler;
pub mod telegram;
pub mod telegram_models;
pub mod webhook_handler;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::handlers::AppState;

/// Builds the HTTP router.
///
/// `/health` bypasses rate limiting. Everything else goes through a 1MB body
/// limit and a per-IP governor. Serve with connect info so the governor can
/// fall back to the peer address.
pub fn create_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/telegram/webhook", post(webhook_handler::telegram_webhook))
        .route("/api/v1/jobs/:id", get(handlers::job_status))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}
