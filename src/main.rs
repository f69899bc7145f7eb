use kommo_analytics_bot::api::handlers::AppState;
use kommo_analytics_bot::client_config::ClientRegistry;
use kommo_analytics_bot::config::Config;
use kommo_analytics_bot::core::orchestrator::Orchestrator;
use kommo_analytics_bot::integrations::telegram::TelegramMessenger;
use kommo_analytics_bot::jobs::JobQueue;
use kommo_analytics_bot::{create_router, scheduler};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stdout plus a daily-rolling `app.log` under `log_dir`.
///
/// The returned guard flushes the file writer on drop and must live until exit.
fn init_tracing(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kommo_analytics_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - The Telegram client and the client config registry.
/// - The background job worker and the fortnightly export scheduler.
/// - HTTP routes and middleware (tracing, body limit, rate limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()));
    let _log_guard = init_tracing(&log_dir)?;

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    let registry = ClientRegistry::new(config.clients_config_dir.clone());
    match registry.list_client_ids() {
        Ok(ids) if ids.is_empty() => {
            tracing::warn!("⚠️ No client configs found in {}", registry.dir().display())
        }
        Ok(ids) => tracing::info!("✓ {} client(s) configured: {}", ids.len(), ids.join(", ")),
        Err(e) => tracing::error!("Failed to read client configs: {}", e),
    }

    let messenger = TelegramMessenger::new(
        config.telegram_api_base.clone(),
        config.telegram_bot_token.clone(),
    )?;
    match messenger.health_check().await {
        Ok(username) => tracing::info!("✓ Telegram bot connected: @{}", username),
        Err(e) => tracing::warn!("Telegram getMe failed, continuing anyway: {}", e),
    }

    let orchestrator = Orchestrator::new(config.clone(), registry.clone(), messenger.clone());
    let jobs = JobQueue::start(config.job_queue_capacity, Arc::new(orchestrator));
    tracing::info!("Job worker started (capacity {})", config.job_queue_capacity);

    if config.scheduled_exports {
        scheduler::spawn(
            jobs.clone(),
            config.report_timezone,
            config.scheduled_export_hour,
        );
        tracing::info!(
            "Fortnightly export scheduled on days 1 and 15 at {:02}:00 {}",
            config.scheduled_export_hour,
            config.report_timezone
        );
    } else {
        tracing::info!("Scheduled exports disabled");
    }

    let app_state = Arc::new(AppState::new(config.clone(), registry, messenger, jobs));
    let app = create_router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
