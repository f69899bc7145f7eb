//! One-shot runner for reports and exports, for cron or manual use.
//!
//! ```text
//! run_report <weekly|last_week|current_month|last_month|year_to_date|last_year> [client_id]
//! run_report export-all
//! ```
//!
//! The aliases `monthly` (last month) and `annual` (last year) are accepted too.

use kommo_analytics_bot::client_config::ClientRegistry;
use kommo_analytics_bot::config::Config;
use kommo_analytics_bot::jobs::Trigger;
use kommo_analytics_bot::orchestrator::{Orchestrator, RunSummary};
use kommo_analytics_bot::periods::ReportKind;
use kommo_analytics_bot::telegram::TelegramMessenger;
use std::sync::Arc;

fn usage() -> String {
    let kinds: Vec<&str> = ReportKind::ALL.iter().map(|k| k.as_str()).collect();
    format!(
        "Usage: run_report <{}> [client_id]\n       run_report export-all",
        kinds.join("|")
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kommo_analytics_bot=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        anyhow::bail!(usage());
    };

    let config = Arc::new(Config::from_env()?);
    let registry = ClientRegistry::new(config.clients_config_dir.clone());
    let messenger = TelegramMessenger::new(
        config.telegram_api_base.clone(),
        config.telegram_bot_token.clone(),
    )?;
    let orchestrator = Orchestrator::new(config, registry, messenger);

    let summary: RunSummary = if command == "export-all" {
        orchestrator.scheduled_export_all().await
    } else {
        let kind = ReportKind::parse(command)
            .ok_or_else(|| anyhow::anyhow!("Unknown report '{}'\n{}", command, usage()))?;
        orchestrator
            .run_report(kind, args.get(1).map(String::as_str), &Trigger::Cli)
            .await
    };

    for (client, error) in &summary.failed {
        eprintln!("✗ {}: {}", client, error);
    }
    println!("{}", summary.describe());

    if !summary.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
