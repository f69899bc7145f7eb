use chrono_tz::Tz;
use std::path::PathBuf;

/// Process-wide settings from the environment (and `.env`).
///
/// Per-client settings live in JSON files under `clients_config_dir`; see
/// [`crate::client_config`].
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`, when the webhook was registered with one.
    pub telegram_webhook_secret: Option<String>,
    pub clients_config_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub log_dir: PathBuf,
    pub report_timezone: Tz,
    pub scheduled_exports: bool,
    pub scheduled_export_hour: u32,
    pub job_queue_capacity: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be true or false, got '{}'", key, other),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: env_or("PORT", "8000")
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("TELEGRAM_BOT_TOKEN cannot be empty");
                    }
                    Ok(token.trim().to_string())
                })?,
            telegram_api_base: {
                let url = env_or("TELEGRAM_API_BASE", crate::telegram::DEFAULT_API_BASE);
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("TELEGRAM_API_BASE must start with http:// or https://");
                }
                url
            },
            telegram_webhook_secret: std::env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            clients_config_dir: PathBuf::from(env_or("CLIENTS_CONFIG_DIR", "config")),
            exports_dir: PathBuf::from(env_or("EXPORTS_DIR", "exports")),
            log_dir: PathBuf::from(env_or("LOG_DIR", "logs")),
            report_timezone: env_or("REPORT_TIMEZONE", "America/Sao_Paulo")
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("REPORT_TIMEZONE is not a valid IANA zone: {}", e))?,
            scheduled_exports: parse_bool("SCHEDULED_EXPORTS", &env_or("SCHEDULED_EXPORTS", "true"))?,
            scheduled_export_hour: env_or("SCHEDULED_EXPORT_HOUR", "9")
                .parse::<u32>()
                .ok()
                .filter(|h: &u32| *h < 24)
                .ok_or_else(|| anyhow::anyhow!("SCHEDULED_EXPORT_HOUR must be between 0 and 23"))?,
            job_queue_capacity: env_or("JOB_QUEUE_CAPACITY", "64")
                .parse::<usize>()
                .ok()
                .filter(|c: &usize| *c > 0)
                .ok_or_else(|| anyhow::anyhow!("JOB_QUEUE_CAPACITY must be a positive number"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Clients config dir: {}", config.clients_config_dir.display());
        tracing::debug!("Exports dir: {}", config.exports_dir.display());
        tracing::debug!("Report timezone: {}", config.report_timezone);
        if config.telegram_webhook_secret.is_none() {
            tracing::warn!("TELEGRAM_WEBHOOK_SECRET not set, webhook accepts unauthenticated updates");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
