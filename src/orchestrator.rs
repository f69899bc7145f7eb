//! Fetch → aggregate → compose/export → deliver, one client at a time.
//!
//! Every client runs inside its own error boundary: a failing client is
//! logged (and reported to the chat when a chat command asked for it) and the
//! loop moves on.

use crate::analytics::{aggregate, efficiency_by_origin, sales_by_month};
use crate::client_config::{ClientConfig, ClientRegistry};
use crate::commands::ExportRequest;
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::exports::{generate_exports, write_bundle};
use crate::jobs::{Job, JobExecutor, Trigger};
use crate::kommo_client::KommoClient;
use crate::lead_fetcher::{fetch_closed, fetch_created, fetch_created_with_unsorted, fetch_won_in_window};
use crate::models::{CanonicalId, PeriodWindow};
use crate::periods::{ExportPeriod, ReportKind, ReportTemplate};
use crate::report_formatter::{compose_annual, compose_monthly, compose_weekly, ReportContext};
use crate::telegram::TelegramMessenger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// Per-run tally of client outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn describe(&self) -> String {
        format!("{} ok, {} failed", self.succeeded.len(), self.failed.len())
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    registry: ClientRegistry,
    messenger: TelegramMessenger,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, registry: ClientRegistry, messenger: TelegramMessenger) -> Self {
        Self {
            config,
            registry,
            messenger,
        }
    }

    fn tz(&self) -> Tz {
        self.config.report_timezone
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz())
    }

    fn load_client(&self, client_id: &str) -> Result<ClientConfig, AppError> {
        self.registry
            .load(client_id)
            .with_context(|| format!("Loading client {}", client_id))
    }

    /// Client ids to process: `only` when given and known, otherwise every client.
    fn target_clients(&self, only: Option<&str>) -> Result<Vec<String>, AppError> {
        let all = self.registry.list_client_ids()?;
        match only {
            Some(id) if all.iter().any(|c| c == id) => Ok(vec![id.to_string()]),
            Some(id) => Err(AppError::NotFound(format!("Client {} not configured", id))),
            None => Ok(all),
        }
    }

    /// Builds the report text for one client.
    pub async fn build_report(
        &self,
        client: &ClientConfig,
        kind: ReportKind,
        window: PeriodWindow,
    ) -> Result<String, AppError> {
        let kommo = KommoClient::for_client(client)?;
        let account = kommo
            .health_check()
            .await
            .with_context(|| format!("Kommo connection for {}", client.client_id))?;
        tracing::debug!("{} → Kommo account {}", client.client_id, account);

        let settings = &client.kommo;
        let created = if settings.include_unsorted {
            fetch_created_with_unsorted(&kommo, &settings.pipeline_id, Some(window)).await
        } else {
            fetch_created(&kommo, &settings.pipeline_id, Some(window)).await
        };
        let won = fetch_won_in_window(
            &kommo,
            &settings.pipeline_id,
            &settings.won_status_id,
            window,
            settings.reconcile_won_with_updated_at,
        )
        .await;

        let result = aggregate(&created, &won, &settings.won_status_id, &settings.origin_field_id);
        tracing::info!(
            "📊 {}: {} created, {} cohort won, {} won in window",
            client.client_id,
            result.total_created,
            result.cohort_won,
            result.total_closed_won
        );

        let ctx = ReportContext {
            client_name: client.display_name().to_string(),
            period_label: kind.label().to_string(),
            window,
            tz: self.tz(),
        };

        Ok(match kind.template() {
            ReportTemplate::Weekly => compose_weekly(&result, &ctx),
            ReportTemplate::Monthly => {
                let lost = fetch_closed(&kommo, &settings.pipeline_id, &settings.lost_status_id, window).await;
                let rows = efficiency_by_origin(&created, &won, &settings.origin_field_id);
                compose_monthly(&result, &rows, lost.len(), &ctx)
            }
            ReportTemplate::Annual => {
                let months = sales_by_month(&won, self.tz());
                compose_annual(&result, &months, &ctx)
            }
        })
    }

    async fn report_for_client(&self, client_id: &str, kind: ReportKind, window: PeriodWindow) -> Result<(), AppError> {
        let client = self.load_client(client_id)?;
        let text = self.build_report(&client, kind, window).await?;
        self.messenger
            .send_text(&client.notifications.telegram_chat_id, &text)
            .await
            .with_context(|| format!("Delivering report to {}", client_id))?;
        tracing::info!("✅ Report {} sent for {}", kind.as_str(), client_id);
        Ok(())
    }

    /// Runs a report for one client (or all), isolating failures per client.
    pub async fn run_report(&self, kind: ReportKind, only: Option<&str>, trigger: &Trigger) -> RunSummary {
        let mut summary = RunSummary::default();
        tracing::info!("🚀 Report {} started ({:?})", kind.as_str(), trigger);

        let clients = match self.target_clients(only) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("❌ Cannot list clients: {}", e);
                self.notify_failure(trigger, &format!("❌ Erro ao gerar relatório: {}", e)).await;
                summary.failed.push((only.unwrap_or("*").to_string(), e.to_string()));
                return summary;
            }
        };

        let window = kind.window(self.now());
        for client_id in clients {
            tracing::info!("📌 Processing client {}", client_id);
            match self.report_for_client(&client_id, kind, window).await {
                Ok(()) => summary.succeeded.push(client_id),
                Err(e) => {
                    tracing::error!("💥 Report failed for {}: {}", client_id, e);
                    self.notify_failure(trigger, &format!("❌ Erro ao gerar relatório: {}", e))
                        .await;
                    summary.failed.push((client_id, e.to_string()));
                }
            }
        }

        tracing::info!("🏁 Report {} finished: {}", kind.as_str(), summary.describe());
        summary
    }

    async fn notify_failure(&self, trigger: &Trigger, text: &str) {
        if let Trigger::ChatCommand { chat_id } = trigger {
            if let Err(e) = self.messenger.send_text(chat_id, text).await {
                tracing::error!("Could not report failure to chat {}: {}", chat_id, e);
            }
        }
    }

    /// Generates the requested export and uploads the files to `chat_id`.
    ///
    /// Returns the number of files sent.
    pub async fn export_to_chat(
        &self,
        client: &ClientConfig,
        chat_id: &CanonicalId,
        request: &ExportRequest,
    ) -> Result<usize, AppError> {
        let kommo = KommoClient::for_client(client)?;
        let now = self.now();
        let window = request.period.window(now);
        let categories = request.scope.categories();

        let bundle = generate_exports(&kommo, client, window, &categories, self.tz()).await;
        let files = write_bundle(&bundle, &self.config.exports_dir, &client.client_id, now)?;

        let label = request.period.label();
        for file in &files {
            let caption = format!("📊 {} - {} - {}", file.category.title(), label, file.format.label());
            self.messenger
                .send_file(chat_id, &file.path, Some(&caption))
                .await
                .with_context(|| format!("Uploading {}", file.path.display()))?;
        }
        Ok(files.len())
    }

    /// Chat-triggered export; failures are reported to the chat.
    pub async fn run_export(&self, client_id: &str, chat_id: &CanonicalId, request: &ExportRequest) -> Result<String, AppError> {
        let outcome = async {
            let client = self.load_client(client_id)?;
            let sent = self.export_to_chat(&client, chat_id, request).await?;
            self.messenger
                .send_text(
                    chat_id,
                    &format!(
                        "✅ Exportação concluída: {}\n{} arquivo(s)",
                        request.period.label(),
                        sent
                    ),
                )
                .await?;
            Ok::<usize, AppError>(sent)
        }
        .await;

        match outcome {
            Ok(sent) => {
                tracing::info!("✅ {}: {} export files sent", client_id, sent);
                Ok(format!("{} files", sent))
            }
            Err(e) => {
                tracing::error!("❌ Export failed for {}: {}", client_id, e);
                if let Err(send_err) = self
                    .messenger
                    .send_text(chat_id, &format!("❌ Erro ao gerar exportação: {}", e))
                    .await
                {
                    tracing::error!("Could not report failure to chat {}: {}", chat_id, send_err);
                }
                Err(e)
            }
        }
    }

    async fn scheduled_export_for(&self, client_id: &str) -> Result<usize, AppError> {
        let client = self.load_client(client_id)?;
        let chat_id = client.notifications.telegram_chat_id.clone();

        self.messenger
            .send_text(
                &chat_id,
                &format!(
                    "📦 *Exportação Quinzenal Automática*\n\n\
                     Cliente: {}\n\
                     Período: Últimos 15 dias\n\
                     Aguarde o envio dos arquivos...",
                    client.display_name()
                ),
            )
            .await?;

        let request = ExportRequest {
            scope: crate::commands::ExportScope::All,
            period: ExportPeriod::Last15Days,
        };
        let sent = self.export_to_chat(&client, &chat_id, &request).await?;
        self.messenger
            .send_text(&chat_id, "✅ Exportação quinzenal concluída!")
            .await?;
        Ok(sent)
    }

    /// Fortnightly export of the last 15 days to every client's chat.
    pub async fn scheduled_export_all(&self) -> RunSummary {
        tracing::info!("🔄 Scheduled fortnightly export started");
        let mut summary = RunSummary::default();

        let clients = match self.registry.list_client_ids() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("❌ Cannot list clients: {}", e);
                summary.failed.push(("*".to_string(), e.to_string()));
                return summary;
            }
        };

        for client_id in clients {
            match self.scheduled_export_for(&client_id).await {
                Ok(sent) => {
                    tracing::info!("✅ {}: {} files sent", client_id, sent);
                    summary.succeeded.push(client_id);
                }
                Err(e) => {
                    tracing::error!("❌ Scheduled export failed for {}: {}", client_id, e);
                    summary.failed.push((client_id, e.to_string()));
                }
            }
        }

        tracing::info!("🏁 Scheduled export finished: {}", summary.describe());
        summary
    }
}

#[async_trait]
impl JobExecutor for Orchestrator {
    async fn execute(&self, job: Job) -> Result<String, String> {
        match job {
            Job::Report {
                kind,
                client_id,
                trigger,
            } => {
                let summary = self.run_report(kind, client_id.as_deref(), &trigger).await;
                if summary.succeeded.is_empty() && !summary.failed.is_empty() {
                    Err(summary
                        .failed
                        .iter()
                        .map(|(c, e)| format!("{}: {}", c, e))
                        .collect::<Vec<_>>()
                        .join("; "))
                } else {
                    Ok(summary.describe())
                }
            }
            Job::Export {
                client_id,
                chat_id,
                request,
            } => self
                .run_export(&client_id, &chat_id, &request)
                .await
                .map_err(|e| e.to_string()),
            Job::ExportAllClients => Ok(self.scheduled_export_all().await.describe()),
        }
    }

    async fn on_panic(&self, job: &Job, _error: &str) {
        let Some(chat_id) = job.requesting_chat() else {
            return;
        };
        let trigger = Trigger::ChatCommand {
            chat_id: chat_id.clone(),
        };
        self.notify_failure(&trigger, "❌ Erro inesperado ao processar o comando. Tente novamente.")
            .await;
    }
}
