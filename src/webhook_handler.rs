use crate::commands::{
    export_command_text, help_message, menu, resolve_callback, resolve_command, CallbackAction,
    Command, MenuPage,
};
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::jobs::{Job, Trigger};
use crate::models::CanonicalId;
use crate::telegram_models::{Update, WebhookAck};
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Telegram webhook handler.
///
/// Validates the secret token, drops redelivered updates, answers help and
/// menu requests inline and queues reports/exports on the job worker. Always
/// acknowledges quickly so Telegram does not retry.
pub async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Result<Json<WebhookAck>, AppError> {
    validate_webhook_secret(&state, &headers)?;

    let first_delivery = state
        .seen_updates
        .entry(update.update_id)
        .or_insert(())
        .await
        .is_fresh();
    if !first_delivery {
        tracing::debug!("Skipping duplicate update {}", update.update_id);
        return Ok(Json(WebhookAck::ok()));
    }

    let result = dispatch(&state, &update).await;
    if result.is_err() {
        // Telegram redelivers after a 5xx; the retry must not look like a duplicate
        state.seen_updates.invalidate(&update.update_id).await;
    }
    result
}

async fn dispatch(state: &AppState, update: &Update) -> Result<Json<WebhookAck>, AppError> {
    if let Some(ref callback) = update.callback_query {
        if let Err(e) = state.messenger.answer_callback(&callback.id).await {
            tracing::warn!("answerCallbackQuery failed: {}", e);
        }
        let Some(chat) = callback.message.as_ref().map(|m| m.chat.canonical_id()) else {
            tracing::info!("⚠️ [WEBHOOK] Callback without message, ignoring");
            return Ok(Json(WebhookAck::ok()));
        };
        return match callback.data.as_deref().and_then(resolve_callback) {
            Some(CallbackAction::Show(page)) => {
                send_menu(state, &chat, page).await;
                Ok(Json(WebhookAck::ok()))
            }
            Some(CallbackAction::Run(text)) => handle_text(state, &chat, &text).await,
            None => Ok(Json(WebhookAck::ok())),
        };
    }

    let Some(message) = update.any_message() else {
        tracing::info!("⚠️ [WEBHOOK] Update {} has no message", update.update_id);
        return Ok(Json(WebhookAck::ok()));
    };
    let chat = message.chat.canonical_id();
    let text = message.text.clone().unwrap_or_default();
    tracing::info!("📨 [WEBHOOK] Chat {}: {}", chat, text);

    handle_text(state, &chat, &text).await
}

async fn handle_text(state: &AppState, chat: &CanonicalId, text: &str) -> Result<Json<WebhookAck>, AppError> {
    let command = match resolve_command(text) {
        None | Some(Command::Help) => {
            reply(state, chat, &help_message()).await;
            return Ok(Json(WebhookAck::ok()));
        }
        Some(Command::Menu) => {
            send_menu(state, chat, MenuPage::Main).await;
            return Ok(Json(WebhookAck::ok()));
        }
        Some(cmd) => cmd,
    };

    let Some(client_id) = state.registry.find_by_chat_id(chat) else {
        tracing::warn!("⚠️ [WEBHOOK] Chat {} is not linked to any client", chat);
        reply(
            state,
            chat,
            "❌ Este chat não está configurado para nenhum cliente. Verifique o telegram_chat_id no arquivo de configuração.",
        )
        .await;
        return Ok(Json(WebhookAck::ok()));
    };
    tracing::info!("🔍 [WEBHOOK] Chat {} → client {}", chat, client_id);

    let (job, ack_text) = match command {
        Command::Report(kind) => (
            Job::Report {
                kind,
                client_id: Some(client_id),
                trigger: Trigger::ChatCommand {
                    chat_id: chat.clone(),
                },
            },
            format!("📥 Comando recebido: {}\nGerando relatório…", kind.label()),
        ),
        Command::Export(request) => (
            Job::Export {
                client_id,
                chat_id: chat.clone(),
                request,
            },
            format!(
                "📥 Gerando exportação: {}\nAguarde alguns segundos…",
                export_command_text(&request)
            ),
        ),
        Command::Help | Command::Menu => return Ok(Json(WebhookAck::ok())),
    };

    match state.jobs.submit(job).await {
        Ok(job_id) => {
            reply(state, chat, &ack_text).await;
            Ok(Json(WebhookAck::queued(job_id)))
        }
        Err(e) => {
            reply(state, chat, "❌ Fila de processamento cheia, tente novamente em instantes.").await;
            Err(AppError::InternalError(e))
        }
    }
}

/// Best-effort text reply; delivery failures are only logged.
async fn reply(state: &AppState, chat: &CanonicalId, text: &str) {
    if let Err(e) = state.messenger.send_text(chat, text).await {
        tracing::error!("Failed to reply to chat {}: {}", chat, e);
    }
}

async fn send_menu(state: &AppState, chat: &CanonicalId, page: MenuPage) {
    let (text, markup) = menu(page);
    if let Err(e) = state.messenger.send_text_with_markup(chat, text, &markup).await {
        tracing::error!("Failed to send menu to chat {}: {}", chat, e);
    }
}

/// Validate the `X-Telegram-Bot-Api-Secret-Token` header
fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // If no secret is configured, skip validation (warn was already logged at startup)
    let Some(ref expected_secret) = state.config.telegram_webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing secret token header".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook secret token received");
        return Err(AppError::Unauthorized("Invalid webhook secret token".to_string()));
    }

    Ok(())
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_config::ClientRegistry;
    use crate::config::Config;
    use crate::jobs::{JobExecutor, JobQueue, JobStatus};
    use crate::telegram::TelegramMessenger;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::Notify;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Holds every job until the gate is opened.
    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl JobExecutor for Gated {
        async fn execute(&self, _job: Job) -> Result<String, String> {
            self.gate.notified().await;
            Ok("done".to_string())
        }
    }

    fn test_state(telegram_base: String, clients_dir: &Path, jobs: JobQueue) -> Arc<AppState> {
        let config = Config {
            port: 8000,
            telegram_bot_token: "TEST".to_string(),
            telegram_api_base: telegram_base.clone(),
            telegram_webhook_secret: None,
            clients_config_dir: clients_dir.to_path_buf(),
            exports_dir: clients_dir.join("exports"),
            log_dir: clients_dir.join("logs"),
            report_timezone: chrono_tz::America::Sao_Paulo,
            scheduled_exports: false,
            scheduled_export_hour: 9,
            job_queue_capacity: 1,
        };
        let messenger = TelegramMessenger::new(telegram_base, "TEST".to_string()).unwrap();
        Arc::new(AppState::new(
            Arc::new(config),
            ClientRegistry::new(clients_dir),
            messenger,
            jobs,
        ))
    }

    fn week_command(update_id: i64, chat_id: i64) -> Update {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "chat": {"id": chat_id, "type": "group"},
                "text": "/semana"
            }
        }))
        .unwrap()
    }

    async fn wait_for_running(queue: &JobQueue, id: &Uuid) {
        for _ in 0..200 {
            if matches!(queue.status(id).await, Some(JobStatus::Running) | Some(JobStatus::Completed { .. })) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never started", id);
    }

    async fn deliver(state: &Arc<AppState>, update: Update) -> Result<Json<WebhookAck>, AppError> {
        telegram_webhook(State(state.clone()), HeaderMap::new(), Json(update)).await
    }

    #[tokio::test]
    async fn test_redelivered_update_is_queued_after_full_queue() {
        let telegram = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .mount(&telegram)
            .await;

        let clients = tempfile::tempdir().unwrap();
        std::fs::write(
            clients.path().join("acme.json"),
            json!({
                "client_name": "Acme Corp",
                "kommo": {"subdomain": "acme", "pipeline_id": 1001, "origin_field_id": 555},
                "notifications": {"telegram_chat_id": -100321}
            })
            .to_string(),
        )
        .unwrap();

        let gate = Arc::new(Notify::new());
        let queue = JobQueue::start(1, Arc::new(Gated { gate: gate.clone() }));
        let state = test_state(telegram.uri(), clients.path(), queue.clone());

        // one job on the worker, one waiting in the channel
        let running = queue.submit(Job::ExportAllClients).await.unwrap();
        wait_for_running(&queue, &running).await;
        let waiting = queue.submit(Job::ExportAllClients).await.unwrap();

        let rejected = deliver(&state, week_command(7, -100321)).await;
        assert!(rejected.is_err());

        gate.notify_one();
        wait_for_running(&queue, &waiting).await;

        let retried = deliver(&state, week_command(7, -100321)).await.unwrap();
        assert!(retried.0.job_id.is_some(), "redelivered update was treated as a duplicate");

        // a second copy of an accepted update is still ignored
        let duplicate = deliver(&state, week_command(7, -100321)).await.unwrap();
        assert!(duplicate.0.job_id.is_none());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("s3cret", "s3cret"));
        assert!(!constant_time_compare("s3cret", "s3creT"));
        assert!(!constant_time_compare("short", "longer"));
    }
}
