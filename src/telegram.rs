use crate::circuit_breaker::{create_delivery_circuit_breaker, DeliveryCircuitBreaker};
use crate::errors::AppError;
use crate::models::CanonicalId;
use crate::telegram_models::InlineKeyboardMarkup;
use failsafe::futures::CircuitBreaker;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API client used for every outgoing message and file.
#[derive(Clone)]
pub struct TelegramMessenger {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: DeliveryCircuitBreaker,
}

impl TelegramMessenger {
    /// Creates a new `TelegramMessenger`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Bot API root, normally [`DEFAULT_API_BASE`].
    /// * `token` - Bot token from @BotFather.
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Telegram client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            breaker: create_delivery_circuit_breaker(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Runs one Bot API call behind the circuit breaker.
    async fn guarded<F>(&self, method: &str, call: F) -> Result<Value, AppError>
    where
        F: std::future::Future<Output = Result<Value, AppError>>,
    {
        match self.breaker.call(call).await {
            Ok(v) => Ok(v),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::ExternalApiError(format!(
                "Telegram {} rejected: circuit open",
                method
            ))),
        }
    }

    async fn read_response(method: &str, response: reqwest::Response) -> Result<Value, AppError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Telegram {} returned {}: {}",
                method, status, error_text
            )));
        }

        response.json::<Value>().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Telegram {} response: {}", method, e))
        })
    }

    async fn post_json(&self, method: &str, payload: Value) -> Result<Value, AppError> {
        let url = self.method_url(method);
        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| AppError::ExternalApiError(format!("Telegram {} failed: {}", method, e)))?;
            Self::read_response(method, response).await
        };
        self.guarded(method, call).await
    }

    /// Sends a Markdown text message.
    pub async fn send_text(&self, chat_id: &CanonicalId, text: &str) -> Result<(), AppError> {
        self.post_json(
            "sendMessage",
            json!({"chat_id": chat_id.as_str(), "text": text, "parse_mode": "Markdown"}),
        )
        .await?;
        tracing::debug!("📤 Sent message to chat {}", chat_id);
        Ok(())
    }

    /// Sends a Markdown text message with an inline keyboard.
    pub async fn send_text_with_markup(
        &self,
        chat_id: &CanonicalId,
        text: &str,
        markup: &InlineKeyboardMarkup,
    ) -> Result<(), AppError> {
        self.post_json(
            "sendMessage",
            json!({
                "chat_id": chat_id.as_str(),
                "text": text,
                "parse_mode": "Markdown",
                "reply_markup": markup,
            }),
        )
        .await?;
        Ok(())
    }

    /// Clears the loading spinner of an inline button press.
    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), AppError> {
        self.post_json("answerCallbackQuery", json!({"callback_query_id": callback_id}))
            .await?;
        Ok(())
    }

    /// Uploads a file as a document.
    pub async fn send_file(
        &self,
        chat_id: &CanonicalId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), AppError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::InternalError(format!("Reading {} for upload: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("export")
            .to_string();
        let mime = mime_for(path);

        let url = self.method_url("sendDocument");
        let call = async {
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name.clone())
                .mime_str(mime)
                .map_err(|e| AppError::InternalError(format!("Invalid mime type: {}", e)))?;
            let mut form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .part("document", part);
            if let Some(caption) = caption {
                form = form.text("caption", caption.to_string());
            }

            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| AppError::ExternalApiError(format!("Telegram sendDocument failed: {}", e)))?;
            Self::read_response("sendDocument", response).await
        };
        self.guarded("sendDocument", call).await?;

        tracing::info!("📎 Sent {} to chat {}", file_name, chat_id);
        Ok(())
    }

    /// Confirms the bot token works.
    ///
    /// # Returns
    ///
    /// * `Result<String, AppError>` - The bot username.
    pub async fn health_check(&self) -> Result<String, AppError> {
        let url = self.method_url("getMe");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Telegram getMe failed: {}", e)))?;
        let body = Self::read_response("getMe", response).await?;
        Ok(body
            .get("result")
            .and_then(|r| r.get("username"))
            .and_then(|u| u.as_str())
            .unwrap_or("unknown")
            .to_string())
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}
