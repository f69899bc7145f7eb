use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Errors raised by the bot's HTTP surface, Kommo/Telegram calls and config loading.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Unknown job, client or other resource.
    NotFound(String),
    /// Kommo or Telegram failed or answered with a non-success status.
    ExternalApiError(String),
    /// Local failure: file I/O, job queue, encoding.
    InternalError(String),
    /// Missing or wrong webhook secret.
    Unauthorized(String),
    /// Missing or invalid configuration / credentials for a client.
    ConfigError(String),
    /// Another error with a note about what was being attempted.
    WithContext {
        source: Box<AppError>,
        context: String,
    },
}

impl AppError {
    /// Innermost error of a context chain.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.root() {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::WithContext { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to return to HTTP callers; details stay in the logs.
    fn public_message(&self) -> String {
        match self.root() {
            AppError::NotFound(msg) => msg.clone(),
            AppError::ExternalApiError(_) => "External service error".to_string(),
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::ConfigError(_) => "Configuration error".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::WithContext { source, context } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match status {
            StatusCode::NOT_FOUND => tracing::debug!("{}", self),
            StatusCode::UNAUTHORIZED => tracing::warn!("🔒 {}", self),
            _ => tracing::error!("💥 {}", self),
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(format!("I/O error: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::InternalError(format!("XLSX error: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Like [`ResultExt::context`], building the message only on error.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.with_context(|| context.into())
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
