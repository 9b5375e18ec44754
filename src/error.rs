use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the event-processing core.
#[derive(Error, Debug)]
pub enum LeadflowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Auth errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Durable queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    // Non-fatal engine failures — logged with context, never abort the
    // containing job.
    #[error("Engine failure in {engine}: {reason}")]
    EngineFailure { engine: &'static str, reason: String },

    // Fail-fast startup errors
    #[error("Startup error: {0}")]
    Startup(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for LeadflowError.
pub type Result<T> = std::result::Result<T, LeadflowError>;

/// Machine-readable error code surfaced to ingest clients.
impl LeadflowError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_error",
            Self::Database(_) | Self::Migration(_) => "database_error",
            Self::Queue(_) => "queue_error",
            Self::Json(_) => "malformed_json",
            Self::EngineFailure { .. } => "engine_failure",
            Self::Startup(_) => "startup_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) | Self::Other(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// `{error: {code, message}}` so every handler can just return
/// `Result<T, LeadflowError>` and let axum render the failure.
impl IntoResponse for LeadflowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
