use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid points data format")]
    MalformedPayload,

    #[error("Failed to query address data")]
    QueryFailed { details: Vec<String> },

    #[error("Ingestion queue closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidJson | AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::QueryFailed { .. } => StatusCode::BAD_REQUEST,
            AppError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Store(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self {
            AppError::QueryFailed { details } => json!({
                "error": self.to_string(),
                "details": details,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Point overflow for {address}/{platform}")]
    Overflow { address: String, platform: String },

    #[error("Unexpected row state in {table}: {detail}")]
    CorruptRow { table: String, detail: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Only transport failures are worth another attempt; bad rows and
    /// overflow fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
            }
            StoreError::Unavailable(_) => true,
            StoreError::Overflow { .. } | StoreError::CorruptRow { .. } => false,
        }
    }
}
