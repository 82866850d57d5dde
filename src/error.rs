use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the indexing and retrieval engine. Each variant maps to
/// how it propagates: retried in the embedding loop, recorded per-chunk, or
/// surfaced immediately to the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited")]
    RateLimited,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("busy: an indexing operation is already in progress for this workspace")]
    Busy,

    #[error("cancelled")]
    Cancelled,

    #[error("indexing failed for paths: {failed_paths:?}")]
    Indexing { failed_paths: Vec<String> },

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::Config(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Transport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            EngineError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            EngineError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            EngineError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            EngineError::Busy => (StatusCode::CONFLICT, self.to_string()),
            EngineError::Cancelled => (StatusCode::OK, self.to_string()),
            EngineError::Indexing { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            EngineError::WorkspaceNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            EngineError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            EngineError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
