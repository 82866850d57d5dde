use crate::error::EngineError;
use crate::retrieval::{SearchResult, SearchScope};
use serde::{Deserialize, Serialize};

/// Requests the engine answers, shared verbatim between the stdio loop and
/// the HTTP console's JSON bodies — this is the engine's public API, not the
/// tool-dispatcher's wire format (that framing/validation layer sits outside
/// this crate).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    Index {
        #[serde(default)]
        reindex_all: bool,
    },
    Cancel,
    Status,
    Reinitialize,
    Search {
        query: String,
        #[serde(default)]
        min_similarity: Option<f32>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        scope: SearchScopeInput,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchScopeInput {
    pub files: Option<Vec<String>>,
    pub folders: Option<Vec<String>>,
}

impl From<SearchScopeInput> for SearchScope {
    fn from(input: SearchScopeInput) -> Self {
        SearchScope {
            files: input.files,
            folders: input.folders,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub row_count: u64,
    pub total_data_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub initialized: bool,
    pub total_files: usize,
    pub indexed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    pub embedding_model: String,
    pub per_model_stats: Vec<ModelStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for EngineErrorReport {
    fn from(e: &EngineError) -> Self {
        let kind = match e {
            EngineError::Config(_) => "config",
            EngineError::Transport(_) => "transport",
            EngineError::RateLimited => "rate_limited",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::Io(_) => "io",
            EngineError::Busy => "busy",
            EngineError::Cancelled => "cancelled",
            EngineError::Indexing { .. } => "indexing",
            EngineError::WorkspaceNotFound(_) => "workspace_not_found",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Database(_) => "database",
            EngineError::Serde(_) => "serde",
            EngineError::Internal(_) => "internal",
        };
        Self {
            kind: kind.to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Status(StatusReport),
    SearchResults(Vec<SearchResult>),
    Ack,
    Error(EngineErrorReport),
}
