use crate::control::{ModelStats, StatusReport};
use crate::error::EngineResult;
use crate::index_engine::UpdateOptions;
use crate::retrieval::SearchScope;
use crate::state::{AppState, ServerEvent};
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct IndexRequest {
    #[serde(default)]
    pub reindex_all: bool,
}

/// Claims the run slot synchronously, then spawns the run itself in the
/// background and returns immediately; progress is observed via the `/ws`
/// stream or the status endpoint, not this response. Mirrors the
/// fire-and-forget shape of the teacher's indexing trigger, except the
/// `Busy` check happens before the response is written rather than inside
/// the spawned task — otherwise a second concurrent request would always
/// see `200 {"started": true}` even when the engine rejects it.
pub async fn index_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(req): Json<IndexRequest>,
) -> EngineResult<Json<serde_json::Value>> {
    let handle = state.workspace_handle(&workspace_id)?;
    let guard = handle.index_engine.try_begin()?;
    handle.cancel.reset();

    let _ = state.event_tx.send(ServerEvent::IndexStarted {
        workspace_id: workspace_id.clone(),
    });

    let engine = handle.index_engine.clone();
    let cancel = handle.cancel.clone();
    let event_tx = state.event_tx.clone();
    let ws_id = workspace_id.clone();

    tokio::spawn(async move {
        let options = UpdateOptions { reindex_all: req.reindex_all };
        match engine.run_guarded(guard, options, cancel).await {
            Ok(()) => {
                let _ = event_tx.send(ServerEvent::IndexComplete { workspace_id: ws_id });
            }
            Err(e) => {
                tracing::warn!(workspace_id = %ws_id, error = %e, "index run ended with an error");
                let _ = event_tx.send(ServerEvent::IndexError { workspace_id: ws_id, error: e.to_string() });
            }
        }
    });

    Ok(Json(serde_json::json!({ "started": true })))
}

pub async fn cancel_index(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    let handle = state.workspace_handle(&workspace_id)?;
    handle.cancel.cancel();
    Ok(Json(serde_json::json!({ "cancelling": true })))
}

pub async fn index_status(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<StatusReport>> {
    let entry = state.registry.get(&workspace_id)?;
    let handle = state.workspace_handle(&workspace_id)?;

    let per_model = handle.store.per_model_stats(&workspace_id).await?;
    let embedding_model = handle.index_engine.model().to_string();
    let indexed_files = per_model
        .iter()
        .find(|(model, ..)| model == &embedding_model)
        .map(|(_, count, _)| *count as usize)
        .unwrap_or(0);

    Ok(Json(StatusReport {
        initialized: true,
        total_files: entry.total_files,
        indexed_files,
        last_updated: Some(entry.last_accessed),
        embedding_model,
        per_model_stats: per_model
            .into_iter()
            .map(|(model, row_count, total_data_bytes)| ModelStats {
                model,
                row_count: row_count.max(0) as u64,
                total_data_bytes: total_data_bytes.max(0) as u64,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub folders: Option<Vec<String>>,
}

pub async fn search(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> EngineResult<Json<serde_json::Value>> {
    let handle = state.workspace_handle(&workspace_id)?;
    let scope = SearchScope {
        files: req.files,
        folders: req.folders,
    };
    let results = handle
        .retrieval_engine
        .search(&req.query, req.min_similarity, req.limit, scope, &state.config.search)
        .await?;
    Ok(Json(serde_json::json!({ "results": results })))
}

/// Reinitialize: drop every row for the workspace's current embedding model,
/// leaving the registry entry intact. Used when a model change invalidates
/// all prior vectors.
pub async fn reinitialize(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    let handle = state.workspace_handle(&workspace_id)?;
    let model = handle.index_engine.model().to_string();
    handle.store.clear_all(&workspace_id, &model).await?;
    Ok(Json(serde_json::json!({ "reinitialized": true })))
}
