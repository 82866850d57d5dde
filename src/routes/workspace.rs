use crate::error::{EngineError, EngineResult};
use crate::state::{AppState, ServerEvent};
use crate::workspace_id::WorkspaceEntry;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(alias = "root_path")]
    pub path: String,
}

pub async fn list_workspaces(State(state): State<AppState>) -> Json<Vec<WorkspaceEntry>> {
    Json(state.registry.list())
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<WorkspaceEntry>> {
    Ok(Json(state.registry.get(&workspace_id)?))
}

/// Registers a workspace path and eagerly builds its engine pair so the
/// first index/search request doesn't pay connection setup latency.
pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> EngineResult<Json<WorkspaceEntry>> {
    let path = PathBuf::from(&req.path);
    if !path.is_dir() {
        return Err(EngineError::BadRequest(format!("not a directory: {}", req.path)));
    }

    let (workspace_id, _handle) = state.get_or_init_workspace(&req.name, &path).await?;
    let entry = state.registry.get(&workspace_id)?;

    let _ = state.event_tx.send(ServerEvent::WorkspaceRegistered {
        workspace_id: entry.id.clone(),
        path: entry.path.clone(),
    });

    Ok(Json(entry))
}

pub async fn remove_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    state.registry.remove(&workspace_id)?;
    state.handles.remove(&workspace_id);

    let _ = state.event_tx.send(ServerEvent::WorkspaceRemoved {
        workspace_id: workspace_id.clone(),
    });

    Ok(Json(serde_json::json!({ "removed": workspace_id })))
}

pub async fn activate_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> EngineResult<Json<WorkspaceEntry>> {
    let entry = state.registry.get(&workspace_id)?;
    let path = PathBuf::from(&entry.path);
    let (_, _handle) = state.get_or_init_workspace(&entry.name, &path).await?;
    Ok(Json(entry))
}
