//! Thinnest possible stdio consumer of the engine's control API: one
//! `ControlRequest` JSON object per stdin line, one `ControlResponse` JSON
//! object per stdout line. A real tool dispatcher (message framing against a
//! larger surface, schema validation) is expected to sit in front of this in
//! production; this binary only proves the engine is drivable over stdio.

use anyhow::{Context, Result};
use semindex::cancel::CancelToken;
use semindex::config::AppConfig;
use semindex::control::{ControlRequest, ControlResponse, EngineErrorReport, ModelStats, StatusReport};
use semindex::index_engine::UpdateOptions;
use semindex::state::AppState;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "semindex=info".into())).init();

    let workspace_path = std::env::var("SEMINDEX_WORKSPACE_PATH")
        .context("SEMINDEX_WORKSPACE_PATH must name the workspace this stdio process serves")?;
    let workspace_name = std::env::var("SEMINDEX_WORKSPACE_NAME").unwrap_or_else(|_| "stdio".to_string());

    let config = AppConfig::from_env()?;
    let state = AppState::new(config).await?;
    let (workspace_id, _handle) = state.get_or_init_workspace(&workspace_name, &PathBuf::from(&workspace_path)).await?;
    let cancel = CancelToken::new();

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => handle_request(&state, &workspace_id, request, &cancel).await,
            Err(e) => ControlResponse::Error(EngineErrorReport {
                kind: "bad_request".to_string(),
                message: format!("malformed control request: {e}"),
            }),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

async fn handle_request(
    state: &AppState,
    workspace_id: &str,
    request: ControlRequest,
    cancel: &CancelToken,
) -> ControlResponse {
    let handle = match state.workspace_handle(workspace_id) {
        Ok(h) => h,
        Err(e) => return ControlResponse::Error(EngineErrorReport::from(&e)),
    };

    match request {
        ControlRequest::Index { reindex_all } => {
            cancel.reset();
            match handle.index_engine.update(UpdateOptions { reindex_all }, cancel.clone()).await {
                Ok(()) => ControlResponse::Ack,
                Err(e) => ControlResponse::Error(EngineErrorReport::from(&e)),
            }
        }
        ControlRequest::Cancel => {
            cancel.cancel();
            ControlResponse::Ack
        }
        ControlRequest::Status => match status_report(state, &handle, workspace_id).await {
            Ok(report) => ControlResponse::Status(report),
            Err(e) => ControlResponse::Error(EngineErrorReport::from(&e)),
        },
        ControlRequest::Reinitialize => {
            let model = handle.index_engine.model().to_string();
            match handle.store.clear_all(workspace_id, &model).await {
                Ok(()) => ControlResponse::Ack,
                Err(e) => ControlResponse::Error(EngineErrorReport::from(&e)),
            }
        }
        ControlRequest::Search { query, min_similarity, limit, scope } => {
            match handle
                .retrieval_engine
                .search(&query, min_similarity, limit, scope.into(), &state.config.search)
                .await
            {
                Ok(results) => ControlResponse::SearchResults(results),
                Err(e) => ControlResponse::Error(EngineErrorReport::from(&e)),
            }
        }
    }
}

async fn status_report(
    state: &AppState,
    handle: &semindex::state::WorkspaceHandle,
    workspace_id: &str,
) -> semindex::error::EngineResult<StatusReport> {
    let entry = state.registry.get(workspace_id)?;
    let per_model = handle.store.per_model_stats(workspace_id).await?;
    let embedding_model = handle.index_engine.model().to_string();
    let indexed_files = per_model
        .iter()
        .find(|(model, ..)| model == &embedding_model)
        .map(|(_, count, _)| *count as usize)
        .unwrap_or(0);

    Ok(StatusReport {
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
    })
}
