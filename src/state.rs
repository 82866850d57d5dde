use crate::config::AppConfig;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{EngineError, EngineResult};
use crate::index_engine::IndexEngine;
use crate::progress::ProgressReporter;
use crate::retrieval::RetrievalEngine;
use crate::store::{FallbackStore, PgVectorStore, StoreHandle};
use crate::workspace_id::{derive_workspace_id, WorkspaceRegistry};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-workspace runtime: the two engines that share a store handle and
/// embedding client, plus the progress reporter the HTTP console subscribes
/// to. Constructed lazily the first time a workspace is touched and kept
/// for the process lifetime.
pub struct WorkspaceHandle {
    pub index_engine: Arc<IndexEngine>,
    pub retrieval_engine: Arc<RetrievalEngine>,
    pub progress: Arc<ProgressReporter>,
    pub store: StoreHandle,
    pub cancel: crate::cancel::CancelToken,
}

/// Server-wide events broadcast to `/ws` subscribers. Deliberately small:
/// per-chunk progress rides the per-workspace `ProgressReporter` channel
/// instead, so this only carries state changes the console's workspace list
/// needs to refresh on.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "workspace_registered")]
    WorkspaceRegistered { workspace_id: String, path: String },
    #[serde(rename = "workspace_removed")]
    WorkspaceRemoved { workspace_id: String },
    #[serde(rename = "index_started")]
    IndexStarted { workspace_id: String },
    #[serde(rename = "index_complete")]
    IndexComplete { workspace_id: String },
    #[serde(rename = "index_error")]
    IndexError { workspace_id: String, error: String },
}

impl ServerEvent {
    pub fn workspace_id(&self) -> &str {
        match self {
            ServerEvent::WorkspaceRegistered { workspace_id, .. }
            | ServerEvent::WorkspaceRemoved { workspace_id }
            | ServerEvent::IndexStarted { workspace_id }
            | ServerEvent::IndexComplete { workspace_id }
            | ServerEvent::IndexError { workspace_id, .. } => workspace_id,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<WorkspaceRegistry>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub handles: Arc<DashMap<String, Arc<WorkspaceHandle>>>,
    pub event_tx: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> EngineResult<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let embedder = embedding::build_client(&config.embedding)?;
        let registry = Arc::new(WorkspaceRegistry::new(data_dir.clone()));

        Ok(Self {
            config: Arc::new(config),
            registry,
            embedder,
            handles: Arc::new(DashMap::new()),
            event_tx,
        })
    }

    /// Registers `path` (deriving its workspace id) and lazily builds its
    /// engine pair. Returns the existing handle if the workspace was already
    /// registered and initialized.
    pub async fn get_or_init_workspace(&self, name: &str, path: &Path) -> EngineResult<(String, Arc<WorkspaceHandle>)> {
        let workspace_id = derive_workspace_id(path)?;
        self.registry.register(name.to_string(), path)?;

        if let Some(existing) = self.handles.get(&workspace_id) {
            return Ok((workspace_id, existing.clone()));
        }

        let handle = self.build_handle(&workspace_id, path).await?;
        self.handles.insert(workspace_id.clone(), handle.clone());
        Ok((workspace_id, handle))
    }

    pub fn workspace_handle(&self, workspace_id: &str) -> EngineResult<Arc<WorkspaceHandle>> {
        self.handles
            .get(workspace_id)
            .map(|h| h.clone())
            .ok_or_else(|| EngineError::WorkspaceNotFound(workspace_id.to_string()))
    }

    async fn build_handle(&self, workspace_id: &str, path: &Path) -> EngineResult<Arc<WorkspaceHandle>> {
        let dimension = resolve_embedder_dimension(self.embedder.as_ref()).await?;
        let store = match PgVectorStore::connect(&self.config.database_url, dimension).await {
            Ok(store) => StoreHandle::Postgres(Arc::new(store)),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to in-memory vector store: postgres unavailable");
                StoreHandle::Fallback(Arc::new(FallbackStore::new()))
            }
        };

        let progress = Arc::new(ProgressReporter::new(Path::new(&self.config.data_dir), workspace_id)?);

        let index_engine = Arc::new(IndexEngine::new(
            clone_store(&store),
            Arc::clone(&self.embedder),
            self.config.chunker.clone(),
            self.config.scanner.clone(),
            path.to_path_buf(),
            workspace_id.to_string(),
            Arc::clone(&progress),
            Arc::clone(&self.registry),
        ));

        let retrieval_engine = Arc::new(RetrievalEngine::new(
            clone_store(&store),
            Arc::clone(&self.embedder),
            path.to_path_buf(),
            workspace_id.to_string(),
        ));

        Ok(Arc::new(WorkspaceHandle {
            index_engine,
            retrieval_engine,
            progress,
            store,
            cancel: crate::cancel::CancelToken::new(),
        }))
    }
}

/// Establishes the embedder's true vector width before any table is ever
/// created for it. `dimension()` reads `0` until the first successful
/// `embed` call, so a fresh workspace needs a throwaway probe call here —
/// seeding `run_migrations` from an undiscovered `0` would lock a brand-new
/// table to a 1-wide column that real embeddings can never fit.
async fn resolve_embedder_dimension(embedder: &dyn EmbeddingClient) -> EngineResult<usize> {
    let known = embedder.dimension();
    if known > 0 {
        return Ok(known);
    }
    embedder.embed("dimension probe").await?;
    let discovered = embedder.dimension();
    if discovered == 0 {
        return Err(EngineError::Config("embedding provider returned an empty vector".to_string()));
    }
    Ok(discovered)
}

/// `StoreHandle` wraps its backends in `Arc` already; this just clones the
/// handle's outer enum so the index and retrieval engines can each own one
/// without sharing a `&`.
fn clone_store(store: &StoreHandle) -> StoreHandle {
    match store {
        StoreHandle::Postgres(s) => StoreHandle::Postgres(Arc::clone(s)),
        StoreHandle::Fallback(s) => StoreHandle::Fallback(Arc::clone(s)),
    }
}
