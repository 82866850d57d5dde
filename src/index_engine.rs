use crate::cancel::CancelToken;
use crate::chunker::{self, Chunk};
use crate::config::{
    ChunkerConfig, ScannerConfig, EMBED_BATCH_SIZE, EMBED_RETRY_ATTEMPTS, EMBED_RETRY_BASE_DELAY_MS,
    EMBED_RETRY_MAX_DELAY_MS, EMBED_RETRY_MULTIPLIER, INTER_BATCH_SLEEP_MS,
};
use crate::embedding::EmbeddingClient;
use crate::error::{EngineError, EngineResult};
use crate::progress::{ProgressData, ProgressMessage, ProgressReporter};
use crate::scanner::{self, ScannedFile};
use crate::store::{ChunkMetadata, ChunkRecord, StoreHandle};
use crate::workspace_id::WorkspaceRegistry;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub reindex_all: bool,
}

/// One file read into chunks (or recognized as having none), pending
/// whatever the embedding loop does with it.
struct ReadResult {
    path: String,
    mtime_ms: i64,
    chunks: Vec<Chunk>,
}

/// Orchestrates a single workspace+model's indexing lifecycle: diff against
/// the store, chunk changed files, embed with retry/cancel, batch-insert.
/// One engine instance is constructed per active workspace and held for the
/// workspace's lifetime; `update` is re-entrant-safe via `running`.
pub struct IndexEngine {
    store: StoreHandle,
    embedder: Arc<dyn EmbeddingClient>,
    chunker_cfg: ChunkerConfig,
    scanner_cfg: ScannerConfig,
    root: PathBuf,
    workspace_id: String,
    progress: Arc<ProgressReporter>,
    registry: Arc<WorkspaceRegistry>,
    running: Arc<AtomicBool>,
}

/// Guards `running` with a single compare-and-swap; released on drop no
/// matter how `update` returns, mirroring the guard-on-drop shape used for
/// the store's advisory lock. Acquisition is synchronous so a caller can
/// detect `Busy` before ever spawning or awaiting the run itself — callers
/// that fire the run in the background (the HTTP console) must acquire the
/// guard on the calling task, not inside the spawned one, or a concurrent
/// request would only discover `Busy` after already reporting success.
pub(crate) struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(running: Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl IndexEngine {
    pub fn new(
        store: StoreHandle,
        embedder: Arc<dyn EmbeddingClient>,
        chunker_cfg: ChunkerConfig,
        scanner_cfg: ScannerConfig,
        root: PathBuf,
        workspace_id: String,
        progress: Arc<ProgressReporter>,
        registry: Arc<WorkspaceRegistry>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker_cfg,
            scanner_cfg,
            root,
            workspace_id,
            progress,
            registry,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn model(&self) -> &str {
        self.embedder.id()
    }

    /// Runs the full state machine described in the component contract.
    /// Rejects with `Busy` if another `update` is already running on this
    /// engine instance (the intra-process level of the two-level
    /// concurrency control; the inter-process level is the store's advisory
    /// lock, taken below).
    pub async fn update(&self, options: UpdateOptions, cancel: CancelToken) -> EngineResult<()> {
        let guard = self.try_begin()?;
        self.run_guarded(guard, options, cancel).await
    }

    /// Synchronously claims the intra-process run slot without starting the
    /// run. Lets a caller that cannot await the whole run inline (the HTTP
    /// console, which fires indexing in the background) still surface
    /// `Busy` to its own caller before it ever returns a response.
    pub(crate) fn try_begin(&self) -> EngineResult<RunGuard> {
        RunGuard::acquire(Arc::clone(&self.running)).ok_or(EngineError::Busy)
    }

    /// Runs the state machine holding a guard already claimed via
    /// `try_begin`. The guard is dropped (releasing the run slot) once the
    /// run finishes, regardless of outcome.
    pub(crate) async fn run_guarded(&self, guard: RunGuard, options: UpdateOptions, cancel: CancelToken) -> EngineResult<()> {
        let workspace_id = self.workspace_id.clone();
        let result = self
            .store
            .with_workspace_lock(&workspace_id, || self.run_locked(options, cancel))
            .await;

        drop(guard);
        result
    }

    async fn run_locked(&self, options: UpdateOptions, cancel: CancelToken) -> EngineResult<()> {
        let workspace_id = self.workspace_id.clone();
        let model = self.embedder.id().to_string();
        let dimension = self.resolve_dimension().await?;

        self.progress.emit(ProgressMessage::Start { total_files: 0 });

        // Step 2: enumerate.
        let scanned = scanner::scan(&self.root, &self.scanner_cfg.include_patterns, &self.scanner_cfg.exclude_patterns);
        let scanned_paths: HashSet<String> = scanned.iter().map(|f| f.path.clone()).collect();

        if options.reindex_all {
            self.store.clear_all(&workspace_id, &model).await?;
        } else {
            // Step 3: prune paths no longer present or no longer matching.
            let indexed = self.store.indexed_paths(&workspace_id, &model).await?;
            let still = scanner::still_present(
                &self.root,
                &indexed.iter().cloned().collect::<Vec<_>>(),
                &self.scanner_cfg.include_patterns,
                &self.scanner_cfg.exclude_patterns,
            );
            let still_set: HashSet<&String> = still.iter().collect();
            let gone: Vec<String> = indexed.into_iter().filter(|p| !still_set.contains(p)).collect();
            if !gone.is_empty() {
                self.store.delete_for(&workspace_id, &model, &gone).await?;
            }
        }
        self.store
            .delete_absent(&workspace_id, &model, &scanned_paths.iter().cloned().collect::<Vec<_>>())
            .await?;

        // Step 4: diff by mtime.
        let to_reindex = if options.reindex_all {
            scanned.clone()
        } else {
            let candidate_paths: Vec<String> = scanned.iter().map(|f| f.path.clone()).collect();
            let store_mtimes = self.store.mtimes_for(&workspace_id, &model, &candidate_paths).await?;
            scanned
                .iter()
                .filter(|f| f.size > 0)
                .filter(|f| store_mtimes.get(&f.path).map(|stored| f.mtime_ms > *stored).unwrap_or(true))
                .cloned()
                .collect()
        };

        if to_reindex.is_empty() {
            self.refresh_registry_stats(&workspace_id, &model, scanned.len()).await;
            self.progress.emit(ProgressMessage::Complete {
                total_files: scanned.len(),
                completed_files: 0,
            });
            return Ok(());
        }

        // Step 5: pre-delete so partial prior state never coexists with fresh rows.
        let to_reindex_paths: Vec<String> = to_reindex.iter().map(|f| f.path.clone()).collect();
        self.store.delete_for(&workspace_id, &model, &to_reindex_paths).await?;

        // Step 6: read & chunk.
        let mut read_results = Vec::with_capacity(to_reindex.len());
        let mut skipped_files = Vec::new();
        let mut failed_files = Vec::new();
        for file in &to_reindex {
            match self.read_and_chunk(file) {
                Ok(result) if result.chunks.is_empty() => skipped_files.push(result),
                Ok(result) => read_results.push(result),
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "failed to read file for indexing");
                    failed_files.push(file.path.clone());
                }
            }
        }

        // Step 7: cancel checkpoint.
        if cancel.is_cancelled() {
            self.refresh_registry_stats(&workspace_id, &model, scanned.len()).await;
            self.progress.emit(ProgressMessage::Cancelled(ProgressData {
                is_cancelled: Some(true),
                total_files: to_reindex.len(),
                ..Default::default()
            }));
            return Ok(());
        }

        if !failed_files.is_empty() {
            self.progress.emit(ProgressMessage::Warning {
                message: format!("failed to read {} file(s): {}", failed_files.len(), failed_files.join(", ")),
            });
        }

        // Step 8: marker rows for skipped files.
        if !skipped_files.is_empty() {
            let markers: Vec<ChunkRecord> = skipped_files
                .iter()
                .map(|f| ChunkRecord {
                    path: f.path.clone(),
                    mtime: f.mtime_ms,
                    content: "[SKIPPED: no indexable content]".to_string(),
                    model: model.clone(),
                    dimension,
                    embedding: vec![0.0; dimension],
                    metadata: ChunkMetadata {
                        start_line: 1,
                        end_line: 1,
                        skipped: Some(true),
                        reason: Some("empty after extraction".to_string()),
                        original_size: None,
                    },
                })
                .collect();
            self.store.insert(&workspace_id, &markers).await?;
        }

        // Step 9: embed in batches.
        let total_chunks: usize = read_results.iter().map(|r| r.chunks.len()).sum();
        let total_files = read_results.len();
        let outcome = self
            .embed_and_insert(&workspace_id, &model, dimension, &read_results, total_chunks, total_files, &cancel)
            .await?;

        // Step 10: terminal event.
        if outcome.cancelled {
            self.refresh_registry_stats(&workspace_id, &model, scanned.len()).await;
            self.progress.emit(ProgressMessage::Cancelled(ProgressData {
                completed_chunks: outcome.completed_chunks,
                total_chunks,
                total_files,
                completed_files: outcome.completed_files,
                is_cancelled: Some(true),
                ..Default::default()
            }));
            return Ok(());
        }

        self.refresh_registry_stats(&workspace_id, &model, scanned.len()).await;

        if !outcome.failed_chunks.is_empty() {
            let distinct: HashSet<&String> = outcome.failed_chunks.iter().collect();
            let distinct_list: Vec<String> = distinct.iter().map(|s| (*s).clone()).collect();
            self.progress.emit(ProgressMessage::Warning {
                message: format!("{} file(s) had chunks that failed to embed: {}", distinct.len(), distinct_list.join(", ")),
            });
            self.progress.emit(ProgressMessage::Error {
                message: "indexing completed with embedding failures".to_string(),
            });
            return Err(EngineError::Indexing {
                failed_paths: distinct.into_iter().cloned().collect(),
            });
        }

        self.progress.emit(ProgressMessage::Complete {
            total_files: scanned.len(),
            completed_files: outcome.completed_files,
        });
        Ok(())
    }

    /// Refreshes the workspace registry's cached `{total_files, indexed_files}`
    /// so the status control request reflects the just-finished run instead of
    /// the zeros written at registration time. Non-fatal: a registry write
    /// failure is logged, not propagated, since it must never fail an
    /// otherwise-successful index run.
    async fn refresh_registry_stats(&self, workspace_id: &str, model: &str, total_files: usize) {
        let indexed_files = match self.store.indexed_paths(workspace_id, model).await {
            Ok(paths) => paths.len(),
            Err(e) => {
                tracing::warn!(workspace_id = %workspace_id, error = %e, "failed to read indexed paths for registry stats");
                return;
            }
        };
        if let Err(e) = self.registry.update_stats(workspace_id, total_files, indexed_files) {
            tracing::warn!(workspace_id = %workspace_id, error = %e, "failed to persist workspace registry stats");
        }
    }

    /// Discovers or validates the embedding dimension before any row is
    /// written. A schema that already declares a dimension is authoritative;
    /// otherwise a one-token probe call establishes it.
    async fn resolve_dimension(&self) -> EngineResult<usize> {
        if let Some(declared) = self.store.schema_dimension().await? {
            return Ok(declared);
        }
        if self.embedder.dimension() > 0 {
            return Ok(self.embedder.dimension());
        }
        self.embedder.embed("dimension probe").await?;
        let discovered = self.embedder.dimension();
        if discovered == 0 {
            return Err(EngineError::Config("embedding provider returned an empty vector".to_string()));
        }
        Ok(discovered)
    }

    fn read_and_chunk(&self, file: &ScannedFile) -> EngineResult<ReadResult> {
        let content = std::fs::read_to_string(self.root.join(&file.path))?;
        let ext = Path::new(&file.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let chunks = chunker::chunk_text(&content, &ext, &self.chunker_cfg);
        Ok(ReadResult {
            path: file.path.clone(),
            mtime_ms: file.mtime_ms,
            chunks,
        })
    }

    async fn embed_and_insert(
        &self,
        workspace_id: &str,
        model: &str,
        dimension: usize,
        read_results: &[ReadResult],
        total_chunks: usize,
        total_files: usize,
        cancel: &CancelToken,
    ) -> EngineResult<EmbedOutcome> {
        let mut pending: Vec<PendingChunk> = Vec::with_capacity(total_chunks);
        for r in read_results {
            for chunk in &r.chunks {
                pending.push(PendingChunk {
                    path: r.path.clone(),
                    mtime: r.mtime_ms,
                    chunk: chunk.clone(),
                });
            }
        }

        let mut completed_chunks = 0usize;
        let mut completed_files_set: HashSet<String> = HashSet::new();
        let mut failed_chunks = Vec::new();

        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            if cancel.is_cancelled() {
                return Ok(EmbedOutcome {
                    cancelled: true,
                    completed_chunks,
                    completed_files: completed_files_set.len(),
                    failed_chunks,
                });
            }

            let futures = batch.iter().map(|p| embed_with_retry(self.embedder.as_ref(), &p.chunk.content, cancel, &self.progress));
            let results = join_all(futures).await;

            if cancel.is_cancelled() {
                return Ok(EmbedOutcome {
                    cancelled: true,
                    completed_chunks,
                    completed_files: completed_files_set.len(),
                    failed_chunks,
                });
            }

            let mut rows = Vec::with_capacity(batch.len());
            for (pending_chunk, result) in batch.iter().zip(results) {
                match result {
                    EmbedAttempt::Success(vector) => {
                        rows.push(ChunkRecord {
                            path: pending_chunk.path.clone(),
                            mtime: pending_chunk.mtime,
                            content: pending_chunk.chunk.content.clone(),
                            model: model.to_string(),
                            dimension,
                            embedding: vector,
                            metadata: ChunkMetadata {
                                start_line: pending_chunk.chunk.start_line,
                                end_line: pending_chunk.chunk.end_line,
                                ..Default::default()
                            },
                        });
                        completed_chunks += 1;
                        completed_files_set.insert(pending_chunk.path.clone());
                    }
                    EmbedAttempt::Failed => {
                        failed_chunks.push(pending_chunk.path.clone());
                    }
                    EmbedAttempt::Aborted(e) => return Err(e),
                }
            }

            self.store.insert(workspace_id, &rows).await?;

            self.progress.emit_progress(
                ProgressData {
                    completed_chunks,
                    total_chunks,
                    total_files,
                    completed_files: completed_files_set.len(),
                    current_file: batch.last().map(|p| p.path.clone()),
                    ..Default::default()
                },
                true,
            );

            tokio::time::sleep(Duration::from_millis(INTER_BATCH_SLEEP_MS)).await;
        }

        Ok(EmbedOutcome {
            cancelled: false,
            completed_chunks,
            completed_files: completed_files_set.len(),
            failed_chunks,
        })
    }
}

struct PendingChunk {
    path: String,
    mtime: i64,
    chunk: Chunk,
}

struct EmbedOutcome {
    cancelled: bool,
    completed_chunks: usize,
    completed_files: usize,
    failed_chunks: Vec<String>,
}

enum EmbedAttempt {
    Success(Vec<f32>),
    Failed,
    Aborted(EngineError),
}

/// Retries a single chunk embedding on rate-limit or transient transport
/// errors with exponential backoff; `Unauthorized` and other errors abort
/// immediately rather than retrying (credential failures do not resolve by
/// waiting).
async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    text: &str,
    cancel: &CancelToken,
    progress: &ProgressReporter,
) -> EmbedAttempt {
    let mut delay_ms = EMBED_RETRY_BASE_DELAY_MS;

    for attempt in 1..=EMBED_RETRY_ATTEMPTS {
        if cancel.is_cancelled() {
            return EmbedAttempt::Aborted(EngineError::Cancelled);
        }

        match client.embed(text).await {
            Ok(vector) => return EmbedAttempt::Success(vector),
            Err(EngineError::Unauthorized(msg)) => return EmbedAttempt::Aborted(EngineError::Unauthorized(msg)),
            Err(EngineError::RateLimited) | Err(EngineError::Transport(_)) => {
                if attempt == EMBED_RETRY_ATTEMPTS {
                    return EmbedAttempt::Failed;
                }
                progress.emit_progress(
                    ProgressData {
                        waiting_for_rate_limit: Some(true),
                        ..Default::default()
                    },
                    true,
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * EMBED_RETRY_MULTIPLIER as u64).min(EMBED_RETRY_MAX_DELAY_MS);
            }
            Err(other) => return EmbedAttempt::Aborted(other),
        }
    }
    EmbedAttempt::Failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_guard_prevents_concurrent_acquire() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = RunGuard::acquire(Arc::clone(&flag));
        assert!(first.is_some());
        let second = RunGuard::acquire(Arc::clone(&flag));
        assert!(second.is_none());
        drop(first);
        let third = RunGuard::acquire(Arc::clone(&flag));
        assert!(third.is_some());
    }
}
