mod schema;

pub use schema::schema_dimension;

use crate::error::{EngineError, EngineResult};
use futures_util::Future;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::{HashMap, HashSet};

/// Per-chunk position and provenance, stored as the `metadata` JSONB column.
/// Kept separate from the indexed columns (workspace_id/path/model) so new
/// fields can be added without a migration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
}

impl ChunkMetadata {
    pub fn is_skipped(&self) -> bool {
        self.skipped.unwrap_or(false)
    }
}

/// One row ready for insertion: a chunk plus its embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub model: String,
    pub dimension: usize,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A single similarity hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub content: String,
    pub similarity: f32,
    pub start_line: usize,
    pub end_line: usize,
}

/// Postgres + pgvector backing store. One pool serves every workspace;
/// rows are partitioned by the `workspace_id` column rather than by schema
/// or database, matching the single-tenant-process, multi-workspace shape
/// of the rest of the engine.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub async fn connect(database_url: &str, dimension: usize) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        schema::run_migrations(&pool, dimension).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Paths currently persisted for a workspace/model pair.
    pub async fn indexed_paths(&self, workspace_id: &str, model: &str) -> EngineResult<HashSet<String>> {
        let rows = sqlx::query("SELECT DISTINCT path FROM chunks WHERE workspace_id = $1 AND model = $2")
            .bind(workspace_id)
            .bind(model)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// The mtime recorded for each already-indexed path, used to decide
    /// whether a file changed since the last run. Chunks from the same file
    /// share one mtime, so `MIN` and `MAX` agree; `MAX` is used defensively.
    pub async fn mtimes_for(
        &self,
        workspace_id: &str,
        model: &str,
        paths: &[String],
    ) -> EngineResult<HashMap<String, i64>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT path, MAX(mtime) FROM chunks \
             WHERE workspace_id = $1 AND model = $2 AND path = ANY($3) \
             GROUP BY path",
        )
        .bind(workspace_id)
        .bind(model)
        .bind(paths)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<i64, _>(1)))
            .collect())
    }

    /// Removes every chunk belonging to the given paths (a file changed or
    /// disappeared).
    pub async fn delete_for(&self, workspace_id: &str, model: &str, paths: &[String]) -> EngineResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM chunks WHERE workspace_id = $1 AND model = $2 AND path = ANY($3)")
            .bind(workspace_id)
            .bind(model)
            .bind(paths)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes chunks for any path not in `keep` — the prune step of a full
    /// reindex pass.
    pub async fn delete_absent(&self, workspace_id: &str, model: &str, keep: &[String]) -> EngineResult<()> {
        if keep.is_empty() {
            return self.clear_all(workspace_id, model).await;
        }
        sqlx::query("DELETE FROM chunks WHERE workspace_id = $1 AND model = $2 AND NOT (path = ANY($3))")
            .bind(workspace_id)
            .bind(model)
            .bind(keep)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_all(&self, workspace_id: &str, model: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM chunks WHERE workspace_id = $1 AND model = $2")
            .bind(workspace_id)
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk insert. Callers batch this themselves; no implicit chunking.
    pub async fn insert(&self, workspace_id: &str, rows: &[ChunkRecord]) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let metadata = serde_json::to_value(&row.metadata)?;
            sqlx::query(
                "INSERT INTO chunks (workspace_id, path, mtime, content, model, dimension, embedding, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(workspace_id)
            .bind(&row.path)
            .bind(row.mtime)
            .bind(&row.content)
            .bind(&row.model)
            .bind(row.dimension as i32)
            .bind(Vector::from(row.embedding.clone()))
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cosine-similarity search scoped to a workspace/model. `path_glob`
    /// patterns (already expanded by the retrieval layer) are applied in SQL
    /// via `LIKE` over a small candidate window, not as a pgvector filter —
    /// pgvector has no native glob operator.
    pub async fn similar(
        &self,
        workspace_id: &str,
        model: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        path_patterns: Option<&[String]>,
    ) -> EngineResult<Vec<SearchHit>> {
        let candidate_window = (limit.max(1) * 2).max(200) as i64;
        let vector = Vector::from(query.to_vec());

        let rows = sqlx::query(
            "SELECT path, content, metadata, 1 - (embedding <=> $1) AS similarity \
             FROM chunks \
             WHERE workspace_id = $2 AND model = $3 AND COALESCE((metadata->>'skipped')::boolean, false) = false \
             ORDER BY embedding <=> $1 \
             LIMIT $4",
        )
        .bind(vector)
        .bind(workspace_id)
        .bind(model)
        .bind(candidate_window)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(limit);
        for row in rows {
            let path: String = row.get(0);
            if let Some(patterns) = path_patterns {
                if !patterns.iter().any(|p| glob_match(p, &path)) {
                    continue;
                }
            }
            let similarity: f32 = row.get::<f64, _>(3) as f32;
            if similarity < min_similarity {
                continue;
            }
            let content: String = row.get(1);
            let metadata: serde_json::Value = row.get(2);
            let metadata: ChunkMetadata = serde_json::from_value(metadata)?;
            hits.push(SearchHit {
                path,
                content,
                similarity,
                start_line: metadata.start_line,
                end_line: metadata.end_line,
            });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Runs `f` while holding a session-scoped Postgres advisory lock keyed
    /// on `workspace_id`, serializing index updates across processes. The
    /// lock is released on every exit path, including panics unwinding
    /// through `f`, because the unlock runs in this function's own scope
    /// rather than in a drop impl on a type `f` could leak.
    pub async fn with_workspace_lock<F, Fut, R>(&self, workspace_id: &str, f: F) -> EngineResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<R>>,
    {
        let key = advisory_lock_key(workspace_id);
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;

        let result = f().await;

        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await;
        if let Err(e) = unlocked {
            tracing::warn!(workspace_id, error = %e, "failed to release advisory lock");
        }

        result
    }

    pub async fn schema_dimension(&self) -> EngineResult<Option<usize>> {
        schema::schema_dimension(&self.pool).await
    }

    /// Per-model row counts and approximate content size, used for the
    /// status control request.
    pub async fn per_model_stats(&self, workspace_id: &str) -> EngineResult<Vec<(String, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT model, COUNT(*), COALESCE(SUM(LENGTH(content)), 0) \
             FROM chunks WHERE workspace_id = $1 GROUP BY model",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<i64, _>(1), r.get::<i64, _>(2)))
            .collect())
    }
}

/// Derives a 32-bit advisory-lock key from a workspace id. Widened to
/// `bigint` for the single-argument `pg_advisory_lock` overload.
fn advisory_lock_key(workspace_id: &str) -> i64 {
    let digest = Sha256::digest(workspace_id.as_bytes());
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as i64
}

/// Minimal glob matcher for the patterns the retrieval layer produces
/// (`**/name/**`, `name/**`, literal paths containing `*`). Delegates to
/// `globset` rather than hand-rolling wildcard matching.
fn glob_match(pattern: &str, path: &str) -> bool {
    match globset::Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(_) => pattern == path,
    }
}

/// In-memory fallback used when no Postgres instance is configured (local
/// development, or test harnesses without a live database). Stores vectors
/// as plain `Vec<f32>` rows and computes cosine similarity in process; not
/// intended for production-sized workspaces.
pub struct FallbackStore {
    rows: parking_lot::RwLock<HashMap<(String, String), Vec<ChunkRecord>>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self {
            rows: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn indexed_paths(&self, workspace_id: &str, model: &str) -> HashSet<String> {
        self.rows
            .read()
            .get(&(workspace_id.to_string(), model.to_string()))
            .map(|rows| rows.iter().map(|r| r.path.clone()).collect())
            .unwrap_or_default()
    }

    pub fn mtimes_for(&self, workspace_id: &str, model: &str, paths: &[String]) -> HashMap<String, i64> {
        let guard = self.rows.read();
        let Some(rows) = guard.get(&(workspace_id.to_string(), model.to_string())) else {
            return HashMap::new();
        };
        let wanted: HashSet<&String> = paths.iter().collect();
        rows.iter()
            .filter(|r| wanted.contains(&r.path))
            .map(|r| (r.path.clone(), r.mtime))
            .collect()
    }

    pub fn delete_for(&self, workspace_id: &str, model: &str, paths: &[String]) {
        if let Some(rows) = self.rows.write().get_mut(&(workspace_id.to_string(), model.to_string())) {
            let drop: HashSet<&String> = paths.iter().collect();
            rows.retain(|r| !drop.contains(&r.path));
        }
    }

    pub fn delete_absent(&self, workspace_id: &str, model: &str, keep: &[String]) {
        if let Some(rows) = self.rows.write().get_mut(&(workspace_id.to_string(), model.to_string())) {
            let keep: HashSet<&String> = keep.iter().collect();
            rows.retain(|r| keep.contains(&r.path));
        }
    }

    pub fn clear_all(&self, workspace_id: &str, model: &str) {
        self.rows.write().remove(&(workspace_id.to_string(), model.to_string()));
    }

    pub fn per_model_stats(&self, workspace_id: &str) -> Vec<(String, i64, i64)> {
        self.rows
            .read()
            .iter()
            .filter(|((ws, _), _)| ws == workspace_id)
            .map(|((_, model), rows)| {
                let bytes: i64 = rows.iter().map(|r| r.content.len() as i64).sum();
                (model.clone(), rows.len() as i64, bytes)
            })
            .collect()
    }

    pub fn insert(&self, workspace_id: &str, rows: &[ChunkRecord]) {
        self.rows
            .write()
            .entry((workspace_id.to_string(), rows.first().map(|r| r.model.clone()).unwrap_or_default()))
            .or_default()
            .extend_from_slice(rows);
    }

    pub fn similar(
        &self,
        workspace_id: &str,
        model: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        path_patterns: Option<&[String]>,
    ) -> Vec<SearchHit> {
        let guard = self.rows.read();
        let Some(rows) = guard.get(&(workspace_id.to_string(), model.to_string())) else {
            return Vec::new();
        };
        let mut scored: Vec<SearchHit> = rows
            .iter()
            .filter(|r| !r.metadata.is_skipped())
            .filter(|r| {
                path_patterns
                    .map(|patterns| patterns.iter().any(|p| glob_match(p, &r.path)))
                    .unwrap_or(true)
            })
            .map(|r| SearchHit {
                path: r.path.clone(),
                content: r.content.clone(),
                similarity: cosine_similarity(query, &r.embedding),
                start_line: r.metadata.start_line,
                end_line: r.metadata.end_line,
            })
            .filter(|h| h.similarity >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

impl Default for FallbackStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Uniform entry point over the two supported backends. The index engine and
/// retrieval engine depend on this rather than on `PgVectorStore` directly so
/// a workspace can run against the in-memory fallback without a live
/// Postgres instance.
pub enum StoreHandle {
    Postgres(std::sync::Arc<PgVectorStore>),
    Fallback(std::sync::Arc<FallbackStore>),
}

impl StoreHandle {
    pub async fn indexed_paths(&self, workspace_id: &str, model: &str) -> EngineResult<HashSet<String>> {
        match self {
            StoreHandle::Postgres(s) => s.indexed_paths(workspace_id, model).await,
            StoreHandle::Fallback(s) => Ok(s.indexed_paths(workspace_id, model)),
        }
    }

    pub async fn mtimes_for(&self, workspace_id: &str, model: &str, paths: &[String]) -> EngineResult<HashMap<String, i64>> {
        match self {
            StoreHandle::Postgres(s) => s.mtimes_for(workspace_id, model, paths).await,
            StoreHandle::Fallback(s) => Ok(s.mtimes_for(workspace_id, model, paths)),
        }
    }

    pub async fn delete_for(&self, workspace_id: &str, model: &str, paths: &[String]) -> EngineResult<()> {
        match self {
            StoreHandle::Postgres(s) => s.delete_for(workspace_id, model, paths).await,
            StoreHandle::Fallback(s) => {
                s.delete_for(workspace_id, model, paths);
                Ok(())
            }
        }
    }

    pub async fn delete_absent(&self, workspace_id: &str, model: &str, keep: &[String]) -> EngineResult<()> {
        match self {
            StoreHandle::Postgres(s) => s.delete_absent(workspace_id, model, keep).await,
            StoreHandle::Fallback(s) => {
                s.delete_absent(workspace_id, model, keep);
                Ok(())
            }
        }
    }

    pub async fn clear_all(&self, workspace_id: &str, model: &str) -> EngineResult<()> {
        match self {
            StoreHandle::Postgres(s) => s.clear_all(workspace_id, model).await,
            StoreHandle::Fallback(s) => {
                s.clear_all(workspace_id, model);
                Ok(())
            }
        }
    }

    pub async fn insert(&self, workspace_id: &str, rows: &[ChunkRecord]) -> EngineResult<()> {
        match self {
            StoreHandle::Postgres(s) => s.insert(workspace_id, rows).await,
            StoreHandle::Fallback(s) => {
                s.insert(workspace_id, rows);
                Ok(())
            }
        }
    }

    pub async fn similar(
        &self,
        workspace_id: &str,
        model: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        path_patterns: Option<&[String]>,
    ) -> EngineResult<Vec<SearchHit>> {
        match self {
            StoreHandle::Postgres(s) => {
                s.similar(workspace_id, model, query, limit, min_similarity, path_patterns).await
            }
            StoreHandle::Fallback(s) => {
                Ok(s.similar(workspace_id, model, query, limit, min_similarity, path_patterns))
            }
        }
    }

    /// On the fallback backend there is no cross-process lock to take: a
    /// single in-memory map has no other process to race with, so `f` just
    /// runs directly.
    pub async fn with_workspace_lock<F, Fut, R>(&self, workspace_id: &str, f: F) -> EngineResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<R>>,
    {
        match self {
            StoreHandle::Postgres(s) => s.with_workspace_lock(workspace_id, f).await,
            StoreHandle::Fallback(_) => f().await,
        }
    }

    pub async fn schema_dimension(&self) -> EngineResult<Option<usize>> {
        match self {
            StoreHandle::Postgres(s) => s.schema_dimension().await,
            StoreHandle::Fallback(_) => Ok(None),
        }
    }

    pub async fn per_model_stats(&self, workspace_id: &str) -> EngineResult<Vec<(String, i64, i64)>> {
        match self {
            StoreHandle::Postgres(s) => s.per_model_stats(workspace_id).await,
            StoreHandle::Fallback(s) => Ok(s.per_model_stats(workspace_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            path: path.to_string(),
            mtime: 1,
            content: format!("content of {path}"),
            model: "test-model".to_string(),
            dimension: embedding.len(),
            embedding,
            metadata: ChunkMetadata { start_line: 1, end_line: 1, ..Default::default() },
        }
    }

    #[test]
    fn cosine_similarity_identical_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn fallback_store_roundtrip() {
        let store = FallbackStore::new();
        store.insert("ws", &[record("a.rs", vec![1.0, 0.0]), record("b.rs", vec![0.0, 1.0])]);
        assert_eq!(store.indexed_paths("ws", "test-model").len(), 2);

        let hits = store.similar("ws", "test-model", &[1.0, 0.0], 10, 0.0, None);
        assert_eq!(hits[0].path, "a.rs");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn fallback_store_delete_absent_prunes() {
        let store = FallbackStore::new();
        store.insert("ws", &[record("a.rs", vec![1.0, 0.0]), record("b.rs", vec![0.0, 1.0])]);
        store.delete_absent("ws", "test-model", &["a.rs".to_string()]);
        let paths = store.indexed_paths("ws", "test-model");
        assert_eq!(paths.len(), 1);
        assert!(paths.contains("a.rs"));
    }

    #[test]
    fn glob_match_prefix_pattern() {
        assert!(glob_match("src/**", "src/main.rs"));
        assert!(!glob_match("src/**", "tests/main.rs"));
    }

    #[test]
    fn advisory_lock_key_is_deterministic() {
        assert_eq!(advisory_lock_key("ws-1"), advisory_lock_key("ws-1"));
        assert_ne!(advisory_lock_key("ws-1"), advisory_lock_key("ws-2"));
    }
}
