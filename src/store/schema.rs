use crate::error::EngineResult;
use sqlx::{PgPool, Row};

/// Idempotent schema setup, run once at `PgVectorStore` construction.
/// Mirrors the migration-at-construction pattern of a connection-pooled
/// store: no separate migration binary, no sqlx-cli artifacts to manage.
pub async fn run_migrations(pool: &PgPool, dimension: usize) -> EngineResult<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    let create_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id BIGSERIAL PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            path TEXT NOT NULL,
            mtime BIGINT NOT NULL,
            content TEXT NOT NULL,
            model TEXT NOT NULL,
            dimension INTEGER NOT NULL,
            embedding VECTOR({dim}) NOT NULL,
            metadata JSONB NOT NULL
        )
        "#,
        dim = dimension
    );
    sqlx::query(&create_table).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS chunks_workspace_idx ON chunks (workspace_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS chunks_model_idx ON chunks (model)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS chunks_path_idx ON chunks (path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS chunks_embedding_hnsw_idx \
         ON chunks USING hnsw (embedding vector_cosine_ops) \
         WITH (m = 16, ef_construction = 64)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// The declared vector column length, or `None` if the table doesn't exist
/// yet. Indexing must not proceed if this disagrees with the embedding
/// model's dimension.
pub async fn schema_dimension(pool: &PgPool) -> EngineResult<Option<usize>> {
    let row = sqlx::query(
        "SELECT atttypmod FROM pg_attribute \
         WHERE attrelid = to_regclass('public.chunks') AND attname = 'embedding'",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| {
        let typmod: i32 = r.get(0);
        typmod.max(0) as usize
    }))
}
