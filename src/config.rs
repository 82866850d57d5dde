use crate::error::{EngineError, EngineResult};

/// Default target chunk size in characters (`S` in the chunker contract).
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// A chunk longer than `2 * chunk_size` indicates splitter failure and is dropped.
pub const MAX_CHUNK_MULTIPLIER: usize = 2;

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.0;
pub const DEFAULT_MAX_RESULTS: usize = 20;
pub const DEFAULT_MAX_CHUNKS_PER_QUERY: usize = 200;
pub const DEFAULT_MAX_SESSION_RESULTS: usize = 50;

/// Embedding batch size. Deliberately small: bounds the latency of
/// cancellation, not throughput.
pub const EMBED_BATCH_SIZE: usize = 10;
pub const EMBED_RETRY_ATTEMPTS: u32 = 5;
pub const EMBED_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const EMBED_RETRY_MULTIPLIER: u32 = 2;
pub const EMBED_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const INTER_BATCH_SLEEP_MS: u64 = 100;

/// Minimum interval between progress events for the same workspace.
pub const PROGRESS_THROTTLE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Hosted,
    Local,
    Compatible,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub hosted_api_key: Option<String>,
    pub local_url: Option<String>,
    pub compatible_url: Option<String>,
    pub compatible_api_key: Option<String>,
}

impl EmbeddingConfig {
    pub fn from_env() -> EngineResult<Self> {
        let hosted_api_key = std::env::var("SEMINDEX_HOSTED_API_KEY").ok();
        let local_url = std::env::var("SEMINDEX_LOCAL_EMBEDDING_URL").ok();
        let compatible_url = std::env::var("SEMINDEX_COMPATIBLE_URL").ok();
        let compatible_api_key = std::env::var("SEMINDEX_COMPATIBLE_API_KEY").ok();

        let provider = if hosted_api_key.is_some() {
            EmbeddingProvider::Hosted
        } else if compatible_url.is_some() {
            EmbeddingProvider::Compatible
        } else if local_url.is_some() {
            EmbeddingProvider::Local
        } else {
            return Err(EngineError::Config(
                "no embedding provider configured: set SEMINDEX_HOSTED_API_KEY, \
                 SEMINDEX_LOCAL_EMBEDDING_URL, or SEMINDEX_COMPATIBLE_URL"
                    .to_string(),
            ));
        };

        let model = std::env::var("SEMINDEX_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "default".to_string());

        Ok(Self {
            provider,
            model,
            hosted_api_key,
            local_url,
            compatible_url,
            compatible_api_key,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub exclude_code_languages: Vec<String>,
}

impl ChunkerConfig {
    pub fn from_env() -> Self {
        let chunk_size = std::env::var("SEMINDEX_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunk_overlap = std::env::var("SEMINDEX_CHUNK_OVERLAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_OVERLAP);
        let exclude_code_languages = std::env::var("SEMINDEX_EXCLUDE_CODE_LANGUAGES")
            .ok()
            .map(|csv| csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            chunk_size,
            chunk_overlap,
            exclude_code_languages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl ScannerConfig {
    pub fn from_env() -> Self {
        let include_patterns = std::env::var("SEMINDEX_INCLUDE_PATTERNS")
            .ok()
            .map(|csv| csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["**/*".to_string()]);

        let mut exclude_patterns: Vec<String> = std::env::var("SEMINDEX_EXCLUDE_PATTERNS")
            .ok()
            .map(|csv| csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        // The report output dir, if configured, is an implicit exclude pattern.
        if let Ok(report_dir) = std::env::var("SEMINDEX_REPORT_DIR") {
            exclude_patterns.push(format!("{}/**", report_dir.trim_end_matches('/')));
        }

        Self {
            include_patterns,
            exclude_patterns,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub min_similarity: f32,
    pub max_results: usize,
    pub max_chunks_per_query: usize,
    pub max_session_results: usize,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            min_similarity: std::env::var("SEMINDEX_MIN_SIMILARITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_SIMILARITY),
            max_results: std::env::var("SEMINDEX_MAX_RESULTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RESULTS),
            max_chunks_per_query: std::env::var("SEMINDEX_MAX_CHUNKS_PER_QUERY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CHUNKS_PER_QUERY),
            max_session_results: std::env::var("SEMINDEX_MAX_SESSION_RESULTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_SESSION_RESULTS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub console_addr: String,
    pub data_dir: String,
    pub log_dir: String,
    pub database_url: String,
    pub embedding: EmbeddingConfig,
    pub chunker: ChunkerConfig,
    pub scanner: ScannerConfig,
    pub search: SearchConfig,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        let port = std::env::var("SEMINDEX_CONSOLE_PORT").unwrap_or_else(|_| "8721".to_string());
        let console_addr = std::env::var("SEMINDEX_CONSOLE_ADDR")
            .unwrap_or_else(|_| format!("127.0.0.1:{}", port));

        let data_dir = std::env::var("SEMINDEX_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("semindex").to_string_lossy().to_string())
                .unwrap_or_else(|| ".semindex-data".to_string())
        });

        let log_dir = std::env::var("SEMINDEX_LOG_DIR")
            .unwrap_or_else(|_| format!("{}/logs", data_dir.trim_end_matches('/')));

        let database_url = std::env::var("SEMINDEX_DATABASE_URL").map_err(|_| {
            EngineError::Config("SEMINDEX_DATABASE_URL is required".to_string())
        })?;

        Ok(Self {
            console_addr,
            data_dir,
            log_dir,
            database_url,
            embedding: EmbeddingConfig::from_env()?,
            chunker: ChunkerConfig::from_env(),
            scanner: ScannerConfig::from_env(),
            search: SearchConfig::from_env(),
        })
    }
}
