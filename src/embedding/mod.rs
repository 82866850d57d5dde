mod compatible;
mod hosted;
mod local;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use compatible::CompatibleClient;
pub use hosted::HostedClient;
pub use local::LocalClient;

/// Provider-agnostic text-to-vector contract. Concrete variants are selected
/// at config time; none of them retry internally — retries are the index
/// engine's responsibility (see the embedding loop).
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
    fn id(&self) -> &str;
    fn dimension(&self) -> usize;
}

/// Shared dimension cell: the concrete dimension may be discovered on the
/// first successful call. Clients compare against the value seen at
/// `VectorStore` construction; a mismatch is surfaced as a `Config` error
/// before any row is written.
#[derive(Debug, Default)]
pub struct DiscoveredDimension(AtomicUsize);

impl DiscoveredDimension {
    pub fn new(initial: usize) -> Self {
        Self(AtomicUsize::new(initial))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn observe(&self, len: usize) {
        self.0.store(len, Ordering::Release);
    }
}

pub fn build_client(cfg: &EmbeddingConfig) -> EngineResult<Arc<dyn EmbeddingClient>> {
    match cfg.provider {
        EmbeddingProvider::Hosted => {
            let api_key = cfg.hosted_api_key.clone().ok_or_else(|| {
                EngineError::Config("SEMINDEX_HOSTED_API_KEY is required for the hosted provider".to_string())
            })?;
            Ok(Arc::new(HostedClient::new(api_key, cfg.model.clone())))
        }
        EmbeddingProvider::Local => {
            let url = cfg.local_url.clone().ok_or_else(|| {
                EngineError::Config("SEMINDEX_LOCAL_EMBEDDING_URL is required for the local provider".to_string())
            })?;
            Ok(Arc::new(LocalClient::new(url, cfg.model.clone())))
        }
        EmbeddingProvider::Compatible => {
            let url = cfg.compatible_url.clone().ok_or_else(|| {
                EngineError::Config("SEMINDEX_COMPATIBLE_URL is required for the compatible provider".to_string())
            })?;
            Ok(Arc::new(CompatibleClient::new(
                url,
                cfg.compatible_api_key.clone(),
                cfg.model.clone(),
            )))
        }
    }
}
