use super::{DiscoveredDimension, EmbeddingClient};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Local HTTP embedding runtime (e.g. an Ollama- or TEI-style server on
/// localhost). Same error taxonomy as the hosted provider minus
/// `Unauthorized` — a local endpoint has no credential boundary.
pub struct LocalClient {
    http: reqwest::Client,
    url: String,
    model: String,
    dimension: DiscoveredDimension,
}

impl LocalClient {
    pub fn new(url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            url,
            model,
            dimension: DiscoveredDimension::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for LocalClient {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let response = self
            .http
            .post(&self.url)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            return Err(EngineError::Transport(format!("local embedding endpoint returned {}", status)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("malformed embedding response: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Transport("embedding response contained no vectors".to_string()))?
            .embedding;

        self.dimension.observe(vector.len());
        Ok(vector)
    }

    fn id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension.get()
    }
}
