use super::{DiscoveredDimension, EmbeddingClient};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HOSTED_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

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

/// Remote hosted embedding provider. Requires an API key; fails with
/// `Unauthorized` on invalid credentials and `RateLimited` on HTTP 429.
pub struct HostedClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    dimension: DiscoveredDimension,
}

impl HostedClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            api_key,
            model,
            dimension: DiscoveredDimension::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HostedClient {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let response = self
            .http
            .post(HOSTED_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized("hosted embedding provider rejected credentials".to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            return Err(EngineError::Transport(format!("hosted provider returned {}", status)));
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
