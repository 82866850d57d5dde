use super::{DiscoveredDimension, EmbeddingClient};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

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

/// A remote endpoint that mimics the hosted provider's wire format (e.g. a
/// self-hosted OpenAI-compatible gateway). Credentials are optional.
pub struct CompatibleClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dimension: DiscoveredDimension,
}

impl CompatibleClient {
    pub fn new(url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            url,
            api_key,
            model,
            dimension: DiscoveredDimension::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for CompatibleClient {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut request = self.http.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized("compatible embedding endpoint rejected credentials".to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            return Err(EngineError::Transport(format!("compatible endpoint returned {}", status)));
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

        // The dimension reported here may differ from configuration; the
        // vector store refuses to proceed on a mismatch rather than silently
        // adopting it (see EngineConfig / schema_dimension).
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

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn embeds_successfully() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            }));
        });

        let client = CompatibleClient::new(server.url("/embed"), None, "test-model".to_string());
        let vector = client.embed("hello").await.unwrap();
        mock.assert();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(client.dimension(), 3);
    }

    #[tokio::test]
    async fn maps_401_to_unauthorized() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(401);
        });

        let client = CompatibleClient::new(server.url("/embed"), None, "test-model".to_string());
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(429);
        });

        let client = CompatibleClient::new(server.url("/embed"), None, "test-model".to_string());
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::RateLimited));
    }
}
