//! Query embedding boundary.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{with_retries, Error, Result};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSION: usize = 1536;
const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of every vector this provider returns.
    fn dimension(&self) -> usize;
}

pub struct OpenAiEmbeddings {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.model = model.into();
        self.dimension = dimension;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let vector = with_retries(MAX_ATTEMPTS, "embedding", || async {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(Error::from_status(status, &detail));
            }

            let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                Error::ProviderFatal {
                    message: format!("malformed embedding response: {}", e),
                }
            })?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|row| row.embedding)
                .ok_or_else(|| Error::ProviderFatal {
                    message: "embedding response has no data".into(),
                })
        })
        .await?;

        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_response_parses() {
        let data = r#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}],"model":"text-embedding-3-small"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn default_provider_is_1536_dimensional() {
        let provider = OpenAiEmbeddings::new("k").unwrap();
        assert_eq!(provider.dimension(), 1536);
        let provider = provider.with_model("text-embedding-3-large", 3072);
        assert_eq!(provider.dimension(), 3072);
    }
}
