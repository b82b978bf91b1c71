//! OpenAI-compatible chat completion client, batch and SSE streaming.

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::{ChatMessage, Completion, CompletionProvider, GenerationConfig};
use super::streaming::{StreamFragment, TokenStream};
use crate::error::{with_retries, Error, Result};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MAX_ATTEMPTS: u32 = 3;

pub struct OpenAiCompletions {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompletions {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Point at a non-default OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        stream: bool,
    ) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "top_p": config.top_p,
            "stream": stream,
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiCompletions {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<Completion> {
        let body = self.request_body(messages, config, false);
        with_retries(MAX_ATTEMPTS, "chat completion", || async {
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

            let parsed: CompletionResponse = response.json().await.map_err(|e| {
                Error::ProviderFatal {
                    message: format!("malformed completion response: {}", e),
                }
            })?;
            let text = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| Error::ProviderFatal {
                    message: "completion response has no choices".into(),
                })?;
            Ok(Completion {
                text,
                tokens_used: parsed.usage.map(|u| u.total_tokens),
            })
        })
        .await
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TokenStream> {
        let body = self.request_body(messages, config, true);
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

        let (tx, stream) = TokenStream::channel();
        tokio::spawn(pump_sse(response, tx));
        Ok(stream)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Forward SSE events from the provider into the fragment channel. A failed
/// send means the consumer is gone; stop pulling immediately.
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<StreamFragment>) {
    let mut bytes = response.bytes_stream();
    // SSE lines can straddle network chunks; buffer until a newline lands.
    let mut buffer = String::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "completion stream interrupted");
                let _ = tx
                    .send(StreamFragment::Error {
                        message: "generation interrupted".into(),
                    })
                    .await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                let _ = tx.send(StreamFragment::Done).await;
                return;
            }
            let parsed: StreamChunk = match serde_json::from_str(data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable stream event");
                    continue;
                }
            };
            let Some(text) = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
            else {
                continue;
            };
            if !text.is_empty()
                && tx.send(StreamFragment::Delta { text }).await.is_err()
            {
                tracing::debug!("stream consumer dropped, stopping provider pull");
                return;
            }
        }
    }

    // Stream ended without a [DONE] marker.
    let _ = tx.send(StreamFragment::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_all_generation_parameters() {
        let provider = OpenAiCompletions::new("k", "gpt-4").unwrap();
        let messages = vec![ChatMessage::new(crate::types::MessageRole::User, "ciao")];
        let body = provider.request_body(&messages, &GenerationConfig::default(), true);

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "ciao");
    }

    #[test]
    fn stream_chunk_parses_delta_content() {
        let data = r#"{"choices":[{"delta":{"content":" mondo"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(
            parsed.choices[0].delta.content.as_deref(),
            Some(" mondo")
        );
    }

    #[test]
    fn stream_chunk_tolerates_empty_delta() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
    }
}
