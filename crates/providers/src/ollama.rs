//! Ollama native API provider.
//!
//! Talks to `POST /api/chat`. With `stream: true` Ollama answers with
//! newline-delimited JSON, one object per token batch:
//!
//! ```text
//! {"model":"deepseek-r1:8b","message":{"role":"assistant","content":"<think>"},"done":false}
//! ...
//! {"model":"deepseek-r1:8b","message":{"role":"assistant","content":""},"done":true}
//! ```
//!
//! A failure mid-stream arrives as `{"error":"..."}`.

use async_trait::async_trait;
use chatrelay_core::error::ProviderError;
use chatrelay_core::message::Message;
use chatrelay_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::lines::LineBuffer;

pub struct OllamaProvider {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the Ollama server at `base_url`
    /// (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>) -> Self {
        // No whole-request timeout on the client: a generation may stream for
        // minutes. Non-streaming calls set one per request.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(120),
            client,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    async fn post_chat(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ApiChatRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.messages),
            stream,
        };

        debug!(model = %request.model, stream, "Sending Ollama chat request");

        let mut builder = self.client.post(&url).json(&body);
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&error_body)
            .map(|b| b.error)
            .unwrap_or(error_body);
        warn!(status, error = %message, "Ollama returned error");

        if status == 404 {
            return Err(ProviderError::ModelNotFound(message));
        }
        Err(ProviderError::ApiError {
            status_code: status,
            message,
        })
    }
}

/// Interpret one NDJSON line of a streaming `/api/chat` response.
///
/// Returns `None` for blank or unparseable lines.
pub(crate) fn parse_stream_line(line: &str) -> Option<Result<StreamChunk, ProviderError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<ApiStreamLine>(line) {
        Ok(ApiStreamLine {
            error: Some(error), ..
        }) => Some(Err(ProviderError::Backend(error))),
        Ok(parsed) => Some(Ok(StreamChunk {
            content: parsed.message.map(|m| m.content).filter(|c| !c.is_empty()),
            done: parsed.done,
        })),
        Err(e) => {
            trace!(data = %line, error = %e, "Ignoring unparseable NDJSON line");
            None
        }
    }
}

#[async_trait]
impl chatrelay_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let response = self.post_chat(&request, false).await?;

        let api_response: ApiChatResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Ok(ProviderResponse {
            message: Message::assistant(api_response.message.content),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.post_chat(&request, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Spawn task to read the NDJSON byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(parsed) = parse_stream_line(&line) else {
                        continue;
                    };
                    let finished = matches!(&parsed, Ok(chunk) if chunk.done) || parsed.is_err();
                    if tx.send(parsed).await.is_err() {
                        return; // receiver dropped
                    }
                    if finished {
                        return;
                    }
                }
            }

            if let Some(tail) = lines.finish() {
                if let Some(parsed) = parse_stream_line(&tail) {
                    let finished = matches!(&parsed, Ok(chunk) if chunk.done) || parsed.is_err();
                    if tx.send(parsed).await.is_err() || finished {
                        return;
                    }
                }
            }

            // Body ended without a done marker
            let _ = tx.send(Ok(StreamChunk::finished())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let tags: ApiTags = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiStreamLine {
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ApiTags {
    #[serde(default)]
    models: Vec<ApiModelTag>,
}

#[derive(Debug, Deserialize)]
struct ApiModelTag {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::Provider;

    #[test]
    fn constructor_trims_trailing_slash() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn request_body_shape() {
        let body = ApiChatRequest {
            model: "deepseek-r1:8b".into(),
            messages: OllamaProvider::to_api_messages(&[Message::user("你好")]),
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "deepseek-r1:8b");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "你好");
    }

    #[test]
    fn parse_content_line() {
        let line = r#"{"model":"m","message":{"role":"assistant","content":"<think>"},"done":false}"#;
        let chunk = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("<think>"));
        assert!(!chunk.done);
    }

    #[test]
    fn parse_done_line() {
        let line = r#"{"model":"m","message":{"role":"assistant","content":""},"done":true,"eval_count":42}"#;
        let chunk = parse_stream_line(line).unwrap().unwrap();
        assert!(chunk.content.is_none());
        assert!(chunk.done);
    }

    #[test]
    fn parse_error_line() {
        let line = r#"{"error":"model runner has unexpectedly stopped"}"#;
        let err = parse_stream_line(line).unwrap().unwrap_err();
        assert!(err.to_string().contains("unexpectedly stopped"));
    }

    #[test]
    fn blank_and_garbage_lines_are_skipped() {
        assert!(parse_stream_line("   ").is_none());
        assert!(parse_stream_line("not json").is_none());
    }

    #[test]
    fn parse_tags() {
        let data = r#"{"models":[{"name":"deepseek-r1:8b","size":1},{"name":"qwen2.5:7b"}]}"#;
        let tags: ApiTags = serde_json::from_str(data).unwrap();
        let names: Vec<_> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["deepseek-r1:8b", "qwen2.5:7b"]);
    }
}
