// Hive Provider: Ollama
//
// Ollama speaks its own newline-delimited-JSON wire format on `/api/chat`
// rather than OpenAI's SSE framing, and — per spec §4.B — never advertises
// tool support, so `complete_chat` is implemented only far enough to
// satisfy the trait; the orchestrator never calls it for this backend.

use super::{http_client, ChatMessage, ChatRequest, CompletionResult, Provider, TokenStream};
use crate::atoms::error::HiveError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Self {
        // The shared default_base_url ends in "/v1" for the OpenAI-compat
        // registry entry; Ollama's native API lives one level up.
        let base_url = base_url.trim_end_matches("/v1").trim_end_matches('/').to_string();
        OllamaProvider {
            client: http_client(),
            base_url,
        }
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect()
    }

    fn parse_ndjson_line(line: &str) -> Option<(Option<String>, bool)> {
        let v: Value = serde_json::from_str(line).ok()?;
        let token = v["message"]["content"].as_str().map(|s| s.to_string());
        let done = v["done"].as_bool().unwrap_or(false);
        Some((token, done))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn default_model(&self) -> &str {
        "llama3.2"
    }

    fn supports_tools(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<(), HiveError> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        Ok(())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream, HiveError> {
        let body = json!({
            "model": request.model,
            "messages": Self::format_messages(&request.messages),
            "stream": true,
        });
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HiveError::provider_request("ollama", text));
        }

        let (tx, rx) = mpsc::channel::<Result<String, HiveError>>(32);
        tokio::spawn(async move {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(HiveError::Http(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer.drain(..=pos);
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Self::parse_ndjson_line(&line) {
                        Some((Some(token), _)) if !token.is_empty() => {
                            if tx.send(Ok(token)).await.is_err() {
                                return;
                            }
                        }
                        Some((_, true)) => return,
                        _ => {}
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<CompletionResult, HiveError> {
        let body = json!({
            "model": request.model,
            "messages": Self::format_messages(&request.messages),
            "stream": false,
        });
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;
        let value: Value = response.json().await?;
        Ok(CompletionResult {
            content: value["message"]["content"].as_str().map(|s| s.to_string()),
            tool_calls: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ndjson_line_extracts_token_and_done() {
        let line = r#"{"message":{"content":"hi"},"done":false}"#;
        assert_eq!(
            OllamaProvider::parse_ndjson_line(line),
            Some((Some("hi".to_string()), false))
        );
    }

    #[test]
    fn parse_ndjson_final_line_sets_done() {
        let line = r#"{"message":{"content":""},"done":true}"#;
        let (_, done) = OllamaProvider::parse_ndjson_line(line).unwrap();
        assert!(done);
    }

    #[test]
    fn new_strips_openai_compat_v1_suffix() {
        let provider = OllamaProvider::new("http://localhost:11434/v1".to_string());
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn ollama_never_supports_tools() {
        let provider = OllamaProvider::new("http://localhost:11434".to_string());
        assert!(!provider.supports_tools());
    }
}
