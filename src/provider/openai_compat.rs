// Hive Provider: OpenAI-compatible backends
//
// Handles OpenAI, Google (OpenAI-compatible endpoint), Groq, Mistral,
// OpenRouter, and Together — all speak the same `/chat/completions` wire
// format. Streaming responses are parsed as SSE `data: {...}` lines, same
// shape as the teacher's `parse_sse_chunk`.

use super::{
    http_client, ChatMessage, ChatRequest, CompletionResult, Provider, ProviderKind, ToolCall,
    ToolDefinition, TokenStream,
};
use crate::atoms::error::HiveError;
use crate::resilience::is_retryable_status;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: String,
    kind: ProviderKind,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: String, kind: ProviderKind) -> Self {
        OpenAiCompatProvider {
            client: http_client(),
            base_url,
            api_key,
            kind,
        }
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut v = json!({ "role": m.role, "content": m.content });
                if let Some(name) = &m.name {
                    v["name"] = json!(name);
                }
                if let Some(id) = &m.tool_call_id {
                    v["tool_call_id"] = json!(id);
                }
                if let Some(tool_calls) = &m.tool_calls {
                    v["tool_calls"] = json!(tool_calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        }))
                        .collect::<Vec<_>>());
                }
                v
            })
            .collect()
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::format_messages(&request.messages),
            "stream": stream,
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(Self::format_tools(&request.tools));
        }
        body
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, HiveError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let provider = format!("{:?}", self.kind);
        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(HiveError::provider_auth(provider, text))
        } else if is_retryable_status(status.as_u16()) {
            Err(HiveError::provider_transient(provider, text))
        } else {
            Err(HiveError::provider_request(provider, text))
        }
    }

    /// Parse a single SSE `data:` payload into a delta token, if any.
    fn parse_sse_chunk(data: &str) -> Option<String> {
        if data == "[DONE]" {
            return None;
        }
        let v: Value = serde_json::from_str(data).ok()?;
        v["choices"][0]["delta"]["content"]
            .as_str()
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn default_model(&self) -> &str {
        self.kind.default_model()
    }

    fn supports_tools(&self) -> bool {
        self.kind.supports_tools()
    }

    async fn ping(&self) -> Result<(), HiveError> {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream, HiveError> {
        let body = self.body(request, true);
        let response = self.post(body).await?;

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
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    match Self::parse_sse_chunk(data) {
                        Some(token) if !token.is_empty() => {
                            if tx.send(Ok(token)).await.is_err() {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => {
                            if data.trim() == "[DONE]" {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<CompletionResult, HiveError> {
        let body = self.body(request, false);
        let response = self.post(body).await?;
        let value: Value = response.json().await?;
        let choice = &value["choices"][0]["message"];
        let content = choice["content"].as_str().map(|s| s.to_string());
        let tool_calls = choice["tool_calls"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        Some(ToolCall {
                            id: tc["id"].as_str()?.to_string(),
                            name: tc["function"]["name"].as_str()?.to_string(),
                            arguments: tc["function"]["arguments"].as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(CompletionResult {
            content,
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_chunk_extracts_delta_content() {
        let data = r#"{"choices":[{"delta":{"content":"hello"}}]}"#;
        assert_eq!(
            OpenAiCompatProvider::parse_sse_chunk(data),
            Some("hello".to_string())
        );
    }

    #[test]
    fn parse_sse_chunk_handles_done_sentinel() {
        assert_eq!(OpenAiCompatProvider::parse_sse_chunk("[DONE]"), None);
    }

    #[test]
    fn parse_sse_chunk_ignores_empty_delta() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(OpenAiCompatProvider::parse_sse_chunk(data), None);
    }

    #[test]
    fn format_tools_wraps_function_schema() {
        let tools = vec![ToolDefinition {
            name: "web_search".into(),
            description: "search the web".into(),
            parameters: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }];
        let formatted = OpenAiCompatProvider::format_tools(&tools);
        assert_eq!(formatted[0]["function"]["name"], "web_search");
    }
}
