// Hive Provider: Anthropic
//
// Anthropic's Messages API splits the system prompt out of the message
// list and frames streaming as typed SSE events (`content_block_delta`
// with a `text_delta`) rather than OpenAI's uniform `delta.content`.

use super::{
    http_client, ChatMessage, ChatRequest, CompletionResult, Provider, ToolCall, ToolDefinition,
    TokenStream,
};
use crate::atoms::error::HiveError;
use crate::resilience::is_retryable_status;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        AnthropicProvider {
            client: http_client(),
            base_url,
            api_key,
        }
    }

    /// Anthropic wants `system` split out of the message array; the first
    /// `system`-role message (the runtime guardrails / assembled prompt)
    /// becomes that field, and any others are folded into it.
    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_parts = Vec::new();
        let mut rest = Vec::new();
        for m in messages {
            if m.role == "system" {
                system_parts.push(m.content.clone());
            } else if m.role == "tool" {
                rest.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id,
                        "content": m.content,
                    }]
                }));
            } else if let Some(tool_calls) = &m.tool_calls {
                let blocks: Vec<Value> = tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": serde_json::from_str::<Value>(&tc.arguments)
                                .unwrap_or_else(|_| json!({})),
                        })
                    })
                    .collect();
                rest.push(json!({ "role": "assistant", "content": blocks }));
            } else {
                rest.push(json!({ "role": m.role, "content": m.content }));
            }
        }
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, rest)
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = Self::split_system(&request.messages);
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(Self::format_tools(&request.tools));
        }
        body
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, HiveError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(HiveError::provider_auth("anthropic", text))
        } else if is_retryable_status(status.as_u16()) {
            Err(HiveError::provider_transient("anthropic", text))
        } else {
            Err(HiveError::provider_request("anthropic", text))
        }
    }

    /// Extract the text delta from a single Anthropic SSE `data:` payload,
    /// if the event is a `content_block_delta` carrying a `text_delta`.
    fn parse_sse_chunk(data: &str) -> Option<String> {
        let v: Value = serde_json::from_str(data).ok()?;
        if v["type"].as_str()? != "content_block_delta" {
            return None;
        }
        v["delta"]["text"].as_str().map(|s| s.to_string())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn default_model(&self) -> &str {
        "claude-3-5-haiku-latest"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<(), HiveError> {
        self.client
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                    if let Some(token) = Self::parse_sse_chunk(data) {
                        if !token.is_empty() && tx.send(Ok(token)).await.is_err() {
                            return;
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

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = value["content"].as_array() {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            content.push_str(text);
                        }
                    }
                    Some("tool_use") => {
                        if let (Some(id), Some(name)) =
                            (block["id"].as_str(), block["name"].as_str())
                        {
                            tool_calls.push(ToolCall {
                                id: id.to_string(),
                                name: name.to_string(),
                                arguments: block["input"].to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(CompletionResult {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_system_pulls_out_leading_system_message() {
        let messages = vec![
            ChatMessage::new("system", "you are a cat"),
            ChatMessage::new("user", "hi"),
        ];
        let (system, rest) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("you are a cat"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn split_system_converts_tool_message_to_tool_result_block() {
        let messages = vec![ChatMessage::tool_result("call-1", "42 degrees")];
        let (_, rest) = AnthropicProvider::split_system(&messages);
        assert_eq!(rest[0]["role"], "user");
        assert_eq!(rest[0]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn parse_sse_chunk_extracts_text_delta() {
        let data = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert_eq!(
            AnthropicProvider::parse_sse_chunk(data),
            Some("hi".to_string())
        );
    }

    #[test]
    fn parse_sse_chunk_ignores_other_event_types() {
        let data = r#"{"type":"message_start"}"#;
        assert_eq!(AnthropicProvider::parse_sse_chunk(data), None);
    }
}
