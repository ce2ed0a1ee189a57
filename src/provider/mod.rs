// Hive Provider Layer — AI Provider Registry
//
// `AnyProvider` wraps `Box<dyn Provider>` so the orchestrator never has to
// match on which backend is in use; adding a new OpenAI-compatible vendor
// is a one-line match-arm change, same as the teacher's `AnyProvider::from_config`.

pub mod anthropic;
pub mod ollama;
pub mod openai_compat;

use crate::atoms::error::HiveResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One message in a provider-bound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.into(),
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: content.into(),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call the model produced (non-streaming completion path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text of the call arguments, parsed downstream by the tool
    /// dispatcher — kept as a string because some providers stream it in
    /// fragments that only become valid JSON once fully concatenated.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Result of a non-streaming completion call, used to drive the tool loop.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

pub type TokenStream = BoxStream<'static, HiveResult<String>>;

/// Abstract streaming/completion LLM call with optional tool support.
#[async_trait]
pub trait Provider: Send + Sync {
    fn default_model(&self) -> &str;

    /// False for Ollama and Groq (per spec §4.B); gates whether the
    /// orchestrator runs the tool loop or streams directly.
    fn supports_tools(&self) -> bool;

    async fn ping(&self) -> HiveResult<()>;

    /// Lazy sequence of string tokens. Finite, not restartable: a caller
    /// that needs to retry must call this again with a fresh request.
    async fn stream_chat(&self, request: &ChatRequest) -> HiveResult<TokenStream>;

    /// Non-streaming completion, used to drive the tool-call loop. Callers
    /// should only invoke this when `supports_tools()` is true.
    async fn complete_chat(&self, request: &ChatRequest) -> HiveResult<CompletionResult>;
}

/// Which wire format / vendor a provider config targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Google,
    Groq,
    Mistral,
    OpenRouter,
    Together,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn supports_tools(self) -> bool {
        !matches!(self, ProviderKind::Ollama | ProviderKind::Groq)
    }

    fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Together => "https://api.together.xyz/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Google => "gemini-1.5-flash",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::OpenRouter => "openrouter/auto",
            ProviderKind::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Ollama => "llama3.2",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "google" => Ok(ProviderKind::Google),
            "groq" => Ok(ProviderKind::Groq),
            "mistral" => Ok(ProviderKind::Mistral),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "together" => Ok(ProviderKind::Together),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(crate::HiveError::InvalidInput(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Type-erased provider. Callers hold `AnyProvider` and never match on the
/// concrete backend.
pub struct AnyProvider(Box<dyn Provider>, ProviderKind);

impl AnyProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        let provider: Box<dyn Provider> = match config.kind {
            ProviderKind::Anthropic => {
                Box::new(anthropic::AnthropicProvider::new(base_url, config.api_key.clone()))
            }
            ProviderKind::Ollama => Box::new(ollama::OllamaProvider::new(base_url)),
            // All OpenAI-compatible wire formats: OpenAI, Google, Groq,
            // Mistral, OpenRouter, Together.
            _ => Box::new(openai_compat::OpenAiCompatProvider::new(
                base_url,
                config.api_key.clone(),
                config.kind,
            )),
        };
        AnyProvider(provider, config.kind)
    }

    /// The vendor/wire-format this instance was configured for, reported
    /// verbatim in the daemon's `status` IPC response.
    pub fn kind(&self) -> ProviderKind {
        self.1
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn supports_tools(&self) -> bool {
        self.0.supports_tools()
    }

    pub async fn ping(&self) -> HiveResult<()> {
        self.0.ping().await
    }

    pub async fn stream_chat(&self, request: &ChatRequest) -> HiveResult<TokenStream> {
        self.0.stream_chat(request).await
    }

    pub async fn complete_chat(&self, request: &ChatRequest) -> HiveResult<CompletionResult> {
        self.0.complete_chat(request).await
    }
}

/// Build a `rustls::ClientConfig` pinned to the Mozilla root certificates,
/// ignoring the OS trust store — matching the teacher's `pinned_tls_config`
/// posture rather than leaving it implicit in `reqwest`'s `rustls-tls`
/// feature defaults.
fn pinned_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    rustls::ClientConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("failed to set default TLS protocol versions")
    .with_root_certificates(root_store)
    .with_no_client_auth()
}

/// A singleton certificate-pinned `reqwest::Client` shared by every provider
/// backend — one connection pool, one TLS config, built once.
static PINNED_CLIENT: std::sync::LazyLock<reqwest::Client> = std::sync::LazyLock::new(|| {
    reqwest::Client::builder()
        .use_preconfigured_tls(pinned_tls_config())
        .connect_timeout(std::time::Duration::from_secs(10))
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .expect("failed to build certificate-pinned reqwest::Client")
});

/// Get the shared certificate-pinned HTTP client every backend uses — pinned
/// TLS roots via `rustls`/`webpki-roots`, matching the teacher's pinned
/// provider client posture rather than relying on the OS trust store.
pub(crate) fn http_client() -> reqwest::Client {
    PINNED_CLIENT.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_tools_matches_spec_exceptions() {
        assert!(!ProviderKind::Ollama.supports_tools());
        assert!(!ProviderKind::Groq.supports_tools());
        assert!(ProviderKind::OpenAi.supports_tools());
        assert!(ProviderKind::Anthropic.supports_tools());
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!("nonsense".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn http_client_builds_and_is_shared_across_calls() {
        let a = http_client();
        let b = http_client();
        assert!(a.get("https://example.com").build().is_ok());
        assert!(b.get("https://example.com").build().is_ok());
    }
}
