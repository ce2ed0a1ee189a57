// Hive Orchestrator — the chat loop.
//
// `Orchestrator::chat` is the hard path described in the teacher's
// `engine/orchestrator/mod.rs`: assemble the request, run either the tool
// loop or a direct stream, sanitize the output, persist everything. Unlike
// the teacher (which threads a multi-agent boss/worker split through
// `agent_loop.rs`), this crate has exactly one agent and one loop — the
// module stays flat rather than splitting into `agent_loop.rs`/`handlers.rs`.

pub mod guardrails;
pub mod sanitize;

use crate::atoms::constants::{
    CHAT_HISTORY_LOAD_LIMIT, EPISODE_CONTENT_MAX_CHARS, EPISODE_RECALL_LIMIT, MAX_TOOL_ROUNDS,
};
use crate::atoms::error::{HiveError, HiveResult};
use crate::atoms::types::MessageRole;
use crate::prompt::{self, AgentProfile};
use crate::provider::{AnyProvider, ChatMessage, ChatRequest, ToolDefinition};
use crate::resilience::{retry_transient, with_first_token_timeout};
use crate::store::Store;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a URL's textual body. The concrete headless-browser-backed
/// implementation is an external collaborator out of this crate's scope
/// (see spec §1) — this trait is the thin contract the orchestrator needs.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> HiveResult<String>;
}

/// Runs a web search and returns a plain-text summary of results. Same
/// out-of-scope-collaborator relationship as `WebFetcher`.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> HiveResult<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_addition: Option<String>,
    pub context_system_prompt: Option<String>,
    pub disable_legacy_episode_store: bool,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Token(String),
    Done { message_id: String },
}

pub type ChatEventStream = futures::stream::BoxStream<'static, HiveResult<ChatEvent>>;

/// Shared flag a caller can flip to interrupt an in-flight `chat()` turn
/// (the daemon's `stop` and `task_cancel` IPC commands both use this —
/// §4.E). Checked between streamed tokens and between tool-loop rounds;
/// never checked mid-HTTP-request, so cancellation is prompt but not
/// instantaneous.
pub type CancelHandle = Arc<AtomicBool>;

pub struct Orchestrator {
    store: Arc<Store>,
    provider: Arc<AnyProvider>,
    fetcher: Option<Arc<dyn WebFetcher>>,
    search: Option<Arc<dyn SearchClient>>,
    prompts_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<AnyProvider>,
        fetcher: Option<Arc<dyn WebFetcher>>,
        search: Option<Arc<dyn SearchClient>>,
        prompts_dir: PathBuf,
    ) -> Self {
        Orchestrator {
            store,
            provider,
            fetcher,
            search,
            prompts_dir,
        }
    }

    /// `/browse <url>`, `/search <query>`, and bare URLs are rewritten into
    /// an untrusted-context-wrapped message before the rest of `chat()`
    /// ever sees them (§4.E slash-command preprocessing). Plain messages
    /// pass through unchanged.
    pub async fn preprocess_user_message(&self, raw: &str, agent_location: Option<&str>) -> String {
        let trimmed = raw.trim();

        if let Some(rest) = trimmed.strip_prefix("/browse ") {
            let (url, question) = split_url_and_question(rest);
            return self.browse_and_wrap(&url, question.as_deref()).await;
        }

        if let Some(rest) = trimmed.strip_prefix("/search ") {
            let query = normalize_search_query(rest, agent_location);
            return self.search_and_wrap(&query).await;
        }

        if let Some(url) = extract_bare_url(trimmed) {
            return self.browse_and_wrap(&url, Some(trimmed)).await;
        }

        raw.to_string()
    }

    async fn browse_and_wrap(&self, url: &str, follow_up: Option<&str>) -> String {
        let question = follow_up
            .map(str::to_string)
            .unwrap_or_else(|| format!("Summarize the key information from {url}"));
        let content = match &self.fetcher {
            Some(fetcher) => match fetcher.fetch(url).await {
                Ok(body) => body,
                Err(err) => format!("Unable to browse {url}: {err}"),
            },
            None => format!("Unable to browse {url}: no browser collaborator configured"),
        };
        guardrails::wrap_untrusted(url, &content, &question)
    }

    async fn search_and_wrap(&self, query: &str) -> String {
        let content = match &self.search {
            Some(search) => match search.search(query).await {
                Ok(results) => results,
                Err(err) => format!("Unable to search for \"{query}\": {err}"),
            },
            None => format!("Unable to search for \"{query}\": no search collaborator configured"),
        };
        guardrails::wrap_untrusted(
            &format!("web search: {query}"),
            &content,
            &format!("/search {query}"),
        )
    }

    /// Run one chat turn. Returns the conversation id the turn was appended
    /// to (freshly created when `options.conversation_id` is `None`), a
    /// lazy event stream (zero or more `Token`s, then exactly one `Done`),
    /// and a cancel handle the caller can flip to interrupt the turn before
    /// it completes. On a mid-stream failure after at least one token, the
    /// stream yields `Done` (over a persisted, `[response interrupted]`-suffixed
    /// partial message) followed by the original error.
    pub async fn chat(
        &self,
        user_message: &str,
        options: ChatOptions,
    ) -> HiveResult<(String, ChatEventStream, CancelHandle)> {
        if user_message.trim().is_empty() {
            return Err(HiveError::InvalidInput("empty message".to_string()));
        }

        let agent = self
            .store
            .primary_agent()?
            .ok_or_else(|| HiveError::InvalidInput("no primary agent configured".to_string()))?;

        let agent_location = self
            .store
            .primary_agent_profile()?
            .and_then(|(_, location, ..)| location);
        let processed_message = self
            .preprocess_user_message(user_message, agent_location.as_deref())
            .await;
        let processed_message = processed_message.as_str();

        let conversation = match &options.conversation_id {
            Some(id) => {
                let convo = self
                    .store
                    .get_conversation(id)?
                    .ok_or_else(|| HiveError::InvalidInput(format!("no conversation {id}")))?;
                if convo.agent_id != agent.id {
                    return Err(HiveError::AuthMismatch(format!(
                        "conversation {id} does not belong to the primary agent"
                    )));
                }
                convo
            }
            None => self.store.create_conversation(&agent.id, None)?,
        };

        self.store
            .append_message(&conversation.id, MessageRole::User, processed_message)?;

        let history = self
            .store
            .list_messages(&conversation.id, CHAT_HISTORY_LOAD_LIMIT)?;

        let system_prompt = self.build_system_prompt(&agent, &options, processed_message)?;
        let mut messages = vec![ChatMessage::new("system", guardrails::runtime_guardrails_message(&agent.name))];
        messages.push(ChatMessage::new("system", system_prompt));
        for msg in &history {
            messages.push(ChatMessage::new(msg.role.as_str(), msg.content.clone()));
        }

        let model = options.model.clone().unwrap_or_else(|| agent.default_model.clone());
        let request = ChatRequest {
            model,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            messages,
            tools: Vec::new(),
        };

        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        let search = self.search.clone();
        let conversation_id = conversation.id.clone();
        let agent_id = agent.id.clone();
        let user_message = processed_message.to_string();
        let disable_legacy_episode_store = options.disable_legacy_episode_store;

        let (tx, rx) = mpsc::channel::<HiveResult<ChatEvent>>(32);
        let returned_conversation_id = conversation_id.clone();
        let cancel: CancelHandle = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            run_turn(
                store,
                provider,
                search,
                conversation_id,
                agent_id,
                user_message,
                request,
                disable_legacy_episode_store,
                tx,
                task_cancel,
            )
            .await;
        });

        Ok((returned_conversation_id, Box::pin(ReceiverStream::new(rx)), cancel))
    }

    fn build_system_prompt(
        &self,
        agent: &crate::atoms::types::Agent,
        options: &ChatOptions,
        user_message: &str,
    ) -> HiveResult<String> {
        if let Some(context_prompt) = &options.context_system_prompt {
            let mut prompt = context_prompt.clone();
            if let Some(addition) = &options.system_addition {
                prompt.push_str("\n\n");
                prompt.push_str(addition);
            }
            return Ok(prompt);
        }

        let profile_row = self.store.primary_agent_profile()?;
        let profile = profile_row
            .map(|(dob, location, profession, about_raw, agent_name)| AgentProfile {
                dob,
                location,
                profession,
                about_raw,
                agent_name,
            })
            .unwrap_or_default();
        let pinned = self.store.list_pinned_knowledge(&agent.id)?;
        let recent_episodes = self
            .store
            .list_recent_episodes(&agent.id, (EPISODE_RECALL_LIMIT * 6) as i64)?;
        let ranked = prompt::rank_episodes_by_relevance(&recent_episodes, user_message);
        let ranked_owned: Vec<_> = ranked.into_iter().cloned().collect();
        let assembled = prompt::assemble(
            agent,
            &profile,
            &pinned,
            &ranked_owned,
            None,
            &self.prompts_dir,
        );
        let mut text = assembled.text;
        if let Some(addition) = &options.system_addition {
            text.push_str("\n\n");
            text.push_str(addition);
        }
        Ok(text)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    store: Arc<Store>,
    provider: Arc<AnyProvider>,
    search: Option<Arc<dyn SearchClient>>,
    conversation_id: String,
    agent_id: String,
    user_message: String,
    request: ChatRequest,
    disable_legacy_episode_store: bool,
    tx: mpsc::Sender<HiveResult<ChatEvent>>,
    cancel: CancelHandle,
) {
    let result = if provider.supports_tools() {
        run_tool_loop(&provider, search.as_deref(), request, &tx, &cancel).await
    } else {
        run_direct_stream(&provider, request, &tx, &cancel).await
    };

    match result {
        Ok(full_text) => {
            let sanitized = sanitize::sanitize_reply(&user_message, &full_text);
            if let Ok(msg) = store.append_message(&conversation_id, MessageRole::Assistant, &sanitized) {
                if !disable_legacy_episode_store {
                    let truncated =
                        crate::atoms::types::truncate_utf8(&sanitized, EPISODE_CONTENT_MAX_CHARS);
                    let _ = store.insert_episode(&agent_id, Some(&conversation_id), truncated, None);
                }
                let _ = tx.send(Ok(ChatEvent::Done { message_id: msg.id })).await;
            }
        }
        Err((partial, err)) => {
            if !partial.is_empty() {
                let interrupted = format!("{partial} [response interrupted]");
                if let Ok(msg) =
                    store.append_message(&conversation_id, MessageRole::Assistant, &interrupted)
                {
                    let _ = tx.send(Ok(ChatEvent::Done { message_id: msg.id })).await;
                }
            }
            let _ = tx.send(Err(err)).await;
        }
    }
}

/// Stream tokens directly (no tool support). Returns the full concatenated
/// text on success, or `(partial_text, error)` on mid-stream failure.
async fn run_direct_stream(
    provider: &AnyProvider,
    request: ChatRequest,
    tx: &mpsc::Sender<HiveResult<ChatEvent>>,
    cancel: &CancelHandle,
) -> Result<String, (String, HiveError)> {
    let mut full_text = String::new();
    let mut attempted_retry = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err((full_text, HiveError::Cancelled));
        }
        let mut stream = match provider.stream_chat(&request).await {
            Ok(stream) => with_first_token_timeout(FIRST_TOKEN_TIMEOUT, stream),
            Err(err) => {
                if full_text.is_empty() && !attempted_retry && crate::resilience::is_transient(&err) {
                    attempted_retry = true;
                    continue;
                }
                return Err((full_text, err));
            }
        };

        let mut saw_token_this_attempt = false;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err((full_text, HiveError::Cancelled));
            }
            match stream.next().await {
                Some(Ok(token)) => {
                    saw_token_this_attempt = true;
                    full_text.push_str(&token);
                    if tx.send(Ok(ChatEvent::Token(token))).await.is_err() {
                        return Err((full_text, HiveError::Cancelled));
                    }
                }
                Some(Err(err)) => {
                    if full_text.is_empty() && !attempted_retry && crate::resilience::is_transient(&err) {
                        attempted_retry = true;
                        break;
                    }
                    return Err((full_text, err));
                }
                None => return Ok(full_text),
            }
        }
        if saw_token_this_attempt {
            return Ok(full_text);
        }
    }
}

/// The tool loop: advertises exactly one tool, `web_search`, and runs up to
/// `MAX_TOOL_ROUNDS` completion rounds before falling back to a canned
/// apology.
async fn run_tool_loop(
    provider: &AnyProvider,
    search: Option<&dyn SearchClient>,
    mut request: ChatRequest,
    tx: &mpsc::Sender<HiveResult<ChatEvent>>,
    cancel: &CancelHandle,
) -> Result<String, (String, HiveError)> {
    request.tools = vec![ToolDefinition {
        name: "web_search".to_string(),
        description: "Search the web for current information.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        }),
    }];

    for _round in 0..MAX_TOOL_ROUNDS {
        if cancel.load(Ordering::Relaxed) {
            return Err((String::new(), HiveError::Cancelled));
        }
        let completion = retry_transient(|| provider.complete_chat(&request))
            .await
            .map_err(|err| (String::new(), err))?;

        if completion.tool_calls.is_empty() {
            let text = completion.content.unwrap_or_default();
            return stream_final_text(text, tx).await;
        }

        request.messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: completion.content.clone().unwrap_or_default(),
            name: None,
            tool_call_id: None,
            tool_calls: Some(completion.tool_calls.clone()),
        });

        for call in &completion.tool_calls {
            let result_text = if call.name != "web_search" {
                format!("Unknown tool: {}", call.name)
            } else {
                match extract_query(&call.arguments) {
                    Some(query) => match search {
                        Some(search) => match search.search(&query).await {
                            Ok(results) => guardrails::wrap_untrusted(
                                &format!("web search: {query}"),
                                &results,
                                "",
                            ),
                            Err(err) => format!("Unable to search for \"{query}\": {err}"),
                        },
                        None => format!("Unable to search for \"{query}\": no search collaborator configured"),
                    },
                    None => "Invalid search arguments: expected {\"query\": string}".to_string(),
                }
            };
            request
                .messages
                .push(ChatMessage::tool_result(call.id.clone(), result_text));
        }
    }

    stream_final_text(
        "I could not complete all required tool calls. Please try again.".to_string(),
        tx,
    )
    .await
}

/// The tool-loop path has no token-level stream from the provider (it uses
/// `complete_chat`), so the final text is emitted as a single `Token` event
/// to preserve the "one or more tokens, then done" contract for callers.
async fn stream_final_text(
    text: String,
    tx: &mpsc::Sender<HiveResult<ChatEvent>>,
) -> Result<String, (String, HiveError)> {
    if tx.send(Ok(ChatEvent::Token(text.clone()))).await.is_err() {
        return Err((text, HiveError::Cancelled));
    }
    Ok(text)
}

fn extract_query(raw_args: &str) -> Option<String> {
    match serde_json::from_str::<Value>(raw_args) {
        Ok(Value::Object(map)) => map.get("query").and_then(|v| v.as_str()).map(str::to_string),
        Ok(Value::String(s)) => Some(s),
        Ok(_) => None,
        Err(_) => {
            let trimmed = raw_args.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

fn split_url_and_question(rest: &str) -> (String, Option<String>) {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let url = parts.next().unwrap_or_default().to_string();
    let question = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    (url, question)
}

fn normalize_search_query(raw: &str, agent_location: Option<&str>) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped = crate::atoms::types::truncate_utf8(&collapsed, 300).to_string();
    match agent_location {
        Some(location) if capped.to_lowercase().contains("near me") => {
            replace_case_insensitive(&capped, "near me", &format!("near {location}"))
        }
        _ => capped,
    }
}

/// Replace the first case-insensitive occurrence of `needle` in `haystack`,
/// preserving the case of everything outside the match — used to rewrite
/// "near me"/"Near Me"/etc. without lowercasing the rest of the query.
fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();
    match lower_haystack.find(&lower_needle) {
        Some(start) => {
            let end = start + lower_needle.len();
            format!("{}{}{}", &haystack[..start], replacement, &haystack[end..])
        }
        None => haystack.to_string(),
    }
}

fn extract_bare_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_query_accepts_json_object() {
        assert_eq!(
            extract_query(r#"{"query": "rust async"}"#),
            Some("rust async".to_string())
        );
    }

    #[test]
    fn extract_query_accepts_bare_string() {
        assert_eq!(extract_query("rust async"), Some("rust async".to_string()));
    }

    #[test]
    fn extract_query_rejects_empty_or_wrong_shape() {
        assert_eq!(extract_query(""), None);
        assert_eq!(extract_query("[]"), None);
    }

    #[test]
    fn normalize_search_query_collapses_whitespace_and_caps_length() {
        let query = normalize_search_query("  restaurants   near   me  ", None);
        assert_eq!(query, "restaurants near me");
    }

    #[test]
    fn normalize_search_query_rewrites_near_me_with_location() {
        let query = normalize_search_query("restaurants near me", Some("Lucknow"));
        assert_eq!(query, "restaurants near Lucknow");
    }

    #[test]
    fn extract_bare_url_finds_first_url_in_text() {
        assert_eq!(
            extract_bare_url("check out https://example.com/page please"),
            Some("https://example.com/page".to_string())
        );
        assert_eq!(extract_bare_url("no urls here"), None);
    }

    #[test]
    fn split_url_and_question_separates_on_first_whitespace() {
        let (url, question) = split_url_and_question("https://example.com what's new?");
        assert_eq!(url, "https://example.com");
        assert_eq!(question.as_deref(), Some("what's new?"));
    }

    fn test_orchestrator() -> (Arc<Store>, Orchestrator) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let provider = Arc::new(crate::provider::AnyProvider::from_config(
            &crate::provider::ProviderConfig {
                kind: crate::provider::ProviderKind::OpenAi,
                api_key: "test".to_string(),
                base_url: None,
            },
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            provider,
            None,
            None,
            std::env::temp_dir(),
        );
        (store, orchestrator)
    }

    #[tokio::test]
    async fn chat_preprocesses_bare_url_before_persisting_the_user_message() {
        let (store, orchestrator) = test_orchestrator();
        let (conversation_id, _stream, _cancel) = orchestrator
            .chat("check out https://example.com/page please", ChatOptions::default())
            .await
            .unwrap();

        let history = store.list_messages(&conversation_id, 10).unwrap();
        let persisted = &history.first().expect("user message persisted").content;
        assert!(guardrails::contains_untrusted_block(persisted));
        assert!(persisted.contains("https://example.com/page"));
    }
}
