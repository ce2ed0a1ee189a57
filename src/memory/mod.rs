// Hive Passive Memory Pipeline
//
// Fire-and-forget on every completed exchange (§4.F). Every error here is
// swallowed and logged — this pipeline must never propagate back to the
// chat reply path. Grounded on the teacher's `engine/memory/mod.rs` module
// shape (logging conventions, one function per stage); its fact extraction
// is a heuristic keyword matcher, which this crate does not reuse since the
// spec requires LLM-driven extraction via the provider's JSON-array contract.

use crate::atoms::constants::{
    CRYSTALLIZATION_EVERY_N_CONVERSATIONS, CRYSTALLIZATION_MAX_EPISODES,
    CRYSTALLIZATION_RECENCY_WINDOW_DAYS, EPISODE_CONTENT_MAX_CHARS, FACT_DEDUP_MIN_SHARED_TOKENS,
};
use crate::atoms::error::HiveResult;
use crate::atoms::types::{overlap_tokens, shared_token_count, truncate_utf8};
use crate::provider::{AnyProvider, ChatMessage, ChatRequest};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;

const FACT_EXTRACTION_MAX_TOKENS: u32 = 200;
const MOOD_MAX_TOKENS: u32 = 50;

/// Optional external long-term memory collaborator. `build` supplies a
/// context system prompt for a platform turn; `record_mood`/`record_fact`
/// receive the outputs of this pipeline's mood capture and crystallization
/// stages. Out of this crate's core scope per §1 — storage under
/// `<home>/ctx/` is whatever this collaborator wants it to be.
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    async fn build(&self, text: &str) -> HiveResult<Option<String>>;
    async fn record_mood(&self, mood: &str) -> HiveResult<()>;
    async fn record_fact(&self, fact: &str) -> HiveResult<()>;
}

/// Run the full passive-memory pipeline for one completed exchange. Never
/// returns an error to the caller — every failure is logged under the
/// `memory` target and swallowed, per the spec's "never propagate"
/// requirement.
pub async fn run_passive_memory(
    store: Arc<Store>,
    provider: Arc<AnyProvider>,
    long_term_memory: Option<Arc<dyn LongTermMemory>>,
    agent_id: String,
    conversation_id: String,
    user_message: String,
    assistant_reply: String,
) {
    let summary = format!("User: {user_message}\nAssistant: {assistant_reply}");
    let summary = truncate_utf8(&summary, EPISODE_CONTENT_MAX_CHARS);
    if let Err(err) = store.insert_episode(&agent_id, Some(&conversation_id), summary, None) {
        warn!(target: "memory", "failed to write episode: {err}");
    }

    if let Err(err) = extract_and_store_facts(&store, &provider, &agent_id, &summary).await {
        warn!(target: "memory", "fact extraction failed: {err}");
    }

    if let Err(err) = capture_mood(&provider, long_term_memory.as_deref(), &summary).await {
        warn!(target: "memory", "mood capture failed: {err}");
    }

    match store.bump_conversation_count() {
        Ok((new_count, previous_at)) => {
            if should_crystallize(new_count, previous_at.as_deref()) {
                if let Err(err) =
                    crystallize(&store, &provider, long_term_memory.as_deref(), &agent_id).await
                {
                    warn!(target: "memory", "crystallization failed: {err}");
                }
            }
        }
        Err(err) => warn!(target: "memory", "conversation count bump failed: {err}"),
    }
}

fn should_crystallize(new_count: u64, previous_at: Option<&str>) -> bool {
    if new_count == 0 || new_count % CRYSTALLIZATION_EVERY_N_CONVERSATIONS != 0 {
        return false;
    }
    let Some(previous_at) = previous_at else {
        return false;
    };
    let Ok(previous) = DateTime::parse_from_rfc3339(previous_at) else {
        return false;
    };
    let age = Utc::now().signed_duration_since(previous.with_timezone(&Utc));
    age <= chrono::Duration::days(CRYSTALLIZATION_RECENCY_WINDOW_DAYS)
}

async fn ask_for_json_strings(
    provider: &AnyProvider,
    instruction: &str,
    content: &str,
    max_tokens: u32,
) -> HiveResult<Vec<String>> {
    let request = ChatRequest {
        model: provider.default_model().to_string(),
        temperature: Some(0.0),
        max_tokens: Some(max_tokens),
        messages: vec![
            ChatMessage::new("system", instruction),
            ChatMessage::new("user", content),
        ],
        tools: Vec::new(),
    };
    let completion = provider.complete_chat(&request).await?;
    let text = completion.content.unwrap_or_default();
    Ok(parse_json_string_array(&text))
}

/// Best-effort parse of a JSON array of strings out of a model response
/// that may be wrapped in prose or a markdown code fence.
fn parse_json_string_array(text: &str) -> Vec<String> {
    let start = text.find('[');
    let end = text.rfind(']');
    let Some((start, end)) = start.zip(end) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    serde_json::from_str::<Vec<String>>(&text[start..=end]).unwrap_or_default()
}

async fn extract_and_store_facts(
    store: &Store,
    provider: &AnyProvider,
    agent_id: &str,
    summary: &str,
) -> HiveResult<()> {
    let facts = ask_for_json_strings(
        provider,
        "Extract a JSON array of short, durable facts about the user from this exchange. \
Return only the JSON array, nothing else. If there are no durable facts, return [].",
        summary,
        FACT_EXTRACTION_MAX_TOKENS,
    )
    .await?;

    let existing = store.list_all_knowledge(agent_id)?;
    for fact in facts {
        let fact = fact.trim().to_string();
        if fact.is_empty() {
            continue;
        }
        if is_duplicate_fact(&fact, &existing) {
            continue;
        }
        store.insert_knowledge(agent_id, &fact, false, "auto")?;
    }
    Ok(())
}

fn is_duplicate_fact(candidate: &str, existing: &[crate::atoms::types::Knowledge]) -> bool {
    let candidate_tokens = overlap_tokens(candidate);
    if candidate_tokens.is_empty() {
        return false;
    }
    let threshold = candidate_tokens.len().min(FACT_DEDUP_MIN_SHARED_TOKENS);
    existing.iter().any(|row| {
        shared_token_count(&candidate_tokens, &overlap_tokens(&row.content)) >= threshold
    })
}

async fn capture_mood(
    provider: &AnyProvider,
    long_term_memory: Option<&dyn LongTermMemory>,
    summary: &str,
) -> HiveResult<()> {
    let request = ChatRequest {
        model: provider.default_model().to_string(),
        temperature: Some(0.0),
        max_tokens: Some(MOOD_MAX_TOKENS),
        messages: vec![
            ChatMessage::new(
                "system",
                "In one short phrase, describe the user's emotional state in this exchange. \
Reply with just the phrase, or an empty string if unclear.",
            ),
            ChatMessage::new("user", summary),
        ],
        tools: Vec::new(),
    };
    let completion = provider.complete_chat(&request).await?;
    let mood = completion.content.unwrap_or_default().trim().to_string();
    if mood.is_empty() {
        return Ok(());
    }
    if let Some(ltm) = long_term_memory {
        ltm.record_mood(&mood).await?;
    }
    Ok(())
}

async fn crystallize(
    store: &Store,
    provider: &AnyProvider,
    long_term_memory: Option<&dyn LongTermMemory>,
    agent_id: &str,
) -> HiveResult<()> {
    let episodes = store.list_recent_episodes(agent_id, CRYSTALLIZATION_MAX_EPISODES as i64)?;
    if episodes.is_empty() {
        return Ok(());
    }
    let joined = episodes
        .iter()
        .map(|ep| ep.content.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");

    let facts = ask_for_json_strings(
        provider,
        "From these recent exchanges, extract a JSON array of the most important, durable \
things to remember long-term about the user. Return only the JSON array.",
        &joined,
        FACT_EXTRACTION_MAX_TOKENS,
    )
    .await?;

    let mut seen = std::collections::HashSet::new();
    let existing = store.list_all_knowledge(agent_id)?;
    for fact in facts {
        let fact = fact.trim().to_string();
        if fact.is_empty() || !seen.insert(fact.clone()) {
            continue;
        }
        if is_duplicate_fact(&fact, &existing) {
            continue;
        }
        store.insert_knowledge(agent_id, &fact, true, "auto_crystallized")?;
        if let Some(ltm) = long_term_memory {
            let _ = ltm.record_fact(&fact).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Knowledge;

    #[test]
    fn parse_json_string_array_extracts_from_prose_wrapper() {
        let text = "Sure, here you go:\n```json\n[\"likes hiking\", \"owns a dog\"]\n```";
        let parsed = parse_json_string_array(text);
        assert_eq!(parsed, vec!["likes hiking", "owns a dog"]);
    }

    #[test]
    fn parse_json_string_array_returns_empty_on_no_brackets() {
        assert!(parse_json_string_array("no array here").is_empty());
    }

    fn knowledge_row(content: &str) -> Knowledge {
        Knowledge {
            id: "k1".into(),
            agent_id: "a1".into(),
            content: content.to_string(),
            pinned: false,
            source: "auto".into(),
            created_at: "now".into(),
        }
    }

    #[test]
    fn is_duplicate_fact_detects_token_overlap() {
        let existing = vec![knowledge_row("enjoys hiking mountains")];
        assert!(is_duplicate_fact("likes hiking mountains trips", &existing));
        assert!(!is_duplicate_fact("owns a vintage car", &existing));
    }

    #[test]
    fn should_crystallize_requires_multiple_of_ten_and_recent_window() {
        assert!(!should_crystallize(9, Some(&Utc::now().to_rfc3339())));
        assert!(should_crystallize(10, Some(&Utc::now().to_rfc3339())));
        let old = Utc::now() - chrono::Duration::days(10);
        assert!(!should_crystallize(10, Some(&old.to_rfc3339())));
        assert!(!should_crystallize(10, None));
    }
}
