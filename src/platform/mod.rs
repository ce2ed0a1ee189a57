// Hive Platform Message Handler
//
// Per-platform inbound→agent→outbound bridge (§4.H). `handle_inbound` is
// the shared logic every adapter calls; adapters themselves (one per
// messaging SDK) are thin shells outside this crate's core scope (§1) and
// implement `PlatformAdapter` only far enough to plug into the daemon's
// fan-out and status map — grounded on the teacher's `ChannelStatus`/
// `split_message` shared-helper split in `engine/channels/mod.rs`.

pub mod webchat;

use crate::atoms::error::HiveError;
use crate::integrations::IntegrationAuth;
use crate::memory::{self, LongTermMemory};
use crate::orchestrator::{ChatOptions, Orchestrator};
use crate::store::Store;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(3);
const HISTORY_STITCH_TURNS: usize = 20;
const NOT_AUTHORIZED_REPLY: &str = "Not authorized. An administrator must approve your request before I can respond.";
const RATE_LIMITED_REPLY: &str = "Rate limited. Please slow down a little.";
const AGENT_NOT_INITIALIZED_REPLY: &str = "daemon running but agent not initialized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    NotConfigured,
    Disabled,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub platform: String,
    pub from: String,
    pub text: String,
    pub message_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub platform: String,
    pub to: String,
    pub reply_to: String,
    pub text: String,
}

/// One per-platform messaging adapter. Concrete SDK integrations (Telegram,
/// Discord, WhatsApp, ...) implement this outside the core scope; the
/// daemon only needs to start them and read back a status.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> &str;
    async fn start(self: Arc<Self>) -> Result<(), HiveError>;
    fn status(&self) -> ChannelStatus;
}

/// Shared `(platform, from)` rate limiter: at most one allowed message
/// every `RATE_LIMIT_WINDOW`.
#[derive(Default)]
pub struct RateLimiter {
    last_allowed: Mutex<HashMap<(String, String), Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this `(platform, from)` may proceed now; if so, records the
    /// attempt as the new "last allowed" instant.
    pub fn check_and_record(&self, platform: &str, from: &str) -> bool {
        let key = (platform.to_string(), from.to_string());
        let mut map = self.last_allowed.lock();
        let now = Instant::now();
        if let Some(last) = map.get(&key) {
            if now.duration_since(*last) < RATE_LIMIT_WINDOW {
                return false;
            }
        }
        map.insert(key, now);
        true
    }
}

pub struct PlatformContext {
    pub store: Arc<Store>,
    pub provider: Arc<crate::provider::AnyProvider>,
    pub integrations: Arc<IntegrationAuth>,
    pub rate_limiter: Arc<RateLimiter>,
    pub orchestrator: Option<Arc<Orchestrator>>,
    pub long_term_memory: Option<Arc<dyn LongTermMemory>>,
}

/// Handle one inbound platform message end-to-end: auth gate, rate limit,
/// history stitching, orchestrator invocation, transcript persistence, and
/// passive-memory scheduling (§4.H steps 1-7).
pub async fn handle_inbound(ctx: &PlatformContext, inbound: InboundMessage) -> OutboundMessage {
    let reply = |text: String| OutboundMessage {
        platform: inbound.platform.clone(),
        to: inbound.from.clone(),
        reply_to: inbound.message_id.clone(),
        text,
    };

    if !ctx.integrations.is_authorized(&inbound.platform, &inbound.from) {
        let _ = ctx.integrations.upsert_pending(
            &inbound.platform,
            &inbound.from,
            &inbound.timestamp,
            &inbound.text,
        );
        return reply(NOT_AUTHORIZED_REPLY.to_string());
    }

    if !ctx.rate_limiter.check_and_record(&inbound.platform, &inbound.from) {
        return reply(RATE_LIMITED_REPLY.to_string());
    }

    let Some(orchestrator) = ctx.orchestrator.clone() else {
        return reply(AGENT_NOT_INITIALIZED_REPLY.to_string());
    };

    let (existing, mut transcript) = match ctx
        .store
        .get_platform_conversation(&inbound.platform, &inbound.from)
    {
        Ok(Some((row, messages_json))) => {
            let turns: Vec<TranscriptTurn> =
                serde_json::from_str(&messages_json).unwrap_or_default();
            (Some(row), turns)
        }
        _ => (None, Vec::new()),
    };

    transcript.push(TranscriptTurn {
        role: "user".to_string(),
        text: inbound.text.clone(),
    });

    let system_addition = build_history_addition(&transcript);
    let context_system_prompt = match &ctx.long_term_memory {
        Some(ltm) => ltm.build(&inbound.text).await.ok().flatten(),
        None => None,
    };
    let disable_legacy_episode_store = context_system_prompt.is_some();

    let options = ChatOptions {
        conversation_id: existing.as_ref().map(|row| row.conversation_id.clone()),
        system_addition: Some(system_addition),
        context_system_prompt,
        disable_legacy_episode_store,
        ..Default::default()
    };

    let (conversation_id, mut stream, _cancel) = match orchestrator.chat(&inbound.text, options).await {
        Ok(result) => result,
        Err(_) => {
            return reply("Error generating response. Check <home>/daemon.log.".to_string());
        }
    };

    let mut done = false;
    while let Some(event) = stream.next().await {
        match event {
            Ok(crate::orchestrator::ChatEvent::Done { .. }) => {
                done = true;
                break;
            }
            Ok(crate::orchestrator::ChatEvent::Token(_)) => {}
            Err(_) => break,
        }
    }

    if !done {
        return reply("Error generating response. Check <home>/daemon.log.".to_string());
    }

    // The stream only carries raw tokens; `Orchestrator::chat` sanitizes
    // the reply before persisting it, so the canonical text lives in the
    // just-appended message rather than the concatenated token stream.
    let assistant_text = match ctx.store.list_messages(&conversation_id, 1) {
        Ok(messages) => match messages.into_iter().next() {
            Some(msg) => msg.content,
            None => return reply("Error generating response. Check <home>/daemon.log.".to_string()),
        },
        Err(_) => return reply("Error generating response. Check <home>/daemon.log.".to_string()),
    };

    transcript.push(TranscriptTurn {
        role: "assistant".to_string(),
        text: assistant_text.clone(),
    });

    if let Ok(messages_json) = serde_json::to_string(&transcript) {
        let _ = ctx.store.upsert_platform_conversation(
            &inbound.platform,
            &inbound.from,
            &conversation_id,
            &messages_json,
        );
    }

    if let Ok(Some(agent)) = ctx.store.primary_agent() {
        tokio::spawn(memory::run_passive_memory(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.provider),
            ctx.long_term_memory.clone(),
            agent.id,
            conversation_id.clone(),
            inbound.text.clone(),
            assistant_text.clone(),
        ));
    }

    reply(assistant_text)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TranscriptTurn {
    role: String,
    text: String,
}

/// Build a "Conversation history (most recent last)" system addition from
/// up to the last `HISTORY_STITCH_TURNS` turns.
fn build_history_addition(transcript: &[TranscriptTurn]) -> String {
    let start = transcript.len().saturating_sub(HISTORY_STITCH_TURNS);
    let mut lines = vec!["Conversation history (most recent last):".to_string()];
    for turn in &transcript[start..] {
        lines.push(format!("{}: {}", turn.role, turn.text));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_rapid_repeat_from_same_sender() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_and_record("telegram", "user-1"));
        assert!(!limiter.check_and_record("telegram", "user-1"));
    }

    #[test]
    fn rate_limiter_tracks_per_platform_and_sender_independently() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_and_record("telegram", "user-1"));
        assert!(limiter.check_and_record("discord", "user-1"));
        assert!(limiter.check_and_record("telegram", "user-2"));
    }

    #[test]
    fn build_history_addition_caps_at_twenty_turns() {
        let turns: Vec<TranscriptTurn> = (0..30)
            .map(|i| TranscriptTurn {
                role: "user".to_string(),
                text: format!("turn {i}"),
            })
            .collect();
        let addition = build_history_addition(&turns);
        assert!(addition.contains("turn 29"));
        assert!(!addition.contains("turn 9\n")); // dropped, outside the last 20
    }
}
