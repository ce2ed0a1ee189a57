// Hive Atoms: Types
//
// Plain data types shared across the store, orchestrator, and IPC layers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub default_model: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub mode: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = crate::HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(crate::HiveError::InvalidInput(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    pub agent_id: String,
    pub content: String,
    pub pinned: bool,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub agent_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub mood: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::HiveError::InvalidInput(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_id: Option<String>,
    pub title: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConversation {
    pub id: String,
    pub platform: String,
    pub platform_user_id: String,
    pub conversation_id: String,
    pub created_at: String,
}

/// Persisted provider/tunable overrides (§2 Configuration), stored as one
/// JSON-encoded row under the `engine_config` meta key. Every field is
/// optional: an absent field means "use the compiled-in default", and an
/// absent row means every field is absent. Environment variables read at
/// boot (`HIVE_PROVIDER`, etc.) take precedence over this row when both are
/// set, so a one-off override never has to be persisted to take effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

/// Tokenize `s` into the lowercased, alphanumeric, ≥4-char word set used by
/// every token-overlap comparison in the spec: knowledge dedup (§4.F),
/// closest-knowledge lookup (§4.A), and episode relevance scoring (§4.D).
pub fn overlap_tokens(s: &str) -> std::collections::HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 4)
        .collect()
}

/// Count of tokens shared between two token sets.
pub fn shared_token_count(
    a: &std::collections::HashSet<String>,
    b: &std::collections::HashSet<String>,
) -> usize {
    a.intersection(b).count()
}

/// Truncate a string to at most `max_bytes` bytes on a UTF-8 char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Validate a `#rrggbb` hex color string (the `theme_hex` meta value).
pub fn is_valid_hex_color(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('#') else {
        return false;
    };
    digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_keeps_char_boundary() {
        let s = "héllo wörld";
        let truncated = truncate_utf8(s, 4);
        assert!(s.as_bytes().len() >= truncated.as_bytes().len());
        assert!(String::from_utf8(truncated.as_bytes().to_vec()).is_ok());
    }

    #[test]
    fn truncate_utf8_noop_when_short() {
        assert_eq!(truncate_utf8("hi", 10), "hi");
    }

    #[test]
    fn is_valid_hex_color_accepts_six_digit_hex() {
        assert!(is_valid_hex_color("#1a2b3c"));
        assert!(is_valid_hex_color("#FFFFFF"));
    }

    #[test]
    fn is_valid_hex_color_rejects_malformed_input() {
        assert!(!is_valid_hex_color("#ZZZZZZ"));
        assert!(!is_valid_hex_color("1a2b3c"));
        assert!(!is_valid_hex_color("#abc"));
        assert!(!is_valid_hex_color("#1a2b3c4"));
    }

    #[test]
    fn task_status_round_trips_through_str() {
        for s in ["queued", "running", "done", "failed"] {
            let status: TaskStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
    }

    #[test]
    fn overlap_tokens_drops_short_words_and_punctuation() {
        let tokens = overlap_tokens("I like Rust, and SQL too!");
        assert!(tokens.contains("like"));
        assert!(tokens.contains("rust"));
        assert!(!tokens.contains("sql")); // 3 chars, dropped
        assert!(!tokens.contains("and")); // 3 chars, dropped
    }

    #[test]
    fn shared_token_count_counts_intersection() {
        let a = overlap_tokens("likes hiking mountains");
        let b = overlap_tokens("enjoys hiking trails");
        assert_eq!(shared_token_count(&a, &b), 1);
    }
}
