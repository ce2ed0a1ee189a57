// Hive Atoms: Constants
//
// All named constants for the crate live here. Collecting them in one place
// eliminates magic numbers scattered across modules and makes tuning the
// runtime a one-file change.

// ── Heartbeat & supervision ─────────────────────────────────────────────
// The daemon touches `heartbeat` every HEARTBEAT_INTERVAL_SECS. The
// supervisor treats a heartbeat older than HEARTBEAT_STALE_FACTOR times
// that interval as evidence the daemon crashed or hung.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const HEARTBEAT_STALE_SECS: u64 = 90;
pub const SUPERVISOR_POLL_INTERVAL_SECS: u64 = 60;
pub const SUPERVISOR_SIGTERM_GRACE_SECS: u64 = 5;

// ── Orchestrator ─────────────────────────────────────────────────────────
pub const MAX_TOOL_ROUNDS: u32 = 4;
pub const FIRST_TOKEN_TIMEOUT_SECS: u64 = 30;
pub const CHAT_HISTORY_LOAD_LIMIT: i64 = 80;

// ── Resilience ───────────────────────────────────────────────────────────
// base=2s doubling per attempt, matching the literal `retry_transient(op,
// max_attempts=2, backoff=2s)` parameters.
pub const MAX_RETRY_ATTEMPTS: u32 = 2;
pub const RETRY_BASE_DELAY_MS: u64 = 2_000;
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

// ── Prompt assembly ──────────────────────────────────────────────────────
// Words, not tokens — cheap to count, conservative enough to stay well
// under any provider's context window for the system prompt alone.
pub const PROMPT_WORD_BUDGET: usize = 4000;
pub const EPISODE_RECALL_LIMIT: usize = 8;

// ── Passive memory ───────────────────────────────────────────────────────
pub const EPISODE_CONTENT_MAX_CHARS: usize = 2000;
pub const CRYSTALLIZATION_EVERY_N_CONVERSATIONS: u64 = 10;
pub const CRYSTALLIZATION_RECENCY_WINDOW_DAYS: i64 = 7;
pub const CRYSTALLIZATION_MAX_EPISODES: usize = 10;
// Two fact strings are considered duplicates if they share at least this
// many tokens, capped by the shorter string's own token count.
pub const FACT_DEDUP_MIN_SHARED_TOKENS: usize = 2;

// ── Task worker ───────────────────────────────────────────────────────────
pub const TASK_POLL_INTERVAL_SECS: u64 = 10;

// ── Prompt auto-update ────────────────────────────────────────────────────
pub const PROMPT_AUTOUPDATE_INTERVAL_SECS: u64 = 24 * 60 * 60;

// ── Log rotation ──────────────────────────────────────────────────────────
pub const LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_MAX_BACKUPS: usize = 3;
