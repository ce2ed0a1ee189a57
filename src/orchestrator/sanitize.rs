// Hive Orchestrator: Output Sanitization
//
// Post-processes the model's final text using the latest user message as
// context (§4.E). Two independent passes: a canned-confirmation override
// for `/search` turns that leaked tool boilerplate, and a line-stripping
// pass for any turn carrying untrusted web/tool context.

use super::guardrails::contains_untrusted_block;

const TOOL_BOILERPLATE: &str = "helpful assistant with access to the following tools";
const WOULD_YOU_LIKE: &str = "would you like me to";
const CANNED_SEARCH_CONFIRMATION: &str = "Got it — searching now.";
const CANNED_FOLLOWUP: &str = "Here's what I found. Let me know if you'd like more detail.";

/// True if `user_message` opens with a search-invoking prefix.
fn is_search_invocation(user_message: &str) -> bool {
    let trimmed = user_message.trim_start();
    trimmed.starts_with("/search") || trimmed.to_lowercase().starts_with("search ")
}

/// True if a line claims inability to browse, access the web, or access
/// real-time information — a refusal that should never survive when
/// untrusted browse/search context was actually supplied this turn.
fn is_browsing_refusal_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    (lower.contains("browse") || lower.contains("access the web") || lower.contains("real-time"))
        && (lower.contains("cannot") || lower.contains("can't") || lower.contains("unable"))
}

fn is_would_you_like_line(line: &str) -> bool {
    line.to_lowercase().contains(WOULD_YOU_LIKE)
}

/// Collapse 3+ consecutive newlines down to exactly 2.
fn collapse_blank_runs(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                result.push(ch);
            }
        } else {
            newline_run = 0;
            result.push(ch);
        }
    }
    result
}

/// Sanitize the model's final reply against prompt-injection leakage and
/// tool-boilerplate regressions, using the turn's user message as context.
pub fn sanitize_reply(user_message: &str, reply: &str) -> String {
    if is_search_invocation(user_message)
        && reply.to_lowercase().contains(TOOL_BOILERPLATE)
        && reply.to_lowercase().contains(WOULD_YOU_LIKE)
    {
        return CANNED_SEARCH_CONFIRMATION.to_string();
    }

    if contains_untrusted_block(user_message) {
        let cleaned: Vec<&str> = reply
            .lines()
            .filter(|line| !is_browsing_refusal_line(line) && !is_would_you_like_line(line))
            .collect();
        let joined = collapse_blank_runs(&cleaned.join("\n"));
        if joined.trim().is_empty() {
            return CANNED_FOLLOWUP.to_string();
        }
        return joined;
    }

    reply.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_invocation_with_leaked_boilerplate_becomes_canned_confirmation() {
        let reply = "I'm a helpful assistant with access to the following tools. \
Would you like me to search for that?";
        let sanitized = sanitize_reply("/search best coffee shops", reply);
        assert_eq!(sanitized, CANNED_SEARCH_CONFIRMATION);
    }

    #[test]
    fn search_invocation_without_boilerplate_passes_through() {
        let reply = "Here are three great coffee shops nearby.";
        let sanitized = sanitize_reply("search coffee shops", reply);
        assert_eq!(sanitized, reply);
    }

    #[test]
    fn untrusted_context_turn_strips_browsing_refusal_lines() {
        let user_message = "----- BEGIN UNTRUSTED CONTEXT -----\nsome data\n----- END UNTRUSTED CONTEXT -----\nwhat's the weather?";
        let reply = "I cannot browse the web for real-time information.\nBut here is what I found: sunny.";
        let sanitized = sanitize_reply(user_message, reply);
        assert!(!sanitized.to_lowercase().contains("cannot browse"));
        assert!(sanitized.contains("sunny"));
    }

    #[test]
    fn untrusted_context_turn_falls_back_to_canned_followup_when_empty() {
        let user_message = "----- BEGIN UNTRUSTED CONTEXT -----\nx\n----- END UNTRUSTED CONTEXT -----\nq";
        let reply = "I can't access real-time information.\nWould you like me to try again?";
        let sanitized = sanitize_reply(user_message, reply);
        assert_eq!(sanitized, CANNED_FOLLOWUP);
    }

    #[test]
    fn collapse_blank_runs_caps_at_two_newlines() {
        let text = "a\n\n\n\n\nb";
        assert_eq!(collapse_blank_runs(text), "a\n\nb");
    }

    #[test]
    fn plain_turn_without_search_or_untrusted_context_passes_through_unchanged() {
        let sanitized = sanitize_reply("how are you?", "I'm doing well, thanks!");
        assert_eq!(sanitized, "I'm doing well, thanks!");
    }
}
