// Hive Prompt Assembler
//
// Builds the single system-prompt string the orchestrator sends as the
// second system message (after the fixed runtime-guardrails message, see
// `orchestrator::guardrails`). Seven layers, concatenated with blank-line
// separators, each under a literal heading — same layered-string style as
// the teacher's `engine/orchestrator/mod.rs` prompt builder and
// `engine/compaction.rs`'s threshold-struct-of-defaults approach.

use crate::atoms::constants::PROMPT_WORD_BUDGET;
use crate::atoms::types::{overlap_tokens, shared_token_count, Agent, Episode, Knowledge};
use std::path::Path;

/// Profile rows carried on the primary agent, read from `Store::primary_agent_profile`.
#[derive(Debug, Clone, Default)]
pub struct AgentProfile {
    pub dob: Option<String>,
    pub location: Option<String>,
    pub profession: Option<String>,
    pub about_raw: Option<String>,
    pub agent_name: Option<String>,
}

pub struct AssembledPrompt {
    pub text: String,
    pub episodes_dropped: usize,
}

/// Assemble the layered system prompt. `episode_candidates` should already
/// be sorted most-relevant-first (e.g. the output of
/// `Store::find_relevant_episodes`); only the first 3 are considered.
pub fn assemble(
    agent: &Agent,
    profile: &AgentProfile,
    pinned_knowledge: &[Knowledge],
    episode_candidates: &[Episode],
    mode_prompt: Option<&str>,
    prompts_dir: &Path,
) -> AssembledPrompt {
    let mut episodes: Vec<&Episode> = episode_candidates.iter().take(3).collect();
    let mut dropped = 0usize;

    loop {
        let text = render(agent, profile, pinned_knowledge, &episodes, mode_prompt, prompts_dir);
        if word_count(&text) <= PROMPT_WORD_BUDGET || episodes.is_empty() {
            if word_count(&text) <= PROMPT_WORD_BUDGET {
                return AssembledPrompt {
                    text,
                    episodes_dropped: dropped,
                };
            }
            return AssembledPrompt {
                text: truncate_to_word_budget(&text),
                episodes_dropped: dropped,
            };
        }
        episodes.pop();
        dropped += 1;
    }
}

fn render(
    agent: &Agent,
    profile: &AgentProfile,
    pinned_knowledge: &[Knowledge],
    episodes: &[&Episode],
    mode_prompt: Option<&str>,
    prompts_dir: &Path,
) -> String {
    let mut layers = Vec::new();

    // 1. Base persona.
    layers.push(substitute_placeholders(&agent.persona, agent, profile));

    // 2. User profile.
    layers.push(render_profile_layer(agent, profile));

    // 3. Pinned knowledge.
    layers.push(render_knowledge_layer(pinned_knowledge));

    // 4. Episodic memories.
    if !episodes.is_empty() {
        layers.push(render_episodes_layer(episodes));
    }

    // 5. Mode prompt.
    if let Some(mode) = mode_prompt {
        layers.push(substitute_placeholders(mode, agent, profile));
    }

    // 6. Local prompt files.
    if let Some(layer) = render_prompt_files_layer(prompts_dir, agent, profile) {
        layers.push(layer);
    }

    // 7. Current date/time.
    layers.push(render_datetime_layer());

    layers.join("\n\n")
}

fn render_profile_layer(agent: &Agent, profile: &AgentProfile) -> String {
    let mut lines = vec!["# User Profile".to_string(), format!("Name: {}", agent.name)];
    if let Some(dob) = &profile.dob {
        lines.push(format!("Date of birth: {dob}"));
    }
    if let Some(location) = &profile.location {
        lines.push(format!("Location: {location}"));
    }
    if let Some(profession) = &profile.profession {
        lines.push(format!("Profession: {profession}"));
    }
    if let Some(about) = &profile.about_raw {
        lines.push(format!("About: {about}"));
    }
    lines.join("\n")
}

fn render_knowledge_layer(pinned: &[Knowledge]) -> String {
    let mut lines = vec!["# Pinned Knowledge".to_string()];
    if pinned.is_empty() {
        lines.push("(no pinned knowledge)".to_string());
    } else {
        for row in pinned {
            lines.push(format!("- {}", row.content));
        }
    }
    lines.join("\n")
}

fn render_episodes_layer(episodes: &[&Episode]) -> String {
    let mut lines = vec!["# Episodic Memories".to_string()];
    for ep in episodes {
        lines.push(format!("- {}", ep.content));
    }
    lines.join("\n")
}

fn render_prompt_files_layer(
    prompts_dir: &Path,
    agent: &Agent,
    profile: &AgentProfile,
) -> Option<String> {
    let mut files = Vec::new();
    walk_prompt_files(prompts_dir, prompts_dir, &mut files);
    if files.is_empty() {
        return None;
    }
    files.sort();

    let mut lines = vec!["# Prompt Files".to_string()];
    for rel_path in files {
        let full_path = prompts_dir.join(&rel_path);
        lines.push(format!("[{}]", rel_path.display()));
        match std::fs::read_to_string(&full_path) {
            Ok(contents) if contents.trim().is_empty() => {
                lines.push("(empty file)".to_string());
            }
            Ok(contents) => lines.push(substitute_placeholders(&contents, agent, profile)),
            Err(_) => lines.push("(unreadable file)".to_string()),
        }
    }
    Some(lines.join("\n"))
}

fn walk_prompt_files(root: &Path, dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_prompt_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
}

fn render_datetime_layer() -> String {
    let now = chrono::Local::now();
    format!(
        "# Current Date & Time\nISO-8601: {}\nLocal: {}",
        now.to_rfc3339(),
        now.format("%A, %B %-d, %Y %H:%M %Z")
    )
}

fn substitute_placeholders(template: &str, agent: &Agent, profile: &AgentProfile) -> String {
    let agent_name = profile.agent_name.as_deref().unwrap_or(&agent.name);
    template
        .replace("{name}", &agent.name)
        .replace("{agent_name}", agent_name)
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

fn truncate_to_word_budget(s: &str) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= PROMPT_WORD_BUDGET {
        return s.to_string();
    }
    let mut truncated = words[..PROMPT_WORD_BUDGET].join(" ");
    truncated.push_str(" …");
    truncated
}

/// Score and sort episode candidates by token overlap with `query`
/// (ties broken by recency, which the caller should already have applied
/// by fetching in recency order before calling this).
pub fn rank_episodes_by_relevance<'a>(episodes: &'a [Episode], query: &str) -> Vec<&'a Episode> {
    let query_tokens = overlap_tokens(query);
    let mut scored: Vec<(usize, &Episode)> = episodes
        .iter()
        .map(|ep| (shared_token_count(&query_tokens, &overlap_tokens(&ep.content)), ep))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, ep)| ep).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent() -> Agent {
        Agent {
            id: "a1".into(),
            name: "Hive".into(),
            persona: "You are {agent_name}, a helpful assistant for {name}.".into(),
            default_model: "gpt-4o".into(),
            created_at: "now".into(),
            updated_at: "now".into(),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let agent = test_agent();
        let profile = AgentProfile {
            agent_name: Some("Hivemind".into()),
            ..Default::default()
        };
        let result = substitute_placeholders(&agent.persona, &agent, &profile);
        assert_eq!(result, "You are Hivemind, a helpful assistant for Hive.");
    }

    #[test]
    fn empty_pinned_knowledge_renders_placeholder_line() {
        let layer = render_knowledge_layer(&[]);
        assert!(layer.contains("(no pinned knowledge)"));
    }

    #[test]
    fn assemble_stays_under_word_budget_without_episodes() {
        let agent = test_agent();
        let profile = AgentProfile::default();
        let dir = tempfile::tempdir().unwrap();
        let result = assemble(&agent, &profile, &[], &[], None, dir.path());
        assert!(word_count(&result.text) <= PROMPT_WORD_BUDGET);
        assert_eq!(result.episodes_dropped, 0);
    }

    #[test]
    fn assemble_drops_episodes_when_over_budget() {
        let agent = Agent {
            persona: "word ".repeat(PROMPT_WORD_BUDGET + 100),
            ..test_agent()
        };
        let profile = AgentProfile::default();
        let episodes = vec![Episode {
            id: "e1".into(),
            agent_id: "a1".into(),
            conversation_id: None,
            content: "an episode".into(),
            mood: None,
            created_at: "now".into(),
        }];
        let dir = tempfile::tempdir().unwrap();
        let result = assemble(&agent, &profile, &[], &episodes, None, dir.path());
        assert_eq!(result.episodes_dropped, 1);
        assert!(word_count(&result.text) <= PROMPT_WORD_BUDGET);
    }

    #[test]
    fn prompt_files_layer_reads_nested_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.md"), "second").unwrap();
        std::fs::write(dir.path().join("sub/a.md"), "nested").unwrap();
        let agent = test_agent();
        let profile = AgentProfile::default();
        let layer = render_prompt_files_layer(dir.path(), &agent, &profile).unwrap();
        assert!(layer.find("b.md").unwrap() > layer.find("sub").unwrap());
    }

    #[test]
    fn rank_episodes_by_relevance_orders_by_overlap() {
        let episodes = vec![
            Episode {
                id: "e1".into(),
                agent_id: "a1".into(),
                conversation_id: None,
                content: "unrelated content here".into(),
                mood: None,
                created_at: "now".into(),
            },
            Episode {
                id: "e2".into(),
                agent_id: "a1".into(),
                conversation_id: None,
                content: "hiking mountains trip".into(),
                mood: None,
                created_at: "now".into(),
            },
        ];
        let ranked = rank_episodes_by_relevance(&episodes, "planning a hiking mountains trip");
        assert_eq!(ranked[0].id, "e2");
    }
}
