// Hive Prompt Auto-update
//
// Once per 24h per daemon boot (§4.L): fetch a directory listing at a fixed
// URL, parse `prompts/<file>.md` tokens out of it, and exclusive-create any
// file missing from `<home>/prompts` — never overwrite a file the user may
// have edited. All failures are silent; this never blocks or fails boot.
// Follows the same pinned-client, silent-failure posture the provider
// layer's `http_client()` establishes, since there is no teacher analogue
// for a background asset fetch like this.

use crate::atoms::constants::PROMPT_AUTOUPDATE_INTERVAL_SECS;
use crate::store::Store;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::path::Path;

const DEFAULT_MANIFEST_URL: &str = "https://prompts.hive.dev/index";
const META_KEY: &str = "prompts_last_checked";

/// True if enough time has passed since the last check (or none has ever
/// run) to justify another fetch this boot.
fn should_check(store: &Store) -> bool {
    let Ok(Some(last)) = store.get_meta(META_KEY) else {
        return true;
    };
    let Ok(last) = DateTime::parse_from_rfc3339(&last) else {
        return true;
    };
    let age = Utc::now().signed_duration_since(last.with_timezone(&Utc));
    age >= chrono::Duration::seconds(PROMPT_AUTOUPDATE_INTERVAL_SECS as i64)
}

/// Extract every `prompts/<file>.md` token appearing anywhere in `listing`,
/// returning the bare `<file>.md` filenames. Tolerant of the token being
/// embedded in HTML, JSON, or plain text — it only looks for the literal
/// `prompts/` prefix and `.md` suffix with no path separators in between.
fn parse_listing(listing: &str) -> Vec<String> {
    let mut files = Vec::new();
    let bytes = listing.as_bytes();
    let needle = b"prompts/";
    let mut start = 0;
    while let Some(offset) = find_subslice(&bytes[start..], needle) {
        let token_start = start + offset + needle.len();
        let rest = &listing[token_start..];
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '<' || c == '/')
            .unwrap_or(rest.len());
        let candidate = &rest[..end];
        if let Some(name) = candidate.strip_suffix(".md") {
            if !name.is_empty() && name.chars().all(is_filename_char) {
                files.push(candidate.to_string());
            }
        }
        start = token_start;
    }
    files.sort();
    files.dedup();
    files
}

fn is_filename_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Run the once-per-24h check. Every failure (network, parse, filesystem)
/// is logged at `warn`/`debug` and swallowed — the caller never sees an
/// error from this function.
pub async fn maybe_run(store: &Store, client: &reqwest::Client, prompts_dir: &Path, manifest_url: Option<&str>) {
    if !should_check(store) {
        return;
    }

    let manifest_url = manifest_url.unwrap_or(DEFAULT_MANIFEST_URL);
    let listing = match client.get(manifest_url).send().await {
        Ok(resp) => match resp.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "prompt_autoupdate", "could not read manifest body: {err}");
                return;
            }
        },
        Err(err) => {
            warn!(target: "prompt_autoupdate", "could not fetch manifest: {err}");
            return;
        }
    };

    let files = parse_listing(&listing);
    debug!(target: "prompt_autoupdate", "manifest listed {} prompt file(s)", files.len());

    if let Err(err) = std::fs::create_dir_all(prompts_dir) {
        warn!(target: "prompt_autoupdate", "could not create prompts dir: {err}");
        return;
    }

    for file in files {
        let dest = prompts_dir.join(&file);
        if dest.exists() {
            continue;
        }
        let file_url = format!("{}/{}", manifest_url.trim_end_matches('/'), file);
        match fetch_and_create(client, &file_url, &dest).await {
            Ok(()) => debug!(target: "prompt_autoupdate", "downloaded {file}"),
            Err(err) => warn!(target: "prompt_autoupdate", "could not download {file}: {err}"),
        }
    }

    if let Err(err) = store.set_meta(META_KEY, &Utc::now().to_rfc3339()) {
        warn!(target: "prompt_autoupdate", "could not stamp {META_KEY}: {err}");
    }
}

async fn fetch_and_create(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), String> {
    let body = client
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .text()
        .await
        .map_err(|e| e.to_string())?;

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| e.to_string())?;
    file.write_all(body.as_bytes()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_extracts_md_filenames() {
        let listing = r#"{"entries": ["prompts/persona.md", "prompts/rules.md", "prompts/notes.txt"]}"#;
        let files = parse_listing(listing);
        assert_eq!(files, vec!["persona.md", "rules.md"]);
    }

    #[test]
    fn parse_listing_ignores_nested_paths() {
        let listing = "see prompts/sub/dir.md for details";
        assert!(parse_listing(listing).is_empty());
    }

    #[test]
    fn parse_listing_dedups_and_sorts() {
        let listing = "prompts/b.md prompts/a.md prompts/a.md";
        assert_eq!(parse_listing(listing), vec!["a.md", "b.md"]);
    }

    #[test]
    fn should_check_true_when_never_checked() {
        let store = Store::open_in_memory().unwrap();
        assert!(should_check(&store));
    }

    #[test]
    fn should_check_false_right_after_stamping() {
        let store = Store::open_in_memory().unwrap();
        store.set_meta(META_KEY, &Utc::now().to_rfc3339()).unwrap();
        assert!(!should_check(&store));
    }

    #[tokio::test]
    async fn fetch_and_create_never_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("persona.md");
        std::fs::write(&dest, "user edited content").unwrap();
        // Exclusive create against an existing path must fail, leaving the
        // user's edit untouched — verified directly since hitting the
        // network isn't available in this test.
        let result = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest);
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "user edited content");
    }
}
