// Hive Integration Auth
//
// Three JSON files under `<home>/integrations/`: authorized, pending,
// disabled. Grounded on the teacher's `engine/channels/access.rs`
// (allowlist/pairing semantics) and `engine/channels/mod.rs`'s
// load/save-config-as-JSON helper pair — but persisted to dedicated files
// rather than the engine's generic key/value config table, per spec §6's
// home-directory layout.

use crate::atoms::error::HiveResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuthorizedFile {
    /// platform -> set of authorized `from` identifiers.
    #[serde(default)]
    entries: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEntry {
    first_seen_at: String,
    last_seen_at: String,
    last_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PendingFile {
    /// platform -> from -> pending entry.
    #[serde(default)]
    entries: HashMap<String, HashMap<String, PendingEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DisabledFile {
    #[serde(default)]
    platforms: HashSet<String>,
}

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Write `value` to `path` via a temp-file-then-rename so a crash mid-write
/// never leaves a truncated/corrupt JSON file behind.
fn save_json<T: Serialize>(path: &Path, value: &T) -> HiveResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Thread-safe handle to the three integration-auth files under
/// `<home>/integrations/`.
pub struct IntegrationAuth {
    dir: PathBuf,
    authorized: Mutex<AuthorizedFile>,
    pending: Mutex<PendingFile>,
    disabled: Mutex<DisabledFile>,
}

impl IntegrationAuth {
    pub fn open(home: impl AsRef<Path>) -> Self {
        let dir = home.as_ref().join("integrations");
        IntegrationAuth {
            authorized: Mutex::new(load_json(&dir.join("authorized.json"))),
            pending: Mutex::new(load_json(&dir.join("pending.json"))),
            disabled: Mutex::new(load_json(&dir.join("disabled.json"))),
            dir,
        }
    }

    fn authorized_path(&self) -> PathBuf {
        self.dir.join("authorized.json")
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join("pending.json")
    }

    fn disabled_path(&self) -> PathBuf {
        self.dir.join("disabled.json")
    }

    pub fn is_authorized(&self, platform: &str, from: &str) -> bool {
        self.authorized
            .lock()
            .entries
            .get(platform)
            .map(|set| set.contains(from))
            .unwrap_or(false)
    }

    /// Record (or refresh) a pending authorization request. `first_seen_at`
    /// is set only the first time; `last_seen_at`/`last_text` are
    /// overwritten on every call.
    pub fn upsert_pending(
        &self,
        platform: &str,
        from: &str,
        timestamp: &str,
        text: &str,
    ) -> HiveResult<()> {
        {
            let mut pending = self.pending.lock();
            let platform_entries = pending.entries.entry(platform.to_string()).or_default();
            let entry = platform_entries
                .entry(from.to_string())
                .or_insert_with(|| PendingEntry {
                    first_seen_at: timestamp.to_string(),
                    last_seen_at: timestamp.to_string(),
                    last_text: text.to_string(),
                });
            entry.last_seen_at = timestamp.to_string();
            entry.last_text = text.to_string();
            save_json(&self.pending_path(), &*pending)?;
        }
        Ok(())
    }

    /// Authorize `(platform, id)`, atomically removing any matching
    /// pending entry.
    pub fn add_authorized(&self, platform: &str, id: &str) -> HiveResult<()> {
        {
            let mut authorized = self.authorized.lock();
            authorized
                .entries
                .entry(platform.to_string())
                .or_default()
                .insert(id.to_string());
            save_json(&self.authorized_path(), &*authorized)?;
        }
        {
            let mut pending = self.pending.lock();
            if let Some(platform_entries) = pending.entries.get_mut(platform) {
                platform_entries.remove(id);
            }
            save_json(&self.pending_path(), &*pending)?;
        }
        Ok(())
    }

    pub fn is_disabled(&self, platform: &str) -> bool {
        self.disabled.lock().platforms.contains(platform)
    }

    pub fn set_disabled(&self, platform: &str, disabled: bool) -> HiveResult<()> {
        let mut file = self.disabled.lock();
        if disabled {
            file.platforms.insert(platform.to_string());
        } else {
            file.platforms.remove(platform);
        }
        save_json(&self.disabled_path(), &*file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_user_is_not_authorized() {
        let dir = tempfile::tempdir().unwrap();
        let auth = IntegrationAuth::open(dir.path());
        assert!(!auth.is_authorized("telegram", "user-1"));
    }

    #[test]
    fn add_authorized_removes_matching_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let auth = IntegrationAuth::open(dir.path());
        auth.upsert_pending("telegram", "user-1", "t0", "hi").unwrap();
        assert_eq!(auth.pending.lock().entries["telegram"].len(), 1);
        auth.add_authorized("telegram", "user-1").unwrap();
        assert!(auth.is_authorized("telegram", "user-1"));
        assert!(auth.pending.lock().entries["telegram"].is_empty());
    }

    #[test]
    fn upsert_pending_preserves_first_seen_but_updates_last() {
        let dir = tempfile::tempdir().unwrap();
        let auth = IntegrationAuth::open(dir.path());
        auth.upsert_pending("telegram", "user-1", "t0", "hi").unwrap();
        auth.upsert_pending("telegram", "user-1", "t1", "hi again").unwrap();
        let pending = auth.pending.lock();
        let entry = &pending.entries["telegram"]["user-1"];
        assert_eq!(entry.first_seen_at, "t0");
        assert_eq!(entry.last_seen_at, "t1");
        assert_eq!(entry.last_text, "hi again");
    }

    #[test]
    fn disabled_flag_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let auth = IntegrationAuth::open(dir.path());
            auth.set_disabled("discord", true).unwrap();
        }
        let auth = IntegrationAuth::open(dir.path());
        assert!(auth.is_disabled("discord"));
        assert!(!auth.is_disabled("telegram"));
    }
}
