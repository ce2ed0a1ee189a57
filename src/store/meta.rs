// Hive Store: Meta
//
// Process-wide key/value store (schema_version, theme, last_session_at,
// prompts_last_checked, conversation_count, ...).

use super::{now_iso, Store};
use crate::atoms::error::{HiveError, HiveResult};
use crate::atoms::types::{is_valid_hex_color, EngineConfig};
use rusqlite::{params, OptionalExtension};

impl Store {
    pub fn get_meta(&self, key: &str) -> HiveResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM meta WHERE key=?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, value, now_iso()],
        )?;
        Ok(())
    }

    /// Set the `theme_hex` meta key, rejecting anything that isn't a
    /// `#rrggbb` hex color rather than letting a bad value reach storage.
    pub fn set_theme_hex(&self, hex: &str) -> HiveResult<()> {
        if !is_valid_hex_color(hex) {
            return Err(HiveError::InvalidInput(format!(
                "invalid hex color: {hex}"
            )));
        }
        self.set_meta("theme_hex", hex)
    }

    /// Fetch `conversation_count` as an integer, defaulting to 0 if unset.
    pub fn conversation_count(&self) -> HiveResult<u64> {
        Ok(self
            .get_meta("conversation_count")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Increment `conversation_count` and stamp `last_conversation_at`,
    /// returning the new count and the *previous* `last_conversation_at`
    /// (needed by the crystallization recency check, §4.F).
    pub fn bump_conversation_count(&self) -> HiveResult<(u64, Option<String>)> {
        let previous_at = self.get_meta("last_conversation_at")?;
        let new_count = self.conversation_count()? + 1;
        self.set_meta("conversation_count", &new_count.to_string())?;
        self.set_meta("last_conversation_at", &now_iso())?;
        Ok((new_count, previous_at))
    }

    /// The persisted provider/tunable override row (§2 Configuration), or
    /// `EngineConfig::default()` (every field absent) if never set.
    pub fn get_engine_config(&self) -> HiveResult<EngineConfig> {
        match self.get_meta("engine_config")? {
            Some(raw) => serde_json::from_str(&raw).map_err(Into::into),
            None => Ok(EngineConfig::default()),
        }
    }

    pub fn set_engine_config(&self, config: &EngineConfig) -> HiveResult<()> {
        let raw = serde_json::to_string(config)?;
        self.set_meta("engine_config", &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.set_meta("theme", "dark").unwrap();
        assert_eq!(store.get_meta("theme").unwrap().unwrap(), "dark");
    }

    #[test]
    fn set_meta_overwrites_existing_key() {
        let store = Store::open_in_memory().unwrap();
        store.set_meta("theme", "dark").unwrap();
        store.set_meta("theme", "light").unwrap();
        assert_eq!(store.get_meta("theme").unwrap().unwrap(), "light");
    }

    #[test]
    fn bump_conversation_count_increments_and_returns_previous_timestamp() {
        let store = Store::open_in_memory().unwrap();
        let (first_count, first_prev) = store.bump_conversation_count().unwrap();
        assert_eq!(first_count, 1);
        assert!(first_prev.is_none());
        let (second_count, second_prev) = store.bump_conversation_count().unwrap();
        assert_eq!(second_count, 2);
        assert!(second_prev.is_some());
    }

    #[test]
    fn missing_key_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_meta("nope").unwrap().is_none());
    }

    #[test]
    fn theme_and_theme_hex_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.db");
        {
            let store = Store::open(&path).unwrap();
            store.set_meta("theme", "dark").unwrap();
            store.set_theme_hex("#1a2b3c").unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_meta("theme").unwrap().unwrap(), "dark");
        assert_eq!(store.get_meta("theme_hex").unwrap().unwrap(), "#1a2b3c");
    }

    #[test]
    fn set_theme_hex_rejects_invalid_hex() {
        let store = Store::open_in_memory().unwrap();
        let err = store.set_theme_hex("#ZZZZZZ").unwrap_err();
        assert!(matches!(err, crate::atoms::error::HiveError::InvalidInput(_)));
        assert!(store.get_meta("theme_hex").unwrap().is_none());
    }

    #[test]
    fn engine_config_defaults_when_unset() {
        let store = Store::open_in_memory().unwrap();
        let config = store.get_engine_config().unwrap();
        assert!(config.provider.is_none());
        assert!(config.heartbeat_interval_secs.is_none());
    }

    #[test]
    fn engine_config_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let config = crate::atoms::types::EngineConfig {
            provider: Some("anthropic".to_string()),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            model: Some("claude-3-5-haiku-latest".to_string()),
            heartbeat_interval_secs: Some(45),
        };
        store.set_engine_config(&config).unwrap();
        let read_back = store.get_engine_config().unwrap();
        assert_eq!(read_back.provider.as_deref(), Some("anthropic"));
        assert_eq!(read_back.heartbeat_interval_secs, Some(45));
        assert!(read_back.base_url.is_none());
    }
}
