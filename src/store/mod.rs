// Hive Store — embedded relational store.
//
// Module layout (one file per entity, mirroring the teacher's
// `engine/sessions/*` split):
//   schema               — migration runner
//   agents               — primary-agent CRUD
//   conversations         — conversation CRUD
//   messages             — append-only message log
//   knowledge            — manual/auto/crystallized facts
//   episodes             — episodic memory
//   tasks                — task queue state machine
//   platform_conversations — per-platform transcript cache
//   meta                 — process-wide key/value store

mod agents;
mod conversations;
mod episodes;
mod knowledge;
mod meta;
mod messages;
mod platform_conversations;
mod schema;
mod tasks;

use crate::atoms::error::{HiveError, HiveResult};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Thread-safe handle to the embedded store. Cloned cheaply (an `Arc` at the
/// call sites that need to share it across tasks); internally a single
/// connection guarded by a mutex, matching the teacher's `SessionStore`.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (creating if absent) the store at `path`, apply pragmas, and run
    /// any outstanding migrations. `path`'s parent directory is created if
    /// missing.
    pub fn open(path: impl AsRef<Path>) -> HiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HiveError::StoreIo(format!("create store directory {parent:?}: {e}"))
            })?;
        }

        info!("[store] opening {path:?}");
        let mut conn = Connection::open(&path)
            .map_err(|e| HiveError::StoreIo(format!("open {path:?}: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(HiveError::StoreIo(format!(
                "could not enable WAL mode (got {journal_mode})"
            )));
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

        schema::run_migrations(&mut conn)?;
        let version = schema::current_version(&conn)?;

        let store = Store {
            conn: Mutex::new(conn),
            path,
        };
        store.set_meta("schema_version", &version.to_string())?;
        Ok(store)
    }

    /// Open an in-memory store — used by tests and anywhere a throwaway
    /// store is needed without touching the filesystem.
    #[cfg(test)]
    pub fn open_in_memory() -> HiveResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::run_migrations(&mut conn)?;
        let version = schema::current_version(&conn)?;
        let store = Store {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        store.set_meta("schema_version", &version.to_string())?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run an integrity check; used at boot to surface `StoreCorrupt` early
    /// rather than failing opaquely on the first query.
    pub fn check_integrity(&self) -> HiveResult<()> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0))?;
        if result == "ok" {
            Ok(())
        } else {
            Err(HiveError::StoreCorrupt(result))
        }
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hive.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get_meta("schema_version").unwrap().unwrap(), "2");
    }

    #[test]
    fn reopen_preserves_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.db");
        {
            let store = Store::open(&path).unwrap();
            store.set_meta("custom", "value").unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_meta("custom").unwrap().unwrap(), "value");
    }

    #[test]
    fn integrity_check_passes_on_fresh_store() {
        let store = Store::open_in_memory().unwrap();
        store.check_integrity().unwrap();
    }
}
