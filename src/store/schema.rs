// Hive Store: Schema & Migrations
//
// Each migration is a (version, name, sql) triple applied inside its own
// transaction. `run_migrations` records the applied version in
// `schema_migrations` so re-opening the store is a no-op for everything
// already applied — unlike the teacher's `ALTER TABLE ... .ok()` style,
// this crate's spec requires strict, idempotent, strictly-monotonic
// version ordering (§8 invariant 1), so migrations are tracked explicitly
// rather than inferred from `pragma_table_info`.

use crate::atoms::error::HiveResult;
use log::info;
use rusqlite::Connection;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: "
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                persona TEXT NOT NULL DEFAULT '',
                dob TEXT,
                location TEXT,
                profession TEXT,
                about_raw TEXT,
                agent_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                title TEXT,
                mode TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS knowledge (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                content TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'manual',
                created_at TEXT NOT NULL,
                FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                conversation_id TEXT,
                content TEXT NOT NULL,
                mood TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                agent_id TEXT,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at);

            CREATE TABLE IF NOT EXISTS platform_conversations (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                external_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                messages TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(platform, external_id)
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        ",
    },
    Migration {
        version: 2,
        name: "conversation_count_meta_seed",
        sql: "
            INSERT OR IGNORE INTO meta (key, value, updated_at)
            VALUES ('conversation_count', '0', datetime('now'));
        ",
    },
];

fn ensure_migrations_table(conn: &Connection) -> HiveResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Apply every migration whose version is not already recorded, each inside
/// its own transaction, in ascending version order. Safe to call on every
/// `open()` — already-applied versions are skipped.
pub(crate) fn run_migrations(conn: &mut Connection) -> HiveResult<()> {
    ensure_migrations_table(conn)?;

    let applied: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= applied {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, datetime('now'))",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
        info!(
            "[store] applied migration {} ({})",
            migration.version, migration.name
        );
    }

    Ok(())
}

/// The highest applied migration version, used to stamp `meta.schema_version`.
pub(crate) fn current_version(conn: &Connection) -> HiveResult<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let first = current_version(&conn).unwrap();
        run_migrations(&mut conn).unwrap();
        let second = current_version(&conn).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn versions_apply_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let mut stmt = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY applied_at")
            .unwrap();
        let versions: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
