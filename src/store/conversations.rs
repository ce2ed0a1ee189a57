// Hive Store: Conversations

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::Conversation;
use rusqlite::{params, OptionalExtension};

impl Conversation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Conversation {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            title: row.get(2)?,
            mode: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl Store {
    pub fn create_conversation(
        &self,
        agent_id: &str,
        title: Option<&str>,
    ) -> HiveResult<Conversation> {
        let conn = self.conn.lock();
        let id = new_id();
        let now = now_iso();
        conn.execute(
            "INSERT INTO conversations (id, agent_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, agent_id, title, now],
        )?;
        Ok(Conversation {
            id,
            agent_id: agent_id.to_string(),
            title: title.map(str::to_string),
            mode: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_conversation(&self, id: &str) -> HiveResult<Option<Conversation>> {
        let conn = self.conn.lock();
        let convo = conn
            .query_row(
                "SELECT id, agent_id, title, mode, created_at, updated_at
                 FROM conversations WHERE id=?1",
                params![id],
                Conversation::from_row,
            )
            .optional()?;
        Ok(convo)
    }

    /// Most recently updated conversations first, capped at `limit`.
    pub fn list_recent_conversations(&self, limit: i64) -> HiveResult<Vec<Conversation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, title, mode, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], Conversation::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET title=?2, updated_at=?3 WHERE id=?1",
            params![id, title, now_iso()],
        )?;
        Ok(())
    }

    pub fn delete_conversation(&self, id: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM conversations WHERE id=?1", params![id])?;
        Ok(())
    }

    /// Total conversation row count, reported in the daemon's `status` IPC
    /// response (`memoryStats.conversations`).
    pub fn count_conversations(&self) -> HiveResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_id(store: &Store) -> String {
        store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap()
            .id
    }

    #[test]
    fn create_and_fetch_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        let convo = store.create_conversation(&agent, Some("Trip planning")).unwrap();
        let fetched = store.get_conversation(&convo.id).unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Trip planning"));
    }

    #[test]
    fn recent_conversations_ordered_by_updated_at_desc() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        let first = store.create_conversation(&agent, None).unwrap();
        let second = store.create_conversation(&agent, None).unwrap();
        store
            .append_message(&first.id, crate::atoms::types::MessageRole::User, "hi")
            .unwrap();
        let recent = store.list_recent_conversations(10).unwrap();
        assert_eq!(recent[0].id, first.id);
        assert_eq!(recent[1].id, second.id);
    }
}
