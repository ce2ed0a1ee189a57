// Hive Store: Messages
//
// Append-only within a conversation. `append_message` runs inside a
// transaction so the insert and the conversation's `updated_at` bump are
// atomic — §8 invariant 2 requires `conversation.updated_at == message.created_at`
// for the just-appended row.

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::{Message, MessageRole};
use rusqlite::params;

impl Message {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let role_str: String = row.get(2)?;
        let role = role_str.parse().unwrap_or(MessageRole::User);
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl Store {
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> HiveResult<Message> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = new_id();
        let now = now_iso();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, conversation_id, role.as_str(), content, now],
        )?;
        let updated = tx.execute(
            "UPDATE conversations SET updated_at=?2 WHERE id=?1",
            params![conversation_id, now],
        )?;
        if updated == 0 {
            return Err(crate::atoms::error::HiveError::StoreConstraint(format!(
                "no conversation {conversation_id}"
            )));
        }
        tx.commit()?;
        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Newest `limit` messages, returned oldest-first for prompt assembly.
    pub fn list_messages(&self, conversation_id: &str, limit: i64) -> HiveResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at FROM (
                SELECT id, conversation_id, role, content, created_at
                FROM messages WHERE conversation_id=?1
                ORDER BY created_at DESC LIMIT ?2
             ) ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, limit], Message::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn count_messages(&self, conversation_id: &str) -> HiveResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id=?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(store: &Store) -> String {
        let agent = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        store.create_conversation(&agent.id, None).unwrap().id
    }

    #[test]
    fn append_bumps_conversation_updated_at() {
        let store = Store::open_in_memory().unwrap();
        let convo_id = conversation(&store);
        let msg = store
            .append_message(&convo_id, MessageRole::User, "hello")
            .unwrap();
        let convo = store.get_conversation(&convo_id).unwrap().unwrap();
        assert_eq!(convo.updated_at, msg.created_at);
    }

    #[test]
    fn append_to_missing_conversation_is_constraint_error() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .append_message("does-not-exist", MessageRole::User, "hi")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::atoms::error::HiveError::StoreConstraint(_)
        ));
    }

    #[test]
    fn list_messages_returns_newest_n_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        let convo_id = conversation(&store);
        for i in 0..5 {
            store
                .append_message(&convo_id, MessageRole::User, &format!("msg {i}"))
                .unwrap();
        }
        let last_three = store.list_messages(&convo_id, 3).unwrap();
        assert_eq!(last_three.len(), 3);
        assert_eq!(last_three[0].content, "msg 2");
        assert_eq!(last_three[2].content, "msg 4");
    }
}
