// Hive Store: Platform Conversations
//
// One row per (platform, external_id), unique per §3. `messages` holds an
// opaque serialized transcript (a JSON array the platform layer owns the
// shape of) rather than being normalized into the `messages` table — the
// platform bridge stitches history for prompt context, not for the
// conversation/message invariants that table enforces.

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::PlatformConversation;
use rusqlite::{params, OptionalExtension};

impl Store {
    /// Create the row if absent (seeding `conversation_id` and empty
    /// transcript), or update its `messages` transcript in place.
    pub fn upsert_platform_conversation(
        &self,
        platform: &str,
        external_id: &str,
        conversation_id: &str,
        messages_json: &str,
    ) -> HiveResult<PlatformConversation> {
        let conn = self.conn.lock();
        let now = now_iso();
        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM platform_conversations WHERE platform=?1 AND external_id=?2",
                params![platform, external_id],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing_id {
            Some(id) => {
                conn.execute(
                    "UPDATE platform_conversations SET messages=?2, updated_at=?3 WHERE id=?1",
                    params![id, messages_json, now],
                )?;
                id
            }
            None => {
                let id = new_id();
                conn.execute(
                    "INSERT INTO platform_conversations
                        (id, platform, external_id, conversation_id, messages, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![id, platform, external_id, conversation_id, messages_json, now],
                )?;
                id
            }
        };

        Ok(PlatformConversation {
            id,
            platform: platform.to_string(),
            platform_user_id: external_id.to_string(),
            conversation_id: conversation_id.to_string(),
            created_at: now.clone(),
        })
    }

    pub fn get_platform_conversation(
        &self,
        platform: &str,
        external_id: &str,
    ) -> HiveResult<Option<(PlatformConversation, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, platform, external_id, conversation_id, messages, created_at
                 FROM platform_conversations WHERE platform=?1 AND external_id=?2",
                params![platform, external_id],
                |row| {
                    Ok((
                        PlatformConversation {
                            id: row.get(0)?,
                            platform: row.get(1)?,
                            platform_user_id: row.get(2)?,
                            conversation_id: row.get(3)?,
                            created_at: row.get(5)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_unique_per_platform_and_external_id() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let convo = store.create_conversation(&agent.id, None).unwrap();
        store
            .upsert_platform_conversation("telegram", "user-1", &convo.id, "[]")
            .unwrap();
        store
            .upsert_platform_conversation("telegram", "user-1", &convo.id, "[\"hi\"]")
            .unwrap();
        let (_, messages) = store
            .get_platform_conversation("telegram", "user-1")
            .unwrap()
            .unwrap();
        assert_eq!(messages, "[\"hi\"]");
    }

    #[test]
    fn distinct_external_ids_do_not_collide() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let convo = store.create_conversation(&agent.id, None).unwrap();
        store
            .upsert_platform_conversation("telegram", "user-1", &convo.id, "[]")
            .unwrap();
        store
            .upsert_platform_conversation("telegram", "user-2", &convo.id, "[]")
            .unwrap();
        assert!(store
            .get_platform_conversation("telegram", "user-1")
            .unwrap()
            .is_some());
        assert!(store
            .get_platform_conversation("telegram", "user-2")
            .unwrap()
            .is_some());
    }
}
