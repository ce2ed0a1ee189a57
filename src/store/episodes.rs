// Hive Store: Episodes
//
// Append-only summaries of exchanges. `find_relevant_episodes` scores by
// token overlap against the prompt, same rule as knowledge lookup, but
// returns the top `limit` instead of a single best match (the assembler
// wants up to 3 for its episodic-memory layer, §4.D).

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::{overlap_tokens, shared_token_count, Episode};
use rusqlite::params;

impl Episode {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Episode {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            conversation_id: row.get(2)?,
            content: row.get(3)?,
            mood: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl Store {
    pub fn insert_episode(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        content: &str,
        mood: Option<&str>,
    ) -> HiveResult<Episode> {
        let conn = self.conn.lock();
        let id = new_id();
        let now = now_iso();
        conn.execute(
            "INSERT INTO episodes (id, agent_id, conversation_id, content, mood, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, agent_id, conversation_id, content, mood, now],
        )?;
        Ok(Episode {
            id,
            agent_id: agent_id.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            content: content.to_string(),
            mood: mood.map(str::to_string),
            created_at: now,
        })
    }

    pub fn list_recent_episodes(&self, agent_id: &str, limit: i64) -> HiveResult<Vec<Episode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, conversation_id, content, mood, created_at
             FROM episodes WHERE agent_id=?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![agent_id, limit], Episode::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Up to `limit` episodes scoring highest by token overlap with `query`,
    /// ties broken by recency (most recent first).
    pub fn find_relevant_episodes(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> HiveResult<Vec<Episode>> {
        let query_tokens = overlap_tokens(query);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, conversation_id, content, mood, created_at
             FROM episodes WHERE agent_id=?1",
        )?;
        let mut all: Vec<Episode> = stmt
            .query_map(params![agent_id], Episode::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut scored: Vec<(usize, Episode)> = all
            .into_iter()
            .map(|ep| {
                let score = if query_tokens.is_empty() {
                    0
                } else {
                    shared_token_count(&query_tokens, &overlap_tokens(&ep.content))
                };
                (score, ep)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, ep)| ep).collect())
    }

    pub fn clear_episodes(&self, agent_id: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM episodes WHERE agent_id=?1", params![agent_id])?;
        Ok(())
    }

    /// Episode row count for `agent_id`, reported in the daemon's `status`
    /// IPC response (`memoryStats.episodes`).
    pub fn count_episodes(&self, agent_id: &str) -> HiveResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE agent_id=?1",
            params![agent_id],
            |row| row.get(0),
        )?;
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
    fn find_relevant_episodes_orders_by_overlap_then_recency() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        store
            .insert_episode(&agent, None, "talked about hiking trails", None)
            .unwrap();
        store
            .insert_episode(&agent, None, "discussed quarterly budget planning", None)
            .unwrap();
        let relevant = store
            .find_relevant_episodes(&agent, "more hiking trails please", 3)
            .unwrap();
        assert_eq!(relevant[0].content, "talked about hiking trails");
    }

    #[test]
    fn clear_episodes_wipes_all_rows_for_agent() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        store.insert_episode(&agent, None, "ep1", None).unwrap();
        store.insert_episode(&agent, None, "ep2", None).unwrap();
        store.clear_episodes(&agent).unwrap();
        assert!(store.list_recent_episodes(&agent, 10).unwrap().is_empty());
    }
}
