// Hive Store: Knowledge
//
// `find_closest_knowledge` implements the spec's token-overlap match rule:
// a row matches the query if it shares at least `min(2, |query tokens|)`
// tokens with it (lowercased, alphanumeric, ≥4 chars). Scanned in Rust
// rather than SQL FTS — the teacher's own `memories` search does the same
// token-set scoring in application code, reserving SQL for storage only.

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::{overlap_tokens, shared_token_count, Knowledge};
use rusqlite::params;

impl Knowledge {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Knowledge {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            content: row.get(2)?,
            pinned: row.get::<_, i64>(3)? != 0,
            source: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl Store {
    pub fn insert_knowledge(
        &self,
        agent_id: &str,
        content: &str,
        pinned: bool,
        source: &str,
    ) -> HiveResult<Knowledge> {
        let conn = self.conn.lock();
        let id = new_id();
        let now = now_iso();
        conn.execute(
            "INSERT INTO knowledge (id, agent_id, content, pinned, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, agent_id, content, pinned as i64, source, now],
        )?;
        Ok(Knowledge {
            id,
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            pinned,
            source: source.to_string(),
            created_at: now,
        })
    }

    pub fn list_pinned_knowledge(&self, agent_id: &str) -> HiveResult<Vec<Knowledge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, content, pinned, source, created_at
             FROM knowledge WHERE agent_id=?1 AND pinned=1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![agent_id], Knowledge::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_auto_knowledge(&self, agent_id: &str) -> HiveResult<Vec<Knowledge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, content, pinned, source, created_at
             FROM knowledge WHERE agent_id=?1 AND source IN ('auto', 'auto_crystallized')
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![agent_id], Knowledge::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_all_knowledge(&self, agent_id: &str) -> HiveResult<Vec<Knowledge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, content, pinned, source, created_at
             FROM knowledge WHERE agent_id=?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![agent_id], Knowledge::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// The row (if any) whose content shares at least `min(2, |query
    /// tokens|)` tokens with `query`. Ties broken by most recent.
    pub fn find_closest_knowledge(
        &self,
        agent_id: &str,
        query: &str,
    ) -> HiveResult<Option<Knowledge>> {
        let query_tokens = overlap_tokens(query);
        if query_tokens.is_empty() {
            return Ok(None);
        }
        let threshold = query_tokens.len().min(2);
        let rows = self.list_all_knowledge(agent_id)?;
        let best = rows
            .into_iter()
            .filter_map(|row| {
                let shared = shared_token_count(&query_tokens, &overlap_tokens(&row.content));
                (shared >= threshold).then_some((shared, row))
            })
            .max_by(|(a_shared, a_row), (b_shared, b_row)| {
                a_shared
                    .cmp(b_shared)
                    .then(a_row.created_at.cmp(&b_row.created_at))
            })
            .map(|(_, row)| row);
        Ok(best)
    }

    pub fn delete_knowledge(&self, id: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM knowledge WHERE id=?1", params![id])?;
        Ok(())
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
    fn pinned_and_auto_are_filtered_independently() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        store
            .insert_knowledge(&agent, "likes hiking", true, "manual")
            .unwrap();
        store
            .insert_knowledge(&agent, "owns a dog", false, "auto")
            .unwrap();
        assert_eq!(store.list_pinned_knowledge(&agent).unwrap().len(), 1);
        assert_eq!(store.list_auto_knowledge(&agent).unwrap().len(), 1);
    }

    #[test]
    fn find_closest_knowledge_requires_min_shared_tokens() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        store
            .insert_knowledge(&agent, "enjoys hiking mountains on weekends", false, "auto")
            .unwrap();
        let hit = store
            .find_closest_knowledge(&agent, "do you remember hiking mountains")
            .unwrap();
        assert!(hit.is_some());
        let miss = store
            .find_closest_knowledge(&agent, "completely unrelated topic")
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn delete_knowledge_removes_row() {
        let store = Store::open_in_memory().unwrap();
        let agent = agent_id(&store);
        let row = store
            .insert_knowledge(&agent, "temp fact", false, "auto")
            .unwrap();
        store.delete_knowledge(&row.id).unwrap();
        assert!(store.list_all_knowledge(&agent).unwrap().is_empty());
    }
}
