// Hive Store: Agents
//
// Exactly one "primary" agent is supported per §3: the row with the
// earliest created_at. `upsert_primary_agent` therefore either creates the
// first row or updates it in place — there is no multi-agent CRUD surface
// in this crate's scope.

use super::{new_id, now_iso, Store};
use crate::atoms::error::HiveResult;
use crate::atoms::types::Agent;
use rusqlite::{params, OptionalExtension};

impl Agent {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Agent {
            id: row.get(0)?,
            name: row.get(1)?,
            persona: row.get(2)?,
            default_model: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl Store {
    /// Fetch the primary agent (earliest `created_at`), if any has been
    /// created yet.
    pub fn primary_agent(&self) -> HiveResult<Option<Agent>> {
        let conn = self.conn.lock();
        let agent = conn
            .query_row(
                "SELECT id, name, persona, model, created_at, updated_at
                 FROM agents ORDER BY created_at ASC LIMIT 1",
                [],
                Agent::from_row,
            )
            .optional()?;
        Ok(agent)
    }

    /// Create the primary agent if none exists yet, else update the
    /// existing one's mutable fields in place.
    pub fn upsert_primary_agent(
        &self,
        name: &str,
        persona: &str,
        provider: &str,
        model: &str,
    ) -> HiveResult<Agent> {
        let conn = self.conn.lock();
        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM agents ORDER BY created_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let now = now_iso();
        let id = match existing_id {
            Some(id) => {
                conn.execute(
                    "UPDATE agents SET name=?2, persona=?3, provider=?4, model=?5, updated_at=?6
                     WHERE id=?1",
                    params![id, name, persona, provider, model, now],
                )?;
                id
            }
            None => {
                let id = new_id();
                conn.execute(
                    "INSERT INTO agents (id, name, provider, model, persona, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![id, name, provider, model, persona, now],
                )?;
                id
            }
        };

        conn.query_row(
            "SELECT id, name, persona, model, created_at, updated_at FROM agents WHERE id=?1",
            params![id],
            Agent::from_row,
        )
        .map_err(Into::into)
    }

    /// Update the free-form profile fields on the primary agent. No-op if
    /// no primary agent exists yet.
    pub fn update_agent_profile(
        &self,
        dob: Option<&str>,
        location: Option<&str>,
        profession: Option<&str>,
        about_raw: Option<&str>,
        agent_name: Option<&str>,
    ) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE agents SET dob=?1, location=?2, profession=?3, about_raw=?4, agent_name=?5,
                updated_at=?6
             WHERE id = (SELECT id FROM agents ORDER BY created_at ASC LIMIT 1)",
            params![
                dob,
                location,
                profession,
                about_raw,
                agent_name,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// Read back the profile fields (dob, location, profession, about_raw,
    /// agent_name) for the prompt assembler's "user profile" layer.
    pub fn primary_agent_profile(
        &self,
    ) -> HiveResult<
        Option<(
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )>,
    > {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT dob, location, profession, about_raw, agent_name
                 FROM agents ORDER BY created_at ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Delete the primary agent; cascades to conversations, knowledge, and
    /// episodes owned by it.
    pub fn delete_primary_agent(&self) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM agents WHERE id = (SELECT id FROM agents ORDER BY created_at ASC LIMIT 1)",
            [],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let b = store
            .upsert_primary_agent("Hive2", "helpful v2", "openai", "gpt-4o-mini")
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "Hive2");
    }

    #[test]
    fn primary_agent_is_earliest_created() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.primary_agent().unwrap().is_none());
        store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let primary = store.primary_agent().unwrap().unwrap();
        assert_eq!(primary.name, "Hive");
    }

    #[test]
    fn delete_primary_agent_cascades_to_conversations() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let convo = store.create_conversation(&agent.id, None).unwrap();
        store.delete_primary_agent().unwrap();
        assert!(store.get_conversation(&convo.id).unwrap().is_none());
    }
}
