// Hive Store: Tasks
//
// `claim_next_queued_task` runs the select-then-update as a single
// transaction so two daemons racing the same row (rejected elsewhere by
// the single-instance guarantee, but worth defending in depth) can never
// both observe `queued` and both transition it to `running`.

use super::{new_id, now_iso, Store};
use crate::atoms::error::{HiveError, HiveResult};
use crate::atoms::types::{Task, TaskStatus};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl Task {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get(3)?;
        Ok(Task {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            title: row.get(2)?,
            status: status_str.parse().unwrap_or(TaskStatus::Queued),
            result: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }
}

const TASK_COLUMNS: &str =
    "id, agent_id, title, status, result, error, created_at, started_at, completed_at";

impl Store {
    pub fn insert_task(&self, id: &str, title: &str, agent_id: Option<&str>) -> HiveResult<Task> {
        let conn = self.conn.lock();
        let now = now_iso();
        conn.execute(
            "INSERT INTO tasks (id, agent_id, title, status, created_at)
             VALUES (?1, ?2, ?3, 'queued', ?4)",
            params![id, agent_id, title, now],
        )?;
        Ok(Task {
            id: id.to_string(),
            agent_id: agent_id.map(str::to_string),
            title: title.to_string(),
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub fn get_task(&self, id: &str) -> HiveResult<Option<Task>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
                params![id],
                Task::from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Atomically transition the oldest `queued` task to `running` and
    /// return it, or `None` if the queue is empty. At most one task is
    /// ever `running` per process (§3 invariant, §8 property 4) because
    /// this whole select+update runs inside one transaction.
    pub fn claim_next_queued_task(&self) -> HiveResult<Option<Task>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks WHERE status='queued' ORDER BY created_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let now = now_iso();
        let updated = tx.execute(
            "UPDATE tasks SET status='running', started_at=?2 WHERE id=?1 AND status='queued'",
            params![id, now],
        )?;
        if updated == 0 {
            // Lost the race to another claimant between SELECT and UPDATE.
            tx.commit()?;
            return Ok(None);
        }
        let task = tx.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
            params![id],
            Task::from_row,
        )?;
        tx.commit()?;
        Ok(Some(task))
    }

    pub fn mark_task_running(&self, id: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET status='running', started_at=?2 WHERE id=?1",
            params![id, now_iso()],
        )?;
        Ok(())
    }

    pub fn mark_task_done(&self, id: &str, result: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET status='done', result=?2, completed_at=?3 WHERE id=?1",
            params![id, result, now_iso()],
        )?;
        Ok(())
    }

    pub fn mark_task_failed(&self, id: &str, error: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET status='failed', error=?2, completed_at=?3 WHERE id=?1",
            params![id, error, now_iso()],
        )?;
        Ok(())
    }

    /// Mark a task failed only if it is currently queued (used by
    /// `task_cancel` for tasks that have not yet been claimed by the
    /// worker). Returns an error if the task is not in a cancellable state.
    pub fn cancel_task(&self, id: &str) -> HiveResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE tasks SET status='failed', error='cancelled', completed_at=?2
             WHERE id=?1 AND status IN ('queued', 'running')",
            params![id, now_iso()],
        )?;
        if updated == 0 {
            return Err(HiveError::InvalidInput(format!(
                "task {id} is not queued or running"
            )));
        }
        Ok(())
    }

    /// Re-queue any task left `running` by an unclean shutdown. Called once
    /// at boot, before the task worker starts.
    pub fn reset_running_tasks_to_queued(&self) -> HiveResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE tasks SET status='queued', started_at=NULL WHERE status='running'",
            [],
        )?;
        Ok(count)
    }

    pub fn clear_completed_tasks(&self) -> HiveResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM tasks WHERE status IN ('done', 'failed')",
            [],
        )?;
        Ok(count)
    }

    pub fn count_tasks_by_status(&self) -> HiveResult<HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_next_queued_task_transitions_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert_task("t-1", "first", None).unwrap();
        store.insert_task("t-2", "second", None).unwrap();
        let claimed = store.claim_next_queued_task().unwrap().unwrap();
        assert_eq!(claimed.id, "t-1");
        assert_eq!(claimed.status, TaskStatus::Running);
    }

    #[test]
    fn claim_next_queued_task_returns_none_when_empty() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.claim_next_queued_task().unwrap().is_none());
    }

    #[test]
    fn cancel_queued_task_marks_failed_with_cancelled_error() {
        let store = Store::open_in_memory().unwrap();
        store.insert_task("t-1", "first", None).unwrap();
        store.cancel_task("t-1").unwrap();
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn reset_running_tasks_to_queued_requeues_abandoned_runs() {
        let store = Store::open_in_memory().unwrap();
        store.insert_task("t-1", "first", None).unwrap();
        store.claim_next_queued_task().unwrap();
        let reset = store.reset_running_tasks_to_queued().unwrap();
        assert_eq!(reset, 1);
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn done_and_failed_are_terminal_and_excluded_from_requeue() {
        let store = Store::open_in_memory().unwrap();
        store.insert_task("t-1", "first", None).unwrap();
        store.claim_next_queued_task().unwrap();
        store.mark_task_done("t-1", "result text").unwrap();
        assert_eq!(store.reset_running_tasks_to_queued().unwrap(), 0);
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }
}
