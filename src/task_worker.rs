// Hive Task Worker
//
// A single-queue background runner (§4.I): poll for the oldest `queued`
// task (or wake immediately on a nudge), run it through the orchestrator,
// and persist the outcome. At most one task is ever active in a process —
// `Store::claim_next_queued_task`'s transactional claim is what actually
// enforces that; this module just never starts a second run concurrently.
// Grounded on the teacher's `engine/tasks/worker.rs` poll-or-notify loop
// shape, adapted from a multi-worker pool down to this crate's single
// active task.

use crate::atoms::constants::TASK_POLL_INTERVAL_SECS;
use crate::atoms::error::HiveError;
use crate::atoms::types::Task;
use crate::memory::{self, LongTermMemory};
use crate::orchestrator::{CancelHandle, ChatEvent, ChatOptions, Orchestrator};
use crate::provider::AnyProvider;
use crate::store::Store;
use futures_util::StreamExt;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const CANCELLED_ERROR: &str = "cancelled";

/// Shared handle task producers (the IPC server) use to enqueue work and
/// request cancellation of a task already claimed by the worker.
pub struct TaskWorker {
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
    provider: Arc<AnyProvider>,
    long_term_memory: Option<Arc<dyn LongTermMemory>>,
    cancellations: Mutex<HashSet<String>>,
    /// The active run's orchestrator-level cancel flag, keyed by task id —
    /// flipping this (in addition to `cancellations`) stops the in-flight
    /// chat turn itself rather than just its consumer loop (§4.E).
    active_cancel_handles: Mutex<HashMap<String, CancelHandle>>,
    notify: Notify,
    active_task_id: Mutex<Option<String>>,
}

impl TaskWorker {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Arc<Orchestrator>,
        provider: Arc<AnyProvider>,
        long_term_memory: Option<Arc<dyn LongTermMemory>>,
    ) -> Arc<Self> {
        Arc::new(TaskWorker {
            store,
            orchestrator,
            provider,
            long_term_memory,
            cancellations: Mutex::new(HashSet::new()),
            active_cancel_handles: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            active_task_id: Mutex::new(None),
        })
    }

    /// The id of the task currently claimed by this worker, if any —
    /// surfaced verbatim in the daemon's `status` IPC response.
    pub fn active_task_id(&self) -> Option<String> {
        self.active_task_id.lock().clone()
    }

    /// Enqueue a new task and wake the run loop immediately rather than
    /// waiting for the next poll tick.
    pub fn enqueue(&self, id: &str, title: &str, agent_id: Option<&str>) -> crate::atoms::error::HiveResult<Task> {
        let task = self.store.insert_task(id, title, agent_id)?;
        self.notify.notify_one();
        Ok(task)
    }

    /// Cancel a task. A still-queued task is marked failed immediately; a
    /// running one is flagged so the active run loop notices it on its next
    /// streaming iteration and stops.
    pub fn request_cancel(&self, id: &str) -> crate::atoms::error::HiveResult<()> {
        match self.store.get_task(id)? {
            Some(task) if task.status == crate::atoms::types::TaskStatus::Queued => {
                self.store.cancel_task(id)
            }
            Some(task) if task.status == crate::atoms::types::TaskStatus::Running => {
                self.cancellations.lock().insert(id.to_string());
                if let Some(handle) = self.active_cancel_handles.lock().get(id) {
                    handle.store(true, Ordering::Relaxed);
                }
                Ok(())
            }
            Some(_) => Err(HiveError::InvalidInput(format!(
                "task {id} is not queued or running"
            ))),
            None => Err(HiveError::InvalidInput(format!("no task {id}"))),
        }
    }

    fn is_cancelled(&self, id: &str) -> bool {
        self.cancellations.lock().contains(id)
    }

    fn clear_cancellation(&self, id: &str) {
        self.cancellations.lock().remove(id);
    }

    /// Boot-time recovery: any task left `running` by an unclean shutdown
    /// goes back to `queued` before the loop starts claiming work.
    pub fn recover_abandoned_tasks(&self) -> crate::atoms::error::HiveResult<usize> {
        self.store.reset_running_tasks_to_queued()
    }

    /// Run forever, claiming and executing one task at a time. Intended to
    /// be spawned once as its own task by the daemon boot sequence.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.store.claim_next_queued_task() {
                Ok(Some(task)) => {
                    self.run_task(task).await;
                }
                Ok(None) => {
                    let poll = tokio::time::sleep(Duration::from_secs(TASK_POLL_INTERVAL_SECS));
                    tokio::select! {
                        _ = poll => {}
                        _ = self.notify.notified() => {}
                    }
                }
                Err(err) => {
                    warn!(target: "task_worker", "failed to claim next task: {err}");
                    tokio::time::sleep(Duration::from_secs(TASK_POLL_INTERVAL_SECS)).await;
                }
            }
        }
    }

    async fn run_task(&self, task: Task) {
        info!(target: "task_worker", "running task {} ({})", task.id, task.title);
        *self.active_task_id.lock() = Some(task.id.clone());

        let options = ChatOptions::default();
        let stream_result = self.orchestrator.chat(&task.title, options).await;
        let mut conversation_id = String::new();
        let mut stream = match stream_result {
            Ok((conv_id, stream, cancel)) => {
                conversation_id = conv_id;
                self.active_cancel_handles
                    .lock()
                    .insert(task.id.clone(), cancel);
                stream
            }
            Err(err) => {
                self.finish_failed(&task.id, &err.to_string());
                *self.active_task_id.lock() = None;
                return;
            }
        };

        let mut full_text = String::new();
        let mut cancelled = false;
        let mut failure: Option<HiveError> = None;

        while let Some(event) = stream.next().await {
            if self.is_cancelled(&task.id) {
                cancelled = true;
                break;
            }
            match event {
                Ok(ChatEvent::Token(token)) => full_text.push_str(&token),
                Ok(ChatEvent::Done { .. }) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        self.clear_cancellation(&task.id);
        self.active_cancel_handles.lock().remove(&task.id);
        *self.active_task_id.lock() = None;

        if cancelled {
            info!(target: "task_worker", "task {} cancelled", task.id);
            if let Err(err) = self.store.mark_task_failed(&task.id, CANCELLED_ERROR) {
                warn!(target: "task_worker", "failed to persist cancellation for {}: {err}", task.id);
            }
            return;
        }

        if let Some(err) = failure {
            warn!(target: "task_worker", "task {} failed: {err}", task.id);
            self.finish_failed(&task.id, &err.to_string());
            return;
        }

        info!(target: "task_worker", "task {} done ({} chars)", task.id, full_text.len());
        if let Some(agent_id) = task.agent_id.clone().or_else(|| {
            self.store
                .primary_agent()
                .ok()
                .flatten()
                .map(|agent| agent.id)
        }) {
            tokio::spawn(memory::run_passive_memory(
                Arc::clone(&self.store),
                Arc::clone(&self.provider),
                self.long_term_memory.clone(),
                agent_id,
                conversation_id,
                task.title.clone(),
                full_text.clone(),
            ));
        }
        if let Err(err) = self.store.mark_task_done(&task.id, &full_text) {
            warn!(target: "task_worker", "failed to persist result for {}: {err}", task.id);
        }
    }

    fn finish_failed(&self, id: &str, message: &str) {
        if let Err(err) = self.store.mark_task_failed(id, message) {
            warn!(target: "task_worker", "failed to persist failure for {id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_set_tracks_and_clears_independently() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let agent = store
            .upsert_primary_agent("Hive", "helpful", "openai", "gpt-4o")
            .unwrap();
        let provider = Arc::new(crate::provider::AnyProvider::from_config(
            &crate::provider::ProviderConfig {
                kind: crate::provider::ProviderKind::OpenAi,
                api_key: "test".to_string(),
                base_url: None,
            },
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            None,
            None,
            std::env::temp_dir(),
        ));
        let worker = TaskWorker::new(store, orchestrator, provider, None);
        worker
            .enqueue("t-1", "say hello", Some(&agent.id))
            .unwrap();
        assert!(!worker.is_cancelled("t-1"));
        // Queued tasks cancel immediately through the store, not the set.
        worker.request_cancel("t-1").unwrap();
        assert!(!worker.is_cancelled("t-1"));
    }
}
