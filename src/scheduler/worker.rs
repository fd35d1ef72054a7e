//! The clock-driven task worker.
//!
//! Every tick, active tasks whose `next_run_at` has passed are started: a
//! TaskRun row is opened, the executor is invoked under the per-run deadline
//! `min(timeout_ms, max_duration_minutes · 60s)`, and the run row, task
//! aggregates and next fire time are written back. A failed run retries up
//! to `max_retries` with backoff before the run is marked failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::agent::signal::AbortSignal;
use crate::error::NexusResult;

use super::cron::next_fire;
use super::tasks::{RunStatus, ScheduledTask, TaskRun, TaskStore};

const RETRY_BACKOFF_BASE_MS: u64 = 1_000;

// ─── TaskExecutor ─────────────────────────────────────────────────────────────

/// What one execution of a task produced.
#[derive(Debug, Clone, Default)]
pub struct TaskRunOutcome {
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub trace_id: Option<String>,
    /// Whether the underlying turn was cancelled by the deadline.
    pub timed_out: bool,
    /// Whether the turn ended in a terminal error.
    pub failed: bool,
}

/// Executes a task's payload as an agent turn. Implemented by the runtime,
/// which routes through the inbound pipeline with a task-derived session.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &ScheduledTask,
        abort: AbortSignal,
    ) -> NexusResult<TaskRunOutcome>;
}

// ─── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    tick: Duration,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        tick: Duration,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            executor,
            tick,
            stop_tx,
            stop_rx,
        })
    }

    /// Start the background tick loop.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.run_due_tasks().await,
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// One tick: fire every due task on its own worker.
    pub async fn run_due_tasks(&self) {
        let due = match self.store.due_tasks(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                warn!("scheduler: failed to scan for due tasks: {e}");
                return;
            }
        };

        for task in due {
            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                run_one(store, executor, task).await;
            });
        }
    }
}

/// Execute one task firing end to end: run row, retries, aggregates,
/// reschedule.
async fn run_one(
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    mut task: ScheduledTask,
) {
    let mut run = TaskRun {
        id: Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        started_at: Utc::now(),
        ended_at: None,
        status: RunStatus::Running,
        tokens_used: 0,
        cost_usd: 0.0,
        trace_id: None,
    };
    if let Err(e) = store.insert_run(&run) {
        warn!("scheduler: failed to open run for task '{}': {e}", task.id);
        return;
    }
    info!("scheduler: task '{}' fired (run {})", task.name, run.id);

    let deadline = Duration::from_millis(task.run_deadline_ms());
    let mut attempt = 0u32;
    let status = loop {
        if attempt > 0 {
            let backoff = RETRY_BACKOFF_BASE_MS * (1u64 << (attempt - 1).min(8));
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        let abort = AbortSignal::timeout(deadline);
        match executor.execute(&task, abort).await {
            Ok(outcome) => {
                run.tokens_used = outcome.tokens_used;
                run.cost_usd = outcome.cost_usd;
                run.trace_id = outcome.trace_id.clone();
                if outcome.timed_out {
                    break RunStatus::Timeout;
                }
                if !outcome.failed {
                    break RunStatus::Completed;
                }
                // Terminal turn error: fall through to the retry decision.
                if attempt >= task.max_retries {
                    break RunStatus::Failed;
                }
            }
            Err(e) => {
                warn!(
                    "scheduler: run {} of task '{}' attempt {} failed: {e}",
                    run.id, task.name, attempt
                );
                if attempt >= task.max_retries {
                    break RunStatus::Failed;
                }
            }
        }
        attempt += 1;
    };

    run.status = status;
    run.ended_at = Some(Utc::now());
    if let Err(e) = store.update_run(&run) {
        warn!("scheduler: failed to close run {}: {e}", run.id);
    }

    // Advance the task regardless of outcome: a failed run does not stall
    // the schedule.
    task.run_count += 1;
    task.last_run_at = Some(run.started_at);
    task.next_run_at = match next_fire(&task.cron_expression, Utc::now()) {
        Ok(next) => next,
        Err(e) => {
            warn!("scheduler: task '{}' has an invalid schedule: {e}", task.id);
            None
        }
    };
    if let Err(e) = store.update_task(&task) {
        warn!("scheduler: failed to update task '{}': {e}", task.id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tasks::{TaskOrigin, TaskPayload, TaskStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct MemTaskStore {
        tasks: Mutex<HashMap<String, ScheduledTask>>,
        runs: Mutex<Vec<TaskRun>>,
    }

    impl TaskStore for MemTaskStore {
        fn insert_task(&self, task: &ScheduledTask) -> NexusResult<()> {
            self.tasks.lock().unwrap().insert(task.id.clone(), task.clone());
            Ok(())
        }
        fn get_task(&self, id: &str) -> NexusResult<Option<ScheduledTask>> {
            Ok(self.tasks.lock().unwrap().get(id).cloned())
        }
        fn list_tasks(&self, project_id: &str) -> NexusResult<Vec<ScheduledTask>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.project_id == project_id)
                .cloned()
                .collect())
        }
        fn due_tasks(&self, now: chrono::DateTime<Utc>) -> NexusResult<Vec<ScheduledTask>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Active
                        && t.next_run_at.is_some_and(|at| at <= now)
                })
                .cloned()
                .collect())
        }
        fn update_task(&self, task: &ScheduledTask) -> NexusResult<()> {
            self.tasks.lock().unwrap().insert(task.id.clone(), task.clone());
            Ok(())
        }
        fn insert_run(&self, run: &TaskRun) -> NexusResult<()> {
            self.runs.lock().unwrap().push(run.clone());
            Ok(())
        }
        fn update_run(&self, run: &TaskRun) -> NexusResult<()> {
            let mut runs = self.runs.lock().unwrap();
            if let Some(existing) = runs.iter_mut().find(|r| r.id == run.id) {
                *existing = run.clone();
            }
            Ok(())
        }
        fn runs_for_task(&self, task_id: &str) -> NexusResult<Vec<TaskRun>> {
            Ok(self
                .runs
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.task_id == task_id)
                .cloned()
                .collect())
        }
    }

    struct ScriptedExecutor {
        calls: AtomicU32,
        /// Outcomes per attempt; the last repeats.
        outcomes: Vec<Result<TaskRunOutcome, String>>,
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _task: &ScheduledTask,
            _abort: AbortSignal,
        ) -> NexusResult<TaskRunOutcome> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let outcome = self
                .outcomes
                .get(i)
                .or_else(|| self.outcomes.last())
                .cloned()
                .unwrap_or_else(|| Ok(TaskRunOutcome::default()));
            outcome.map_err(crate::error::NexusError::internal)
        }
    }

    fn due_task(id: &str, max_retries: u32) -> ScheduledTask {
        ScheduledTask {
            id: id.to_owned(),
            project_id: "p1".to_owned(),
            name: format!("task-{id}"),
            description: String::new(),
            cron_expression: "* * * * *".to_owned(),
            task_payload: TaskPayload {
                message: "go".to_owned(),
            },
            origin: TaskOrigin::Static,
            status: TaskStatus::Active,
            max_retries,
            timeout_ms: 5_000,
            budget_per_run_usd: 1.0,
            max_duration_minutes: 1,
            max_turns: 5,
            run_count: 0,
            last_run_at: None,
            next_run_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            proposed_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_run_updates_task_and_run() {
        let store = Arc::new(MemTaskStore::default());
        store.insert_task(&due_task("t1", 0)).unwrap();
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![Ok(TaskRunOutcome {
                tokens_used: 123,
                cost_usd: 0.01,
                trace_id: Some("tr1".to_owned()),
                timed_out: false,
                failed: false,
            })],
        });

        let task = store.get_task("t1").unwrap().unwrap();
        run_one(store.clone(), executor, task).await;

        let runs = store.runs_for_task("t1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].tokens_used, 123);
        assert_eq!(runs[0].trace_id.as_deref(), Some("tr1"));
        assert!(runs[0].ended_at.is_some());

        let task = store.get_task("t1").unwrap().unwrap();
        assert_eq!(task.run_count, 1);
        assert!(task.last_run_at.is_some());
        assert!(task.next_run_at.unwrap() > Utc::now() - chrono::Duration::seconds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_retries_then_fails() {
        let store = Arc::new(MemTaskStore::default());
        store.insert_task(&due_task("t1", 2)).unwrap();
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![Err("boom".to_owned())],
        });
        let calls = Arc::clone(&executor);

        let task = store.get_task("t1").unwrap().unwrap();
        run_one(store.clone(), executor, task).await;

        // 1 initial + 2 retries.
        assert_eq!(calls.calls.load(Ordering::SeqCst), 3);
        let runs = store.runs_for_task("t1").unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);

        // The schedule still advanced.
        let task = store.get_task("t1").unwrap().unwrap();
        assert!(task.next_run_at.is_some());
        assert_eq!(task.run_count, 1);
    }

    #[tokio::test]
    async fn timeout_outcome_marks_run_timeout() {
        let store = Arc::new(MemTaskStore::default());
        store.insert_task(&due_task("t1", 3)).unwrap();
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![Ok(TaskRunOutcome {
                timed_out: true,
                ..TaskRunOutcome::default()
            })],
        });

        let task = store.get_task("t1").unwrap().unwrap();
        run_one(store.clone(), executor, task).await;

        let runs = store.runs_for_task("t1").unwrap();
        assert_eq!(runs[0].status, RunStatus::Timeout);
    }

    #[tokio::test]
    async fn proposed_tasks_are_not_due() {
        let store = Arc::new(MemTaskStore::default());
        let mut task = due_task("t1", 0);
        task.status = TaskStatus::Proposed;
        store.insert_task(&task).unwrap();

        assert!(store.due_tasks(Utc::now()).unwrap().is_empty());
    }
}
