//! Scheduled task and task-run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NexusResult;

// ─── Enums ────────────────────────────────────────────────────────────────────

/// Where a task came from. Agent-proposed tasks start `proposed` and are not
/// scheduled until an external approval flips them to `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Static,
    AgentProposed,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::AgentProposed => "agent_proposed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "agent_proposed" => Some(Self::AgentProposed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Proposed,
    Active,
    Paused,
    Failed,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Status of one execution of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

// ─── Task / TaskRun ───────────────────────────────────────────────────────────

/// The synthesised user message a task fires with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    /// Standard 5-field cron expression, evaluated in UTC.
    pub cron_expression: String,
    pub task_payload: TaskPayload,
    pub origin: TaskOrigin,
    pub status: TaskStatus,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub budget_per_run_usd: f64,
    pub max_duration_minutes: u32,
    pub max_turns: u32,
    pub run_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// The per-run deadline: the tighter of the task timeout and the
    /// duration ceiling.
    pub fn run_deadline_ms(&self) -> u64 {
        self.timeout_ms
            .min(u64::from(self.max_duration_minutes) * 60_000)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub tokens_used: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

/// Persistence for tasks and their runs.
pub trait TaskStore: Send + Sync {
    fn insert_task(&self, task: &ScheduledTask) -> NexusResult<()>;
    fn get_task(&self, id: &str) -> NexusResult<Option<ScheduledTask>>;
    fn list_tasks(&self, project_id: &str) -> NexusResult<Vec<ScheduledTask>>;
    /// Active tasks with `next_run_at <= now`.
    fn due_tasks(&self, now: DateTime<Utc>) -> NexusResult<Vec<ScheduledTask>>;
    fn update_task(&self, task: &ScheduledTask) -> NexusResult<()>;
    fn insert_run(&self, run: &TaskRun) -> NexusResult<()>;
    fn update_run(&self, run: &TaskRun) -> NexusResult<()>;
    fn runs_for_task(&self, task_id: &str) -> NexusResult<Vec<TaskRun>>;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_deadline_takes_the_tighter_bound() {
        let mut task = sample_task();
        task.timeout_ms = 120_000;
        task.max_duration_minutes = 1;
        assert_eq!(task.run_deadline_ms(), 60_000);

        task.timeout_ms = 30_000;
        assert_eq!(task.run_deadline_ms(), 30_000);
    }

    #[test]
    fn enums_round_trip_their_wire_forms() {
        for status in [
            TaskStatus::Proposed,
            TaskStatus::Active,
            TaskStatus::Paused,
            TaskStatus::Failed,
            TaskStatus::Completed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskOrigin::parse("agent_proposed"), Some(TaskOrigin::AgentProposed));
        assert_eq!(RunStatus::parse("timeout"), Some(RunStatus::Timeout));
    }

    pub(super) fn sample_task() -> ScheduledTask {
        ScheduledTask {
            id: "t1".to_owned(),
            project_id: "p1".to_owned(),
            name: "daily-report".to_owned(),
            description: "post the daily report".to_owned(),
            cron_expression: "0 9 * * *".to_owned(),
            task_payload: TaskPayload {
                message: "Write the daily report.".to_owned(),
            },
            origin: TaskOrigin::Static,
            status: TaskStatus::Active,
            max_retries: 1,
            timeout_ms: 60_000,
            budget_per_run_usd: 0.5,
            max_duration_minutes: 5,
            max_turns: 10,
            run_count: 0,
            last_run_at: None,
            next_run_at: None,
            proposed_by: None,
            created_at: Utc::now(),
        }
    }
}
