//! Scheduled task and task-run rows.

use diesel::prelude::*;

use crate::database::schema::{scheduled_task_runs, scheduled_tasks};
use crate::database::{fmt_ts, parse_ts};
use crate::scheduler::tasks::{RunStatus, ScheduledTask, TaskOrigin, TaskRun, TaskStatus};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = scheduled_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScheduledTaskRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    pub task_payload: String,
    pub origin: String,
    pub status: String,
    pub max_retries: i32,
    pub timeout_ms: i64,
    pub budget_per_run_usd: f64,
    pub max_duration_minutes: i32,
    pub max_turns: i32,
    pub run_count: i32,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub proposed_by: Option<String>,
    pub created_at: String,
}

impl ScheduledTaskRow {
    pub fn from_domain(task: &ScheduledTask) -> Option<Self> {
        Some(Self {
            id: task.id.clone(),
            project_id: task.project_id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            cron_expression: task.cron_expression.clone(),
            task_payload: serde_json::to_string(&task.task_payload).ok()?,
            origin: task.origin.as_str().to_owned(),
            status: task.status.as_str().to_owned(),
            max_retries: task.max_retries as i32,
            timeout_ms: task.timeout_ms as i64,
            budget_per_run_usd: task.budget_per_run_usd,
            max_duration_minutes: task.max_duration_minutes as i32,
            max_turns: task.max_turns as i32,
            run_count: task.run_count as i32,
            last_run_at: task.last_run_at.map(fmt_ts),
            next_run_at: task.next_run_at.map(fmt_ts),
            proposed_by: task.proposed_by.clone(),
            created_at: fmt_ts(task.created_at),
        })
    }

    pub fn into_domain(self) -> Option<ScheduledTask> {
        Some(ScheduledTask {
            task_payload: serde_json::from_str(&self.task_payload).ok()?,
            origin: TaskOrigin::parse(&self.origin)?,
            status: TaskStatus::parse(&self.status)?,
            last_run_at: match self.last_run_at {
                Some(ts) => Some(parse_ts(&ts)?),
                None => None,
            },
            next_run_at: match self.next_run_at {
                Some(ts) => Some(parse_ts(&ts)?),
                None => None,
            },
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            description: self.description,
            cron_expression: self.cron_expression,
            max_retries: self.max_retries.max(0) as u32,
            timeout_ms: self.timeout_ms.max(0) as u64,
            budget_per_run_usd: self.budget_per_run_usd,
            max_duration_minutes: self.max_duration_minutes.max(0) as u32,
            max_turns: self.max_turns.max(0) as u32,
            run_count: self.run_count.max(0) as u32,
            proposed_by: self.proposed_by,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = scheduled_task_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRunRow {
    pub id: String,
    pub task_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub trace_id: Option<String>,
}

impl TaskRunRow {
    pub fn from_domain(run: &TaskRun) -> Self {
        Self {
            id: run.id.clone(),
            task_id: run.task_id.clone(),
            started_at: fmt_ts(run.started_at),
            ended_at: run.ended_at.map(fmt_ts),
            status: run.status.as_str().to_owned(),
            tokens_used: run.tokens_used as i64,
            cost_usd: run.cost_usd,
            trace_id: run.trace_id.clone(),
        }
    }

    pub fn into_domain(self) -> Option<TaskRun> {
        Some(TaskRun {
            status: RunStatus::parse(&self.status)?,
            started_at: parse_ts(&self.started_at)?,
            ended_at: match self.ended_at {
                Some(ts) => Some(parse_ts(&ts)?),
                None => None,
            },
            id: self.id,
            task_id: self.task_id,
            tokens_used: self.tokens_used.max(0) as u64,
            cost_usd: self.cost_usd,
            trace_id: self.trace_id,
        })
    }
}
