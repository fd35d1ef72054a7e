//! Cron-driven scheduled task execution.

pub mod cron;
pub mod tasks;
pub mod worker;

pub use cron::{next_fire, validate_cron};
pub use tasks::{
    RunStatus, ScheduledTask, TaskOrigin, TaskPayload, TaskRun, TaskStatus, TaskStore,
};
pub use worker::{Scheduler, TaskExecutor, TaskRunOutcome};
