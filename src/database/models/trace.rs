//! Trace rows. Events and the prompt snapshot are JSON columns so the whole
//! trace persists in one atomic row write.

use diesel::prelude::*;

use crate::database::schema::traces;
use crate::database::{fmt_ts, parse_ts};
use crate::trace::{ExecutionTrace, TraceStatus};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = traces)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TraceRow {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub prompt_snapshot: String,
    pub events: String,
    pub total_duration_ms: i64,
    pub total_tokens_used: i64,
    pub total_cost_usd: f64,
    pub turn_count: i32,
    pub status: String,
    pub created_at: String,
}

impl TraceRow {
    pub fn from_domain(trace: &ExecutionTrace) -> Option<Self> {
        Some(Self {
            id: trace.id.clone(),
            project_id: trace.project_id.clone(),
            session_id: trace.session_id.clone(),
            prompt_snapshot: serde_json::to_string(&trace.prompt_snapshot).ok()?,
            events: serde_json::to_string(&trace.events).ok()?,
            total_duration_ms: trace.total_duration_ms as i64,
            total_tokens_used: trace.total_tokens_used as i64,
            total_cost_usd: trace.total_cost_usd,
            turn_count: trace.turn_count as i32,
            status: trace.status.as_str().to_owned(),
            created_at: fmt_ts(trace.created_at),
        })
    }

    pub fn into_domain(self) -> Option<ExecutionTrace> {
        Some(ExecutionTrace {
            prompt_snapshot: serde_json::from_str(&self.prompt_snapshot).ok()?,
            events: serde_json::from_str(&self.events).ok()?,
            status: TraceStatus::parse(&self.status)?,
            id: self.id,
            project_id: self.project_id,
            session_id: self.session_id,
            total_duration_ms: self.total_duration_ms.max(0) as u64,
            total_tokens_used: self.total_tokens_used.max(0) as u64,
            total_cost_usd: self.total_cost_usd,
            turn_count: self.turn_count.max(0) as u32,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
