//! Usage record rows. `(trace_id, turn_index)` is unique so accounting is
//! idempotent across provider retries.

use diesel::prelude::*;
use uuid::Uuid;

use crate::cost::UsageRecord;
use crate::database::schema::usage_records;
use crate::database::{fmt_ts, parse_ts};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = usage_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UsageRecordRow {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub trace_id: String,
    pub turn_index: i32,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_usd: f64,
    pub timestamp: String,
}

impl UsageRecordRow {
    pub fn from_domain(record: &UsageRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: record.project_id.clone(),
            session_id: record.session_id.clone(),
            trace_id: record.trace_id.clone(),
            turn_index: record.turn_index as i32,
            input_tokens: record.input_tokens as i32,
            output_tokens: record.output_tokens as i32,
            cost_usd: record.cost_usd,
            timestamp: fmt_ts(record.timestamp),
        }
    }

    pub fn into_domain(self) -> Option<UsageRecord> {
        Some(UsageRecord {
            project_id: self.project_id,
            session_id: self.session_id,
            trace_id: self.trace_id,
            turn_index: self.turn_index.max(0) as u32,
            input_tokens: self.input_tokens.max(0) as u32,
            output_tokens: self.output_tokens.max(0) as u32,
            cost_usd: self.cost_usd,
            timestamp: parse_ts(&self.timestamp)?,
        })
    }
}
