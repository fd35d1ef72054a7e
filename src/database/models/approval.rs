//! Approval rows.

use diesel::prelude::*;

use crate::approvals::{Approval, ApprovalStatus};
use crate::database::schema::approvals;
use crate::database::{fmt_ts, parse_ts};
use crate::tools::traits::RiskLevel;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = approvals)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ApprovalRow {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_id: String,
    pub tool_input: String,
    pub risk_level: String,
    pub status: String,
    pub requested_at: String,
    pub expires_at: String,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub note: Option<String>,
}

impl ApprovalRow {
    pub fn from_domain(approval: &Approval) -> Option<Self> {
        Some(Self {
            id: approval.id.clone(),
            project_id: approval.project_id.clone(),
            session_id: approval.session_id.clone(),
            tool_call_id: approval.tool_call_id.clone(),
            tool_id: approval.tool_id.clone(),
            tool_input: serde_json::to_string(&approval.tool_input).ok()?,
            risk_level: approval.risk_level.as_str().to_owned(),
            status: approval.status.as_str().to_owned(),
            requested_at: fmt_ts(approval.requested_at),
            expires_at: fmt_ts(approval.expires_at),
            resolved_by: approval.resolved_by.clone(),
            resolved_at: approval.resolved_at.map(fmt_ts),
            note: approval.note.clone(),
        })
    }

    pub fn into_domain(self) -> Option<Approval> {
        Some(Approval {
            tool_input: serde_json::from_str(&self.tool_input).ok()?,
            risk_level: RiskLevel::parse(&self.risk_level)?,
            status: ApprovalStatus::parse(&self.status)?,
            requested_at: parse_ts(&self.requested_at)?,
            expires_at: parse_ts(&self.expires_at)?,
            resolved_at: match self.resolved_at {
                Some(ts) => Some(parse_ts(&ts)?),
                None => None,
            },
            id: self.id,
            project_id: self.project_id,
            session_id: self.session_id,
            tool_call_id: self.tool_call_id,
            tool_id: self.tool_id,
            resolved_by: self.resolved_by,
            note: self.note,
        })
    }
}
