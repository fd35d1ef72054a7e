//! Session rows and stored messages.
//!
//! Channel-bound sessions carry a `conversation_key`; a partial unique
//! index guarantees exactly one active session per
//! `(project, channel, conversation_key)`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::{ChatMessage, MessageContent, Role};
use crate::database::schema::{messages, sessions};
use crate::database::{fmt_ts, parse_ts};

// ─── SessionStatus ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_id: String,
    /// Originating surface: `"api"`, `"telegram"`, `"whatsapp"`, `"slack"`,
    /// `"chatwoot"` or `"scheduler"`.
    pub channel: String,
    /// Conversation identifier within the channel, when the channel has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_key: Option<String>,
    pub status: SessionStatus,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRow {
    pub id: String,
    pub project_id: String,
    pub channel: String,
    pub conversation_key: Option<String>,
    pub status: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRow {
    pub fn from_domain(session: &Session) -> Option<Self> {
        Some(Self {
            id: session.id.clone(),
            project_id: session.project_id.clone(),
            channel: session.channel.clone(),
            conversation_key: session.conversation_key.clone(),
            status: session.status.as_str().to_owned(),
            metadata: serde_json::to_string(&session.metadata).ok()?,
            created_at: fmt_ts(session.created_at),
            updated_at: fmt_ts(session.updated_at),
        })
    }

    pub fn into_domain(self) -> Option<Session> {
        Some(Session {
            status: SessionStatus::parse(&self.status)?,
            metadata: serde_json::from_str(&self.metadata).ok()?,
            id: self.id,
            project_id: self.project_id,
            channel: self.channel,
            conversation_key: self.conversation_key,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

// ─── StoredMessage ────────────────────────────────────────────────────────────

/// One message owned by a session, ordered by the per-session `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub seq: i64,
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

pub fn role_as_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

pub fn parse_role(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub trace_id: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn from_domain(message: &StoredMessage) -> Option<Self> {
        Some(Self {
            id: message.id.clone(),
            session_id: message.session_id.clone(),
            seq: message.seq,
            role: role_as_str(message.role).to_owned(),
            content: serde_json::to_string(&message.content).ok()?,
            trace_id: message.trace_id.clone(),
            created_at: fmt_ts(message.created_at),
        })
    }

    pub fn into_domain(self) -> Option<StoredMessage> {
        Some(StoredMessage {
            role: parse_role(&self.role)?,
            content: serde_json::from_str(&self.content).ok()?,
            id: self.id,
            session_id: self.session_id,
            seq: self.seq,
            trace_id: self.trace_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
