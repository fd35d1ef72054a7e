//! SQLite persistence behind a connection pool.
//!
//! [`Database`] is the production implementation of every store trait the
//! engine defines (`LayerStore`, `ApprovalStore`, `UsageStore`,
//! `TaskStore`) plus the project/session/message/trace accessors. Tests use
//! the same code on an in-memory database.

pub mod models;
pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::types::{MessageContent, Role};
use crate::approvals::{Approval, ApprovalStatus, ApprovalStore, Decision, ResolveAttempt};
use crate::config::AgentConfig;
use crate::cost::{UsageRecord, UsageStore};
use crate::error::{ErrorCode, NexusError, NexusResult};
use crate::prompts::{LayerStore, LayerType, PromptLayer};
use crate::scheduler::tasks::{ScheduledTask, TaskRun, TaskStatus, TaskStore};
use crate::trace::ExecutionTrace;

use models::{
    ApprovalRow, MessageRow, Project, ProjectRow, PromptLayerRow, ScheduledTaskRow, Session,
    SessionRow, SessionStatus, StoredMessage, TaskRunRow, TraceRow, UsageRecordRow,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

// ─── Timestamps ───────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 (microseconds, `Z` suffix) so lexicographic order in
/// SQL matches chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database initialization error: {0}")]
    Init(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("invalid data in row: {0}")]
    InvalidData(String),

    #[error("diesel error: {0}")]
    Diesel(#[from] diesel::result::Error),
}

impl From<DbError> for NexusError {
    fn from(e: DbError) -> Self {
        NexusError::internal(e.to_string())
    }
}

fn diesel_err(e: diesel::result::Error) -> NexusError {
    NexusError::internal(format!("diesel error: {e}"))
}

fn invalid_row(what: &str) -> NexusError {
    NexusError::internal(format!("invalid data in {what} row"))
}

fn is_unique_violation(e: &diesel::result::Error) -> bool {
    matches!(
        e,
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

// ─── Pool setup ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ConnectionSetup;

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(r2d2::Error::QueryError)
    }
}

pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &str) -> Result<Self, DbError> {
        // ":memory:" needs a single shared connection or every checkout
        // would see a different empty database.
        let max_size = if path == ":memory:" { 1 } else { 10 };
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = r2d2::Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionSetup))
            .build(manager)
            .map_err(|e| DbError::Init(format!("failed to create connection pool: {e}")))?;

        let mut conn = pool
            .get()
            .map_err(|e| DbError::Init(format!("failed to get connection: {e}")))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        log::info!("database ready at {path}");
        Ok(Self { pool })
    }

    /// An isolated in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> NexusResult<DbConn> {
        self.pool
            .get()
            .map_err(|e| NexusError::internal(format!("connection pool exhausted: {e}")))
    }

    // ─── Projects ────────────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, config: AgentConfig) -> NexusResult<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            agent_config: config,
            created_at: now,
            updated_at: now,
        };
        let row = ProjectRow::from_domain(&project).ok_or_else(|| invalid_row("project"))?;

        let mut conn = self.conn()?;
        diesel::insert_into(schema::projects::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    NexusError::conflict(format!("a project named '{name}' already exists"))
                } else {
                    diesel_err(e)
                }
            })?;
        Ok(project)
    }

    pub fn get_project(&self, id: &str) -> NexusResult<Option<Project>> {
        let mut conn = self.conn()?;
        let row: Option<ProjectRow> = schema::projects::table
            .find(id)
            .select(ProjectRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("project")))
            .transpose()
    }

    pub fn update_project_config(&self, id: &str, config: &AgentConfig) -> NexusResult<Project> {
        let config_json = serde_json::to_string(config)
            .map_err(|e| NexusError::internal(format!("unserializable agent config: {e}")))?;
        let mut conn = self.conn()?;
        let updated = diesel::update(schema::projects::table.find(id))
            .set((
                schema::projects::agent_config.eq(config_json),
                schema::projects::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .map_err(diesel_err)?;
        if updated == 0 {
            return Err(NexusError::not_found(format!("project {id}")));
        }
        drop(conn);
        self.get_project(id)?
            .ok_or_else(|| NexusError::not_found(format!("project {id}")))
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    pub fn create_session(
        &self,
        project_id: &str,
        channel: &str,
        conversation_key: Option<&str>,
        metadata: Value,
    ) -> NexusResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_owned(),
            channel: channel.to_owned(),
            conversation_key: conversation_key.map(str::to_owned),
            status: SessionStatus::Active,
            metadata,
            created_at: now,
            updated_at: now,
        };
        let row = SessionRow::from_domain(&session).ok_or_else(|| invalid_row("session"))?;

        let mut conn = self.conn()?;
        diesel::insert_into(schema::sessions::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    NexusError::Conflict {
                        code: ErrorCode::ChannelCollision,
                        message: format!(
                            "an active session already exists for {channel}/{}",
                            conversation_key.unwrap_or("")
                        ),
                    }
                } else {
                    diesel_err(e)
                }
            })?;
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> NexusResult<Option<Session>> {
        let mut conn = self.conn()?;
        let row: Option<SessionRow> = schema::sessions::table
            .find(id)
            .select(SessionRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("session")))
            .transpose()
    }

    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> NexusResult<Session> {
        let mut conn = self.conn()?;
        let updated = diesel::update(schema::sessions::table.find(id))
            .set((
                schema::sessions::status.eq(status.as_str()),
                schema::sessions::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .map_err(diesel_err)?;
        if updated == 0 {
            return Err(NexusError::not_found(format!("session {id}")));
        }
        drop(conn);
        self.get_session(id)?
            .ok_or_else(|| NexusError::not_found(format!("session {id}")))
    }

    pub fn list_sessions(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> NexusResult<Vec<Session>> {
        let mut conn = self.conn()?;
        let rows: Vec<SessionRow> = schema::sessions::table
            .filter(schema::sessions::project_id.eq(project_id))
            .order(schema::sessions::created_at.desc())
            .limit(limit.clamp(1, 200))
            .offset(offset.max(0))
            .select(SessionRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("session")))
            .collect()
    }

    /// The active session for a `(project, channel, conversation)` key.
    pub fn find_active_session(
        &self,
        project_id: &str,
        channel: &str,
        conversation_key: &str,
    ) -> NexusResult<Option<Session>> {
        let mut conn = self.conn()?;
        let row: Option<SessionRow> = schema::sessions::table
            .filter(schema::sessions::project_id.eq(project_id))
            .filter(schema::sessions::channel.eq(channel))
            .filter(schema::sessions::conversation_key.eq(conversation_key))
            .filter(schema::sessions::status.eq("active"))
            .select(SessionRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("session")))
            .transpose()
    }

    /// Resolve the active session for a conversation, creating one if none
    /// exists. A concurrent create loses the unique-index race and reads the
    /// winner back.
    pub fn resolve_or_create_session(
        &self,
        project_id: &str,
        channel: &str,
        conversation_key: &str,
    ) -> NexusResult<Session> {
        if let Some(session) = self.find_active_session(project_id, channel, conversation_key)? {
            return Ok(session);
        }
        match self.create_session(project_id, channel, Some(conversation_key), Value::Null) {
            Ok(session) => Ok(session),
            Err(e) if e.code() == ErrorCode::ChannelCollision => self
                .find_active_session(project_id, channel, conversation_key)?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    /// Append a message under the session's monotonic sequence. The sequence
    /// assignment and insert run in one transaction.
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &MessageContent,
        trace_id: Option<&str>,
    ) -> NexusResult<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            seq: 0,
            role,
            content: content.clone(),
            trace_id: trace_id.map(str::to_owned),
            created_at: Utc::now(),
        };

        let mut conn = self.conn()?;
        let stored = conn
            .transaction::<StoredMessage, diesel::result::Error, _>(|conn| {
                let max_seq: Option<i64> = schema::messages::table
                    .filter(schema::messages::session_id.eq(session_id))
                    .select(diesel::dsl::max(schema::messages::seq))
                    .first(conn)?;
                let mut message = message.clone();
                message.seq = max_seq.unwrap_or(0) + 1;
                let row = MessageRow::from_domain(&message)
                    .ok_or(diesel::result::Error::RollbackTransaction)?;
                diesel::insert_into(schema::messages::table)
                    .values(&row)
                    .execute(conn)?;
                diesel::update(schema::sessions::table.find(session_id))
                    .set(schema::sessions::updated_at.eq(fmt_ts(Utc::now())))
                    .execute(conn)?;
                Ok(message)
            })
            .map_err(diesel_err)?;
        Ok(stored)
    }

    /// All messages of a session in append order.
    pub fn messages_for_session(&self, session_id: &str) -> NexusResult<Vec<StoredMessage>> {
        let mut conn = self.conn()?;
        let rows: Vec<MessageRow> = schema::messages::table
            .filter(schema::messages::session_id.eq(session_id))
            .order(schema::messages::seq.asc())
            .select(MessageRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("message")))
            .collect()
    }

    // ─── Prompt layers ───────────────────────────────────────────────────────

    /// Add a new version of a layer and make it the active one. The version
    /// is one past the project's highest for that type; the previous active
    /// layer is deactivated in the same transaction.
    pub fn add_prompt_layer(
        &self,
        project_id: &str,
        layer_type: LayerType,
        content: &str,
    ) -> NexusResult<PromptLayer> {
        let mut conn = self.conn()?;
        let layer = conn
            .transaction::<PromptLayer, diesel::result::Error, _>(|conn| {
                let max_version: Option<i32> = schema::prompt_layers::table
                    .filter(schema::prompt_layers::project_id.eq(project_id))
                    .filter(schema::prompt_layers::layer_type.eq(layer_type.as_str()))
                    .select(diesel::dsl::max(schema::prompt_layers::version))
                    .first(conn)?;

                diesel::update(
                    schema::prompt_layers::table
                        .filter(schema::prompt_layers::project_id.eq(project_id))
                        .filter(schema::prompt_layers::layer_type.eq(layer_type.as_str())),
                )
                .set(schema::prompt_layers::is_active.eq(0))
                .execute(conn)?;

                let layer = PromptLayer {
                    id: Uuid::new_v4().to_string(),
                    project_id: project_id.to_owned(),
                    layer_type,
                    version: (max_version.unwrap_or(0) + 1).max(1) as u32,
                    content: content.to_owned(),
                    is_active: true,
                };
                let row = PromptLayerRow::from_domain(&layer, fmt_ts(Utc::now()));
                diesel::insert_into(schema::prompt_layers::table)
                    .values(&row)
                    .execute(conn)?;
                Ok(layer)
            })
            .map_err(diesel_err)?;
        Ok(layer)
    }

    // ─── Traces ──────────────────────────────────────────────────────────────

    /// Persist a finished trace: events and aggregates land in one row.
    pub fn insert_trace(&self, trace: &ExecutionTrace) -> NexusResult<()> {
        let row = TraceRow::from_domain(trace).ok_or_else(|| invalid_row("trace"))?;
        let mut conn = self.conn()?;
        diesel::insert_into(schema::traces::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    pub fn get_trace(&self, id: &str) -> NexusResult<Option<ExecutionTrace>> {
        let mut conn = self.conn()?;
        let row: Option<TraceRow> = schema::traces::table
            .find(id)
            .select(TraceRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("trace")))
            .transpose()
    }
}

// ─── LayerStore ───────────────────────────────────────────────────────────────

impl LayerStore for Database {
    fn active_layer(
        &self,
        project_id: &str,
        layer_type: LayerType,
    ) -> NexusResult<Option<PromptLayer>> {
        let mut conn = self.conn()?;
        let row: Option<PromptLayerRow> = schema::prompt_layers::table
            .filter(schema::prompt_layers::project_id.eq(project_id))
            .filter(schema::prompt_layers::layer_type.eq(layer_type.as_str()))
            .filter(schema::prompt_layers::is_active.eq(1))
            .select(PromptLayerRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("prompt_layer")))
            .transpose()
    }
}

// ─── ApprovalStore ────────────────────────────────────────────────────────────

impl ApprovalStore for Database {
    fn insert(&self, approval: &Approval) -> NexusResult<()> {
        let row = ApprovalRow::from_domain(approval).ok_or_else(|| invalid_row("approval"))?;
        let mut conn = self.conn()?;
        diesel::insert_into(schema::approvals::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    fn get(&self, id: &str, now: DateTime<Utc>) -> NexusResult<Option<Approval>> {
        let mut conn = self.conn()?;
        // Lazy expiry before the read.
        diesel::update(
            schema::approvals::table
                .find(id)
                .filter(schema::approvals::status.eq("pending"))
                .filter(schema::approvals::expires_at.le(fmt_ts(now))),
        )
        .set(schema::approvals::status.eq("expired"))
        .execute(&mut conn)
        .map_err(diesel_err)?;

        let row: Option<ApprovalRow> = schema::approvals::table
            .find(id)
            .select(ApprovalRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("approval")))
            .transpose()
    }

    fn list_pending(&self, project_id: &str, now: DateTime<Utc>) -> NexusResult<Vec<Approval>> {
        let mut conn = self.conn()?;
        let rows: Vec<ApprovalRow> = schema::approvals::table
            .filter(schema::approvals::project_id.eq(project_id))
            .filter(schema::approvals::status.eq("pending"))
            .filter(schema::approvals::expires_at.gt(fmt_ts(now)))
            .order(schema::approvals::requested_at.asc())
            .select(ApprovalRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("approval")))
            .collect()
    }

    fn try_resolve(
        &self,
        id: &str,
        decision: Decision,
        resolved_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> NexusResult<Option<ResolveAttempt>> {
        let new_status = match decision {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Denied => ApprovalStatus::Denied,
        };

        let mut conn = self.conn()?;
        // Row-level atomicity: only a still-pending, unexpired row takes the
        // decision.
        let updated = diesel::update(
            schema::approvals::table
                .find(id)
                .filter(schema::approvals::status.eq("pending"))
                .filter(schema::approvals::expires_at.gt(fmt_ts(now))),
        )
        .set((
            schema::approvals::status.eq(new_status.as_str()),
            schema::approvals::resolved_by.eq(resolved_by),
            schema::approvals::resolved_at.eq(fmt_ts(now)),
            schema::approvals::note.eq(note),
        ))
        .execute(&mut conn)
        .map_err(diesel_err)?;
        drop(conn);

        let Some(current) = self.get(id, now)? else {
            return Ok(None);
        };
        if updated == 1 {
            Ok(Some(ResolveAttempt::Resolved(current)))
        } else {
            Ok(Some(ResolveAttempt::AlreadyTerminal(current)))
        }
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> NexusResult<usize> {
        let mut conn = self.conn()?;
        let expired = diesel::update(
            schema::approvals::table
                .filter(schema::approvals::status.eq("pending"))
                .filter(schema::approvals::expires_at.le(fmt_ts(now))),
        )
        .set(schema::approvals::status.eq("expired"))
        .execute(&mut conn)
        .map_err(diesel_err)?;
        Ok(expired)
    }
}

// ─── UsageStore ───────────────────────────────────────────────────────────────

impl UsageStore for Database {
    fn insert_if_absent(&self, record: &UsageRecord) -> NexusResult<bool> {
        let row = UsageRecordRow::from_domain(record);
        let mut conn = self.conn()?;
        let inserted = diesel::insert_or_ignore_into(schema::usage_records::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(inserted == 1)
    }

    fn spent_usd_between(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> NexusResult<f64> {
        let mut conn = self.conn()?;
        let total: Option<f64> = schema::usage_records::table
            .filter(schema::usage_records::project_id.eq(project_id))
            .filter(schema::usage_records::timestamp.ge(fmt_ts(from)))
            .filter(schema::usage_records::timestamp.lt(fmt_ts(to)))
            .select(diesel::dsl::sum(schema::usage_records::cost_usd))
            .first(&mut conn)
            .map_err(diesel_err)?;
        Ok(total.unwrap_or(0.0))
    }

    fn turns_in_session(&self, session_id: &str) -> NexusResult<u32> {
        let mut conn = self.conn()?;
        let count: i64 = schema::usage_records::table
            .filter(schema::usage_records::session_id.eq(session_id))
            .select(diesel::dsl::count_distinct(
                schema::usage_records::trace_id,
            ))
            .first(&mut conn)
            .map_err(diesel_err)?;
        Ok(count.max(0) as u32)
    }
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

impl TaskStore for Database {
    fn insert_task(&self, task: &ScheduledTask) -> NexusResult<()> {
        let row = ScheduledTaskRow::from_domain(task).ok_or_else(|| invalid_row("task"))?;
        let mut conn = self.conn()?;
        diesel::insert_into(schema::scheduled_tasks::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    fn get_task(&self, id: &str) -> NexusResult<Option<ScheduledTask>> {
        let mut conn = self.conn()?;
        let row: Option<ScheduledTaskRow> = schema::scheduled_tasks::table
            .find(id)
            .select(ScheduledTaskRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(diesel_err)?;
        row.map(|r| r.into_domain().ok_or_else(|| invalid_row("task")))
            .transpose()
    }

    fn list_tasks(&self, project_id: &str) -> NexusResult<Vec<ScheduledTask>> {
        let mut conn = self.conn()?;
        let rows: Vec<ScheduledTaskRow> = schema::scheduled_tasks::table
            .filter(schema::scheduled_tasks::project_id.eq(project_id))
            .order(schema::scheduled_tasks::name.asc())
            .select(ScheduledTaskRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("task")))
            .collect()
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> NexusResult<Vec<ScheduledTask>> {
        let mut conn = self.conn()?;
        let rows: Vec<ScheduledTaskRow> = schema::scheduled_tasks::table
            .filter(schema::scheduled_tasks::status.eq(TaskStatus::Active.as_str()))
            .filter(schema::scheduled_tasks::next_run_at.le(fmt_ts(now)))
            .select(ScheduledTaskRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("task")))
            .collect()
    }

    fn update_task(&self, task: &ScheduledTask) -> NexusResult<()> {
        let row = ScheduledTaskRow::from_domain(task).ok_or_else(|| invalid_row("task"))?;
        let mut conn = self.conn()?;
        diesel::update(schema::scheduled_tasks::table.find(&task.id))
            .set(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    fn insert_run(&self, run: &TaskRun) -> NexusResult<()> {
        let row = TaskRunRow::from_domain(run);
        let mut conn = self.conn()?;
        diesel::insert_into(schema::scheduled_task_runs::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    fn update_run(&self, run: &TaskRun) -> NexusResult<()> {
        let row = TaskRunRow::from_domain(run);
        let mut conn = self.conn()?;
        diesel::update(schema::scheduled_task_runs::table.find(&run.id))
            .set(&row)
            .execute(&mut conn)
            .map_err(diesel_err)?;
        Ok(())
    }

    fn runs_for_task(&self, task_id: &str) -> NexusResult<Vec<TaskRun>> {
        let mut conn = self.conn()?;
        let rows: Vec<TaskRunRow> = schema::scheduled_task_runs::table
            .filter(schema::scheduled_task_runs::task_id.eq(task_id))
            .order(schema::scheduled_task_runs::started_at.desc())
            .select(TaskRunRow::as_select())
            .load(&mut conn)
            .map_err(diesel_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().ok_or_else(|| invalid_row("task_run")))
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
