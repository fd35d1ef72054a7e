//! Row types mapping the domain model onto the SQLite schema.
//!
//! Timestamps are RFC 3339 `TEXT` (fixed-width, UTC) so string comparison in
//! SQL matches chronological order; JSON-bearing fields are serialized
//! `TEXT` columns.

pub mod approval;
pub mod project;
pub mod prompt_layer;
pub mod session;
pub mod task;
pub mod trace;
pub mod usage;

pub use approval::ApprovalRow;
pub use project::{Project, ProjectRow};
pub use prompt_layer::PromptLayerRow;
pub use session::{MessageRow, Session, SessionRow, SessionStatus, StoredMessage};
pub use task::{ScheduledTaskRow, TaskRunRow};
pub use trace::TraceRow;
pub use usage::UsageRecordRow;
