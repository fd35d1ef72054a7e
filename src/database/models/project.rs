//! Project rows: one tenant with its agent configuration.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::database::schema::projects;
use crate::database::{fmt_ts, parse_ts};

/// A tenant. The agent configuration is stored as a JSON document and is
/// immutable for the duration of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub agent_config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = projects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub agent_config: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    pub fn from_domain(project: &Project) -> Option<Self> {
        Some(Self {
            id: project.id.clone(),
            name: project.name.clone(),
            agent_config: serde_json::to_string(&project.agent_config).ok()?,
            created_at: fmt_ts(project.created_at),
            updated_at: fmt_ts(project.updated_at),
        })
    }

    pub fn into_domain(self) -> Option<Project> {
        Some(Project {
            agent_config: serde_json::from_str(&self.agent_config).ok()?,
            id: self.id,
            name: self.name,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}
