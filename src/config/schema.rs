//! Configuration schema for Nexus.
//!
//! Two layers of configuration exist:
//!
//! - [`AgentConfig`] is the per-project agent definition (provider binding,
//!   failover policy, tool allowlist, memory policy, cost budget). It is
//!   stored as JSON on the project row and is immutable for the duration of
//!   a turn.
//! - [`RuntimeSettings`] is the process-wide TOML configuration (bind
//!   address, database path, timeouts). All fields have `#[serde(default)]`
//!   so a partially-filled `nexus.toml` works correctly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ─── ProviderKind ─────────────────────────────────────────────────────────────

/// Supported LLM provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Google,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Google => "google",
            Self::Ollama => "ollama",
        }
    }
}

// ─── ProviderBinding ──────────────────────────────────────────────────────────

/// Which provider and model a project's agent talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBinding {
    pub name: ProviderKind,
    /// Model identifier, e.g. `"claude-sonnet-4-5"` or `"gpt-4o-mini"`.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Override base URL (required for ollama, optional elsewhere).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

// ─── FailoverConfig ───────────────────────────────────────────────────────────

/// Retry policy for provider calls. Retries apply only to transport-class
/// failures and never to streams that already yielded content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverConfig {
    pub max_retries: u32,
    pub on_timeout: bool,
    pub on_rate_limit: bool,
    pub on_server_error: bool,
    pub timeout_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            on_timeout: true,
            on_rate_limit: true,
            on_server_error: true,
            timeout_ms: 30_000,
        }
    }
}

// ─── MemoryConfig ─────────────────────────────────────────────────────────────

/// How oversized histories are shrunk to fit the model context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PruningStrategy {
    /// Drop the oldest complete user→assistant turn.
    #[default]
    TurnBased,
    /// Drop the oldest single message.
    TokenBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LongTermMemoryConfig {
    pub enabled: bool,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f32>,
}

impl Default for LongTermMemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: 5,
            min_importance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextWindowConfig {
    /// Tokens reserved for the model's output.
    pub reserve_tokens: u32,
    pub pruning_strategy: PruningStrategy,
    /// Upper bound on complete turns kept in context.
    pub max_turns_in_context: usize,
    pub compaction: CompactionConfig,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            reserve_tokens: 4096,
            pruning_strategy: PruningStrategy::TurnBased,
            max_turns_in_context: 50,
            compaction: CompactionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    pub long_term: LongTermMemoryConfig,
    pub context_window: ContextWindowConfig,
}

// ─── CostConfig ───────────────────────────────────────────────────────────────

/// Per-project spending and rate ceilings enforced by the cost guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostConfig {
    pub daily_budget_usd: f64,
    pub monthly_budget_usd: f64,
    pub max_tokens_per_turn: u32,
    pub max_turns_per_session: u32,
    pub max_tool_calls_per_turn: u32,
    /// Spend percentage at which a non-fatal warning is emitted.
    pub alert_threshold_percent: f64,
    /// Spend percentage at which requests are refused.
    pub hard_limit_percent: f64,
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: 5.0,
            monthly_budget_usd: 100.0,
            max_tokens_per_turn: 100_000,
            max_turns_per_session: 20,
            max_tool_calls_per_turn: 10,
            alert_threshold_percent: 80.0,
            hard_limit_percent: 100.0,
            max_requests_per_minute: 20,
            max_requests_per_hour: 300,
        }
    }
}

// ─── AgentConfig ──────────────────────────────────────────────────────────────

/// The complete per-project agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub provider: ProviderBinding,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    #[serde(default)]
    pub memory_config: MemoryConfig,
    #[serde(default)]
    pub cost_config: CostConfig,
}

impl AgentConfig {
    /// A minimal config bound to the given provider/model, used by tests and
    /// project seeding.
    pub fn for_model(name: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider: ProviderBinding {
                name,
                model: model.into(),
                api_key_env_var: match name {
                    ProviderKind::Anthropic => "ANTHROPIC_API_KEY".to_owned(),
                    ProviderKind::Openai => "OPENAI_API_KEY".to_owned(),
                    ProviderKind::Google => "GOOGLE_API_KEY".to_owned(),
                    ProviderKind::Ollama => "OLLAMA_API_KEY".to_owned(),
                },
                temperature: None,
                max_output_tokens: None,
                base_url: None,
            },
            failover: FailoverConfig::default(),
            allowed_tools: BTreeSet::new(),
            memory_config: MemoryConfig::default(),
            cost_config: CostConfig::default(),
        }
    }
}

// ─── RuntimeSettings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub bind_addr: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8420".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path; `":memory:"` for an in-process database.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "nexus.db".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub provider_secs: u64,
    pub tool_secs: u64,
    /// How long a pending approval may wait before expiring.
    pub approval_secs: u64,
    /// Poll cadence while waiting on an approval decision.
    pub approval_poll_secs: u64,
    /// Turn budget for inbound (HTTP/channel) messages.
    pub turn_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            provider_secs: 30,
            tool_secs: 60,
            approval_secs: 24 * 3600,
            approval_poll_secs: 2,
            turn_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// Tick interval; tasks due at or before a tick are started on it.
    pub tick_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 15,
        }
    }
}

/// Process-wide runtime settings (`nexus.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeSettings {
    pub gateway: GatewaySettings,
    pub database: DatabaseSettings,
    pub timeouts: TimeoutSettings,
    pub scheduler: SchedulerSettings,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
