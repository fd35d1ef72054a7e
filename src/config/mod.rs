//! Configuration: per-project agent definitions and process-wide settings.

pub mod loader;
pub mod schema;

pub use loader::{load_default_settings, load_settings};
pub use schema::{
    AgentConfig, CompactionConfig, ContextWindowConfig, CostConfig, FailoverConfig,
    GatewaySettings, LongTermMemoryConfig, MemoryConfig, ProviderBinding, ProviderKind,
    PruningStrategy, RuntimeSettings, SchedulerSettings, TimeoutSettings,
};
