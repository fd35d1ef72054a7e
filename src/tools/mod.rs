//! Tools: registry, dispatch, validation, egress guard, and built-ins.

pub mod builtin;
pub mod netguard;
pub mod registry;
pub mod schema;
pub mod traits;

pub use registry::ToolRegistry;
pub use traits::{
    RiskLevel, Tool, ToolContext, ToolError, ToolOutcome, ToolPermissions, ToolSpec,
};
