//! Built-in tools registered at startup.

pub mod calculator;
pub mod datetime;
pub mod http_request;

use std::sync::Arc;

use super::registry::ToolRegistry;

pub use calculator::{CALCULATOR_TOOL_ID, CalculatorTool};
pub use datetime::{DATE_TIME_TOOL_ID, DateTimeTool};
pub use http_request::{HTTP_REQUEST_TOOL_ID, HttpRequestTool};

/// Register the built-in tool set.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(CalculatorTool::new()));
    registry.register(Arc::new(DateTimeTool::new()));
    registry.register(Arc::new(HttpRequestTool::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_under_stable_ids() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        assert!(registry.has(CALCULATOR_TOOL_ID));
        assert!(registry.has(DATE_TIME_TOOL_ID));
        assert!(registry.has(HTTP_REQUEST_TOOL_ID));
        assert_eq!(registry.list_all().len(), 3);
    }
}
