//! Agent execution: the turn loop and cooperative cancellation.

pub mod runner;
pub mod signal;

pub use runner::{AgentRunner, ToolCallSummary, TurnOutcome, TurnRequest};
pub use signal::AbortSignal;
