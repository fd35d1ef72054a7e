//! Provider abstraction: canonical chat types, the [`ChatProvider`] trait,
//! vendor implementations, and the static model registry.

pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

pub use provider::{ChatProvider, EventStream, ProviderError, estimate_tokens};
pub use providers::{
    AnthropicProvider, EnvProviderFactory, GoogleProvider, MockProvider, OpenAiProvider,
    ProviderFactory, ReliableProvider, provider_from_binding,
};
pub use registry::{ModelInfo, cost_of, model_info};
pub use types::{
    ChatMessage, ChatRequest, ContentPart, MessageContent, Role, StopReason, StreamEvent,
    TokenUsage, ToolCall, ToolSchema,
};
