//! Provider implementations over vendor HTTP APIs.

pub mod anthropic;
pub mod google;
pub mod mock;
pub mod openai;
pub mod reliable;

use std::env;
use std::sync::Arc;

use crate::config::{ProviderBinding, ProviderKind};

use super::provider::{ChatProvider, ProviderError};

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use reliable::ReliableProvider;

/// Map an HTTP error status to a [`ProviderError`] class.
pub(crate) fn error_for_status(status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth { message: body },
        408 => ProviderError::Timeout,
        429 => ProviderError::RateLimited { message: body },
        s if s >= 500 => ProviderError::Server {
            status: s,
            message: body,
        },
        _ => ProviderError::InvalidRequest { message: body },
    }
}

/// Builds providers for project bindings. The runtime uses the env-backed
/// implementation; tests inject factories returning mocks.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, binding: &ProviderBinding) -> Result<Arc<dyn ChatProvider>, ProviderError>;
}

/// Factory that resolves API keys from the environment variables the
/// bindings name.
pub struct EnvProviderFactory;

impl ProviderFactory for EnvProviderFactory {
    fn create(&self, binding: &ProviderBinding) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        provider_from_binding(binding)
    }
}

/// Construct a provider from a project's [`ProviderBinding`].
///
/// The API key is resolved from the environment variable the binding names;
/// ollama runs keyless against a local endpoint.
pub fn provider_from_binding(binding: &ProviderBinding) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let key = env::var(&binding.api_key_env_var).ok();
    match binding.name {
        ProviderKind::Anthropic => {
            let key = key.ok_or_else(|| ProviderError::Auth {
                message: format!("{} not set", binding.api_key_env_var),
            })?;
            Ok(Arc::new(AnthropicProvider::new(
                binding.model.clone(),
                key,
                binding.base_url.clone(),
            )))
        }
        ProviderKind::Openai => {
            let key = key.ok_or_else(|| ProviderError::Auth {
                message: format!("{} not set", binding.api_key_env_var),
            })?;
            Ok(Arc::new(OpenAiProvider::new(
                binding.model.clone(),
                key,
                binding.base_url.clone(),
            )))
        }
        ProviderKind::Google => {
            let key = key.ok_or_else(|| ProviderError::Auth {
                message: format!("{} not set", binding.api_key_env_var),
            })?;
            Ok(Arc::new(GoogleProvider::new(
                binding.model.clone(),
                key,
                binding.base_url.clone(),
            )))
        }
        ProviderKind::Ollama => Ok(Arc::new(OpenAiProvider::ollama(
            binding.model.clone(),
            binding.base_url.clone(),
        ))),
    }
}
