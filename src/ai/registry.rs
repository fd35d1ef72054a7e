//! Static model metadata registry.
//!
//! Maps model identifiers to context-window size, output ceiling, tool
//! support and per-million-token pricing. Lookup falls back to a
//! conservative default for unknown models so the runtime never fails on a
//! model it has not heard of.

// ─── ModelInfo ────────────────────────────────────────────────────────────────

/// Metadata for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tools: bool,
    /// USD per 1M input tokens.
    pub input_price_per_1m: f64,
    /// USD per 1M output tokens.
    pub output_price_per_1m: f64,
}

/// Conservative fallback for unknown models.
pub const DEFAULT_MODEL_INFO: ModelInfo = ModelInfo {
    id: "unknown",
    context_window: 8_192,
    max_output_tokens: 4_096,
    supports_tools: true,
    input_price_per_1m: 10.0,
    output_price_per_1m: 30.0,
};

const MODELS: &[ModelInfo] = &[
    // Anthropic
    ModelInfo {
        id: "claude-opus-4-1",
        context_window: 200_000,
        max_output_tokens: 32_000,
        supports_tools: true,
        input_price_per_1m: 15.0,
        output_price_per_1m: 75.0,
    },
    ModelInfo {
        id: "claude-sonnet-4-5",
        context_window: 200_000,
        max_output_tokens: 64_000,
        supports_tools: true,
        input_price_per_1m: 3.0,
        output_price_per_1m: 15.0,
    },
    ModelInfo {
        id: "claude-haiku-4-5",
        context_window: 200_000,
        max_output_tokens: 64_000,
        supports_tools: true,
        input_price_per_1m: 1.0,
        output_price_per_1m: 5.0,
    },
    ModelInfo {
        id: "claude-3-5-haiku-20241022",
        context_window: 200_000,
        max_output_tokens: 8_192,
        supports_tools: true,
        input_price_per_1m: 0.8,
        output_price_per_1m: 4.0,
    },
    // OpenAI
    ModelInfo {
        id: "gpt-4o",
        context_window: 128_000,
        max_output_tokens: 16_384,
        supports_tools: true,
        input_price_per_1m: 2.5,
        output_price_per_1m: 10.0,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        context_window: 128_000,
        max_output_tokens: 16_384,
        supports_tools: true,
        input_price_per_1m: 0.15,
        output_price_per_1m: 0.6,
    },
    ModelInfo {
        id: "gpt-4.1",
        context_window: 1_047_576,
        max_output_tokens: 32_768,
        supports_tools: true,
        input_price_per_1m: 2.0,
        output_price_per_1m: 8.0,
    },
    ModelInfo {
        id: "gpt-4.1-mini",
        context_window: 1_047_576,
        max_output_tokens: 32_768,
        supports_tools: true,
        input_price_per_1m: 0.4,
        output_price_per_1m: 1.6,
    },
    // Google
    ModelInfo {
        id: "gemini-2.5-pro",
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        supports_tools: true,
        input_price_per_1m: 1.25,
        output_price_per_1m: 10.0,
    },
    ModelInfo {
        id: "gemini-2.5-flash",
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        supports_tools: true,
        input_price_per_1m: 0.3,
        output_price_per_1m: 2.5,
    },
    // Ollama-hosted models are free to run; pricing zero.
    ModelInfo {
        id: "llama3.1",
        context_window: 131_072,
        max_output_tokens: 8_192,
        supports_tools: true,
        input_price_per_1m: 0.0,
        output_price_per_1m: 0.0,
    },
    ModelInfo {
        id: "qwen2.5",
        context_window: 131_072,
        max_output_tokens: 8_192,
        supports_tools: true,
        input_price_per_1m: 0.0,
        output_price_per_1m: 0.0,
    },
];

// ─── Lookup ───────────────────────────────────────────────────────────────────

/// Look up metadata for a model ID. Falls back to [`DEFAULT_MODEL_INFO`]
/// for unknown models. Dated variants (`claude-sonnet-4-5-20250929`) match
/// their base entry by prefix.
pub fn model_info(model: &str) -> ModelInfo {
    MODELS
        .iter()
        .find(|m| m.id == model)
        .or_else(|| MODELS.iter().find(|m| model.starts_with(m.id)))
        .copied()
        .unwrap_or(DEFAULT_MODEL_INFO)
}

/// All known models, for catalog listings.
pub fn known_models() -> &'static [ModelInfo] {
    MODELS
}

/// USD cost of a call at this model's pricing.
pub fn cost_of(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let info = model_info(model);
    (f64::from(input_tokens) * info.input_price_per_1m
        + f64::from(output_tokens) * info.output_price_per_1m)
        / 1_000_000.0
}

// ─── Tests ───────────────────────────────────────────────────────────────────
