//! Prompt assembly: layered definitions, the deterministic assembler, and
//! audit snapshots.

pub mod assembler;
pub mod layers;
pub mod snapshot;

pub use assembler::{PromptParts, build_prompt, retrieved_context_section, tool_docs_section};
pub use layers::{ActiveLayers, LayerStore, LayerType, PromptLayer, resolve_active_layers};
pub use snapshot::{PromptSnapshot, create_snapshot, sha256_hex};
