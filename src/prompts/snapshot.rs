//! Prompt snapshots.
//!
//! A snapshot pins the exact layer versions and content hashes that composed
//! a system prompt, so any trace can be replayed against the same inputs.
//! Hashes are lower-hex SHA-256 (64 chars); hashing the empty string yields
//! the standard empty-input digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::layers::ActiveLayers;

/// Immutable record of the prompt composition for one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSnapshot {
    pub identity_layer_id: String,
    pub identity_version: u32,
    pub instructions_layer_id: String,
    pub instructions_version: u32,
    pub safety_layer_id: String,
    pub safety_version: u32,
    pub tool_docs_hash: String,
    pub runtime_context_hash: String,
}

/// Lower-hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build a snapshot from the active layer triple and the exact tool-docs and
/// runtime-context strings fed to the assembler.
pub fn create_snapshot(
    layers: &ActiveLayers,
    tool_docs_section: &str,
    runtime_context: &str,
) -> PromptSnapshot {
    PromptSnapshot {
        identity_layer_id: layers.identity.id.clone(),
        identity_version: layers.identity.version,
        instructions_layer_id: layers.instructions.id.clone(),
        instructions_version: layers.instructions.version,
        safety_layer_id: layers.safety.id.clone(),
        safety_version: layers.safety.version,
        tool_docs_hash: sha256_hex(tool_docs_section),
        runtime_context_hash: sha256_hex(runtime_context),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::layers::{LayerType, PromptLayer};

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn layers() -> ActiveLayers {
        let layer = |id: &str, layer_type, version| PromptLayer {
            id: id.to_owned(),
            project_id: "p1".to_owned(),
            layer_type,
            version,
            content: String::new(),
            is_active: true,
        };
        ActiveLayers {
            identity: layer("l-id", LayerType::Identity, 3),
            instructions: layer("l-in", LayerType::Instructions, 1),
            safety: layer("l-sa", LayerType::Safety, 2),
        }
    }

    #[test]
    fn empty_string_hashes_to_standard_digest() {
        assert_eq!(sha256_hex(""), EMPTY_SHA256);
    }

    #[test]
    fn hash_is_64_lower_hex_chars() {
        let h = sha256_hex("calculator: does math");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn snapshot_pins_layer_versions() {
        let snapshot = create_snapshot(&layers(), "tools", "");
        assert_eq!(snapshot.identity_layer_id, "l-id");
        assert_eq!(snapshot.identity_version, 3);
        assert_eq!(snapshot.safety_version, 2);
        assert_eq!(snapshot.runtime_context_hash, EMPTY_SHA256);
    }

    #[test]
    fn snapshot_is_deterministic() {
        let a = create_snapshot(&layers(), "tools", "ctx");
        let b = create_snapshot(&layers(), "tools", "ctx");
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_serde_uses_camel_case() {
        let json = serde_json::to_value(create_snapshot(&layers(), "", "")).unwrap();
        assert!(json["identityLayerId"].is_string());
        assert!(json["toolDocsHash"].is_string());
    }
}
