//! Layered prompt definitions.
//!
//! Each project carries versioned prompt layers of three types; at most one
//! layer per type is active at a time. A turn cannot start unless all three
//! active layers exist.

use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};

// ─── LayerType ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Identity,
    Instructions,
    Safety,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Instructions => "instructions",
            Self::Safety => "safety",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identity" => Some(Self::Identity),
            "instructions" => Some(Self::Instructions),
            "safety" => Some(Self::Safety),
            _ => None,
        }
    }

    pub const ALL: [Self; 3] = [Self::Identity, Self::Instructions, Self::Safety];
}

// ─── PromptLayer ──────────────────────────────────────────────────────────────

/// One versioned prompt layer. Versions are monotonic starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptLayer {
    pub id: String,
    pub project_id: String,
    pub layer_type: LayerType,
    pub version: u32,
    pub content: String,
    pub is_active: bool,
}

/// The active layer triple a system prompt is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLayers {
    pub identity: PromptLayer,
    pub instructions: PromptLayer,
    pub safety: PromptLayer,
}

// ─── LayerStore ───────────────────────────────────────────────────────────────

/// Read access to a project's prompt layers.
pub trait LayerStore: Send + Sync {
    /// The unique active layer of the given type, if one exists.
    fn active_layer(&self, project_id: &str, layer_type: LayerType)
    -> NexusResult<Option<PromptLayer>>;
}

/// Load the active layer triple for a project. Fails with
/// `NO_ACTIVE_PROMPT` when any of the three is missing.
pub fn resolve_active_layers(
    store: &dyn LayerStore,
    project_id: &str,
) -> NexusResult<ActiveLayers> {
    let load = |layer_type: LayerType| {
        store
            .active_layer(project_id, layer_type)?
            .ok_or_else(|| NexusError::NoActivePrompt {
                project_id: project_id.to_owned(),
            })
    };
    Ok(ActiveLayers {
        identity: load(LayerType::Identity)?,
        instructions: load(LayerType::Instructions)?,
        safety: load(LayerType::Safety)?,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapStore(HashMap<(String, LayerType), PromptLayer>);

    impl LayerStore for MapStore {
        fn active_layer(
            &self,
            project_id: &str,
            layer_type: LayerType,
        ) -> NexusResult<Option<PromptLayer>> {
            Ok(self.0.get(&(project_id.to_owned(), layer_type)).cloned())
        }
    }

    fn layer(project: &str, layer_type: LayerType, content: &str) -> PromptLayer {
        PromptLayer {
            id: format!("{}-{}", project, layer_type.as_str()),
            project_id: project.to_owned(),
            layer_type,
            version: 1,
            content: content.to_owned(),
            is_active: true,
        }
    }

    #[test]
    fn resolves_complete_triple() {
        let mut map = HashMap::new();
        for lt in LayerType::ALL {
            map.insert(("p1".to_owned(), lt), layer("p1", lt, "text"));
        }
        let store = MapStore(map);
        let layers = resolve_active_layers(&store, "p1").unwrap();
        assert_eq!(layers.identity.layer_type, LayerType::Identity);
        assert_eq!(layers.safety.id, "p1-safety");
    }

    #[test]
    fn missing_layer_fails_no_active_prompt() {
        let mut map = HashMap::new();
        map.insert(
            ("p1".to_owned(), LayerType::Identity),
            layer("p1", LayerType::Identity, "x"),
        );
        let store = MapStore(map);
        let err = resolve_active_layers(&store, "p1").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NoActivePrompt);
    }

    #[test]
    fn layer_type_round_trips() {
        for lt in LayerType::ALL {
            assert_eq!(LayerType::parse(lt.as_str()), Some(lt));
        }
        assert_eq!(LayerType::parse("bogus"), None);
    }
}
