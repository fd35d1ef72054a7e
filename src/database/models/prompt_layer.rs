//! Prompt layer rows.

use diesel::prelude::*;

use crate::database::schema::prompt_layers;
use crate::prompts::{LayerType, PromptLayer};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = prompt_layers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PromptLayerRow {
    pub id: String,
    pub project_id: String,
    pub layer_type: String,
    pub version: i32,
    pub content: String,
    pub is_active: i32,
    pub created_at: String,
}

impl PromptLayerRow {
    pub fn from_domain(layer: &PromptLayer, created_at: String) -> Self {
        Self {
            id: layer.id.clone(),
            project_id: layer.project_id.clone(),
            layer_type: layer.layer_type.as_str().to_owned(),
            version: layer.version as i32,
            content: layer.content.clone(),
            is_active: i32::from(layer.is_active),
            created_at,
        }
    }

    pub fn into_domain(self) -> Option<PromptLayer> {
        Some(PromptLayer {
            layer_type: LayerType::parse(&self.layer_type)?,
            id: self.id,
            project_id: self.project_id,
            version: self.version.max(0) as u32,
            content: self.content,
            is_active: self.is_active != 0,
        })
    }
}
