//! Keyword-overlap reference implementation of [`MemoryBackend`].
//!
//! Scores each stored entry by the fraction of query terms it contains.
//! Good enough to exercise retrieval end-to-end; production deployments
//! plug in a vector store behind the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::NexusResult;

use super::traits::{MemoryBackend, MemorySnippet};

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    category: String,
    importance: f32,
}

/// In-process memory store keyed by project.
#[derive(Default)]
pub struct KeywordMemoryStore {
    entries: RwLock<HashMap<String, Vec<Entry>>>,
}

impl KeywordMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_owned)
        .collect()
}

fn similarity(query_terms: &[String], content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let hits = query_terms
        .iter()
        .filter(|t| content_lower.contains(t.as_str()))
        .count();
    hits as f32 / query_terms.len() as f32
}

#[async_trait]
impl MemoryBackend for KeywordMemoryStore {
    async fn store(
        &self,
        project_id: &str,
        content: &str,
        category: &str,
        importance: f32,
    ) -> NexusResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| crate::error::NexusError::internal("memory store lock poisoned"))?;
        entries.entry(project_id.to_owned()).or_default().push(Entry {
            content: content.to_owned(),
            category: category.to_owned(),
            importance: importance.clamp(0.0, 1.0),
        });
        Ok(())
    }

    async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        top_k: usize,
        min_importance: Option<f32>,
    ) -> NexusResult<Vec<MemorySnippet>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| crate::error::NexusError::internal("memory store lock poisoned"))?;
        let Some(project_entries) = entries.get(project_id) else {
            return Ok(Vec::new());
        };

        let query_terms = terms(query);
        let min_importance = min_importance.unwrap_or(0.0);

        let mut scored: Vec<MemorySnippet> = project_entries
            .iter()
            .filter(|e| e.importance >= min_importance)
            .filter_map(|e| {
                let similarity = similarity(&query_terms, &e.content);
                (similarity > 0.0).then(|| MemorySnippet {
                    content: e.content.clone(),
                    category: e.category.clone(),
                    importance: e.importance,
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
