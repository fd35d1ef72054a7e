//! The long-term memory retrieval interface.
//!
//! The engine does not constrain how memories are stored or embedded; it
//! only requires ranked snippets, most similar first.

use async_trait::async_trait;

use crate::error::NexusResult;

/// One retrieved memory.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnippet {
    pub content: String,
    pub category: String,
    /// Author-assigned importance in [0, 1].
    pub importance: f32,
    /// Query similarity in [0, 1]; results are ordered by this, descending.
    pub similarity: f32,
}

/// Abstraction over the agent's long-term memory store.
///
/// Implementations may back the store with an in-process index, SQLite, or a
/// remote vector database. `retrieve` must return results sorted by
/// descending similarity.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Store a memory for a project.
    async fn store(
        &self,
        project_id: &str,
        content: &str,
        category: &str,
        importance: f32,
    ) -> NexusResult<()>;

    /// Return up to `top_k` snippets relevant to `query`, filtered by
    /// `min_importance` when given.
    async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        top_k: usize,
        min_importance: Option<f32>,
    ) -> NexusResult<Vec<MemorySnippet>>;
}
