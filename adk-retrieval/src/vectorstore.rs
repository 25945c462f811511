//! Semantic index contract.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::document::{Chunk, SemanticHit};
use crate::error::Result;

/// A nearest-neighbour index over chunk embeddings.
///
/// The index manager is the only writer. It relies on three guarantees:
/// `upsert` and `delete` are idempotent per id, `search` scores lie in
/// `[0, 1]`, and `ids` reports exactly the stored chunk ids so divergence
/// from the lexical index can be detected.
///
/// # Example
///
/// ```rust,ignore
/// use adk_retrieval::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert(&chunks).await?;
/// let hits = store.search(&query_embedding, 20).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks. Chunks must have embeddings set.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Delete chunks by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[&str]) -> Result<()>;

    /// Return the `top_k` most similar chunks, ordered by descending score
    /// and then ascending id.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SemanticHit>>;

    /// Every chunk id currently stored.
    async fn ids(&self) -> Result<BTreeSet<String>>;
}
