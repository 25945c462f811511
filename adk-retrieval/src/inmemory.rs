//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a brute-force store backed by
//! a `BTreeMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and corpora small enough to scan per query.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Chunk, SemanticHit};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "InMemory";

/// An in-memory vector store using cosine similarity for search.
///
/// Embeddings are keyed by chunk id. Negative cosine similarities are
/// clamped to zero so scores stay within `[0, 1]`.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    vectors: RwLock<BTreeMap<String, Vec<f32>>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored embeddings.
    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if let Some(chunk) = chunks.iter().find(|c| c.embedding.is_empty()) {
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("chunk '{}' has no embedding", chunk.id),
            });
        }
        let mut vectors = self.vectors.write().await;
        for chunk in chunks {
            vectors.insert(chunk.id.clone(), chunk.embedding.clone());
        }
        Ok(())
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        let mut vectors = self.vectors.write().await;
        for id in ids {
            vectors.remove(*id);
        }
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SemanticHit>> {
        let vectors = self.vectors.read().await;

        let mut scored: Vec<SemanticHit> = vectors
            .iter()
            .map(|(id, vector)| SemanticHit {
                id: id.clone(),
                score: cosine_similarity(vector, embedding).clamp(0.0, 1.0),
            })
            .collect();

        // BTreeMap iteration is id-ordered and the sort is stable, so ties stay id-ascending.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.vectors.read().await.keys().cloned().collect())
    }
}
