//! Shared fixtures: providers whose failures can be switched on per test.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use adk_retrieval::{
    Chunk, EmbeddingProvider, HashingEmbeddingProvider, InMemoryVectorStore, RagConfig, RagError,
    RagPipeline, Reranker, Result, SemanticHit, VectorStore,
};
use async_trait::async_trait;

pub const DIMENSIONS: usize = 64;

/// An in-memory store that can be told to fail writes.
///
/// `fail_upsert` fails only the next upsert, which still writes the first
/// chunk of its batch so callers must cope with partially applied writes.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryVectorStore,
    pub fail_upsert: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_search: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn error(operation: &str) -> RagError {
        RagError::VectorStoreError {
            backend: "Flaky".to_string(),
            message: format!("{operation} refused"),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if self.fail_upsert.swap(false, Ordering::SeqCst) {
            if let Some(first) = chunks.first() {
                self.inner.upsert(std::slice::from_ref(first)).await?;
            }
            return Err(Self::error("upsert"));
        }
        self.inner.upsert(chunks).await
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::error("delete"));
        }
        self.inner.delete(ids).await
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SemanticHit>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(Self::error("search"));
        }
        self.inner.search(embedding, top_k).await
    }

    async fn ids(&self) -> Result<BTreeSet<String>> {
        self.inner.ids().await
    }
}

/// A hashing embedder that can fail, stall, or reject texts containing "poison".
pub struct FlakyEmbedder {
    inner: HashingEmbeddingProvider,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl FlakyEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbeddingProvider::new(DIMENSIONS).unwrap(),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        })
    }

    fn check(&self, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) || text.contains("poison") {
            return Err(RagError::EmbeddingError {
                provider: "Flaky".to_string(),
                message: "embedding refused".to_string(),
            });
        }
        Ok(())
    }

    async fn stall(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.stall().await;
        self.check(text)?;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            self.check(text)?;
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// A reranker scoring by text length that can fail or stall.
#[derive(Default)]
pub struct LengthReranker {
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

#[async_trait]
impl Reranker for LengthReranker {
    fn name(&self) -> &str {
        "Length"
    }

    async fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::RerankerError {
                reranker: "Length".to_string(),
                message: "model unavailable".to_string(),
            });
        }
        Ok(texts.iter().map(|t| t.chars().count() as f32).collect())
    }
}

/// A pipeline over a flaky store and embedder, without a reranker.
pub fn pipeline(config: RagConfig) -> (RagPipeline, Arc<FlakyStore>, Arc<FlakyEmbedder>) {
    let store = FlakyStore::new();
    let embedder = FlakyEmbedder::new();
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder.clone())
        .vector_store(store.clone())
        .build()
        .unwrap();
    (pipeline, store, embedder)
}

/// Three single-chunk documents about cats and dogs.
pub async fn ingest_pets(pipeline: &RagPipeline) {
    pipeline.ingest("c1.txt", "the cat sat").await.unwrap();
    pipeline.ingest("c2.txt", "dogs run fast").await.unwrap();
    pipeline.ingest("c3.txt", "cats and dogs are pets").await.unwrap();
}
