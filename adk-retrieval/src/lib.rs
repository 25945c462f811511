//! Hybrid retrieval and reranking for ADK-Rust agents.
//!
//! This crate provides:
//! - Recursive, overlap-aware document chunking
//! - A BM25 lexical index rebuilt in versioned snapshots
//! - A semantic channel over any [`VectorStore`] and [`EmbeddingProvider`]
//! - Weighted min-max and reciprocal-rank score fusion
//! - Pairwise reranking of the fused shortlist
//! - An [`IndexManager`] keeping both indexes consistent under concurrent
//!   ingestion and queries
//!
//! Start with [`RagPipeline::builder()`].

mod chunking;
mod config;
mod document;
mod embedding;
mod error;
mod expansion;
mod extract;
mod fusion;
mod inmemory;
mod lexical;
mod manager;
mod pipeline;
mod reranker;
mod vectorstore;

#[cfg(feature = "http")]
pub mod http;
pub mod telemetry;

pub use chunking::{Chunker, RecursiveChunker, split_text};
pub use config::{
    Bm25Config, DEFAULT_SEPARATORS, ExpansionConfig, FusionConfig, FusionStrategy, IngestConfig,
    QueryConfig, RagConfig, RagConfigBuilder, RerankConfig,
};
pub use document::{
    Candidate, Chunk, Document, DocumentSummary, Provenance, SearchResult, SemanticHit,
    content_hash,
};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};
pub use error::{RagError, Result};
pub use expansion::QueryExpander;
pub use extract::{ContentExtractor, PlainTextExtractor};
pub use fusion::{
    FusedScore, fuse, fuse_with, normalize_min_max, rank, retrieved, select_candidates,
};
pub use inmemory::{InMemoryVectorStore, cosine_similarity};
pub use lexical::{Bm25Index, tokenize};
pub use manager::{
    BatchFailure, BatchReport, Corpus, IndexManager, IndexStatus, IngestReport, Snapshot,
};
pub use pipeline::{
    Degradation, QueryState, QueryStatus, RagPipeline, RagPipelineBuilder, SearchOptions,
    SearchResponse,
};
pub use reranker::{KeywordOverlapReranker, RerankedCandidate, Reranker, rerank};
pub use vectorstore::VectorStore;
