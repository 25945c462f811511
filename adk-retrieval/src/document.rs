//! Data types for documents, chunks, and search results.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source document: the text stream produced by an extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identity, usually the filename or path.
    pub id: String,
    /// The extracted text content.
    pub text: String,
    /// Hex-encoded SHA-256 of `text`.
    pub content_hash: String,
    /// Lower-case file extension, or `"text"` when the id has none.
    pub file_type: String,
    /// When the document entered the corpus.
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Create a document, deriving its hash and file type.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let text = text.into();
        let file_type = file_type_of(&id);
        Self { content_hash: content_hash(&text), file_type, id, text, ingested_at: Utc::now() }
    }

    /// Override the file type derived from the id.
    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into().to_lowercase();
        self
    }
}

/// Hex-encoded SHA-256 digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn file_type_of(id: &str) -> String {
    Path::new(id)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "text".to_string())
}

/// A bounded span of a [`Document`], the unit of indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Globally unique id, `"{document_id}#{chunk_index}"`.
    pub id: String,
    /// The owning document.
    pub document_id: String,
    /// The text span.
    pub text: String,
    /// Ordinal position within the document, from zero.
    pub chunk_index: usize,
    /// Number of chunks the document was split into.
    pub total_chunks: usize,
    /// Length of `text` in characters.
    pub char_len: usize,
    /// File type inherited from the document.
    pub file_type: String,
    /// Embedding of `text`; empty until the manager attaches one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// The id a chunk at `chunk_index` of `document_id` receives.
    pub fn make_id(document_id: &str, chunk_index: usize) -> String {
        format!("{document_id}#{chunk_index}")
    }
}

/// A semantic index hit: chunk id and similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    /// Id of the matching chunk.
    pub id: String,
    /// Similarity, 0 = unrelated, 1 = identical.
    pub score: f32,
}

/// A fused candidate carried into reranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The candidate chunk.
    pub chunk: Arc<Chunk>,
    /// Fused score in `[0, 1]`.
    pub fused_score: f32,
    /// Semantic channel contribution before weighting.
    pub semantic_score: f32,
    /// Normalized lexical channel contribution before weighting.
    pub lexical_score: f32,
}

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// The originating document.
    pub document_id: String,
    /// Ordinal of the chunk within the document.
    pub chunk_index: usize,
    /// Number of sibling chunks.
    pub total_chunks: usize,
    /// Span length in characters.
    pub char_len: usize,
    /// File type of the originating document.
    pub file_type: String,
}

/// One ranked entry of a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Id of the retrieved chunk.
    pub chunk_id: String,
    /// The originating document.
    pub document_id: String,
    /// The chunk text.
    pub text: String,
    /// Final sort key: the rerank score when reranked, otherwise the fused score.
    pub score: f32,
    /// Pairwise relevance, present when the reranking stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// Fused score in `[0, 1]`.
    pub fused_score: f32,
    /// Semantic similarity.
    pub semantic_score: f32,
    /// Normalized lexical score.
    pub lexical_score: f32,
    /// Originating document and span.
    pub provenance: Provenance,
}

impl SearchResult {
    /// Package a candidate, optionally with its rerank score.
    pub fn from_candidate(candidate: &Candidate, rerank_score: Option<f32>) -> Self {
        let chunk = &candidate.chunk;
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            score: rerank_score.unwrap_or(candidate.fused_score),
            rerank_score,
            fused_score: candidate.fused_score,
            semantic_score: candidate.semantic_score,
            lexical_score: candidate.lexical_score,
            provenance: Provenance {
                document_id: chunk.document_id.clone(),
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                char_len: chunk.char_len,
                file_type: chunk.file_type.clone(),
            },
        }
    }
}

/// Summary of a live document, as reported by the index manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Document identity.
    pub id: String,
    /// File type.
    pub file_type: String,
    /// Number of chunks currently indexed.
    pub chunk_count: usize,
    /// Hash of the ingested text.
    pub content_hash: String,
    /// Ingestion time.
    pub ingested_at: DateTime<Utc>,
}
