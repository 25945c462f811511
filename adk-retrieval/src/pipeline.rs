//! Hybrid retrieval pipeline.
//!
//! The [`RagPipeline`] owns an [`IndexManager`] for the write path and runs
//! queries through `Received → Searched → Fused → Reranked → Returned`:
//!
//! 1. take a consistent snapshot (corpus plus lexical index of one version)
//! 2. run the semantic and lexical channels concurrently
//! 3. fuse their scores and keep the best `n_candidates`
//! 4. rerank the shortlist pairwise when a reranker is configured
//!
//! A failing or slow semantic channel or reranker does not fail the query;
//! the pipeline falls back and records a [`Degradation`] on the response.
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_retrieval::{RagPipeline, RagConfig, InMemoryVectorStore, HashingEmbeddingProvider};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::new(256)?))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .reranker(Arc::new(KeywordOverlapReranker))
//!     .build()?;
//!
//! pipeline.ingest("notes.txt", "The cat sat on the mat.").await?;
//! let response = pipeline.search("where did the cat sit").await?;
//! println!("{}", response.format_citations());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::config::{RagConfig, validate_weight};
use crate::document::{Candidate, Document, DocumentSummary, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::expansion::QueryExpander;
use crate::extract::ContentExtractor;
use crate::fusion::{fuse_with, retrieved, select_candidates};
use crate::manager::{BatchReport, IndexManager, IndexStatus, IngestReport, Snapshot};
use crate::reranker::{Reranker, rerank};
use crate::vectorstore::VectorStore;

/// Per-query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Semantic share of the fused score, in `[0, 1]`.
    pub weight: f32,
    /// Candidates retrieved per channel and kept after fusion.
    pub n_candidates: usize,
    /// Number of final results.
    pub top_k: usize,
    /// Only return chunks of this file type.
    pub file_type: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { weight: 0.5, n_candidates: 20, top_k: 5, file_type: None }
    }
}

impl SearchOptions {
    /// Options taken from the fusion and rerank sections of `config`.
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            weight: config.fusion.weight,
            n_candidates: config.fusion.n_candidates,
            top_k: config.rerank.top_k,
            file_type: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into().to_lowercase());
        self
    }

    fn validate(&self) -> Result<()> {
        validate_weight(self.weight)?;
        if self.n_candidates == 0 || self.top_k == 0 {
            return Err(RagError::ConfigError(
                "n_candidates and top_k must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    /// Nothing has been ingested yet.
    EmptyCorpus,
    /// No chunk scored above zero in either channel.
    NoCandidates,
}

/// Stages a query passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Searched,
    Fused,
    Reranked,
    Returned,
    EmptyCorpus,
    NoCandidates,
}

/// A stage that fell back instead of failing the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// Embedding or vector search failed; results are lexical only.
    SemanticUnavailable,
    /// The semantic channel missed the deadline; results are lexical only.
    SemanticTimedOut,
    /// The reranker failed; results are in fused order.
    RerankerUnavailable,
    /// The reranker missed the deadline; results are in fused order.
    RerankTimedOut,
}

/// The answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// The query as submitted.
    pub query: String,
    pub status: QueryStatus,
    /// Human-readable explanation for empty or filtered results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Ranked results, best first.
    pub results: Vec<SearchResult>,
    /// Fallbacks taken while answering.
    pub degradations: Vec<Degradation>,
    /// Stages visited, in order.
    pub states: Vec<QueryState>,
    /// Corpus version the query was answered from.
    pub corpus_version: u64,
}

impl SearchResponse {
    fn terminal(
        query: &str,
        status: QueryStatus,
        reason: &str,
        mut states: Vec<QueryState>,
        degradations: Vec<Degradation>,
        corpus_version: u64,
    ) -> Self {
        states.push(match status {
            QueryStatus::EmptyCorpus => QueryState::EmptyCorpus,
            QueryStatus::NoCandidates => QueryState::NoCandidates,
            QueryStatus::Ok => QueryState::Returned,
        });
        Self {
            query: query.to_string(),
            status,
            reason: Some(reason.to_string()),
            results: Vec::new(),
            degradations,
            states,
            corpus_version,
        }
    }

    /// Whether any stage fell back.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    /// Distinct source documents, in order of first appearance.
    pub fn source_documents(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.results
            .iter()
            .map(|r| r.document_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Numbered citations for the results, suitable for appending to an
    /// answer. Empty when there are no results.
    pub fn format_citations(&self) -> String {
        if self.results.is_empty() {
            return String::new();
        }
        let mut out = String::from("Sources:\n");
        for (i, result) in self.results.iter().enumerate() {
            let snippet: String = result.text.chars().take(100).collect();
            let ellipsis = if result.text.chars().count() > 100 { "..." } else { "" };
            let _ = write!(
                out,
                "\n[{}] {} (chunk {} of {})\n    Relevance: {:.2}%\n    \"{snippet}{ellipsis}\"\n",
                i + 1,
                result.document_id,
                result.provenance.chunk_index + 1,
                result.provenance.total_chunks,
                result.fused_score * 100.0,
            );
        }
        out
    }
}

/// The hybrid retrieval engine.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    manager: Arc<IndexManager>,
    reranker: Option<Arc<dyn Reranker>>,
    expander: Option<QueryExpander>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The index manager behind this pipeline.
    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub async fn ingest(
        &self,
        document_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<IngestReport> {
        self.manager.ingest(document_id, text).await
    }

    pub async fn ingest_document(&self, document: Document) -> Result<IngestReport> {
        self.manager.ingest_document(document).await
    }

    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        self.manager.ingest_file(path).await
    }

    pub async fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<BatchReport> {
        self.manager.ingest_files(paths).await
    }

    pub async fn ingest_batch(&self, documents: Vec<Document>) -> Result<BatchReport> {
        self.manager.ingest_batch(documents).await
    }

    pub async fn remove(&self, document_id: &str) -> Result<usize> {
        self.manager.remove(document_id).await
    }

    pub async fn status(&self) -> IndexStatus {
        self.manager.status().await
    }

    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        self.manager.list_documents().await
    }

    pub async fn verify_consistency(&self) -> Result<()> {
        self.manager.verify_consistency().await
    }

    /// Search with the options from the pipeline configuration.
    pub async fn search(&self, query: &str) -> Result<SearchResponse> {
        self.search_with(query, &SearchOptions::from_config(&self.config)).await
    }

    /// Search with explicit per-query options.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for invalid options and
    /// [`RagError::IndexDivergence`] while the indexes disagree. Semantic and
    /// reranker failures degrade the response instead of failing it.
    pub async fn search_with(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        options.validate()?;
        let started = Instant::now();
        let mut states = vec![QueryState::Received];
        let mut degradations = Vec::new();

        let snapshot = self.manager.snapshot().await?;
        let version = snapshot.version();
        if snapshot.corpus.is_empty() {
            debug!(corpus_version = version, "query against empty corpus");
            return Ok(SearchResponse::terminal(
                query,
                QueryStatus::EmptyCorpus,
                "the corpus is empty; ingest documents before searching",
                states,
                degradations,
                version,
            ));
        }

        let lexical_query = match &self.expander {
            Some(expander) => expander.expand(query),
            None => query.to_string(),
        };
        let (semantic, lexical) = tokio::join!(
            self.semantic_scores(query, options, &snapshot),
            lexical_scores(&lexical_query, options, &snapshot),
        );
        let lexical = lexical?;
        let (semantic, weight) = match semantic {
            Ok(scores) => (scores, options.weight),
            Err(degradation) => {
                degradations.push(degradation);
                (BTreeMap::new(), 0.0)
            }
        };
        states.push(QueryState::Searched);

        let fused = fuse_with(self.config.fusion.strategy, &semantic, &lexical, weight)?;
        let hits = retrieved(&semantic, &lexical, weight);
        let selected = select_candidates(&fused, &hits, options.n_candidates);
        states.push(QueryState::Fused);
        if selected.is_empty() {
            return Ok(SearchResponse::terminal(
                query,
                QueryStatus::NoCandidates,
                "no chunk matched the query in either channel",
                states,
                degradations,
                version,
            ));
        }

        let candidates: Vec<Candidate> = selected
            .into_iter()
            .filter_map(|(id, score)| {
                snapshot.corpus.chunk(&id).map(|chunk| Candidate {
                    chunk: chunk.clone(),
                    fused_score: score.fused,
                    semantic_score: score.semantic,
                    lexical_score: score.lexical,
                })
            })
            .collect();

        let mut reason = None;
        let results = match self.active_reranker() {
            Some(reranker) => {
                match with_deadline(
                    self.config.query.timeout(),
                    rerank(reranker.as_ref(), query, &candidates, options.top_k),
                )
                .await
                {
                    Some(Ok(reranked)) => {
                        states.push(QueryState::Reranked);
                        let before = reranked.len();
                        let min_score = self.config.rerank.min_score;
                        let results: Vec<SearchResult> = reranked
                            .iter()
                            .filter(|r| min_score.is_none_or(|min| r.rerank_score >= min))
                            .map(|r| {
                                SearchResult::from_candidate(&r.candidate, Some(r.rerank_score))
                            })
                            .collect();
                        if results.len() < before {
                            debug!(dropped = before - results.len(), "rerank threshold applied");
                        }
                        if results.is_empty() {
                            reason = Some(
                                "every candidate scored below rerank.min_score".to_string(),
                            );
                        }
                        results
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "reranking failed, keeping fused order");
                        degradations.push(Degradation::RerankerUnavailable);
                        fused_order(&candidates, options.top_k)
                    }
                    None => {
                        warn!("reranking timed out, keeping fused order");
                        degradations.push(Degradation::RerankTimedOut);
                        fused_order(&candidates, options.top_k)
                    }
                }
            }
            None => fused_order(&candidates, options.top_k),
        };
        states.push(QueryState::Returned);

        info!(
            corpus_version = version,
            candidate_count = candidates.len(),
            result_count = results.len(),
            degraded = !degradations.is_empty(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(SearchResponse {
            query: query.to_string(),
            status: QueryStatus::Ok,
            reason,
            results,
            degradations,
            states,
            corpus_version: version,
        })
    }

    fn active_reranker(&self) -> Option<&Arc<dyn Reranker>> {
        self.reranker.as_ref().filter(|_| self.config.rerank.enabled)
    }

    /// Semantic scores restricted to the snapshot, or the reason they are missing.
    async fn semantic_scores(
        &self,
        query: &str,
        options: &SearchOptions,
        snapshot: &Snapshot,
    ) -> std::result::Result<BTreeMap<String, f32>, Degradation> {
        let embedder = self.manager.embedder();
        let store = self.manager.vector_store();
        // A file type filter runs after the store's top-k cut, so scan the
        // whole snapshot to keep `n_candidates` matching hits reachable.
        let limit = match options.file_type {
            Some(_) => options.n_candidates.max(snapshot.corpus.chunk_count()),
            None => options.n_candidates,
        };
        let search = async {
            let embedding = embedder.embed(query).await?;
            let hits = store.search(&embedding, limit).await?;
            Ok::<_, RagError>(hits)
        };

        let hits = match with_deadline(self.config.query.timeout(), search).await {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                warn!(error = %e, "semantic search failed, falling back to lexical");
                return Err(Degradation::SemanticUnavailable);
            }
            None => {
                warn!("semantic search timed out, falling back to lexical");
                return Err(Degradation::SemanticTimedOut);
            }
        };

        Ok(hits
            .into_iter()
            .filter(|hit| {
                snapshot
                    .corpus
                    .chunk(&hit.id)
                    .is_some_and(|chunk| matches_file_type(&chunk.file_type, options))
            })
            .take(options.n_candidates)
            .map(|hit| (hit.id, hit.score))
            .collect())
    }
}

async fn lexical_scores(
    query: &str,
    options: &SearchOptions,
    snapshot: &Snapshot,
) -> Result<BTreeMap<String, f32>> {
    let index = snapshot.lexical.clone();
    let query = query.to_string();
    let mut scores = tokio::task::spawn_blocking(move || index.get_scores(&query))
        .await
        .map_err(|e| RagError::PipelineError(format!("lexical scoring task failed: {e}")))?;

    if options.file_type.is_some() {
        let corpus = &snapshot.corpus;
        scores.retain(|id, _| {
            corpus.chunk(id).is_some_and(|chunk| matches_file_type(&chunk.file_type, options))
        });
    }
    Ok(scores)
}

fn matches_file_type(file_type: &str, options: &SearchOptions) -> bool {
    options.file_type.as_deref().is_none_or(|wanted| wanted == file_type)
}

fn fused_order(candidates: &[Candidate], top_k: usize) -> Vec<SearchResult> {
    candidates.iter().take(top_k).map(|c| SearchResult::from_candidate(c, None)).collect()
}

/// `None` if `deadline` elapsed before `future` completed.
async fn with_deadline<F: Future>(deadline: Option<Duration>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `embedding_provider` and `vector_store` are required. Without a `config`
/// the defaults are used; without a `chunker` a
/// [`RecursiveChunker`](crate::RecursiveChunker) is built from the config.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .vector_store(Arc::new(store))
///     .reranker(Arc::new(reranker))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
    extractors: Vec<Arc<dyn ContentExtractor>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the semantic index backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set an optional reranker for the fused shortlist.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Register an extra content extractor for file ingestion.
    pub fn extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Build the [`RagPipeline`], validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the configuration is invalid.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;

        let mut manager = IndexManager::new(&config, embedding_provider, vector_store)?;
        if let Some(chunker) = self.chunker {
            manager = manager.with_chunker(chunker);
        }
        for extractor in self.extractors {
            manager = manager.with_extractor(extractor);
        }

        let expander =
            config.expansion.enabled.then(|| QueryExpander::from_config(&config.expansion));
        Ok(RagPipeline { config, manager: Arc::new(manager), reranker: self.reranker, expander })
    }
}
