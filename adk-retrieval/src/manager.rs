//! Index manager: sole owner of the corpus and both indexes.
//!
//! Every write runs under a single async writer lock and publishes a new
//! immutable [`Corpus`] with a higher version. Queries take an `Arc` snapshot
//! and never observe a half-applied write. The lexical index records the
//! corpus version it was built from; it is rebuilt in full whenever it falls
//! behind, and concurrent rebuild requests collapse into one.
//!
//! The semantic index is external. A document's chunks are written there
//! first; if that fails, the document's previous chunk set is restored and
//! the corpus is left untouched. If even the restore fails, the manager marks
//! itself diverged and refuses queries until [`IndexManager::repair`] runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::{Bm25Config, RagConfig};
use crate::document::{Chunk, Document, DocumentSummary};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{ContentExtractor, PlainTextExtractor, extension_of};
use crate::lexical::Bm25Index;
use crate::vectorstore::VectorStore;

/// A batch item: a document in memory or a file still to be extracted.
enum Pending {
    Loaded(Document),
    File(PathBuf),
}

impl Pending {
    fn id(&self) -> String {
        match self {
            Pending::Loaded(document) => document.id.clone(),
            Pending::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    file_type: String,
    content_hash: String,
    ingested_at: DateTime<Utc>,
    chunk_ids: Vec<String>,
}

/// An immutable, versioned view of every live chunk.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    version: u64,
    documents: BTreeMap<String, DocumentRecord>,
    chunks: BTreeMap<String, Arc<Chunk>>,
}

impl Corpus {
    /// Monotonically increasing version, bumped by every committed write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of live documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Whether the corpus holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look up a chunk by id.
    pub fn chunk(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.get(id)
    }

    /// Every live chunk in id order.
    pub fn chunks(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.values()
    }

    /// Every live document id in order.
    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    fn document_chunks(&self, document_id: &str) -> Vec<Arc<Chunk>> {
        self.documents.get(document_id).map_or_else(Vec::new, |record| {
            record.chunk_ids.iter().filter_map(|id| self.chunks.get(id).cloned()).collect()
        })
    }

    fn without_document(&self, document_id: &str) -> Corpus {
        let mut next = self.clone();
        next.version = self.version + 1;
        if let Some(record) = next.documents.remove(document_id) {
            for id in &record.chunk_ids {
                next.chunks.remove(id);
            }
        }
        next
    }
}

/// A corpus together with a lexical index built from the same version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The corpus at query start.
    pub corpus: Arc<Corpus>,
    /// BM25 statistics for exactly that corpus.
    pub lexical: Arc<Bm25Index>,
}

impl Snapshot {
    /// The shared corpus version.
    pub fn version(&self) -> u64 {
        self.corpus.version
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The ingested document.
    pub document_id: String,
    /// Chunks now live for the document.
    pub chunks_added: usize,
    /// Chunks of the previous version that were replaced.
    pub chunks_removed: usize,
    /// The content hash matched the live version; nothing was written.
    pub unchanged: bool,
    /// Corpus version after the write.
    pub corpus_version: u64,
}

/// A document that could not be ingested as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// The document or file that failed.
    pub document_id: String,
    /// Why it failed.
    pub error: String,
}

/// Outcome of a batch ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Documents that were written or found unchanged.
    pub succeeded: Vec<IngestReport>,
    /// Documents that were skipped.
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// Total chunks written across the batch.
    pub fn chunks_added(&self) -> usize {
        self.succeeded.iter().filter(|r| !r.unchanged).map(|r| r.chunks_added).sum()
    }
}

/// Corpus and index health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub chunk_count: usize,
    pub document_count: usize,
    pub corpus_version: u64,
    /// Version the lexical index was built from.
    pub lexical_version: u64,
    pub lexical_index_stale: bool,
    /// Number of lexical rebuilds performed so far.
    pub lexical_rebuilds: u64,
    /// Set when the semantic and lexical indexes disagree.
    pub diverged: bool,
}

struct IndexState {
    corpus: Arc<Corpus>,
    lexical: Arc<Bm25Index>,
}

/// Owns the corpus, the lexical index and the write path to the semantic index.
///
/// # Example
///
/// ```rust,ignore
/// let manager = IndexManager::new(&config, Arc::new(embedder), Arc::new(store))?;
/// manager.ingest("notes.txt", "The cat sat on the mat.").await?;
/// let snapshot = manager.snapshot().await?;
/// ```
pub struct IndexManager {
    bm25: Bm25Config,
    batch_size: usize,
    defer_lexical_rebuild: bool,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    extractors: Vec<Arc<dyn ContentExtractor>>,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
    rebuild: Mutex<()>,
    rebuilds: AtomicU64,
    diverged: RwLock<Option<String>>,
}

impl IndexManager {
    /// Create a manager with a [`RecursiveChunker`] and the plain-text extractor.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `config` is invalid.
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = Arc::new(RecursiveChunker::from_config(config)?);
        Ok(Self {
            bm25: config.bm25,
            batch_size: config.ingest.batch_size,
            defer_lexical_rebuild: config.ingest.defer_lexical_rebuild,
            chunker,
            embedder,
            store,
            extractors: vec![Arc::new(PlainTextExtractor)],
            state: RwLock::new(IndexState {
                corpus: Arc::new(Corpus::default()),
                lexical: Arc::new(Bm25Index::empty(0, config.bm25)),
            }),
            writer: Mutex::new(()),
            rebuild: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
            diverged: RwLock::new(None),
        })
    }

    /// Replace the chunking strategy.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Register an extractor. Later registrations take precedence.
    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractors.insert(0, extractor);
        self
    }

    /// The embedding provider shared with the query path.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// The semantic index.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest raw text under `document_id`.
    pub async fn ingest(
        &self,
        document_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<IngestReport> {
        self.ingest_document(Document::new(document_id, text)).await
    }

    /// Ingest one document atomically, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns the chunking, embedding or vector store error that aborted the
    /// write. The corpus and both indexes are left as they were.
    pub async fn ingest_document(&self, document: Document) -> Result<IngestReport> {
        let report = self.write_document(document).await?;
        if !report.unchanged && !self.defer_lexical_rebuild {
            self.rebuild_lexical_index().await?;
        }
        Ok(report)
    }

    /// Extract and ingest a single file. The document id is the path.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let document = self.extract(path.as_ref().to_path_buf()).await?;
        self.ingest_document(document).await
    }

    /// Extract and ingest files in batches. Unreadable files are reported
    /// as failures and do not stop the rest.
    ///
    /// Each file is read only when its turn to be written comes, so at most
    /// one extracted text is held at a time.
    pub async fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<BatchReport> {
        let items = paths.iter().map(|path| Pending::File(path.as_ref().to_path_buf())).collect();
        self.write_batches(items).await
    }

    /// Ingest documents in batches of `ingest.batch_size`.
    ///
    /// Each document is atomic on its own. The lexical index is rebuilt once
    /// per batch.
    ///
    /// # Errors
    ///
    /// Document-scoped failures are collected in the report. Only
    /// configuration errors and index divergence abort the batch.
    pub async fn ingest_batch(&self, documents: Vec<Document>) -> Result<BatchReport> {
        self.write_batches(documents.into_iter().map(Pending::Loaded).collect()).await
    }

    async fn write_batches(&self, items: Vec<Pending>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let total = items.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut items = items.into_iter().peekable();
        let mut batch = 0usize;

        while items.peek().is_some() {
            batch += 1;
            let mut written = 0usize;
            for item in items.by_ref().take(self.batch_size) {
                let document_id = item.id();
                let outcome = match item {
                    Pending::Loaded(document) => self.write_document(document).await,
                    Pending::File(path) => match self.extract(path).await {
                        Ok(document) => self.write_document(document).await,
                        Err(e) => Err(e),
                    },
                };
                match outcome {
                    Ok(r) => {
                        written += usize::from(!r.unchanged);
                        report.succeeded.push(r);
                    }
                    Err(e) if e.is_document_scoped() => {
                        warn!(document.id = %document_id, error = %e, "skipping document");
                        report.failed.push(BatchFailure { document_id, error: e.to_string() });
                    }
                    Err(e) => return Err(e),
                }
            }

            if written > 0 && !self.defer_lexical_rebuild {
                self.rebuild_lexical_index().await?;
            }
            info!(
                batch,
                batch_count,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                total,
                "ingest batch complete"
            );
        }
        Ok(report)
    }

    /// Read `path` with the first extractor that supports it, off the async
    /// worker threads.
    async fn extract(&self, path: PathBuf) -> Result<Document> {
        let extension = extension_of(&path);
        let id = path.display().to_string();
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(&extension))
            .cloned()
            .ok_or_else(|| RagError::UnsupportedFormat(id.clone()))?;

        let text = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| RagError::ExtractionError {
                source_id: id.clone(),
                message: format!("extraction task failed: {e}"),
            })??;
        let file_type = if extension.is_empty() { "text".to_string() } else { extension };
        Ok(Document::new(id, text).with_file_type(file_type))
    }

    /// Chunk, embed and write one document without touching the lexical index.
    async fn write_document(&self, document: Document) -> Result<IngestReport> {
        let _writer = self.writer.lock().await;
        self.check_diverged().await?;

        let corpus = self.state.read().await.corpus.clone();
        let previous = corpus.documents.get(&document.id);
        if previous.is_some_and(|p| p.content_hash == document.content_hash) {
            debug!(document.id = %document.id, "content unchanged, skipping");
            return Ok(IngestReport {
                chunks_added: previous.map_or(0, |p| p.chunk_ids.len()),
                document_id: document.id,
                chunks_removed: 0,
                unchanged: true,
                corpus_version: corpus.version,
            });
        }
        let old_chunks = corpus.document_chunks(&document.id);

        let mut chunks = self.chunker.chunk(&document).inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "chunking failed");
        })?;

        if !chunks.is_empty() {
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await.inspect_err(|e| {
                error!(document.id = %document.id, error = %e, "embedding failed during ingestion");
            })?;
            if embeddings.len() != chunks.len() {
                return Err(RagError::EmbeddingError {
                    provider: "embed_batch".to_string(),
                    message: format!(
                        "expected {} embeddings for document '{}', got {}",
                        chunks.len(),
                        document.id,
                        embeddings.len()
                    ),
                });
            }
            for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
                chunk.embedding = embedding;
            }
        }

        let new_ids: BTreeSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale_ids: Vec<&str> =
            old_chunks.iter().map(|c| c.id.as_str()).filter(|id| !new_ids.contains(id)).collect();

        let written = match self.store.upsert(&chunks).await {
            Ok(()) if stale_ids.is_empty() => Ok(()),
            Ok(()) => self.store.delete(&stale_ids).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(document.id = %document.id, error = %e, "semantic write failed, rolling back");
            self.roll_back(&document.id, &new_ids, &old_chunks).await;
            return Err(e);
        }

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut next = corpus.without_document(&document.id);
        for chunk in chunks {
            next.chunks.insert(chunk.id.clone(), Arc::new(chunk));
        }
        next.documents.insert(
            document.id.clone(),
            DocumentRecord {
                file_type: document.file_type.clone(),
                content_hash: document.content_hash.clone(),
                ingested_at: document.ingested_at,
                chunk_ids: chunk_ids.clone(),
            },
        );
        let version = next.version;
        self.state.write().await.corpus = Arc::new(next);

        info!(
            document.id = %document.id,
            chunk_count = chunk_ids.len(),
            replaced = old_chunks.len(),
            corpus_version = version,
            "ingested document"
        );
        Ok(IngestReport {
            document_id: document.id,
            chunks_added: chunk_ids.len(),
            chunks_removed: old_chunks.len(),
            unchanged: false,
            corpus_version: version,
        })
    }

    /// Restore the semantic index to the document's previous chunk set.
    async fn roll_back(
        &self,
        document_id: &str,
        new_ids: &BTreeSet<&str>,
        previous: &[Arc<Chunk>],
    ) {
        let previous_ids: BTreeSet<&str> = previous.iter().map(|c| c.id.as_str()).collect();
        let added: Vec<&str> = new_ids.difference(&previous_ids).copied().collect();

        let mut failure = None;
        if !added.is_empty() {
            if let Err(e) = self.store.delete(&added).await {
                failure = Some(e);
            }
        }
        if failure.is_none() && !previous.is_empty() {
            let restore: Vec<Chunk> = previous.iter().map(|c| Chunk::clone(c)).collect();
            if let Err(e) = self.store.upsert(&restore).await {
                failure = Some(e);
            }
        }

        match failure {
            None => debug!(document.id = %document_id, "rolled back semantic write"),
            Some(e) => {
                self.mark_diverged(format!("rollback of document '{document_id}' failed: {e}"))
                    .await;
            }
        }
    }

    /// Remove every chunk of a document from both indexes.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] for unknown ids. If the semantic delete
    /// fails after the corpus has dropped the document, the manager is marked
    /// diverged and the store error is returned.
    pub async fn remove(&self, document_id: &str) -> Result<usize> {
        let _writer = self.writer.lock().await;
        self.check_diverged().await?;

        let corpus = self.state.read().await.corpus.clone();
        let Some(record) = corpus.documents.get(document_id) else {
            return Err(RagError::NotFound(document_id.to_string()));
        };
        let ids: Vec<&str> = record.chunk_ids.iter().map(String::as_str).collect();

        let next = corpus.without_document(document_id);
        let version = next.version;
        self.state.write().await.corpus = Arc::new(next);

        if let Err(e) = self.store.delete(&ids).await {
            self.mark_diverged(format!("semantic delete of document '{document_id}' failed: {e}"))
                .await;
            return Err(e);
        }
        if !self.defer_lexical_rebuild {
            self.rebuild_lexical_index().await?;
        }

        info!(
            document.id = %document_id,
            chunk_count = ids.len(),
            corpus_version = version,
            "removed document"
        );
        Ok(ids.len())
    }

    /// Rebuild the lexical index from the current corpus if it is stale.
    ///
    /// Rebuilds are serialized. A caller that arrives while a rebuild is in
    /// flight waits for it and returns without building again when the
    /// result is already fresh. Returns the version of the installed index.
    pub async fn rebuild_lexical_index(&self) -> Result<u64> {
        let corpus = self.state.read().await.corpus.clone();
        let index = self.lexical_for(corpus).await?;
        Ok(index.version())
    }

    /// A lexical index built from exactly `corpus`.
    async fn lexical_for(&self, corpus: Arc<Corpus>) -> Result<Arc<Bm25Index>> {
        let _rebuild = self.rebuild.lock().await;

        let installed = self.state.read().await.lexical.clone();
        if installed.version() == corpus.version {
            return Ok(installed);
        }

        let params = self.bm25;
        let source = corpus.clone();
        let index = tokio::task::spawn_blocking(move || {
            Bm25Index::build(
                source.version,
                params,
                source.chunks.values().map(|c| (c.id.as_str(), c.text.as_str())),
            )
        })
        .await
        .map_err(|e| RagError::PipelineError(format!("lexical rebuild task failed: {e}")))?;
        let index = Arc::new(index);
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        if state.lexical.version() < index.version() {
            state.lexical = index.clone();
        }
        drop(state);

        info!(corpus_version = corpus.version, chunk_count = index.len(), "rebuilt lexical index");
        Ok(index)
    }

    /// A consistent corpus and lexical index, rebuilding the index if stale.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexDivergence`] while the manager is diverged.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.check_diverged().await?;
        let (corpus, lexical) = {
            let state = self.state.read().await;
            (state.corpus.clone(), state.lexical.clone())
        };
        if lexical.version() == corpus.version {
            return Ok(Snapshot { corpus, lexical });
        }
        debug!(
            corpus_version = corpus.version,
            lexical_version = lexical.version(),
            "query observed stale lexical index"
        );
        let lexical = self.lexical_for(corpus.clone()).await?;
        Ok(Snapshot { corpus, lexical })
    }

    /// Counts and versions.
    pub async fn status(&self) -> IndexStatus {
        let (corpus, lexical) = {
            let state = self.state.read().await;
            (state.corpus.clone(), state.lexical.clone())
        };
        IndexStatus {
            chunk_count: corpus.chunk_count(),
            document_count: corpus.document_count(),
            corpus_version: corpus.version,
            lexical_version: lexical.version(),
            lexical_index_stale: lexical.version() != corpus.version,
            lexical_rebuilds: self.rebuilds.load(Ordering::Relaxed),
            diverged: self.diverged.read().await.is_some(),
        }
    }

    /// Every live document in id order.
    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        let corpus = self.state.read().await.corpus.clone();
        corpus
            .documents
            .iter()
            .map(|(id, record)| DocumentSummary {
                id: id.clone(),
                file_type: record.file_type.clone(),
                chunk_count: record.chunk_ids.len(),
                content_hash: record.content_hash.clone(),
                ingested_at: record.ingested_at,
            })
            .collect()
    }

    /// Check that the semantic index, the corpus and the lexical index hold
    /// the same chunk ids.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexDivergence`] and marks the manager diverged
    /// on any mismatch.
    pub async fn verify_consistency(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let corpus = self.state.read().await.corpus.clone();
        let lexical = self.lexical_for(corpus.clone()).await?;

        let semantic = self.store.ids().await?;
        let expected: BTreeSet<String> = corpus.chunks.keys().cloned().collect();
        let lexical_ids: BTreeSet<String> = lexical.ids().map(str::to_string).collect();

        if let Some(message) = describe_mismatch(&expected, &semantic, &lexical_ids) {
            self.mark_diverged(message.clone()).await;
            return Err(RagError::IndexDivergence(message));
        }
        debug!(chunk_count = expected.len(), "indexes consistent");
        Ok(())
    }

    /// Bring the semantic index back in line with the corpus and clear the
    /// divergence flag.
    ///
    /// Chunks missing from the store are re-upserted from their stored
    /// embeddings and orphaned ids are deleted.
    pub async fn repair(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let corpus = self.state.read().await.corpus.clone();

        let semantic = self.store.ids().await?;
        let orphans: Vec<&str> = semantic
            .iter()
            .map(String::as_str)
            .filter(|id| !corpus.chunks.contains_key(*id))
            .collect();
        let missing: Vec<Chunk> = corpus
            .chunks
            .values()
            .filter(|c| !semantic.contains(&c.id))
            .map(|c| Chunk::clone(c))
            .collect();

        if !orphans.is_empty() {
            self.store.delete(&orphans).await?;
        }
        if !missing.is_empty() {
            self.store.upsert(&missing).await?;
        }
        self.lexical_for(corpus.clone()).await?;

        let previous = self.diverged.write().await.take();
        warn!(
            orphans = orphans.len(),
            restored = missing.len(),
            reason = previous.as_deref().unwrap_or("none"),
            "repaired semantic index"
        );
        Ok(())
    }

    async fn check_diverged(&self) -> Result<()> {
        match self.diverged.read().await.as_ref() {
            Some(message) => Err(RagError::IndexDivergence(message.clone())),
            None => Ok(()),
        }
    }

    async fn mark_diverged(&self, message: String) {
        error!(reason = %message, "indexes diverged, refusing queries");
        let mut diverged = self.diverged.write().await;
        if diverged.is_none() {
            *diverged = Some(message);
        }
    }
}

fn describe_mismatch(
    expected: &BTreeSet<String>,
    semantic: &BTreeSet<String>,
    lexical: &BTreeSet<String>,
) -> Option<String> {
    let mut problems = Vec::new();
    let missing_semantic = expected.difference(semantic).count();
    let extra_semantic = semantic.difference(expected).count();
    if missing_semantic > 0 || extra_semantic > 0 {
        problems.push(format!(
            "semantic index missing {missing_semantic} and holding {extra_semantic} unknown chunks"
        ));
    }
    if lexical != expected {
        problems.push(format!(
            "lexical index holds {} chunks, corpus holds {}",
            lexical.len(),
            expected.len()
        ));
    }
    if problems.is_empty() { None } else { Some(problems.join("; ")) }
}
