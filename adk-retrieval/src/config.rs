//! Configuration for the retrieval engine.
//!
//! [`RagConfig`] groups every recognized option. Values can be assembled with
//! [`RagConfig::builder()`] or loaded from TOML:
//!
//! ```toml
//! chunk_size = 500
//! chunk_overlap = 50
//!
//! [bm25]
//! k1 = 1.2
//!
//! [fusion]
//! weight = 0.7
//!
//! [rerank]
//! enabled = true
//! model_id = "cross-encoder/ms-marco-MiniLM-L-6-v2"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default separator priority: paragraph, line, sentence end, word, character.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Configuration parameters for the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Number of characters carried over from the end of the previous chunk.
    pub chunk_overlap: usize,
    /// Boundary separators in priority order. `""` splits between characters.
    pub separators: Vec<String>,
    /// Lexical scoring parameters.
    pub bm25: Bm25Config,
    /// Score fusion parameters.
    pub fusion: FusionConfig,
    /// Reranking stage parameters.
    pub rerank: RerankConfig,
    /// Write-path batching.
    pub ingest: IngestConfig,
    /// Read-path deadlines.
    pub query: QueryConfig,
    /// Query expansion applied to the lexical channel.
    pub expansion: ExpansionConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            bm25: Bm25Config::default(),
            fusion: FusionConfig::default(),
            rerank: RerankConfig::default(),
            ingest: IngestConfig::default(),
            query: QueryConfig::default(),
            expansion: ExpansionConfig::default(),
        }
    }
}

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bm25Config {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength, in `[0, 1]`.
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// How semantic and lexical scores are combined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Min-max normalized lexical scores blended linearly with semantic scores.
    #[default]
    Weighted,
    /// Reciprocal rank fusion; `k` dampens the contribution of top ranks.
    ReciprocalRank {
        /// Rank offset, typically 60.
        k: f32,
    },
}

/// Score fusion parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    /// Semantic share of the fused score, in `[0, 1]`.
    pub weight: f32,
    /// Number of fused candidates carried into reranking.
    pub n_candidates: usize,
    /// Fusion formula.
    pub strategy: FusionStrategy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { weight: 0.5, n_candidates: 20, strategy: FusionStrategy::Weighted }
    }
}

/// Reranking stage parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RerankConfig {
    /// Whether a configured reranker is applied.
    pub enabled: bool,
    /// Opaque model identifier handed to the reranking provider.
    pub model_id: Option<String>,
    /// Number of final results.
    pub top_k: usize,
    /// Results whose rerank score falls below this are dropped.
    pub min_score: Option<f32>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self { enabled: true, model_id: None, top_k: 5, min_score: None }
    }
}

/// Write-path batching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Documents written per batch before the lexical index is rebuilt.
    pub batch_size: usize,
    /// Leave the lexical index stale after writes. The next query or an
    /// explicit rebuild refreshes it. Useful for bulk loads.
    pub defer_lexical_rebuild: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { batch_size: 32, defer_lexical_rebuild: false }
    }
}

/// Read-path deadlines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-stage deadline in milliseconds. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl QueryConfig {
    /// The configured deadline as a [`Duration`].
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Query expansion parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Whether lexical queries are expanded with synonyms.
    pub enabled: bool,
    /// Extra expansion rules merged over the built-in table.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the TOML is malformed or any
    /// value fails [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RagConfig = toml::from_str(source)
            .map_err(|e| RagError::ConfigError(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RagError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Check that all parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `separators` is empty
    /// - `bm25.k1 < 0` or `bm25.b` is outside `[0, 1]`
    /// - `fusion.weight` is outside `[0, 1]` or `fusion.n_candidates == 0`
    /// - `rerank.top_k == 0` or `rerank.top_k > fusion.n_candidates`
    /// - `ingest.batch_size == 0`
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.separators.is_empty() {
            return Err(RagError::ConfigError("separators must not be empty".to_string()));
        }
        if !self.bm25.k1.is_finite() || self.bm25.k1 < 0.0 {
            return Err(RagError::ConfigError(format!(
                "bm25.k1 ({}) must be a non-negative number",
                self.bm25.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(RagError::ConfigError(format!(
                "bm25.b ({}) must be within [0, 1]",
                self.bm25.b
            )));
        }
        validate_weight(self.fusion.weight)?;
        if self.fusion.n_candidates == 0 {
            return Err(RagError::ConfigError(
                "fusion.n_candidates must be greater than zero".to_string(),
            ));
        }
        if let FusionStrategy::ReciprocalRank { k } = self.fusion.strategy {
            if !k.is_finite() || k < 0.0 {
                return Err(RagError::ConfigError(format!(
                    "fusion.strategy.k ({k}) must be a non-negative number"
                )));
            }
        }
        if self.rerank.top_k == 0 {
            return Err(RagError::ConfigError("rerank.top_k must be greater than zero".to_string()));
        }
        if self.rerank.top_k > self.fusion.n_candidates {
            return Err(RagError::ConfigError(format!(
                "rerank.top_k ({}) must not exceed fusion.n_candidates ({})",
                self.rerank.top_k, self.fusion.n_candidates
            )));
        }
        if self.ingest.batch_size == 0 {
            return Err(RagError::ConfigError(
                "ingest.batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject chunking parameters that cannot make progress.
pub(crate) fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::ConfigError(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Reject fusion weights outside `[0, 1]`.
pub(crate) fn validate_weight(weight: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(RagError::ConfigError(format!(
            "fusion weight ({weight}) must be within [0, 1]"
        )));
    }
    Ok(())
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the target chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Replace the separator priority list.
    pub fn separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Set the BM25 parameters.
    pub fn bm25(mut self, k1: f32, b: f32) -> Self {
        self.config.bm25 = Bm25Config { k1, b };
        self
    }

    /// Set the default semantic weight used by fusion.
    pub fn fusion_weight(mut self, weight: f32) -> Self {
        self.config.fusion.weight = weight;
        self
    }

    /// Set the number of fused candidates handed to the reranker.
    pub fn n_candidates(mut self, n: usize) -> Self {
        self.config.fusion.n_candidates = n;
        self
    }

    /// Set the fusion formula.
    pub fn fusion_strategy(mut self, strategy: FusionStrategy) -> Self {
        self.config.fusion.strategy = strategy;
        self
    }

    /// Enable or disable the reranking stage.
    pub fn rerank_enabled(mut self, enabled: bool) -> Self {
        self.config.rerank.enabled = enabled;
        self
    }

    /// Set the model identifier passed to the reranking provider.
    pub fn rerank_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.rerank.model_id = Some(model_id.into());
        self
    }

    /// Set the number of final results.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.rerank.top_k = k;
        self
    }

    /// Drop reranked results scoring below `threshold`.
    pub fn min_rerank_score(mut self, threshold: f32) -> Self {
        self.config.rerank.min_score = Some(threshold);
        self
    }

    /// Set the ingestion batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.ingest.batch_size = size;
        self
    }

    /// Skip the lexical rebuild at the end of each write.
    pub fn defer_lexical_rebuild(mut self, defer: bool) -> Self {
        self.config.ingest.defer_lexical_rebuild = defer;
        self
    }

    /// Set the per-stage query deadline.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enable synonym expansion of lexical queries.
    pub fn query_expansion(mut self, enabled: bool) -> Self {
        self.config.expansion.enabled = enabled;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] under the conditions listed on
    /// [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RagConfig::default().validate().unwrap();
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn weight_outside_unit_interval_is_rejected() {
        assert!(RagConfig::builder().fusion_weight(1.5).build().is_err());
        assert!(RagConfig::builder().fusion_weight(-0.1).build().is_err());
        assert!(RagConfig::builder().fusion_weight(0.0).build().is_ok());
        assert!(RagConfig::builder().fusion_weight(1.0).build().is_ok());
    }

    #[test]
    fn top_k_cannot_exceed_candidates() {
        let err = RagConfig::builder().n_candidates(3).top_k(5).build().unwrap_err();
        assert!(err.to_string().contains("rerank.top_k"));
    }

    #[test]
    fn bm25_b_is_bounded() {
        assert!(RagConfig::builder().bm25(1.2, 1.1).build().is_err());
        assert!(RagConfig::builder().bm25(-1.0, 0.5).build().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RagConfig::from_toml_str(
            r#"
            chunk_size = 200
            chunk_overlap = 20

            [bm25]
            k1 = 1.2

            [fusion]
            weight = 0.7
            strategy = { kind = "reciprocal_rank", k = 60.0 }

            [rerank]
            model_id = "cross-encoder/ms-marco-MiniLM-L-6-v2"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.fusion.weight, 0.7);
        assert_eq!(config.fusion.strategy, FusionStrategy::ReciprocalRank { k: 60.0 });
        assert_eq!(config.fusion.n_candidates, 20);
        assert!(config.rerank.enabled);
        assert_eq!(config.rerank.model_id.as_deref(), Some("cross-encoder/ms-marco-MiniLM-L-6-v2"));
        assert_eq!(config.separators.len(), DEFAULT_SEPARATORS.len());
    }

    #[test]
    fn invalid_toml_values_are_config_errors() {
        let err = RagConfig::from_toml_str("[fusion]\nweight = 2.0\n").unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
        let err = RagConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}
