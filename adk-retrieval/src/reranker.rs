//! Pairwise reranking of the fused shortlist.
//!
//! A [`Reranker`] scores each `(query, candidate text)` pair independently.
//! It is far more expensive per pair than either retrieval channel, which is
//! why it only ever sees the bounded candidate set produced by fusion.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::document::Candidate;
use crate::error::{RagError, Result};
use crate::lexical::tokenize;

/// A pairwise relevance model.
///
/// Implementations can wrap cross-encoder models, hosted rerank endpoints,
/// or heuristic scorers.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// A short name used in logs and errors.
    fn name(&self) -> &str;

    /// Score every text against `query`. Higher is more relevant; the scale
    /// is model specific and unbounded.
    ///
    /// Must return exactly one score per input text, in input order.
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

/// A candidate together with its final relevance score.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    /// The fused candidate, unmodified.
    pub candidate: Candidate,
    /// Pairwise relevance score.
    pub rerank_score: f32,
}

/// Score `candidates` with `reranker` and return the best `top_k`.
///
/// Ordering is by descending rerank score; ties fall back to descending
/// fused score and then ascending chunk id, which is the fused order the
/// pipeline hands in. Fused scores are carried through untouched.
///
/// # Errors
///
/// Returns [`RagError::RerankerError`] if the model fails or returns the
/// wrong number of scores.
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    candidates: &[Candidate],
    top_k: usize,
) -> Result<Vec<RerankedCandidate>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
    let scores = reranker.score(query, &texts).await?;
    if scores.len() != candidates.len() {
        return Err(RagError::RerankerError {
            reranker: reranker.name().to_string(),
            message: format!("expected {} scores, got {}", candidates.len(), scores.len()),
        });
    }

    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| {
        let (left, right) = (&candidates[a.0], &candidates[b.0]);
        b.1.total_cmp(&a.1)
            .then_with(|| right.fused_score.total_cmp(&left.fused_score))
            .then_with(|| left.chunk.id.cmp(&right.chunk.id))
    });
    ranked.truncate(top_k);

    debug!(
        reranker = reranker.name(),
        candidates = candidates.len(),
        returned = ranked.len(),
        "reranked candidates"
    );

    Ok(ranked
        .into_iter()
        .map(|(i, rerank_score)| RerankedCandidate {
            candidate: candidates[i].clone(),
            rerank_score,
        })
        .collect())
}

/// Scores a candidate by the share of distinct query terms it contains.
///
/// Deterministic and dependency free; useful offline and as a baseline when
/// no cross-encoder is deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOverlapReranker;

#[async_trait]
impl Reranker for KeywordOverlapReranker {
    fn name(&self) -> &str {
        "KeywordOverlap"
    }

    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let terms: HashSet<String> = tokenize(query)
            .into_iter()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                hits as f32 / terms.len() as f32
            })
            .collect())
    }
}
