//! Score fusion.
//!
//! Semantic scores are bounded similarities; BM25 scores are unbounded. The
//! weighted strategy rescales lexical scores to `[0, 1]` with min-max
//! normalization and blends the two channels linearly. The reciprocal rank
//! strategy ignores magnitudes and blends rank positions instead.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{FusionStrategy, validate_weight};
use crate::error::Result;

/// A fused score with the per-channel values it was computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    /// Combined score in `[0, 1]`.
    pub fused: f32,
    /// Semantic channel value before weighting.
    pub semantic: f32,
    /// Lexical channel value after normalization, before weighting.
    pub lexical: f32,
}

/// Min-max normalize `scores` to `[0, 1]`.
///
/// When every score is equal (including a single score) all entries map to 0.
pub fn normalize_min_max(scores: &BTreeMap<String, f32>) -> BTreeMap<String, f32> {
    let min = scores.values().copied().fold(f32::INFINITY, f32::min);
    let max = scores.values().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scores
        .iter()
        .map(|(id, score)| {
            let normalized = if range > 0.0 { (score - min) / range } else { 0.0 };
            (id.clone(), normalized)
        })
        .collect()
}

/// Blend semantic and lexical scores with `weight` given to the semantic channel.
///
/// Every id present in either map receives
/// `weight * semantic + (1 - weight) * normalized_lexical`, with a missing
/// channel contributing 0.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) if
/// `weight` is outside `[0, 1]`.
pub fn fuse(
    semantic: &BTreeMap<String, f32>,
    lexical: &BTreeMap<String, f32>,
    weight: f32,
) -> Result<BTreeMap<String, f32>> {
    Ok(fuse_with(FusionStrategy::Weighted, semantic, lexical, weight)?
        .into_iter()
        .map(|(id, score)| (id, score.fused))
        .collect())
}

/// Fuse with an explicit strategy, keeping per-channel values.
pub fn fuse_with(
    strategy: FusionStrategy,
    semantic: &BTreeMap<String, f32>,
    lexical: &BTreeMap<String, f32>,
    weight: f32,
) -> Result<BTreeMap<String, FusedScore>> {
    validate_weight(weight)?;
    Ok(match strategy {
        FusionStrategy::Weighted => weighted(semantic, lexical, weight),
        FusionStrategy::ReciprocalRank { k } => reciprocal_rank(semantic, lexical, weight, k),
    })
}

fn weighted(
    semantic: &BTreeMap<String, f32>,
    lexical: &BTreeMap<String, f32>,
    weight: f32,
) -> BTreeMap<String, FusedScore> {
    let lexical = normalize_min_max(lexical);
    let mut fused = BTreeMap::new();

    for id in semantic.keys().chain(lexical.keys()) {
        if fused.contains_key(id) {
            continue;
        }
        let sem = semantic.get(id).copied().unwrap_or(0.0);
        let lex = lexical.get(id).copied().unwrap_or(0.0);
        let score = FusedScore {
            fused: weight * sem + (1.0 - weight) * lex,
            semantic: sem,
            lexical: lex,
        };
        fused.insert(id.clone(), score);
    }
    fused
}

/// 1-based ranks of the positive entries, by descending score then id.
fn ranks(scores: &BTreeMap<String, f32>) -> BTreeMap<&str, usize> {
    let mut positive: Vec<(&str, f32)> =
        scores.iter().filter(|(_, s)| **s > 0.0).map(|(id, s)| (id.as_str(), *s)).collect();
    positive.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    positive.into_iter().enumerate().map(|(i, (id, _))| (id, i + 1)).collect()
}

fn reciprocal_rank(
    semantic: &BTreeMap<String, f32>,
    lexical: &BTreeMap<String, f32>,
    weight: f32,
    k: f32,
) -> BTreeMap<String, FusedScore> {
    let sem_ranks = ranks(semantic);
    let lex_ranks = ranks(lexical);
    // Rank 1 in a channel contributes exactly 1 after scaling.
    let scale = k + 1.0;
    let contribution = |rank: Option<&usize>| rank.map_or(0.0, |r| scale / (k + *r as f32));

    semantic
        .keys()
        .chain(lexical.keys())
        .map(|id| {
            let sem = contribution(sem_ranks.get(id.as_str()));
            let lex = contribution(lex_ranks.get(id.as_str()));
            let score = FusedScore {
                fused: weight * sem + (1.0 - weight) * lex,
                semantic: sem,
                lexical: lex,
            };
            (id.clone(), score)
        })
        .collect()
}

/// Order fused scores by descending score, breaking ties by ascending id.
pub fn rank(fused: &BTreeMap<String, FusedScore>) -> Vec<(String, FusedScore)> {
    let mut ranked: Vec<(String, FusedScore)> =
        fused.iter().map(|(id, score)| (id.clone(), *score)).collect();
    ranked.sort_by(|a, b| b.1.fused.total_cmp(&a.1.fused).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Ids that a channel with non-zero weight actually matched.
///
/// A semantic hit counts when its similarity is positive, a lexical hit when
/// its raw BM25 score is positive. Lexical hits must be passed before
/// normalization: a lone match or a set of equal matches normalizes to 0 but
/// is still a match. With `weight == 1.0` only semantic hits count, with
/// `weight == 0.0` only lexical ones.
pub fn retrieved<'a>(
    semantic: &'a BTreeMap<String, f32>,
    lexical: &'a BTreeMap<String, f32>,
    weight: f32,
) -> BTreeSet<&'a str> {
    let positive = |scores: &'a BTreeMap<String, f32>| {
        scores.iter().filter(|(_, s)| **s > 0.0).map(|(id, _)| id.as_str())
    };
    let mut ids = BTreeSet::new();
    if weight > 0.0 {
        ids.extend(positive(semantic));
    }
    if weight < 1.0 {
        ids.extend(positive(lexical));
    }
    ids
}

/// The top `n_candidates` retrieved entries, by descending fused score and
/// then ascending id. Retrieved entries are kept even when their fused score
/// is 0.
pub fn select_candidates(
    fused: &BTreeMap<String, FusedScore>,
    retrieved: &BTreeSet<&str>,
    n_candidates: usize,
) -> Vec<(String, FusedScore)> {
    let mut ranked = rank(fused);
    ranked.retain(|(id, _)| retrieved.contains(id.as_str()));
    ranked.truncate(n_candidates);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn map(entries: &[(&str, f32)]) -> BTreeMap<String, f32> {
        entries.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn min_max_scales_to_unit_interval() {
        let normalized = normalize_min_max(&map(&[("a", 12.5), ("b", 1.5), ("c", 7.0)]));
        assert_eq!(normalized["a"], 1.0);
        assert_eq!(normalized["b"], 0.0);
        assert!((normalized["c"] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn equal_scores_normalize_to_zero() {
        let normalized = normalize_min_max(&map(&[("a", 3.0), ("b", 3.0)]));
        assert!(normalized.values().all(|s| *s == 0.0));
        assert!(normalize_min_max(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn weight_one_is_semantic_only() {
        let sem = map(&[("a", 0.9), ("b", 0.4)]);
        let lex = map(&[("a", 1.0), ("b", 8.0), ("c", 4.0)]);
        let fused = fuse(&sem, &lex, 1.0).unwrap();

        assert_eq!(fused["a"], 0.9);
        assert_eq!(fused["b"], 0.4);
        assert_eq!(fused["c"], 0.0);
    }

    #[test]
    fn weight_zero_is_normalized_lexical_only() {
        let sem = map(&[("a", 0.9), ("z", 0.8)]);
        let lex = map(&[("a", 1.0), ("b", 8.0), ("c", 4.5)]);
        let fused = fuse(&sem, &lex, 0.0).unwrap();
        let normalized = normalize_min_max(&lex);

        for (id, score) in &normalized {
            assert_eq!(fused[id], *score);
        }
        assert_eq!(fused["z"], 0.0);
    }

    #[test]
    fn single_channel_hits_are_not_dropped() {
        let sem = map(&[("only-sem", 0.8)]);
        let lex = map(&[("only-lex", 5.0), ("other", 1.0)]);
        let fused = fuse(&sem, &lex, 0.5).unwrap();

        assert!((fused["only-sem"] - 0.4).abs() < 1e-6);
        assert!((fused["only-lex"] - 0.5).abs() < 1e-6);
        assert_eq!(fused["other"], 0.0);
    }

    #[test]
    fn invalid_weight_is_a_config_error() {
        let err = fuse(&BTreeMap::new(), &BTreeMap::new(), 1.01).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let sem = map(&[("b", 0.5), ("a", 0.5), ("c", 0.7)]);
        let fused = fuse_with(FusionStrategy::Weighted, &sem, &BTreeMap::new(), 1.0).unwrap();
        let order: Vec<String> = rank(&fused).into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn candidates_are_retrieved_and_bounded() {
        let sem = map(&[("a", 0.9), ("b", 0.0), ("c", 0.3), ("d", 0.2)]);
        let lex = BTreeMap::new();
        let fused = fuse_with(FusionStrategy::Weighted, &sem, &lex, 1.0).unwrap();
        let hits = retrieved(&sem, &lex, 1.0);

        let candidates = select_candidates(&fused, &hits, 2);
        let ids: Vec<&str> = candidates.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(select_candidates(&fused, &hits, 10).len(), 3);
    }

    #[test]
    fn lone_lexical_match_survives_normalization() {
        let sem = BTreeMap::new();
        let lex = map(&[("only", 2.7)]);
        let fused = fuse_with(FusionStrategy::Weighted, &sem, &lex, 0.0).unwrap();
        assert_eq!(fused["only"].fused, 0.0);

        let candidates = select_candidates(&fused, &retrieved(&sem, &lex, 0.0), 5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, "only");
    }

    #[test]
    fn equal_lexical_matches_are_all_kept() {
        let sem = BTreeMap::new();
        let lex = map(&[("a", 1.5), ("b", 1.5), ("c", 0.0)]);
        let fused = fuse_with(FusionStrategy::Weighted, &sem, &lex, 0.0).unwrap();

        let candidates = select_candidates(&fused, &retrieved(&sem, &lex, 0.0), 5);
        let ids: Vec<&str> = candidates.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn zero_weight_channels_retrieve_nothing() {
        let sem = map(&[("s", 0.4)]);
        let lex = map(&[("l", 3.0)]);

        assert_eq!(retrieved(&sem, &lex, 0.0).into_iter().collect::<Vec<_>>(), vec!["l"]);
        assert_eq!(retrieved(&sem, &lex, 1.0).into_iter().collect::<Vec<_>>(), vec!["s"]);
        assert_eq!(retrieved(&sem, &lex, 0.5).len(), 2);
        assert!(retrieved(&map(&[("s", 0.0)]), &BTreeMap::new(), 0.5).is_empty());
    }

    #[test]
    fn reciprocal_rank_rewards_agreement() {
        let sem = map(&[("a", 0.9), ("b", 0.8), ("c", 0.1)]);
        let lex = map(&[("a", 2.0), ("c", 9.0), ("d", 0.0)]);
        let fused = fuse_with(FusionStrategy::ReciprocalRank { k: 60.0 }, &sem, &lex, 0.5).unwrap();

        // "a" is first semantically and second lexically; "c" is third and first.
        assert!(fused["a"].fused > fused["c"].fused);
        assert!(fused["c"].fused > fused["b"].fused);
        assert_eq!(fused["d"].fused, 0.0);
        assert!(fused.values().all(|s| (0.0..=1.0).contains(&s.fused)));
    }

    #[test]
    fn reciprocal_rank_top_in_both_channels_scores_one() {
        let sem = map(&[("a", 0.9)]);
        let lex = map(&[("a", 3.0)]);
        let fused = fuse_with(FusionStrategy::ReciprocalRank { k: 60.0 }, &sem, &lex, 0.3).unwrap();
        assert!((fused["a"].fused - 1.0).abs() < 1e-6);
    }
}
