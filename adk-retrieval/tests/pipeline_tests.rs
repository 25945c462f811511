//! End-to-end query tests: fusion, reranking, fallbacks and filters.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use adk_retrieval::{
    Degradation, FusionStrategy, InMemoryVectorStore, KeywordOverlapReranker, QueryState,
    QueryStatus, RagConfig, RagError, RagPipeline, Reranker, SearchOptions,
};
use common::{FlakyEmbedder, LengthReranker, ingest_pets, pipeline};

fn lexical_only() -> SearchOptions {
    SearchOptions::default().with_weight(0.0)
}

fn with_reranker(config: RagConfig, reranker: Arc<dyn Reranker>) -> RagPipeline {
    RagPipeline::builder()
        .config(config)
        .embedding_provider(FlakyEmbedder::new())
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .reranker(reranker)
        .build()
        .unwrap()
}

fn ids(response: &adk_retrieval::SearchResponse) -> Vec<&str> {
    response.results.iter().map(|r| r.document_id.as_str()).collect()
}

#[tokio::test]
async fn exact_term_match_is_not_padded_to_top_k() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("cat", &lexical_only()).await.unwrap();

    assert_eq!(response.status, QueryStatus::Ok);
    assert_eq!(ids(&response), vec!["c1.txt"]);
    assert_eq!(response.results[0].fused_score, 1.0);
    assert_eq!(
        response.states,
        vec![QueryState::Received, QueryState::Searched, QueryState::Fused, QueryState::Returned]
    );
    assert!(!response.is_degraded());
}

#[tokio::test]
async fn empty_corpus_ends_early() {
    let (pipeline, _, _) = pipeline(RagConfig::default());

    let response = pipeline.search("anything").await.unwrap();

    assert_eq!(response.status, QueryStatus::EmptyCorpus);
    assert_eq!(response.states, vec![QueryState::Received, QueryState::EmptyCorpus]);
    assert!(response.results.is_empty());
    assert!(response.reason.is_some());
    assert!(response.format_citations().is_empty());
}

#[tokio::test]
async fn unmatched_query_reports_no_candidates() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("zebra", &lexical_only()).await.unwrap();

    assert_eq!(response.status, QueryStatus::NoCandidates);
    assert_eq!(response.states.last(), Some(&QueryState::NoCandidates));
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn full_semantic_weight_ignores_lexical_scores() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let options = SearchOptions::default().with_weight(1.0);
    let response = pipeline.search_with("dogs run fast", &options).await.unwrap();

    assert_eq!(response.results[0].document_id, "c2.txt");
    for result in &response.results {
        assert_eq!(result.fused_score, result.semantic_score);
        assert!((0.0..=1.0).contains(&result.semantic_score));
    }
}

#[tokio::test]
async fn identical_queries_return_identical_responses() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let first = pipeline.search("cats and dogs").await.unwrap();
    let second = pipeline.search("cats and dogs").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn invalid_options_are_rejected() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let options = SearchOptions::default().with_weight(1.5);
    let err = pipeline.search_with("cat", &options).await.unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}

#[tokio::test]
async fn embedding_failure_falls_back_to_lexical() {
    let (pipeline, _, embedder) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;
    embedder.fail.store(true, Ordering::SeqCst);

    let response = pipeline.search("cat").await.unwrap();

    assert_eq!(response.degradations, vec![Degradation::SemanticUnavailable]);
    assert_eq!(ids(&response), vec!["c1.txt"]);
    assert_eq!(response.results[0].semantic_score, 0.0);
}

#[tokio::test]
async fn vector_search_failure_falls_back_to_lexical() {
    let (pipeline, store, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;
    store.fail_search.store(true, Ordering::SeqCst);

    let response = pipeline.search("cat").await.unwrap();

    assert_eq!(response.degradations, vec![Degradation::SemanticUnavailable]);
    assert_eq!(ids(&response), vec!["c1.txt"]);
}

#[tokio::test(start_paused = true)]
async fn slow_semantic_channel_times_out() {
    let config = RagConfig::builder().query_timeout(Duration::from_millis(50)).build().unwrap();
    let (pipeline, _, embedder) = pipeline(config);
    ingest_pets(&pipeline).await;
    embedder.delay_ms.store(5_000, Ordering::SeqCst);

    let response = pipeline.search("cat").await.unwrap();

    assert_eq!(response.degradations, vec![Degradation::SemanticTimedOut]);
    assert_eq!(ids(&response), vec!["c1.txt"]);
}

#[tokio::test]
async fn reranker_reorders_the_shortlist() {
    let pipeline = with_reranker(RagConfig::default(), Arc::new(LengthReranker::default()));
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs", &lexical_only()).await.unwrap();

    // Fused order is c2 then c3; the longer c3 wins after reranking.
    assert_eq!(ids(&response), vec!["c3.txt", "c2.txt"]);
    assert_eq!(response.results[0].rerank_score, Some(22.0));
    assert_eq!(response.results[0].score, 22.0);
    assert!(response.results[0].fused_score < response.results[1].fused_score);
    assert!(response.states.contains(&QueryState::Reranked));
}

#[tokio::test]
async fn disabled_reranker_keeps_fused_order() {
    let config = RagConfig::builder().rerank_enabled(false).build().unwrap();
    let pipeline = with_reranker(config, Arc::new(LengthReranker::default()));
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs", &lexical_only()).await.unwrap();

    assert_eq!(ids(&response), vec!["c2.txt", "c3.txt"]);
    assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
    assert!(!response.states.contains(&QueryState::Reranked));
}

#[tokio::test]
async fn reranker_failure_keeps_fused_order() {
    let reranker = Arc::new(LengthReranker::default());
    reranker.fail.store(true, Ordering::SeqCst);
    let pipeline = with_reranker(RagConfig::default(), reranker);
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs", &lexical_only()).await.unwrap();

    assert_eq!(response.degradations, vec![Degradation::RerankerUnavailable]);
    assert_eq!(ids(&response), vec!["c2.txt", "c3.txt"]);
    assert!(!response.states.contains(&QueryState::Reranked));
    assert_eq!(response.states.last(), Some(&QueryState::Returned));
}

#[tokio::test(start_paused = true)]
async fn slow_reranker_times_out() {
    let reranker = Arc::new(LengthReranker::default());
    reranker.delay_ms.store(5_000, Ordering::SeqCst);
    let config = RagConfig::builder().query_timeout(Duration::from_millis(50)).build().unwrap();
    let pipeline = with_reranker(config, reranker);
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs", &lexical_only()).await.unwrap();

    assert_eq!(response.degradations, vec![Degradation::RerankTimedOut]);
    assert_eq!(ids(&response), vec!["c2.txt", "c3.txt"]);
}

#[tokio::test]
async fn rerank_threshold_drops_weak_results() {
    let config = RagConfig::builder().min_rerank_score(0.75).build().unwrap();
    let pipeline = with_reranker(config, Arc::new(KeywordOverlapReranker));
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs pets", &lexical_only()).await.unwrap();
    assert_eq!(ids(&response), vec!["c3.txt"]);
    assert_eq!(response.results[0].rerank_score, Some(1.0));
    assert!(response.reason.is_none());

    let response = pipeline.search_with("cat zebra", &lexical_only()).await.unwrap();
    assert_eq!(response.status, QueryStatus::Ok);
    assert!(response.results.is_empty());
    assert!(response.reason.is_some());
}

#[tokio::test]
async fn file_type_filter_applies_to_both_channels() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;
    pipeline.ingest("notes.md", "the cat in markdown").await.unwrap();
    pipeline.ingest("other.md", "nothing relevant here").await.unwrap();

    let unfiltered = pipeline.search_with("cat", &lexical_only()).await.unwrap();
    assert_eq!(ids(&unfiltered), vec!["c1.txt", "notes.md"]);

    let options = SearchOptions::default().with_file_type("MD");
    let filtered = pipeline.search_with("cat", &options).await.unwrap();
    assert!(!filtered.results.is_empty());
    assert!(filtered.results.iter().all(|r| r.provenance.file_type == "md"));
    assert_eq!(filtered.results[0].document_id, "notes.md");
}

#[tokio::test]
async fn expansion_reaches_spelled_out_terms() {
    let documents = [
        ("ml.txt", "machine learning models learn from data"),
        ("cooking.txt", "slow cooking recipes"),
    ];

    let plain = pipeline(RagConfig::default()).0;
    let config = RagConfig::builder().query_expansion(true).build().unwrap();
    let expanding = pipeline(config).0;
    for (id, text) in documents {
        plain.ingest(id, text).await.unwrap();
        expanding.ingest(id, text).await.unwrap();
    }

    let response = plain.search_with("ml", &lexical_only()).await.unwrap();
    assert_eq!(response.status, QueryStatus::NoCandidates);

    let response = expanding.search_with("ml", &lexical_only()).await.unwrap();
    assert_eq!(ids(&response), vec!["ml.txt"]);
    assert_eq!(response.query, "ml");
}

#[tokio::test]
async fn reciprocal_rank_fusion_scores_by_position() {
    let config = RagConfig::builder()
        .fusion_strategy(FusionStrategy::ReciprocalRank { k: 60.0 })
        .build()
        .unwrap();
    let (pipeline, _, _) = pipeline(config);
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("dogs", &lexical_only()).await.unwrap();

    assert_eq!(ids(&response), vec!["c2.txt", "c3.txt"]);
    assert!((response.results[0].fused_score - 1.0).abs() < 1e-6);
    assert!((response.results[1].fused_score - 61.0 / 62.0).abs() < 1e-6);
}

#[tokio::test]
async fn citations_reference_returned_chunks() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;

    let response = pipeline.search_with("cat", &lexical_only()).await.unwrap();
    let citations = response.format_citations();

    assert!(citations.starts_with("Sources:"));
    assert!(citations.contains("[1] c1.txt (chunk 1 of 1)"));
    assert!(citations.contains("Relevance: 100.00%"));
    assert!(citations.contains("\"the cat sat\""));
    assert_eq!(response.source_documents(), vec!["c1.txt"]);
}

#[tokio::test]
async fn results_reflect_removals() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    ingest_pets(&pipeline).await;
    pipeline.remove("c1.txt").await.unwrap();

    let response = pipeline.search_with("cat", &lexical_only()).await.unwrap();
    assert_eq!(response.status, QueryStatus::NoCandidates);

    let response = pipeline.search("cats and dogs").await.unwrap();
    assert!(response.results.iter().all(|r| r.document_id != "c1.txt"));
}

#[tokio::test]
async fn lone_lexical_match_is_returned() {
    let (pipeline, _, embedder) = pipeline(RagConfig::default());
    pipeline.ingest("a.txt", "zebra crossing").await.unwrap();

    let response = pipeline.search_with("zebra", &lexical_only()).await.unwrap();
    assert_eq!(response.status, QueryStatus::Ok);
    assert_eq!(ids(&response), vec!["a.txt"]);
    assert_eq!(response.results[0].fused_score, 0.0);

    embedder.fail.store(true, Ordering::SeqCst);
    let response = pipeline.search("zebra").await.unwrap();
    assert_eq!(response.status, QueryStatus::Ok);
    assert_eq!(response.degradations, vec![Degradation::SemanticUnavailable]);
    assert_eq!(ids(&response), vec!["a.txt"]);
}

#[tokio::test]
async fn equally_scored_lexical_matches_are_all_returned() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    pipeline.ingest("a.txt", "red fox").await.unwrap();
    pipeline.ingest("b.txt", "red fox").await.unwrap();

    let response = pipeline.search_with("fox", &lexical_only()).await.unwrap();
    assert_eq!(response.status, QueryStatus::Ok);
    assert_eq!(ids(&response), vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn file_type_filter_reaches_past_the_semantic_cut() {
    let (pipeline, _, _) = pipeline(RagConfig::default());
    for id in ["a.txt", "b.txt", "c.txt", "z.md"] {
        pipeline.ingest(id, "cat").await.unwrap();
    }

    // All four chunks tie semantically; id order puts the markdown chunk last.
    let options = SearchOptions::default()
        .with_weight(1.0)
        .with_n_candidates(2)
        .with_top_k(1)
        .with_file_type("md");
    let response = pipeline.search_with("cat", &options).await.unwrap();

    assert_eq!(response.status, QueryStatus::Ok);
    assert_eq!(ids(&response), vec!["z.md"]);
}
