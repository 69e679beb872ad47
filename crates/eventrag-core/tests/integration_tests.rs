//! Eventrag Core Integration Tests
//!
//! End-to-end checks of the engine over the in-memory and SQLite backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use eventrag_core::config::StorageBackend;
use eventrag_core::domain::coordinator::HealthStatus;
use eventrag_core::domain::enhancement::EnhancementConfig;
use eventrag_core::domain::retrieval::FusionWeights;
use eventrag_core::domain::store::{RecordKind, Subgraph, VectorMatch, VectorRecord};
use eventrag_core::prelude::*;

// ========== Helpers ==========

fn engine_with(config: Config, graph: Arc<dyn GraphStore>) -> Engine {
    Engine::from_config(
        config,
        Arc::new(HashEmbedder::default()),
        Arc::new(InMemoryVectorStore::new()),
        graph,
    )
    .unwrap()
}

fn memory_engine(config: Config) -> Engine {
    engine_with(config, Arc::new(InMemoryGraphStore::new()))
}

fn report(id: &str, sentiment: &str) -> Event {
    Event::new("Quarterly earnings beat expectations")
        .with_id(id)
        .with_type("earnings")
        .with_property("sentiment", sentiment)
        .with_property("location", "New York")
}

fn quake(id: &str) -> Event {
    Event::new("Earthquake strikes coastal city")
        .with_id(id)
        .with_type("disaster")
        .with_entities(["coastal city"])
}

struct UnreachableGraphStore;

#[async_trait]
impl GraphStore for UnreachableGraphStore {
    async fn fetch_subgraph(&self, _ids: &[String], _max_depth: u32) -> Result<Vec<Subgraph>> {
        Err(Error::GraphStore("connection refused".to_string()))
    }

    async fn write_node(&self, _kind: &str, _properties: Map<String, Value>) -> Result<()> {
        Err(Error::GraphStore("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

struct UnreachableVectorStore;

#[async_trait]
impl VectorStore for UnreachableVectorStore {
    async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<()> {
        Err(Error::VectorStore("connection refused".to_string()))
    }

    async fn query(&self, _: &[f32], _: usize, _: RecordKind) -> Result<Vec<VectorMatch>> {
        Err(Error::VectorStore("connection refused".to_string()))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::VectorStore("connection refused".to_string()))
    }
}

/// Hash embeddings that start sleeping once the fast-call budget runs out
struct StallingEmbedder {
    inner: HashEmbedder,
    fast_calls: AtomicUsize,
}

impl StallingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::default(),
            fast_calls: AtomicUsize::new(usize::MAX),
        }
    }

    fn stall_after(&self, calls: usize) {
        self.fast_calls.store(calls, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for StallingEmbedder {
    async fn embed(&self, text: &str) -> Embedding {
        let budget = self
            .fast_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if budget.is_err() {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

// ========== Retrieval ==========

#[tokio::test]
async fn test_retrieval_on_empty_store() {
    let engine = memory_engine(Config::default());

    let response = engine
        .process_query(&Query::retrieval("Any news about floods?"))
        .await;

    assert_eq!(response.status, QueryStatus::Success);
    assert!(response.retrieved_events.is_empty());
    assert_eq!(response.confidence("retrieval"), Some(0.0));
    assert!(response.error_message.is_none());
}

#[tokio::test]
async fn test_retrieval_finds_indexed_event() {
    let engine = memory_engine(Config::default());
    engine.retriever().add_event(&quake("q1")).await.unwrap();

    let response = engine
        .process_query(&Query::retrieval("Earthquake strikes coastal city").with_id("abc"))
        .await;

    assert_eq!(response.query_id, "abc");
    assert_eq!(response.status, QueryStatus::Success);
    assert_eq!(response.retrieved_events.len(), 1);
    assert_eq!(response.retrieved_events[0].id, "q1");
    let search = response.metadata.search.as_ref().unwrap();
    assert_eq!(search.vector_count, 1);
    assert!(search.error.is_none());
}

#[tokio::test]
async fn test_retrieval_requires_text() {
    let engine = memory_engine(Config::default());

    let response = engine.process_query(&Query::retrieval("   ")).await;

    assert_eq!(response.status, QueryStatus::Failed);
    assert!(response.error_message.unwrap().contains("text"));
}

#[tokio::test]
async fn test_fused_scores_follow_weights() {
    let engine = memory_engine(Config::default());
    engine
        .retriever()
        .add_events(&[quake("q1"), quake("q2"), report("r1", "positive")])
        .await
        .unwrap();

    let params = SearchParams::default()
        .with_threshold(0.0)
        .with_weights(FusionWeights::new(2.0, 2.0));
    let query = Event::new("Earthquake strikes coastal city");
    let result = engine.retriever().search(&query, &params).await;

    assert_eq!(result.fusion_weights.vector, 0.5);
    assert_eq!(result.fusion_weights.graph, 0.5);
    assert!(!result.fused_results.is_empty());
    for fused in &result.fused_results {
        let expected = 0.5 * fused.vector_score + 0.5 * fused.graph_score;
        assert!((fused.fused_score - expected).abs() < 1e-5);
    }
    for pair in result.fused_results.windows(2) {
        assert!(pair[0].fused_score >= pair[1].fused_score);
    }
}

#[tokio::test]
async fn test_add_event_is_idempotent() {
    let engine = memory_engine(Config::default());
    let event = quake("q1");

    engine.retriever().add_event(&event).await.unwrap();
    engine.retriever().add_event(&event).await.unwrap();

    assert_eq!(engine.retriever().vector_store().count().await.unwrap(), 1);
}

// ========== Enhancement ==========

#[tokio::test]
async fn test_enhancement_infers_majority_value() {
    let mut config = Config::default();
    config.enhancement = EnhancementConfig::semantic_only();
    let engine = memory_engine(config);
    engine
        .retriever()
        .add_events(&[
            report("h1", "positive"),
            report("h2", "positive"),
            report("h3", "positive"),
            report("h4", "positive"),
            report("h5", "negative"),
        ])
        .await
        .unwrap();

    let incomplete = IncompleteEvent::new(
        Event::new("Quarterly earnings beat expectations").with_type("earnings"),
        ["sentiment"],
    );
    let response = engine
        .process_query(&Query::enhancement(vec![incomplete]))
        .await;

    assert_eq!(response.status, QueryStatus::Success);
    assert_eq!(response.enhanced_events.len(), 1);
    let enhanced = &response.enhanced_events[0];
    assert_eq!(enhanced.enhanced_attributes["sentiment"], "positive");
    assert_eq!(enhanced.inference_sources["sentiment"].len(), 4);
    assert_eq!(enhanced.validation_results.get("sentiment"), Some(&true));
    assert!(enhanced.total_confidence > 0.5);
    assert_eq!(enhanced.completed_event().attribute("sentiment"), Some(Value::from("positive")));
    assert!(response.confidence("enhancement").unwrap() > 0.5);

    let stats = response.metadata.enhancement_stats.unwrap();
    assert_eq!(stats.total_events, 1);
    assert_eq!(stats.failed_events, 0);
}

#[tokio::test]
async fn test_enhancement_without_events_fails() {
    let engine = memory_engine(Config::default());

    let response = engine.process_query(&Query::enhancement(Vec::new())).await;

    assert_eq!(response.status, QueryStatus::Failed);
    assert!(response.error_message.unwrap().contains("incomplete_events"));
    assert!(response.enhanced_events.is_empty());
}

// ========== Pattern discovery ==========

#[tokio::test]
async fn test_near_duplicates_form_one_cluster() {
    let engine = memory_engine(Config::default());
    let events = vec![quake("q1"), quake("q2"), quake("q3")];

    let clusters = engine
        .coordinator()
        .discoverer()
        .cluster_events(&events, ClusterMethod::Kmeans)
        .await
        .unwrap();

    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 3);
    assert!(clusters[0].intra_cluster_similarity > 0.99);
    assert_eq!(clusters[0].label, "cluster_0_disaster");
}

#[tokio::test]
async fn test_discovery_without_targets_fails() {
    let engine = memory_engine(Config::default());

    let response = engine
        .process_query(&Query::pattern_discovery(Vec::new()))
        .await;

    assert_eq!(response.status, QueryStatus::Failed);
    assert!(response.error_message.unwrap().contains("target_events"));
}

#[tokio::test]
async fn test_discovered_pattern_is_searchable() {
    let mut config = Config::default();
    config.discovery.semantic_threshold = 0.0;
    let engine = memory_engine(config);
    let events = vec![quake("q1"), quake("q2"), quake("q3")];

    let response = engine
        .process_query(&Query::pattern_discovery(events))
        .await;
    assert_eq!(response.status, QueryStatus::Success);
    assert!(!response.discovered_patterns.is_empty());
    let summary = response.metadata.discovery.as_ref().unwrap();
    assert!(summary.persistence_failures.is_empty());

    let pattern = &response.discovered_patterns[0];
    let found = engine
        .coordinator()
        .discoverer()
        .search_patterns(&pattern.embedding_text(), 10)
        .await;
    assert!(found.iter().any(|p| p.pattern_id == pattern.pattern_id));

    let stored = engine.coordinator().discoverer().patterns().await.unwrap();
    assert!(stored.iter().any(|p| p.pattern_id == pattern.pattern_id));
}

#[tokio::test]
async fn test_search_patterns_degrades_to_empty() {
    let engine = Engine::from_config(
        Config::default(),
        Arc::new(HashEmbedder::default()),
        Arc::new(UnreachableVectorStore),
        Arc::new(InMemoryGraphStore::new()),
    )
    .unwrap();

    let found = engine
        .coordinator()
        .discoverer()
        .search_patterns("earthquake", 5)
        .await;
    assert!(found.is_empty());
}

// ========== Comprehensive ==========

#[tokio::test]
async fn test_comprehensive_without_incomplete_events() {
    let engine = memory_engine(Config::default());
    engine
        .retriever()
        .add_events(&[quake("q1"), quake("q2")])
        .await
        .unwrap();

    let response = engine
        .process_query(&Query::comprehensive("Earthquake strikes coastal city"))
        .await;

    assert_eq!(response.status, QueryStatus::Success);
    assert!(response.enhanced_events.is_empty());
    assert_eq!(response.retrieved_events.len(), 2);
    assert!(response.metadata.discovery.is_some());
    assert!(response.confidence("comprehensive").is_some());
    for score in response.confidence_scores.values() {
        assert!((0.0..=1.0).contains(score));
    }
}

#[tokio::test]
async fn test_comprehensive_runs_every_stage() {
    let mut config = Config::default();
    config.enhancement = EnhancementConfig::semantic_only();
    let engine = memory_engine(config);
    engine
        .retriever()
        .add_events(&[
            report("h1", "positive"),
            report("h2", "positive"),
            report("h3", "negative"),
        ])
        .await
        .unwrap();

    let incomplete = IncompleteEvent::new(
        Event::new("Quarterly earnings beat expectations").with_type("earnings"),
        ["sentiment"],
    );
    let query = Query::comprehensive("Quarterly earnings beat expectations")
        .with_incomplete_events(vec![incomplete]);
    let response = engine.process_query(&query).await;

    assert_eq!(response.status, QueryStatus::Success);
    assert_eq!(
        response.metadata.stages_run,
        vec!["retrieval", "enhancement", "pattern_discovery"]
    );
    assert_eq!(response.enhanced_events.len(), 1);
    for score in response.confidence_scores.values() {
        assert!((0.0..=1.0).contains(score));
    }
}

#[tokio::test]
async fn test_comprehensive_stage_timeout_is_partial() {
    let mut config = Config::default();
    config.coordinator.stage_timeout_secs = 1;
    let embedder = Arc::new(StallingEmbedder::new());
    let engine = Engine::from_config(
        config,
        embedder.clone(),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryGraphStore::new()),
    )
    .unwrap();
    engine
        .retriever()
        .add_events(&[quake("q1"), quake("q2"), quake("q3"), quake("q4")])
        .await
        .unwrap();

    // Only the retrieval query embedding stays fast
    embedder.stall_after(1);
    let response = engine
        .process_query(&Query::comprehensive("Earthquake strikes coastal city"))
        .await;

    assert_eq!(response.status, QueryStatus::Partial);
    assert_eq!(response.retrieved_events.len(), 4);
    let error = &response.metadata.stage_errors["pattern_discovery"];
    assert!(error.contains("timed out"));
    assert!(response.error_message.as_ref().unwrap().starts_with("pattern_discovery:"));
    assert!(response.discovered_patterns.is_empty());
    assert!(response.confidence("retrieval").is_some());
    assert!(response.confidence("comprehensive").is_some());
    assert!(response.confidence("pattern_discovery").is_none());
    assert_eq!(engine.coordinator().stats().await.partial_queries, 1);
}

// ========== Degradation ==========

#[tokio::test]
async fn test_unreachable_graph_store_degrades() {
    let engine = engine_with(Config::default(), Arc::new(UnreachableGraphStore));
    engine
        .retriever()
        .add_events(&[quake("q1"), quake("q2")])
        .await
        .unwrap();

    let response = engine
        .process_query(&Query::comprehensive("Earthquake strikes coastal city"))
        .await;

    assert_eq!(response.status, QueryStatus::Success);
    assert_eq!(response.retrieved_events.len(), 2);
    let search = response.metadata.search.as_ref().unwrap();
    assert!(search.error.as_ref().unwrap().starts_with("graph:"));
    let discovery = response.metadata.discovery.as_ref().unwrap();
    assert!(discovery.graph_error.is_some());

    let health = engine.coordinator().health_check().await;
    assert_eq!(health.overall_status, HealthStatus::Error);
}

#[tokio::test]
async fn test_unreachable_vector_store_degrades() {
    let engine = Engine::from_config(
        Config::default(),
        Arc::new(HashEmbedder::default()),
        Arc::new(UnreachableVectorStore),
        Arc::new(InMemoryGraphStore::new()),
    )
    .unwrap();

    let response = engine
        .process_query(&Query::retrieval("Earthquake strikes coastal city"))
        .await;

    assert_eq!(response.status, QueryStatus::Success);
    assert!(response.retrieved_events.is_empty());
    let search = response.metadata.search.unwrap();
    assert!(search.error.unwrap().starts_with("vector:"));
}

// ========== Coordination ==========

#[tokio::test]
async fn test_batch_preserves_order_and_counts_stats() {
    let engine = memory_engine(Config::default());
    engine.retriever().add_event(&quake("q1")).await.unwrap();

    let queries = vec![
        Query::retrieval("Earthquake strikes coastal city").with_id("first"),
        Query::enhancement(Vec::new()).with_id("second"),
        Query::retrieval("Quarterly earnings").with_id("third"),
    ];
    let responses = engine.coordinator().batch_process_queries(&queries).await;

    let ids: Vec<&str> = responses.iter().map(|r| r.query_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
    assert_eq!(responses[1].status, QueryStatus::Failed);

    let stats = engine.coordinator().stats().await;
    assert_eq!(stats.total_queries, 3);
    assert_eq!(stats.successful_queries, 2);
    assert_eq!(stats.failed_queries, 1);

    engine.coordinator().reset_stats().await;
    assert_eq!(engine.coordinator().stats().await.total_queries, 0);
}

#[tokio::test]
async fn test_cancelled_query_fails() {
    let engine = memory_engine(Config::default());
    let token = CancellationToken::new();
    token.cancel();

    let response = engine
        .coordinator()
        .process_query_with_cancel(&Query::retrieval("Earthquake"), token)
        .await;

    assert_eq!(response.status, QueryStatus::Failed);
    assert_eq!(response.error_message.as_deref(), Some("Query cancelled"));
}

#[tokio::test]
async fn test_sqlite_backend_persists_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eventrag.db");

    let mut config = Config::default();
    config.embedding.dimension = 128;
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.database_path = Some(path.clone());

    let engine = Engine::open(config.clone()).await.unwrap();
    engine.retriever().add_event(&quake("q1")).await.unwrap();
    engine.close().await;

    let reopened = Engine::open(config).await.unwrap();
    let response = reopened
        .process_query(&Query::retrieval("Earthquake strikes coastal city"))
        .await;
    assert_eq!(response.status, QueryStatus::Success);
    assert_eq!(response.retrieved_events.len(), 1);
    assert_eq!(response.retrieved_events[0].id, "q1");
    reopened.close().await;
}

#[test]
fn test_error_codes() {
    let err = Error::MissingQueryField {
        kind: "enhancement",
        field: "incomplete_events",
    };
    assert_eq!(err.code(), "E001");

    let err = Error::GraphStore("down".to_string());
    assert_eq!(err.code(), "E201");

    let err = Error::Cancelled;
    assert_eq!(err.code(), "E301");

    let err = Error::ConfigError("bad".to_string());
    assert_eq!(err.code(), "E600");
}
