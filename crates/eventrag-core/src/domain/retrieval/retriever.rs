use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    FusionWeights, GraphSearchResult, HybridSearchResult, SearchMetadata, SearchParams,
    VectorSearchResult, fuse, structural_score,
};
use crate::domain::embedding::Embedder;
use crate::domain::event::Event;
use crate::domain::store::{GraphStore, RecordKind, Subgraph, VectorRecord, VectorStore};
use crate::error::Result;
use crate::runtime::with_timeout;

/// Defaults for hybrid retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub vector_top_k: usize,
    pub graph_max_depth: u32,
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub graph_weight: f32,
    /// Deadline for each store call
    pub call_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_top_k: 10,
            graph_max_depth: 2,
            similarity_threshold: 0.7,
            vector_weight: 0.6,
            graph_weight: 0.4,
            call_timeout_secs: 30,
        }
    }
}

impl RetrievalConfig {
    /// Search parameters built from these defaults
    pub fn to_params(&self) -> SearchParams {
        SearchParams {
            vector_top_k: self.vector_top_k,
            graph_max_depth: self.graph_max_depth,
            similarity_threshold: self.similarity_threshold,
            fusion_weights: FusionWeights::new(self.vector_weight, self.graph_weight),
            exclude_query: true,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

/// Fused vector + graph retriever
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn graph_store(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Search parameters from the configured defaults
    pub fn default_params(&self) -> SearchParams {
        self.config.to_params()
    }

    /// Fused semantic + structural search around `query`
    ///
    /// Never fails: a store that errors or times out contributes nothing and
    /// its error is recorded in the result metadata.
    pub async fn search(&self, query: &Event, params: &SearchParams) -> HybridSearchResult {
        let start = Instant::now();
        let weights = params.fusion_weights.normalized();
        let mut errors = Vec::new();

        let embedding = self.embedder.embed(&query.embedding_text()).await;
        let degraded_embedding = embedding.is_zero();
        if degraded_embedding {
            warn!(event_id = %query.id, "Query embedding is the zero vector");
        }

        let mut vector_results = match self.vector_search(&embedding.vector, params).await {
            Ok(results) => results,
            Err(e) => {
                warn!(event_id = %query.id, error = %e, "Vector search failed");
                errors.push(format!("vector: {}", e));
                Vec::new()
            }
        };
        if params.exclude_query {
            vector_results.retain(|r| r.event.id != query.id);
        }

        let seeds: Vec<String> = vector_results.iter().map(|r| r.event.id.clone()).collect();
        let graph_results = if seeds.is_empty() {
            Vec::new()
        } else {
            match self.graph_search(&seeds, params.graph_max_depth).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(event_id = %query.id, error = %e, "Graph search failed");
                    errors.push(format!("graph: {}", e));
                    Vec::new()
                }
            }
        };

        let fused_results = fuse(&vector_results, &graph_results, weights);
        let search_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            event_id = %query.id,
            vector = vector_results.len(),
            graph = graph_results.len(),
            fused = fused_results.len(),
            elapsed_ms = search_time_ms,
            "Hybrid search completed"
        );

        HybridSearchResult {
            query_event: query.clone(),
            metadata: SearchMetadata {
                vector_count: vector_results.len(),
                graph_count: graph_results.len(),
                similarity_threshold: params.similarity_threshold,
                graph_max_depth: params.graph_max_depth,
                degraded_embedding,
                error: if errors.is_empty() {
                    None
                } else {
                    Some(errors.join("; "))
                },
            },
            total_results: fused_results.len(),
            vector_results,
            graph_results,
            fused_results,
            fusion_weights: weights,
            search_time_ms,
        }
    }

    /// Vector neighbours above the similarity threshold
    pub async fn vector_search(
        &self,
        vector: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<VectorSearchResult>> {
        if params.vector_top_k == 0 {
            return Ok(Vec::new());
        }

        let matches = with_timeout(
            "vector query",
            self.config.call_timeout(),
            self.vectors.query(vector, params.vector_top_k, RecordKind::Event),
        )
        .await?;

        Ok(matches
            .into_iter()
            .filter_map(|m| {
                let similarity = m.similarity();
                (similarity >= params.similarity_threshold).then(|| VectorSearchResult {
                    event: m.to_event(),
                    similarity_score: similarity,
                })
            })
            .collect())
    }

    /// Structural relevance for each seed found in the graph
    pub async fn graph_search(
        &self,
        seeds: &[String],
        max_depth: u32,
    ) -> Result<Vec<GraphSearchResult>> {
        let subgraphs = self.fetch_subgraphs(seeds, max_depth).await?;

        Ok(subgraphs
            .into_iter()
            .map(|subgraph| GraphSearchResult {
                event: subgraph.root.to_event(),
                structural_score: structural_score(
                    subgraph.edges.len(),
                    subgraph.related.len(),
                    max_depth,
                ),
                relations: subgraph.edges.clone(),
                subgraph,
            })
            .collect())
    }

    /// Raw neighbourhoods around `ids`, under the call timeout
    pub async fn fetch_subgraphs(&self, ids: &[String], max_depth: u32) -> Result<Vec<Subgraph>> {
        with_timeout(
            "graph query",
            self.config.call_timeout(),
            self.graph.fetch_subgraph(ids, max_depth),
        )
        .await
    }

    /// Index an event in the vector store
    ///
    /// Upserts by id, so re-adding an event replaces its previous entry.
    pub async fn add_event(&self, event: &Event) -> Result<()> {
        self.add_events(std::slice::from_ref(event)).await.map(|_| ())
    }

    /// Index several events in one upsert
    pub async fn add_events(&self, events: &[Event]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = events.iter().map(Event::embedding_text).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        let records = events
            .iter()
            .zip(embeddings)
            .map(|(event, embedding)| VectorRecord::for_event(event, embedding.vector))
            .collect::<Result<Vec<_>>>()?;

        with_timeout(
            "vector upsert",
            self.config.call_timeout(),
            self.vectors.upsert(records),
        )
        .await?;

        info!(count = events.len(), "Indexed events");
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::domain::embedding::HashEmbedder;
    use crate::domain::event::{EventRelation, RelationType};
    use crate::domain::store::VectorMatch;
    use crate::error::Error;
    use crate::infrastructure::memory::{InMemoryGraphStore, InMemoryVectorStore};

    struct FailingVectorStore;

    #[async_trait]
    impl VectorStore for FailingVectorStore {
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

    struct SlowVectorStore;

    #[async_trait]
    impl VectorStore for SlowVectorStore {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<()> {
            Ok(())
        }

        async fn query(&self, _: &[f32], _: usize, _: RecordKind) -> Result<Vec<VectorMatch>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn retriever_with(
        vectors: Arc<dyn VectorStore>,
        graph: Arc<InMemoryGraphStore>,
    ) -> HybridRetriever {
        HybridRetriever::new(Arc::new(HashEmbedder::default()), vectors, graph)
    }

    async fn flood_graph() -> (HybridRetriever, Arc<InMemoryGraphStore>) {
        let graph = Arc::new(InMemoryGraphStore::new());
        let retriever = retriever_with(Arc::new(InMemoryVectorStore::new()), graph.clone());

        let events = vec![
            Event::new("Heavy rain floods the river valley").with_id("rain").with_type("weather"),
            Event::new("River flooding closes the valley bridge").with_id("bridge").with_type("flood"),
            Event::new("Valley residents evacuate after river flooding").with_id("evac").with_type("flood"),
        ];
        for event in &events {
            graph.add_event(event).await.unwrap();
        }
        retriever.add_events(&events).await.unwrap();
        graph
            .add_relation(&EventRelation::new("rain", "bridge", RelationType::Causal).with_confidence(0.9))
            .await;
        graph
            .add_relation(&EventRelation::new("bridge", "evac", RelationType::TemporalBefore))
            .await;
        (retriever, graph)
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let retriever = retriever_with(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryGraphStore::new()),
        );
        let result = retriever
            .search(&Event::new("anything at all"), &SearchParams::default())
            .await;

        assert!(result.fused_results.is_empty());
        assert_eq!(result.total_results, 0);
        assert!(result.metadata.error.is_none());
    }

    #[tokio::test]
    async fn test_fused_score_is_weighted_sum() {
        let (retriever, _graph) = flood_graph().await;
        let params = SearchParams::default()
            .with_threshold(0.0)
            .with_weights(FusionWeights::new(3.0, 1.0));

        let result = retriever
            .search(&Event::new("River flooding in the valley"), &params)
            .await;

        assert!((result.fusion_weights.vector - 0.75).abs() < 1e-6);
        assert!(!result.fused_results.is_empty());
        assert!(result.graph_results.len() >= 1);
        for fused in &result.fused_results {
            let expected = fused.vector_score * result.fusion_weights.vector
                + fused.graph_score * result.fusion_weights.graph;
            assert!((fused.fused_score - expected).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&fused.fused_score));
        }
        for pair in result.fused_results.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }

    #[tokio::test]
    async fn test_query_event_is_excluded() {
        let (retriever, _graph) = flood_graph().await;
        let query = Event::new("River flooding closes the valley bridge").with_id("bridge");
        let params = SearchParams::default().with_threshold(0.0);

        let result = retriever.search(&query, &params).await;
        assert!(result.fused_results.iter().all(|r| r.event.id != "bridge"));

        let params = SearchParams {
            exclude_query: false,
            ..params
        };
        let result = retriever.search(&query, &params).await;
        assert_eq!(result.fused_results[0].event.id, "bridge");
    }

    #[tokio::test]
    async fn test_failing_vector_store_degrades() {
        let retriever = retriever_with(Arc::new(FailingVectorStore), Arc::new(InMemoryGraphStore::new()));
        let result = retriever
            .search(&Event::new("River flooding"), &SearchParams::default())
            .await;

        assert!(result.fused_results.is_empty());
        let error = result.metadata.error.unwrap();
        assert!(error.starts_with("vector:"));
        assert!(retriever.add_event(&Event::new("x")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_vector_store_times_out() {
        let retriever = retriever_with(Arc::new(SlowVectorStore), Arc::new(InMemoryGraphStore::new()))
            .with_config(RetrievalConfig {
                call_timeout_secs: 5,
                ..RetrievalConfig::default()
            });

        let result = retriever
            .search(&Event::new("River flooding"), &SearchParams::default())
            .await;
        assert!(result.fused_results.is_empty());
        assert!(result.metadata.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_add_event_is_idempotent() {
        let (retriever, _graph) = flood_graph().await;
        let before = retriever.vector_store().count().await.unwrap();
        retriever
            .add_event(&Event::new("Heavy rain floods the river valley").with_id("rain"))
            .await
            .unwrap();
        assert_eq!(retriever.vector_store().count().await.unwrap(), before);
    }
}
