use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health::{HealthCheck, HealthReport};
use super::stats::QueryStats;
use super::{
    DiscoverySummary, Query, QueryKind, QueryParameters, QueryStatus, Response, SearchSummary,
};
use crate::domain::enhancement::{AttributeEnhancer, AttributeStatistics};
use crate::domain::event::{Event, IncompleteEvent};
use crate::domain::patterns::{DiscoveryOptions, PatternDiscoverer};
use crate::domain::retrieval::{FusionWeights, HybridRetriever, SearchParams};
use crate::error::{Error, Result};
use crate::runtime::WorkerPool;

const RETRIEVAL: &str = "retrieval";
const ENHANCEMENT: &str = "enhancement";
const PATTERN_DISCOVERY: &str = "pattern_discovery";
const COMPREHENSIVE: &str = "comprehensive";

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stages allowed to run at once
    pub max_workers: usize,
    /// Deadline for one stage
    pub stage_timeout_secs: u64,
    pub default_top_k: usize,
    pub default_vector_weight: f32,
    pub default_graph_weight: f32,
    pub default_similarity_threshold: f32,
    pub default_graph_max_depth: u32,
    /// Stage weights for the comprehensive confidence
    pub retrieval_weight: f32,
    pub enhancement_weight: f32,
    pub discovery_weight: f32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            stage_timeout_secs: 300,
            default_top_k: 10,
            default_vector_weight: 0.7,
            default_graph_weight: 0.3,
            default_similarity_threshold: 0.7,
            default_graph_max_depth: 2,
            retrieval_weight: 0.4,
            enhancement_weight: 0.3,
            discovery_weight: 0.3,
        }
    }
}

impl CoordinatorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }
}

/// Routes queries to retrieval, enhancement and discovery
pub struct GraphRagCoordinator {
    retriever: Arc<HybridRetriever>,
    enhancer: Arc<AttributeEnhancer>,
    discoverer: Arc<PatternDiscoverer>,
    pool: WorkerPool,
    config: CoordinatorConfig,
    stats: Mutex<QueryStats>,
}

impl GraphRagCoordinator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        enhancer: Arc<AttributeEnhancer>,
        discoverer: Arc<PatternDiscoverer>,
    ) -> Self {
        let config = CoordinatorConfig::default();
        Self {
            retriever,
            enhancer,
            discoverer,
            pool: WorkerPool::new(config.max_workers, config.stage_timeout()),
            config,
            stats: Mutex::new(QueryStats::default()),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.pool = WorkerPool::new(config.max_workers, config.stage_timeout());
        self.config = config;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn enhancer(&self) -> &Arc<AttributeEnhancer> {
        &self.enhancer
    }

    pub fn discoverer(&self) -> &Arc<PatternDiscoverer> {
        &self.discoverer
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Process one query
    ///
    /// Never fails: errors are reported through the response status and
    /// `error_message`.
    pub async fn process_query(&self, query: &Query) -> Response {
        let start = Instant::now();
        info!(query_id = %query.id, kind = %query.kind, "Processing query");

        let mut response = Response::new(&query.id);
        response.metadata.query_kind = Some(query.kind);

        match self.dispatch(query, &mut response).await {
            Ok(status) => response.status = status,
            Err(e) => {
                warn!(query_id = %query.id, code = e.code(), error = %e, "Query failed");
                response.status = QueryStatus::Failed;
                response.error_message = Some(e.to_string());
            }
        }

        self.finish(&mut response, start).await;
        response
    }

    /// Process a query that can be abandoned through `token`
    ///
    /// On cancellation the in-flight stage is aborted and a failed response
    /// is returned.
    pub async fn process_query_with_cancel(
        &self,
        query: &Query,
        token: CancellationToken,
    ) -> Response {
        let start = Instant::now();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!(query_id = %query.id, "Query cancelled");
                let mut response = Response::new(&query.id);
                response.metadata.query_kind = Some(query.kind);
                response.status = QueryStatus::Failed;
                response.error_message = Some(Error::Cancelled.to_string());
                self.finish(&mut response, start).await;
                response
            }
            response = self.process_query(query) => response,
        }
    }

    /// Process queries concurrently, bounded by the worker pool
    ///
    /// Responses are returned in input order.
    pub async fn batch_process_queries(&self, queries: &[Query]) -> Vec<Response> {
        info!(count = queries.len(), "Processing query batch");
        join_all(queries.iter().map(|q| self.process_query(q))).await
    }

    pub async fn stats(&self) -> QueryStats {
        self.stats.lock().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.lock().await = QueryStats::default();
    }

    /// Probe the graph store, vector store and embedder
    pub async fn health_check(&self) -> HealthReport {
        let graph = match self.retriever.graph_store().health_check().await {
            Ok(true) => HealthCheck::ok("graph_store", "reachable"),
            Ok(false) => HealthCheck::error("graph_store", "unreachable"),
            Err(e) => HealthCheck::error("graph_store", e.to_string()),
        };

        let vectors = match self.retriever.vector_store().count().await {
            Ok(0) => HealthCheck::warning("vector_store", "no records indexed"),
            Ok(n) => HealthCheck::ok("vector_store", format!("{} records", n)),
            Err(e) => HealthCheck::error("vector_store", e.to_string()),
        };

        let embedder = self.retriever.embedder();
        let embedder = HealthCheck::ok(
            "embedder",
            format!("{} ({} dimensions)", embedder.model_name(), embedder.dimension()),
        );

        let report = HealthReport::from_checks(vec![graph, vectors, embedder]);
        debug!(status = ?report.overall_status, "Health check completed");
        report
    }

    // ========== Dispatch ==========

    async fn dispatch(&self, query: &Query, response: &mut Response) -> Result<QueryStatus> {
        match query.kind {
            QueryKind::Retrieval => {
                self.retrieve(query, QueryKind::Retrieval, response).await?;
                Ok(QueryStatus::Success)
            }
            QueryKind::Enhancement => {
                self.enhance(&query.incomplete_events, &query.parameters, response)
                    .await?;
                Ok(QueryStatus::Success)
            }
            QueryKind::PatternDiscovery => {
                self.discover(&query.target_events, &query.parameters, response)
                    .await?;
                Ok(QueryStatus::Success)
            }
            QueryKind::Comprehensive => self.comprehensive(query, response).await,
        }
    }

    async fn comprehensive(&self, query: &Query, response: &mut Response) -> Result<QueryStatus> {
        self.retrieve(query, QueryKind::Comprehensive, response).await?;

        if !query.incomplete_events.is_empty()
            && let Err(e) = self
                .enhance(&query.incomplete_events, &query.parameters, response)
                .await
        {
            warn!(query_id = %query.id, stage = ENHANCEMENT, error = %e, "Stage failed");
            response
                .metadata
                .stage_errors
                .insert(ENHANCEMENT.to_string(), e.to_string());
        }

        if !response.retrieved_events.is_empty() {
            let retrieved = response.retrieved_events.clone();
            if let Err(e) = self.discover(&retrieved, &query.parameters, response).await {
                warn!(query_id = %query.id, stage = PATTERN_DISCOVERY, error = %e, "Stage failed");
                response
                    .metadata
                    .stage_errors
                    .insert(PATTERN_DISCOVERY.to_string(), e.to_string());
            }
        }

        let comprehensive = self.comprehensive_confidence(response);
        response
            .confidence_scores
            .insert(COMPREHENSIVE.to_string(), comprehensive);

        if response.metadata.stage_errors.is_empty() {
            Ok(QueryStatus::Success)
        } else {
            response.error_message = Some(
                response
                    .metadata
                    .stage_errors
                    .iter()
                    .map(|(stage, e)| format!("{}: {}", stage, e))
                    .collect::<Vec<_>>()
                    .join("; "),
            );
            Ok(QueryStatus::Partial)
        }
    }

    // ========== Stages ==========

    fn search_params(&self, parameters: &QueryParameters) -> SearchParams {
        SearchParams {
            vector_top_k: parameters.top_k.unwrap_or(self.config.default_top_k),
            graph_max_depth: parameters
                .graph_max_depth
                .unwrap_or(self.config.default_graph_max_depth),
            similarity_threshold: parameters
                .similarity_threshold
                .unwrap_or(self.config.default_similarity_threshold),
            fusion_weights: FusionWeights::new(
                parameters
                    .vector_weight
                    .unwrap_or(self.config.default_vector_weight),
                parameters
                    .graph_weight
                    .unwrap_or(self.config.default_graph_weight),
            ),
            exclude_query: true,
        }
    }

    async fn retrieve(&self, query: &Query, kind: QueryKind, response: &mut Response) -> Result<()> {
        if query.text.trim().is_empty() {
            return Err(Error::MissingQueryField {
                kind: kind.as_str(),
                field: "text",
            });
        }

        let params = self.search_params(&query.parameters);
        let event = Event::new(query.text.clone()).with_id(format!("query-{}", query.id));
        let retriever = self.retriever.clone();
        let stage_params = params.clone();
        let result = self
            .pool
            .run(RETRIEVAL, async move {
                Ok(retriever.search(&event, &stage_params).await)
            })
            .await?;

        let count = result.fused_results.len();
        let mut confidence = (count as f32 / 10.0).min(1.0);
        if let Some(similarity) = result.mean_vector_similarity() {
            confidence = (confidence + similarity) / 2.0;
        }

        response.retrieved_events = result.events();
        response
            .confidence_scores
            .insert(RETRIEVAL.to_string(), confidence.clamp(0.0, 1.0));
        response.metadata.search = Some(SearchSummary {
            top_k: params.vector_top_k,
            vector_weight: result.fusion_weights.vector,
            graph_weight: result.fusion_weights.graph,
            similarity_threshold: params.similarity_threshold,
            graph_max_depth: params.graph_max_depth,
            vector_count: result.metadata.vector_count,
            graph_count: result.metadata.graph_count,
            search_time_ms: result.search_time_ms,
            error: result.metadata.error.clone(),
        });
        response.metadata.stages_run.push(RETRIEVAL.to_string());
        debug!(query_id = %query.id, count, "Retrieval stage completed");
        Ok(())
    }

    async fn enhance(
        &self,
        incomplete_events: &[IncompleteEvent],
        parameters: &QueryParameters,
        response: &mut Response,
    ) -> Result<()> {
        if incomplete_events.is_empty() {
            return Err(Error::MissingQueryField {
                kind: ENHANCEMENT,
                field: "incomplete_events",
            });
        }

        let threshold = parameters
            .enhancement_threshold
            .unwrap_or(self.enhancer.config().similarity_threshold);
        let min_sources = parameters
            .min_sources
            .unwrap_or(self.enhancer.config().min_sources);
        let enhancer = self.enhancer.clone();
        let events = incomplete_events.to_vec();
        let enhanced = self
            .pool
            .run(ENHANCEMENT, async move {
                Ok(enhancer
                    .batch_enhance_events_with(&events, threshold, min_sources)
                    .await)
            })
            .await?;

        let confidence = if enhanced.is_empty() {
            0.0
        } else {
            enhanced.iter().map(|e| e.total_confidence).sum::<f32>() / enhanced.len() as f32
        };

        response.metadata.enhancement_stats = Some(AttributeStatistics::from_events(&enhanced));
        response
            .confidence_scores
            .insert(ENHANCEMENT.to_string(), confidence.clamp(0.0, 1.0));
        debug!(count = enhanced.len(), confidence, "Enhancement stage completed");
        response.enhanced_events = enhanced;
        response.metadata.stages_run.push(ENHANCEMENT.to_string());
        Ok(())
    }

    async fn discover(
        &self,
        target_events: &[Event],
        parameters: &QueryParameters,
        response: &mut Response,
    ) -> Result<()> {
        if target_events.is_empty() {
            return Err(Error::MissingQueryField {
                kind: PATTERN_DISCOVERY,
                field: "target_events",
            });
        }

        let options = DiscoveryOptions {
            cluster_method: parameters.cluster_method.unwrap_or_default(),
            frequency_threshold: parameters
                .frequency_threshold
                .unwrap_or(self.discoverer.config().frequency_threshold),
            min_support: parameters.min_support,
            min_confidence: parameters.min_confidence,
        };
        let discoverer = self.discoverer.clone();
        let events = target_events.to_vec();
        let stage_options = options.clone();
        let report = self
            .pool
            .run(PATTERN_DISCOVERY, async move {
                discoverer.discover_with(&events, &stage_options).await
            })
            .await?;

        let confidence = if report.patterns.is_empty() {
            0.0
        } else {
            report.patterns.iter().map(|p| p.confidence).sum::<f32>() / report.patterns.len() as f32
        };

        response.metadata.discovery = Some(DiscoverySummary {
            total_events: target_events.len(),
            cluster_method: options.cluster_method.as_str().to_string(),
            frequency_threshold: options.frequency_threshold,
            min_support: options.effective_min_support(self.discoverer.config()),
            min_confidence: options.effective_min_confidence(),
            clusters: report.clusters.len(),
            subgraphs: report.subgraphs.len(),
            candidates: report.candidates,
            rejected: report.rejected,
            persistence_failures: report.persistence_failures,
            graph_error: report.graph_error,
        });
        response
            .confidence_scores
            .insert(PATTERN_DISCOVERY.to_string(), confidence.clamp(0.0, 1.0));
        debug!(patterns = report.patterns.len(), confidence, "Discovery stage completed");
        response.discovered_patterns = report.patterns;
        response.metadata.stages_run.push(PATTERN_DISCOVERY.to_string());
        Ok(())
    }

    /// Weighted mean over the stages that produced a confidence
    fn comprehensive_confidence(&self, response: &Response) -> f32 {
        let weights = [
            (RETRIEVAL, self.config.retrieval_weight),
            (ENHANCEMENT, self.config.enhancement_weight),
            (PATTERN_DISCOVERY, self.config.discovery_weight),
        ];
        let (sum, total) = weights
            .iter()
            .filter_map(|(stage, w)| response.confidence(stage).map(|c| (c * w, *w)))
            .fold((0.0, 0.0), |(s, t), (cw, w)| (s + cw, t + w));
        if total > 0.0 { (sum / total).clamp(0.0, 1.0) } else { 0.0 }
    }

    async fn finish(&self, response: &mut Response, start: Instant) {
        response.execution_time_secs = start.elapsed().as_secs_f64();
        self.stats
            .lock()
            .await
            .record(response.status, response.execution_time_secs);
        info!(
            query_id = %response.query_id,
            status = response.status.as_str(),
            elapsed_secs = response.execution_time_secs,
            "Query finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::embedding::HashEmbedder;
    use crate::domain::enhancement::EnhancementConfig;
    use crate::domain::event::Event;
    use crate::infrastructure::memory::{InMemoryGraphStore, InMemoryVectorStore};

    async fn coordinator(history: &[Event]) -> GraphRagCoordinator {
        let graph = Arc::new(InMemoryGraphStore::new());
        for event in history {
            graph.add_event(event).await.unwrap();
        }
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            graph,
        ));
        retriever.add_events(history).await.unwrap();
        let enhancer = Arc::new(
            AttributeEnhancer::new(retriever.clone()).with_config(EnhancementConfig::semantic_only()),
        );
        let discoverer = Arc::new(PatternDiscoverer::new(retriever.clone()));
        GraphRagCoordinator::new(retriever, enhancer, discoverer)
    }

    fn flood_reports() -> Vec<Event> {
        (0..4)
            .map(|i| {
                Event::new("River flooding forces evacuation")
                    .with_id(format!("flood-{}", i))
                    .with_type("flood")
                    .with_property("sentiment", "negative")
            })
            .collect()
    }

    #[tokio::test]
    async fn test_retrieval_query() {
        let coordinator = coordinator(&flood_reports()).await;
        let response = coordinator
            .process_query(&Query::retrieval("River flooding forces evacuation"))
            .await;

        assert_eq!(response.status, QueryStatus::Success);
        assert_eq!(response.retrieved_events.len(), 4);
        let confidence = response.confidence(RETRIEVAL).unwrap();
        assert!(confidence > 0.0 && confidence <= 1.0);
        let search = response.metadata.search.unwrap();
        assert_eq!(search.top_k, 10);
        assert!((search.vector_weight - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_parameters_override_defaults() {
        let coordinator = coordinator(&flood_reports()).await;
        let query = Query::retrieval("River flooding forces evacuation").with_parameters(
            QueryParameters {
                top_k: Some(2),
                vector_weight: Some(1.0),
                graph_weight: Some(0.0),
                ..QueryParameters::default()
            },
        );
        let response = coordinator.process_query(&query).await;
        assert_eq!(response.retrieved_events.len(), 2);
        assert_eq!(response.metadata.search.unwrap().graph_weight, 0.0);
    }

    #[tokio::test]
    async fn test_enhancement_requires_incomplete_events() {
        let coordinator = coordinator(&[]).await;
        let response = coordinator
            .process_query(&Query::new(QueryKind::Enhancement, "fill gaps"))
            .await;
        assert_eq!(response.status, QueryStatus::Failed);
        assert!(response
            .error_message
            .unwrap()
            .contains("incomplete_events"));
    }

    #[tokio::test]
    async fn test_discovery_requires_target_events() {
        let coordinator = coordinator(&[]).await;
        let response = coordinator
            .process_query(&Query::new(QueryKind::PatternDiscovery, "patterns"))
            .await;
        assert_eq!(response.status, QueryStatus::Failed);
        assert!(response.error_message.unwrap().contains("target_events"));
    }

    #[tokio::test]
    async fn test_discovery_summary_reports_applied_floors() {
        let coordinator = coordinator(&flood_reports()).await;

        let response = coordinator
            .process_query(&Query::pattern_discovery(flood_reports()))
            .await;
        let summary = response.metadata.discovery.unwrap();
        assert_eq!(
            summary.min_support,
            coordinator.discoverer().config().min_pattern_support
        );
        assert_eq!(summary.min_confidence, 0.0);

        let query = Query::pattern_discovery(flood_reports()).with_parameters(QueryParameters {
            min_support: Some(0.4),
            min_confidence: Some(0.25),
            ..QueryParameters::default()
        });
        let summary = coordinator
            .process_query(&query)
            .await
            .metadata
            .discovery
            .unwrap();
        assert_eq!(summary.min_support, 0.4);
        assert_eq!(summary.min_confidence, 0.25);
    }

    #[tokio::test]
    async fn test_comprehensive_without_incomplete_events() {
        let coordinator = coordinator(&flood_reports()).await;
        let response = coordinator
            .process_query(&Query::comprehensive("River flooding forces evacuation"))
            .await;

        assert_eq!(response.status, QueryStatus::Success);
        assert!(response.enhanced_events.is_empty());
        assert!(!response.retrieved_events.is_empty());
        assert_eq!(
            response.metadata.stages_run,
            vec![RETRIEVAL.to_string(), PATTERN_DISCOVERY.to_string()]
        );
        assert!(response.confidence(COMPREHENSIVE).is_some());
        assert!(response.confidence(ENHANCEMENT).is_none());
    }

    #[tokio::test]
    async fn test_comprehensive_runs_enhancement() {
        let coordinator = coordinator(&flood_reports()).await;
        let incomplete = IncompleteEvent::new(
            Event::new("River flooding forces evacuation").with_type("flood"),
            ["sentiment"],
        );
        let query = Query::comprehensive("River flooding forces evacuation")
            .with_incomplete_events(vec![incomplete]);
        let response = coordinator.process_query(&query).await;

        assert_eq!(response.status, QueryStatus::Success);
        assert_eq!(response.enhanced_events.len(), 1);
        assert_eq!(
            response.enhanced_events[0].enhanced_attributes.get("sentiment"),
            Some(&serde_json::Value::from("negative"))
        );
        assert_eq!(response.metadata.stages_run.len(), 3);
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let coordinator = coordinator(&flood_reports()).await;
        let queries = vec![
            Query::retrieval("River flooding"),
            Query::new(QueryKind::Enhancement, "nothing to enhance"),
            Query::retrieval(""),
        ];
        let responses = coordinator.batch_process_queries(&queries).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].query_id, queries[0].id);

        let stats = coordinator.stats().await;
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 2);

        coordinator.reset_stats().await;
        assert_eq!(coordinator.stats().await, QueryStats::default());
    }

    #[tokio::test]
    async fn test_cancelled_query_fails() {
        let coordinator = coordinator(&flood_reports()).await;
        let token = CancellationToken::new();
        token.cancel();
        let response = coordinator
            .process_query_with_cancel(&Query::retrieval("River flooding"), token)
            .await;
        assert_eq!(response.status, QueryStatus::Failed);
        assert_eq!(response.error_message.as_deref(), Some("Query cancelled"));
        assert_eq!(coordinator.stats().await.failed_queries, 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let coordinator = coordinator(&flood_reports()).await;
        let report = coordinator.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.checks.len(), 3);
        assert_eq!(
            report.check("vector_store").unwrap().status,
            crate::domain::coordinator::HealthStatus::Ok
        );
    }
}
