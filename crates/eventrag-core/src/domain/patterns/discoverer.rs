use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::clustering::{self, ClusterMethod, EventCluster};
use super::mining::{FrequentSubgraph, mine_frequent_subgraphs};
use super::pattern::{EventPattern, PatternKind};
use super::repository::{InMemoryPatternRepository, PatternRepository};
use super::validator::{PatternValidator, RuleBasedValidator, ValidatorKind};
use crate::domain::event::Event;
use crate::domain::retrieval::HybridRetriever;
use crate::domain::store::{RecordKind, VectorRecord};
use crate::error::{Error, Result};
use crate::runtime::with_timeout;

/// Configuration for pattern discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Smaller clusters are dropped
    pub min_cluster_size: usize,
    /// Upper bound on k for k-means
    pub max_clusters: usize,
    pub kmeans_seed: u64,
    pub kmeans_max_iterations: usize,
    /// DBSCAN neighbourhood radius in cosine distance
    pub dbscan_eps: f32,
    /// DBSCAN core-point threshold; `min_cluster_size` when unset
    pub dbscan_min_samples: Option<usize>,
    /// Graph depth explored around the event set
    pub subgraph_depth: u32,
    pub frequency_threshold: usize,
    /// Subgraph patterns below this support are not considered
    pub min_pattern_support: f32,
    /// Minimum validation score for a pattern to be kept
    pub semantic_threshold: f32,
    pub embed_batch_size: usize,
    /// Write validated patterns to the stores and repository
    pub persist: bool,
    pub validator: ValidatorKind,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            max_clusters: 20,
            kmeans_seed: 42,
            kmeans_max_iterations: 300,
            dbscan_eps: 0.3,
            dbscan_min_samples: None,
            subgraph_depth: 3,
            frequency_threshold: 2,
            min_pattern_support: 0.1,
            semantic_threshold: 0.85,
            embed_batch_size: 10,
            persist: true,
            validator: ValidatorKind::RuleBased,
        }
    }
}

/// Per-call discovery overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    pub cluster_method: ClusterMethod,
    pub frequency_threshold: usize,
    /// Overrides [`DiscoveryConfig::min_pattern_support`]
    pub min_support: Option<f32>,
    /// Candidates below this confidence are discarded before validation
    pub min_confidence: Option<f32>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            cluster_method: ClusterMethod::Kmeans,
            frequency_threshold: 2,
            min_support: None,
            min_confidence: None,
        }
    }
}

impl DiscoveryOptions {
    /// Support floor for subgraph candidates
    pub fn effective_min_support(&self, config: &DiscoveryConfig) -> f32 {
        self.min_support.unwrap_or(config.min_pattern_support)
    }

    /// Confidence floor for all candidates; none unless overridden
    pub fn effective_min_confidence(&self) -> f32 {
        self.min_confidence.unwrap_or(0.0)
    }
}

/// Everything one discovery run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Validated patterns, cluster-derived first
    pub patterns: Vec<EventPattern>,
    pub clusters: Vec<EventCluster>,
    pub subgraphs: Vec<FrequentSubgraph>,
    /// Patterns abstracted before validation
    pub candidates: usize,
    /// Candidates scored below the semantic threshold
    pub rejected: usize,
    /// Best-effort writes that failed, as "stage: error"
    pub persistence_failures: Vec<String>,
    /// Set when the graph could not be mined
    pub graph_error: Option<String>,
    pub elapsed_ms: u64,
}

/// Discovers recurring patterns in an event set
pub struct PatternDiscoverer {
    retriever: Arc<HybridRetriever>,
    validator: Arc<dyn PatternValidator>,
    repository: Arc<dyn PatternRepository>,
    config: DiscoveryConfig,
}

impl PatternDiscoverer {
    /// Rule-based validation and a session-scoped repository
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        Self {
            retriever,
            validator: Arc::new(RuleBasedValidator),
            repository: Arc::new(InMemoryPatternRepository::new()),
            config: DiscoveryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PatternValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn PatternRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn PatternRepository> {
        &self.repository
    }

    pub fn validator(&self) -> &Arc<dyn PatternValidator> {
        &self.validator
    }

    /// Validated patterns for `events`
    pub async fn discover_patterns(
        &self,
        events: &[Event],
        cluster_method: ClusterMethod,
        frequency_threshold: usize,
    ) -> Result<Vec<EventPattern>> {
        let options = DiscoveryOptions {
            cluster_method,
            frequency_threshold,
            ..DiscoveryOptions::default()
        };
        Ok(self.discover_with(events, &options).await?.patterns)
    }

    /// Full report using the configured defaults
    pub async fn discover(&self, events: &[Event]) -> Result<DiscoveryReport> {
        let options = DiscoveryOptions {
            frequency_threshold: self.config.frequency_threshold,
            ..DiscoveryOptions::default()
        };
        self.discover_with(events, &options).await
    }

    /// Cluster, mine, abstract, validate and persist
    ///
    /// Fails only when clustering cannot run. Graph failures leave the
    /// subgraph side empty; persistence failures are reported, not raised.
    pub async fn discover_with(
        &self,
        events: &[Event],
        options: &DiscoveryOptions,
    ) -> Result<DiscoveryReport> {
        let start = Instant::now();
        if events.is_empty() {
            debug!("No events to discover patterns in");
            return Ok(DiscoveryReport::default());
        }
        info!(
            count = events.len(),
            method = options.cluster_method.as_str(),
            frequency_threshold = options.frequency_threshold,
            "Starting pattern discovery"
        );

        let vectors = self.embed_events(events).await?;
        let clusters = self
            .cluster_vectors(events, vectors, options.cluster_method)
            .await?;

        let (subgraphs, graph_error) = match self
            .mine_subgraphs(events, options.frequency_threshold)
            .await
        {
            Ok(subgraphs) => (subgraphs, None),
            Err(e) => {
                warn!(error = %e, "Subgraph mining failed");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let min_support = options.effective_min_support(&self.config);
        let min_confidence = options.effective_min_confidence();

        let candidates: Vec<EventPattern> = clusters
            .iter()
            .map(|c| EventPattern::from_cluster(c, events.len()))
            .chain(
                subgraphs
                    .iter()
                    .filter(|s| s.support >= min_support)
                    .map(EventPattern::from_subgraph),
            )
            .filter(|p| p.confidence >= min_confidence)
            .collect();
        let candidate_count = candidates.len();

        let patterns = self.validate_all(candidates).await;
        let rejected = candidate_count - patterns.len();

        let mut persistence_failures = Vec::new();
        if self.config.persist {
            for pattern in &patterns {
                persistence_failures.extend(self.persist(pattern).await);
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            clusters = clusters.len(),
            subgraphs = subgraphs.len(),
            candidates = candidate_count,
            patterns = patterns.len(),
            rejected,
            elapsed_ms,
            "Pattern discovery completed"
        );

        Ok(DiscoveryReport {
            patterns,
            clusters,
            subgraphs,
            candidates: candidate_count,
            rejected,
            persistence_failures,
            graph_error,
            elapsed_ms,
        })
    }

    /// Cluster `events` without mining or validation
    pub async fn cluster_events(
        &self,
        events: &[Event],
        method: ClusterMethod,
    ) -> Result<Vec<EventCluster>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embed_events(events).await?;
        self.cluster_vectors(events, vectors, method).await
    }

    /// Frequent relation signatures in the neighbourhood of `events`
    pub async fn mine_subgraphs(
        &self,
        events: &[Event],
        frequency_threshold: usize,
    ) -> Result<Vec<FrequentSubgraph>> {
        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let neighbourhoods = self
            .retriever
            .fetch_subgraphs(&ids, self.config.subgraph_depth)
            .await?;
        let mined = mine_frequent_subgraphs(&neighbourhoods, frequency_threshold);
        debug!(
            neighbourhoods = neighbourhoods.len(),
            mined = mined.len(),
            "Mined frequent subgraphs"
        );
        Ok(mined)
    }

    /// Stored patterns semantically closest to `query`
    ///
    /// Degrades to an empty list when the vector store is unavailable.
    pub async fn search_patterns(&self, query: &str, top_k: usize) -> Vec<EventPattern> {
        if top_k == 0 {
            return Vec::new();
        }
        let embedding = self.retriever.embedder().embed(query).await;
        let matches = match with_timeout(
            "pattern query",
            self.retriever.config().call_timeout(),
            self.retriever
                .vector_store()
                .query(&embedding.vector, top_k, RecordKind::Pattern),
        )
        .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Pattern search failed");
                return Vec::new();
            }
        };

        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        for m in matches {
            let Some(pattern_id) = m.metadata.get("pattern_id").and_then(Value::as_str) else {
                continue;
            };
            if !seen.insert(pattern_id.to_string()) {
                continue;
            }
            let stored = match self.repository.get(pattern_id).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(pattern_id, error = %e, "Pattern repository lookup failed");
                    None
                }
            };
            let pattern = stored.or_else(|| {
                m.metadata
                    .get("pattern")
                    .and_then(|v| serde_json::from_value::<EventPattern>(v.clone()).ok())
            });
            if let Some(pattern) = pattern {
                found.push(pattern);
            }
        }
        found
    }

    /// Every pattern held by the repository
    pub async fn patterns(&self) -> Result<Vec<EventPattern>> {
        self.repository.list().await
    }

    // ========== Stages ==========

    async fn embed_events(&self, events: &[Event]) -> Result<Vec<Vec<f32>>> {
        let embedder = self.retriever.embedder();
        let mut vectors = Vec::with_capacity(events.len());
        for batch in events.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(Event::embedding_text).collect();
            let embeddings = embedder.embed_batch(&texts).await;
            if embeddings.len() != batch.len() {
                return Err(Error::EmbeddingFailed(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            vectors.extend(embeddings.into_iter().map(|e| e.vector));
        }
        Ok(vectors)
    }

    async fn cluster_vectors(
        &self,
        events: &[Event],
        vectors: Vec<Vec<f32>>,
        method: ClusterMethod,
    ) -> Result<Vec<EventCluster>> {
        let config = self.config.clone();
        let events = events.to_vec();

        let (clusters, groups) = tokio::task::spawn_blocking(move || {
            let labels: Vec<Option<usize>> = match method {
                ClusterMethod::Kmeans => {
                    let k = clustering::choose_k(
                        &vectors,
                        config.max_clusters,
                        config.kmeans_max_iterations,
                        config.kmeans_seed,
                    );
                    clustering::kmeans(&vectors, k, config.kmeans_max_iterations, config.kmeans_seed)
                        .into_iter()
                        .map(Some)
                        .collect()
                }
                ClusterMethod::Dbscan => clustering::dbscan(
                    &vectors,
                    config.dbscan_eps,
                    config.dbscan_min_samples.unwrap_or(config.min_cluster_size),
                ),
            };
            let groups = labels.iter().flatten().collect::<BTreeSet<_>>().len();
            let clusters =
                clustering::build_clusters(&events, &vectors, &labels, config.min_cluster_size);
            (clusters, groups)
        })
        .await
        .map_err(|e| Error::Worker(format!("clustering task failed: {}", e)))?;

        if clusters.len() < groups {
            warn!(
                dropped = groups - clusters.len(),
                min_cluster_size = self.config.min_cluster_size,
                "Dropped clusters below the minimum size"
            );
        }
        debug!(method = method.as_str(), clusters = clusters.len(), "Clustering completed");
        Ok(clusters)
    }

    async fn validate_all(&self, candidates: Vec<EventPattern>) -> Vec<EventPattern> {
        let scores = join_all(candidates.iter().map(|p| self.validator.validate(p))).await;

        candidates
            .into_iter()
            .zip(scores)
            .filter_map(|(mut pattern, score)| {
                pattern.validation_score = score;
                if score >= self.config.semantic_threshold {
                    Some(pattern)
                } else {
                    debug!(
                        pattern_id = %pattern.pattern_id,
                        score,
                        threshold = self.config.semantic_threshold,
                        "Pattern rejected by validation"
                    );
                    None
                }
            })
            .collect()
    }

    /// Write one pattern everywhere it belongs, returning failed stages
    async fn persist(&self, pattern: &EventPattern) -> Vec<String> {
        let mut failures = Vec::new();
        let timeout = self.retriever.config().call_timeout();

        let indexed = async {
            let text = pattern.embedding_text();
            let embedding = self.retriever.embedder().embed(&text).await;
            let record = VectorRecord {
                id: pattern.vector_id(),
                kind: RecordKind::Pattern,
                vector: embedding.vector,
                document: text,
                metadata: pattern_metadata(pattern)?,
            };
            with_timeout(
                "pattern upsert",
                timeout,
                self.retriever.vector_store().upsert(vec![record]),
            )
            .await
        };
        if let Err(e) = indexed.await {
            warn!(pattern_id = %pattern.pattern_id, error = %e, "Failed to index pattern");
            failures.push(format!("vector: {}", e));
        }

        if let Err(e) = with_timeout(
            "pattern node",
            timeout,
            self.retriever
                .graph_store()
                .write_node("Pattern", pattern.node_properties()),
        )
        .await
        {
            warn!(pattern_id = %pattern.pattern_id, error = %e, "Failed to write pattern node");
            failures.push(format!("graph: {}", e));
        }

        if let Err(e) = self.repository.save(pattern).await {
            warn!(pattern_id = %pattern.pattern_id, error = %e, "Failed to save pattern");
            failures.push(format!("repository: {}", e));
        }

        failures
    }
}

fn pattern_metadata(pattern: &EventPattern) -> Result<Map<String, Value>> {
    let mut metadata = Map::new();
    metadata.insert("data_type".to_string(), Value::from(RecordKind::Pattern.as_str()));
    metadata.insert("pattern_id".to_string(), Value::from(pattern.pattern_id.clone()));
    metadata.insert("pattern_type".to_string(), Value::from(pattern.pattern_type.as_str()));
    metadata.insert(
        "kind".to_string(),
        Value::from(match pattern.kind {
            PatternKind::ClusterBased => "cluster_based",
            PatternKind::SubgraphBased => "subgraph_based",
        }),
    );
    metadata.insert("validation_score".to_string(), Value::from(pattern.validation_score));
    metadata.insert("pattern".to_string(), serde_json::to_value(pattern)?);
    Ok(metadata)
}
