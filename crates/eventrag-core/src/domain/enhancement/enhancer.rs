use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::template::AttributeTemplate;
use super::validation::{check_value, graph_consensus};
use super::{AttributeStatistics, EnhancedEvent, EnhancementMetadata, SUPPORTED_ATTRIBUTES};
use crate::domain::embedding::cosine_similarity;
use crate::domain::event::{Event, IncompleteEvent};
use crate::domain::retrieval::{FusedResult, FusionWeights, HybridRetriever, SearchParams};
use crate::error::{Error, Result};

/// Maximum snippets compared against the query description
const CONTEXT_SAMPLE: usize = 5;

/// Maximum source ids recorded per attribute
const MAX_SOURCES: usize = 5;

/// Context similarity used when a template has no snippets
const DEFAULT_CONTEXT_SIMILARITY: f32 = 0.5;

/// Configuration for attribute enhancement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    /// Minimum fused score for a neighbour to vote
    pub similarity_threshold: f32,
    /// Neighbours wanted before inference is considered well supported
    pub min_sources: usize,
    /// Vector neighbours requested from retrieval
    pub neighbor_top_k: usize,
    pub graph_max_depth: u32,
    pub vector_weight: f32,
    pub graph_weight: f32,
    /// Minimum share of neighbours exhibiting an attribute
    pub min_coverage: f32,
    /// Minimum template inference accuracy
    pub min_inference_accuracy: f32,
    /// Cross-check proposals against graph-retrieved neighbours
    pub graph_consensus: bool,
    /// Agreeing share required by the graph cross-check
    pub consensus_ratio: f32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            min_sources: 3,
            neighbor_top_k: 20,
            graph_max_depth: 2,
            vector_weight: 0.6,
            graph_weight: 0.4,
            min_coverage: 0.3,
            min_inference_accuracy: 0.6,
            graph_consensus: true,
            consensus_ratio: 0.5,
        }
    }
}

impl EnhancementConfig {
    /// Rank neighbours on semantic similarity alone
    pub fn semantic_only() -> Self {
        Self {
            vector_weight: 1.0,
            graph_weight: 0.0,
            ..Self::default()
        }
    }

    /// Lower thresholds for sparse histories
    pub fn permissive() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_sources: 1,
            min_coverage: 0.2,
            min_inference_accuracy: 0.4,
            ..Self::default()
        }
    }
}

/// A value proposed for one attribute before validation
struct Proposal {
    value: serde_json::Value,
    confidence: f32,
    sources: Vec<String>,
}

/// Infers missing event attributes from similar historical events
pub struct AttributeEnhancer {
    retriever: Arc<HybridRetriever>,
    config: EnhancementConfig,
}

impl AttributeEnhancer {
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        Self {
            retriever,
            config: EnhancementConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EnhancementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    /// Enhance using the configured threshold and minimum sources
    pub async fn enhance_event(&self, incomplete: &IncompleteEvent) -> Result<EnhancedEvent> {
        self.enhance_event_with(
            incomplete,
            self.config.similarity_threshold,
            self.config.min_sources,
        )
        .await
    }

    /// Enhance one event
    ///
    /// Fails only on unusable input. Retrieval problems and thin neighbour
    /// sets lower confidence and are reported in the metadata instead.
    pub async fn enhance_event_with(
        &self,
        incomplete: &IncompleteEvent,
        similarity_threshold: f32,
        min_sources: usize,
    ) -> Result<EnhancedEvent> {
        let event = &incomplete.event;
        if event.description.trim().is_empty() && event.entities.is_empty() {
            return Err(Error::InvalidInput(format!(
                "event '{}' has neither description nor entities to search with",
                event.id
            )));
        }

        let params = SearchParams::default()
            .with_top_k(self.config.neighbor_top_k)
            .with_max_depth(self.config.graph_max_depth)
            .with_threshold(similarity_threshold)
            .with_weights(FusionWeights::new(
                self.config.vector_weight,
                self.config.graph_weight,
            ));
        let search = self.retriever.search(event, &params).await;

        let neighbors: Vec<FusedResult> = search
            .fused_results
            .iter()
            .filter(|r| r.fused_score >= similarity_threshold)
            .cloned()
            .collect();
        let graph_neighbors: Vec<Event> =
            search.graph_results.iter().map(|r| r.event.clone()).collect();

        let insufficient_sources = neighbors.len() < min_sources;
        if insufficient_sources {
            warn!(
                event_id = %event.id,
                found = neighbors.len(),
                required = min_sources,
                "Fewer neighbours than requested; inferring from what was found"
            );
        }

        let (targets, unsupported): (Vec<&String>, Vec<&String>) = incomplete
            .missing_attributes
            .iter()
            .partition(|a| SUPPORTED_ATTRIBUTES.contains(&a.as_str()));

        let mut metadata = EnhancementMetadata {
            neighbor_count: neighbors.len(),
            similarity_threshold,
            insufficient_sources,
            unsupported_attributes: unsupported.into_iter().cloned().collect(),
            search_error: search.metadata.error.clone(),
            search_time_ms: search.search_time_ms,
            ..EnhancementMetadata::default()
        };

        let mut proposals: BTreeMap<String, Proposal> = BTreeMap::new();
        for attribute in targets {
            let template = AttributeTemplate::build(attribute, &neighbors);
            metadata.templates_built += 1;
            metadata
                .coverage_rates
                .insert(attribute.clone(), template.coverage_rate);

            if let Some(proposal) = self.propose(event, &template).await {
                proposals.insert(attribute.clone(), proposal);
            }
        }

        let mut enhanced = EnhancedEvent {
            original: incomplete.clone(),
            enhanced_attributes: BTreeMap::new(),
            attribute_confidences: BTreeMap::new(),
            inference_sources: BTreeMap::new(),
            validation_results: BTreeMap::new(),
            total_confidence: 0.0,
            metadata,
            enhanced_at: Utc::now(),
        };

        let proposed = proposals.len();
        let confidence_sum: f32 = proposals.values().map(|p| p.confidence).sum();
        for (attribute, proposal) in proposals {
            let valid = self.validate(&attribute, &proposal.value, &graph_neighbors);
            enhanced.validation_results.insert(attribute.clone(), valid);
            if valid {
                enhanced
                    .attribute_confidences
                    .insert(attribute.clone(), proposal.confidence);
                enhanced
                    .inference_sources
                    .insert(attribute.clone(), proposal.sources);
                enhanced.enhanced_attributes.insert(attribute, proposal.value);
            } else {
                debug!(event_id = %event.id, attribute = %attribute, "Dropped inferred value failing validation");
            }
        }

        if proposed > 0 {
            let validated = enhanced.enhanced_attributes.len();
            enhanced.total_confidence = (confidence_sum / proposed as f32
                * (validated as f32 / proposed as f32))
                .clamp(0.0, 1.0);
        }

        info!(
            event_id = %event.id,
            neighbors = enhanced.metadata.neighbor_count,
            inferred = enhanced.enhanced_attributes.len(),
            confidence = enhanced.total_confidence,
            "Enhanced event"
        );
        Ok(enhanced)
    }

    /// Propose the dominant value of a template, if it is strong enough
    async fn propose(&self, event: &Event, template: &AttributeTemplate) -> Option<Proposal> {
        if !template.is_inferable(self.config.min_coverage, self.config.min_inference_accuracy) {
            debug!(
                attribute = %template.attribute,
                coverage = template.coverage_rate,
                accuracy = template.inference_accuracy,
                "Template too weak to infer from"
            );
            return None;
        }

        let candidate = template.most_frequent()?;
        let context_similarity = self
            .context_similarity(&event.description, &template.context_snippets)
            .await;
        let confidence = (0.4 * template.inference_accuracy
            + 0.4 * candidate.frequency_weight
            + 0.2 * context_similarity)
            .clamp(0.0, 1.0);

        Some(Proposal {
            value: candidate.value.clone(),
            confidence,
            sources: candidate.sources.iter().take(MAX_SOURCES).cloned().collect(),
        })
    }

    /// Mean cosine similarity between the description and the first snippets
    async fn context_similarity(&self, description: &str, snippets: &[String]) -> f32 {
        if snippets.is_empty() {
            return DEFAULT_CONTEXT_SIMILARITY;
        }

        let embedder = self.retriever.embedder();
        let query = embedder.embed(description).await;
        let sample: Vec<String> = snippets.iter().take(CONTEXT_SAMPLE).cloned().collect();
        let embedded = embedder.embed_batch(&sample).await;

        let total: f32 = embedded
            .iter()
            .map(|e| cosine_similarity(&query.vector, &e.vector).clamp(0.0, 1.0))
            .sum();
        total / embedded.len().max(1) as f32
    }

    fn validate(&self, attribute: &str, value: &serde_json::Value, graph_neighbors: &[Event]) -> bool {
        if !check_value(attribute, value) {
            return false;
        }
        if !self.config.graph_consensus {
            return true;
        }
        graph_consensus(attribute, value, graph_neighbors).passes(self.config.consensus_ratio)
    }

    /// Enhance a batch with the configured defaults
    pub async fn batch_enhance_events(&self, events: &[IncompleteEvent]) -> Vec<EnhancedEvent> {
        self.batch_enhance_events_with(
            events,
            self.config.similarity_threshold,
            self.config.min_sources,
        )
        .await
    }

    /// Enhance a batch; a failing event yields a zero-confidence result
    pub async fn batch_enhance_events_with(
        &self,
        events: &[IncompleteEvent],
        similarity_threshold: f32,
        min_sources: usize,
    ) -> Vec<EnhancedEvent> {
        let runs = events
            .iter()
            .map(|e| self.enhance_event_with(e, similarity_threshold, min_sources));

        join_all(runs)
            .await
            .into_iter()
            .zip(events)
            .map(|(result, incomplete)| match result {
                Ok(enhanced) => enhanced,
                Err(e) => {
                    warn!(event_id = %incomplete.event.id, error = %e, "Failed to enhance event");
                    EnhancedEvent::failed(incomplete.clone(), e.to_string())
                }
            })
            .collect()
    }

    /// Summarise a batch of results
    pub fn attribute_statistics(&self, events: &[EnhancedEvent]) -> AttributeStatistics {
        AttributeStatistics::from_events(events)
    }
}
