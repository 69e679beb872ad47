//! Hybrid semantic + structural retrieval
//!
//! ```text
//!                 ┌──────────────┐
//!  query event ──▶│   Embedder   │── vector ──┐
//!                 └──────────────┘            ▼
//!                                   ┌──────────────────┐  seed ids  ┌─────────────┐
//!                                   │   VectorStore    │───────────▶│ GraphStore  │
//!                                   └──────────────────┘            └─────────────┘
//!                                      similarity                     structural
//!                                            └──────────┬────────────────┘
//!                                                       ▼
//!                                       fused = v·w_v + g·w_g, sorted desc
//! ```
//!
//! Each modality degrades independently: a failing store contributes no
//! candidates and its error is reported in [`SearchMetadata::error`].

mod fusion;
mod retriever;

pub use fusion::{FusionWeights, fuse, structural_score};
pub use retriever::{HybridRetriever, RetrievalConfig};

use serde::{Deserialize, Serialize};

use crate::domain::event::Event;
use crate::domain::store::{GraphEdge, Subgraph};

/// Parameters for one hybrid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum vector neighbours to request
    pub vector_top_k: usize,
    /// Graph traversal depth around each seed
    pub graph_max_depth: u32,
    /// Minimum vector similarity for a neighbour to count
    pub similarity_threshold: f32,
    /// Weights applied during fusion
    pub fusion_weights: FusionWeights,
    /// Drop hits whose id equals the query event's id
    pub exclude_query: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            vector_top_k: 10,
            graph_max_depth: 2,
            similarity_threshold: 0.7,
            fusion_weights: FusionWeights::default(),
            exclude_query: true,
        }
    }
}

impl SearchParams {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.vector_top_k = top_k;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.graph_max_depth = depth;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.fusion_weights = weights;
        self
    }
}

/// A vector-modality candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub event: Event,
    /// Cosine similarity in [0, 1]
    pub similarity_score: f32,
}

/// A graph-modality candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub event: Event,
    /// Connectivity-derived relevance in [0, 1]
    pub structural_score: f32,
    /// The traversed neighbourhood
    pub subgraph: Subgraph,
    /// Relations contributing to the score
    pub relations: Vec<GraphEdge>,
}

/// One entry of the fused ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub event: Event,
    pub fused_score: f32,
    pub vector_score: f32,
    pub graph_score: f32,
    pub has_vector: bool,
    pub has_graph: bool,
}

/// Diagnostics attached to a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub vector_count: usize,
    pub graph_count: usize,
    pub similarity_threshold: f32,
    pub graph_max_depth: u32,
    /// Set when the query embedding came back as the zero vector
    pub degraded_embedding: bool,
    /// Store failures, if any modality degraded
    pub error: Option<String>,
}

/// Output of [`HybridRetriever::search`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub query_event: Event,
    pub vector_results: Vec<VectorSearchResult>,
    pub graph_results: Vec<GraphSearchResult>,
    /// Sorted descending by `fused_score`
    pub fused_results: Vec<FusedResult>,
    /// The weights fusion actually applied
    pub fusion_weights: FusionWeights,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub metadata: SearchMetadata,
}

impl HybridSearchResult {
    /// Events of the fused ranking, best first
    pub fn events(&self) -> Vec<Event> {
        self.fused_results.iter().map(|r| r.event.clone()).collect()
    }

    /// Mean similarity of the vector hits, if any
    pub fn mean_vector_similarity(&self) -> Option<f32> {
        if self.vector_results.is_empty() {
            return None;
        }
        let sum: f32 = self.vector_results.iter().map(|r| r.similarity_score).sum();
        Some(sum / self.vector_results.len() as f32)
    }
}
