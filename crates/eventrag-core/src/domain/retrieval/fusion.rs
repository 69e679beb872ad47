use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{FusedResult, GraphSearchResult, VectorSearchResult};

/// Relative weights of the vector and graph modalities
///
/// Weights are normalised to sum to 1 before fusion, which keeps every fused
/// score in [0, 1]. The normalised pair is what [`super::HybridSearchResult`]
/// reports back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f32,
    pub graph: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            graph: 0.4,
        }
    }
}

impl FusionWeights {
    pub fn new(vector: f32, graph: f32) -> Self {
        Self { vector, graph }
    }

    /// Rank by semantic similarity only
    pub fn vector_only() -> Self {
        Self::new(1.0, 0.0)
    }

    /// Rank by graph structure only
    pub fn graph_only() -> Self {
        Self::new(0.0, 1.0)
    }

    /// Scale to sum to 1
    ///
    /// Negative or non-finite components count as 0; if nothing positive
    /// remains the defaults are used.
    pub fn normalized(&self) -> Self {
        let clean = |w: f32| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let vector = clean(self.vector);
        let graph = clean(self.graph);
        let sum = vector + graph;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            vector: vector / sum,
            graph: graph / sum,
        }
    }
}

/// Relevance of a seed derived from its neighbourhood
///
/// `0.4·min(relations/10, 1) + 0.4·min(related/20, 1) + 0.2·(1 - (depth-1)·0.1)`
/// with the depth term clamped to [0, 1].
pub fn structural_score(relation_count: usize, related_count: usize, depth: u32) -> f32 {
    let relation_term = (relation_count as f32 / 10.0).min(1.0);
    let related_term = (related_count as f32 / 20.0).min(1.0);
    let depth_term = (1.0 - (depth as f32 - 1.0) * 0.1).clamp(0.0, 1.0);
    0.4 * relation_term + 0.4 * related_term + 0.2 * depth_term
}

/// Union both candidate lists and rank them by weighted score
///
/// `weights` is used as given; callers normalise beforehand.
pub fn fuse(
    vector_results: &[VectorSearchResult],
    graph_results: &[GraphSearchResult],
    weights: FusionWeights,
) -> Vec<FusedResult> {
    let mut by_id: HashMap<&str, FusedResult> = HashMap::new();

    for hit in vector_results {
        let entry = by_id.entry(hit.event.id.as_str()).or_insert_with(|| FusedResult {
            event: hit.event.clone(),
            fused_score: 0.0,
            vector_score: 0.0,
            graph_score: 0.0,
            has_vector: false,
            has_graph: false,
        });
        entry.vector_score = entry.vector_score.max(hit.similarity_score);
        entry.has_vector = true;
    }

    for hit in graph_results {
        let entry = by_id.entry(hit.event.id.as_str()).or_insert_with(|| FusedResult {
            event: hit.event.clone(),
            fused_score: 0.0,
            vector_score: 0.0,
            graph_score: 0.0,
            has_vector: false,
            has_graph: false,
        });
        entry.graph_score = entry.graph_score.max(hit.structural_score);
        entry.has_graph = true;
    }

    let mut fused: Vec<FusedResult> = by_id
        .into_values()
        .map(|mut r| {
            r.fused_score = r.vector_score * weights.vector + r.graph_score * weights.graph;
            r
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.event.id.cmp(&b.event.id))
    });
    fused
}
