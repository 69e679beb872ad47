//! Frequent relation-signature mining
//!
//! Edges gathered from event neighbourhoods are grouped by their
//! `(source type, relation type, target type)` signature. Signatures seen at
//! least `frequency_threshold` times become [`FrequentSubgraph`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::PatternType;
use crate::domain::event::RelationType;
use crate::domain::store::{GraphEdge, GraphNode, Subgraph};

/// Example edges kept per subgraph
const MAX_EXAMPLE_EDGES: usize = 5;

/// Confidence assumed for edges that carry none
const DEFAULT_EDGE_CONFIDENCE: f32 = 0.5;

/// Typed relation signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubgraphSignature {
    pub source_type: String,
    pub relation_type: String,
    pub target_type: String,
}

impl SubgraphSignature {
    /// Stable digest used for ids
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_type.as_bytes());
        hasher.update(b"|");
        hasher.update(self.relation_type.as_bytes());
        hasher.update(b"|");
        hasher.update(self.target_type.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

impl std::fmt::Display for SubgraphSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} --{}--> {}", self.source_type, self.relation_type, self.target_type)
    }
}

/// A relation signature that recurs across the event set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentSubgraph {
    pub subgraph_id: String,
    pub signature: SubgraphSignature,
    /// Nodes touched by the example edges
    pub nodes: Vec<GraphNode>,
    /// Up to five example edges
    pub edges: Vec<GraphEdge>,
    /// Edges sharing the signature
    pub frequency: usize,
    /// frequency / total distinct edges
    pub support: f32,
    /// Mean edge confidence
    pub confidence: f32,
    pub pattern_type: PatternType,
    /// Event ids ordered by before/after/during edges, deduplicated
    pub temporal_order: Vec<String>,
    /// Signature edges whose relation is causal, as (source type, target type)
    pub causal_pairs: Vec<(String, String)>,
}

/// Classify a relation name by keyword
pub fn classify_relation(relation_type: &str) -> PatternType {
    let name = relation_type.to_lowercase();
    if name.contains("causal") || name.contains("cause") {
        PatternType::Causal
    } else if ["temporal", "before", "after", "during", "sequential", "simultaneous"]
        .iter()
        .any(|k| name.contains(k))
    {
        PatternType::Sequential
    } else if name.contains("conditional") {
        PatternType::Conditional
    } else {
        PatternType::Associative
    }
}

/// Ordered `(earlier, later)` pair for a temporal edge, if it is one
fn temporal_pair(edge: &GraphEdge) -> Option<(&str, &str)> {
    let name = edge.relation_type.to_lowercase();
    if name.contains("after") {
        Some((edge.target_id.as_str(), edge.source_id.as_str()))
    } else if name.contains("before") || name.contains("during") || name.contains("simultaneous") {
        Some((edge.source_id.as_str(), edge.target_id.as_str()))
    } else {
        None
    }
}

/// Mine signatures occurring at least `frequency_threshold` times
///
/// Edges shared between neighbourhoods are counted once. Results are ordered
/// by frequency, most frequent first.
pub fn mine_frequent_subgraphs(
    subgraphs: &[Subgraph],
    frequency_threshold: usize,
) -> Vec<FrequentSubgraph> {
    let mut nodes: HashMap<&str, &GraphNode> = HashMap::new();
    for subgraph in subgraphs {
        nodes.insert(subgraph.root.id.as_str(), &subgraph.root);
        for node in &subgraph.related {
            nodes.entry(node.id.as_str()).or_insert(node);
        }
    }

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut edges: Vec<&GraphEdge> = Vec::new();
    for edge in subgraphs.iter().flat_map(|s| s.edges.iter()) {
        let key = if edge.id.is_empty() {
            format!("{}|{}|{}", edge.source_id, edge.relation_type, edge.target_id)
        } else {
            edge.id.clone()
        };
        if seen.insert(key) {
            edges.push(edge);
        }
    }

    let total_edges = edges.len();
    if total_edges == 0 {
        return Vec::new();
    }

    let node_type = |id: &str| -> String {
        nodes
            .get(id)
            .map(|n| n.event_type())
            .unwrap_or_else(|| "unknown".to_string())
    };

    let mut groups: BTreeMap<SubgraphSignature, Vec<&GraphEdge>> = BTreeMap::new();
    for edge in &edges {
        let signature = SubgraphSignature {
            source_type: node_type(&edge.source_id),
            relation_type: edge.relation_type.clone(),
            target_type: node_type(&edge.target_id),
        };
        groups.entry(signature).or_default().push(edge);
    }

    let mut mined: Vec<FrequentSubgraph> = groups
        .into_iter()
        .filter(|(_, group)| group.len() >= frequency_threshold.max(1))
        .map(|(signature, group)| {
            let frequency = group.len();
            let confidence = group
                .iter()
                .map(|e| e.confidence.unwrap_or(DEFAULT_EDGE_CONFIDENCE))
                .sum::<f32>()
                / frequency as f32;

            let examples: Vec<GraphEdge> =
                group.iter().take(MAX_EXAMPLE_EDGES).map(|e| (*e).clone()).collect();
            let mut example_nodes: Vec<GraphNode> = Vec::new();
            for edge in &examples {
                for id in [&edge.source_id, &edge.target_id] {
                    if example_nodes.iter().all(|n| &n.id != id)
                        && let Some(node) = nodes.get(id.as_str())
                    {
                        example_nodes.push((*node).clone());
                    }
                }
            }

            let mut temporal_order: Vec<String> = Vec::new();
            for (earlier, later) in group.iter().filter_map(|e| temporal_pair(e)) {
                for id in [earlier, later] {
                    if !temporal_order.iter().any(|t| t == id) {
                        temporal_order.push(id.to_string());
                    }
                }
            }

            let causal_pairs = if RelationType::parse(&signature.relation_type)
                .is_some_and(|t| t.is_causal())
                || classify_relation(&signature.relation_type) == PatternType::Causal
            {
                vec![(signature.source_type.clone(), signature.target_type.clone())]
            } else {
                Vec::new()
            };

            FrequentSubgraph {
                subgraph_id: format!("subgraph_{}", signature.digest()),
                pattern_type: classify_relation(&signature.relation_type),
                support: frequency as f32 / total_edges as f32,
                confidence: confidence.clamp(0.0, 1.0),
                nodes: example_nodes,
                edges: examples,
                frequency,
                temporal_order,
                causal_pairs,
                signature,
            }
        })
        .collect();

    mined.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.signature.cmp(&b.signature))
    });
    mined
}
