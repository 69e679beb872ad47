//! Abstracted event patterns
//!
//! A pattern is what survives of a cluster or a frequent subgraph once it is
//! reduced to sequences and scores. Pattern ids are digests of their source
//! (sorted member ids, or the relation signature), so rediscovering the same
//! pattern overwrites it instead of creating a duplicate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::PatternType;
use super::clustering::EventCluster;
use super::mining::FrequentSubgraph;
use crate::domain::event::RelationType;

/// Example instances kept per pattern
const MAX_INSTANCES: usize = 3;

/// Where a pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    ClusterBased,
    SubgraphBased,
}

/// One concrete occurrence of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInstance {
    pub event_ids: Vec<String>,
    pub summary: String,
}

/// A recurring multi-event pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    pub pattern_id: String,
    pub name: String,
    pub description: String,
    pub kind: PatternKind,
    pub pattern_type: PatternType,
    /// Event types in order of appearance
    pub event_sequence: Vec<String>,
    pub relation_sequence: Vec<RelationType>,
    /// source event type → caused event types
    pub causal_structure: BTreeMap<String, Vec<String>>,
    pub temporal_order: Vec<String>,
    pub frequency: usize,
    pub support: f32,
    pub confidence: f32,
    pub generality_score: f32,
    pub semantic_coherence: f32,
    /// Set by validation; 0 until then
    pub validation_score: f32,
    pub source_clusters: Vec<usize>,
    pub source_subgraphs: Vec<String>,
    pub instances: Vec<PatternInstance>,
    pub created_at: DateTime<Utc>,
}

fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    hex::encode(&hasher.finalize()[..8])
}

impl EventPattern {
    /// Abstract a cluster into a type-sequence pattern
    ///
    /// `total_events` is the size of the event set the cluster was drawn
    /// from and normalises support.
    pub fn from_cluster(cluster: &EventCluster, total_events: usize) -> Self {
        let mut member_ids: Vec<&str> = cluster.events.iter().map(|e| e.id.as_str()).collect();
        member_ids.sort_unstable();

        let mut event_sequence: Vec<String> = Vec::new();
        for t in cluster
            .events
            .iter()
            .filter_map(|e| e.event_type.as_deref())
            .filter(|t| !t.is_empty())
        {
            if !event_sequence.iter().any(|s| s == t) {
                event_sequence.push(t.to_string());
            }
        }

        let size = cluster.len();
        let diversity = if event_sequence.is_empty() {
            0.5
        } else {
            (event_sequence.len() as f32 / 5.0).min(1.0)
        };
        let generality_score = 0.6 * (size as f32 / 20.0).min(1.0) + 0.4 * diversity;

        let dominant = cluster
            .common_attributes
            .dominant_type
            .clone()
            .unwrap_or_else(|| "mixed".to_string());

        Self {
            pattern_id: format!("cp_{}", digest(member_ids.iter().copied())),
            name: format!("cluster_pattern_{}", cluster.label),
            description: format!(
                "{} semantically similar events, dominant type {}",
                size, dominant
            ),
            kind: PatternKind::ClusterBased,
            pattern_type: PatternType::Associative,
            event_sequence,
            relation_sequence: Vec::new(),
            causal_structure: BTreeMap::new(),
            temporal_order: Vec::new(),
            frequency: size,
            support: size as f32 / total_events.max(size).max(1) as f32,
            confidence: cluster.intra_cluster_similarity,
            generality_score,
            semantic_coherence: cluster.intra_cluster_similarity,
            validation_score: 0.0,
            source_clusters: vec![cluster.cluster_id],
            source_subgraphs: Vec::new(),
            instances: cluster
                .events
                .iter()
                .take(MAX_INSTANCES)
                .map(|e| PatternInstance {
                    event_ids: vec![e.id.clone()],
                    summary: e.description.clone(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    /// Abstract a frequent subgraph into a relation-sequence pattern
    pub fn from_subgraph(subgraph: &FrequentSubgraph) -> Self {
        let signature = &subgraph.signature;

        let mut causal_structure: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (source, target) in &subgraph.causal_pairs {
            let targets = causal_structure.entry(source.clone()).or_default();
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }

        let mut relation_sequence: Vec<RelationType> = Vec::new();
        for t in subgraph
            .edges
            .iter()
            .filter_map(|e| RelationType::parse(&e.relation_type))
        {
            if !relation_sequence.contains(&t) {
                relation_sequence.push(t);
            }
        }

        Self {
            pattern_id: format!("sp_{}", signature.digest()),
            name: format!(
                "{}_{}_{}_pattern",
                signature.source_type, signature.relation_type, signature.target_type
            ),
            description: format!("{} observed {} times", signature, subgraph.frequency),
            kind: PatternKind::SubgraphBased,
            pattern_type: subgraph.pattern_type,
            event_sequence: vec![signature.source_type.clone(), signature.target_type.clone()],
            relation_sequence,
            causal_structure,
            temporal_order: subgraph.temporal_order.clone(),
            frequency: subgraph.frequency,
            support: subgraph.support,
            confidence: subgraph.confidence,
            generality_score: subgraph.support,
            semantic_coherence: subgraph.confidence,
            validation_score: 0.0,
            source_clusters: Vec::new(),
            source_subgraphs: vec![subgraph.subgraph_id.clone()],
            instances: subgraph
                .edges
                .iter()
                .take(MAX_INSTANCES)
                .map(|e| PatternInstance {
                    event_ids: vec![e.source_id.clone(), e.target_id.clone()],
                    summary: format!("{} {} {}", e.source_id, e.relation_type, e.target_id),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    /// Text embedded when the pattern is indexed
    pub fn embedding_text(&self) -> String {
        format!(
            "{}: {} event sequence: {}",
            self.name,
            self.description,
            self.event_sequence.join(" -> ")
        )
    }

    /// Id of the pattern's vector record
    pub fn vector_id(&self) -> String {
        format!("pattern_{}", self.pattern_id)
    }

    /// Properties written to the graph node
    pub fn node_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".to_string(), Value::from(self.pattern_id.clone()));
        props.insert("name".to_string(), Value::from(self.name.clone()));
        props.insert("description".to_string(), Value::from(self.description.clone()));
        props.insert("pattern_type".to_string(), Value::from(self.pattern_type.as_str()));
        props.insert("frequency".to_string(), Value::from(self.frequency));
        props.insert("support".to_string(), Value::from(self.support));
        props.insert("confidence".to_string(), Value::from(self.confidence));
        props.insert("validation_score".to_string(), Value::from(self.validation_score));
        props.insert(
            "event_sequence".to_string(),
            Value::from(self.event_sequence.clone()),
        );
        props.insert("created_at".to_string(), Value::from(self.created_at.to_rfc3339()));
        props
    }

    /// Sequence length used by validation
    pub fn sequence_len(&self) -> usize {
        self.event_sequence.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Event;
    use crate::domain::patterns::clustering::{ClusterAttributes, EventCluster};
    use crate::domain::patterns::mining::SubgraphSignature;
    use crate::domain::store::GraphEdge;

    fn cluster(types: &[&str]) -> EventCluster {
        let events: Vec<Event> = types
            .iter()
            .enumerate()
            .map(|(i, t)| Event::new(format!("event {}", i)).with_id(format!("e{}", i)).with_type(*t))
            .collect();
        EventCluster {
            cluster_id: 0,
            label: "cluster_0_strike".to_string(),
            representative: events[0].clone(),
            events,
            centroid: vec![1.0],
            intra_cluster_similarity: 0.9,
            common_attributes: ClusterAttributes {
                dominant_type: Some("strike".to_string()),
                ..ClusterAttributes::default()
            },
        }
    }

    #[test]
    fn test_cluster_pattern_scores() {
        let pattern = EventPattern::from_cluster(&cluster(&["strike", "strike", "delay", "strike"]), 8);
        assert_eq!(pattern.event_sequence, vec!["strike", "delay"]);
        assert_eq!(pattern.frequency, 4);
        assert!((pattern.support - 0.5).abs() < 1e-6);
        assert!((pattern.confidence - 0.9).abs() < 1e-6);
        let expected = 0.6 * (4.0 / 20.0) + 0.4 * (2.0 / 5.0);
        assert!((pattern.generality_score - expected).abs() < 1e-6);
        assert_eq!(pattern.instances.len(), 3);
        assert!(pattern.pattern_id.starts_with("cp_"));
    }

    #[test]
    fn test_cluster_pattern_id_ignores_member_order() {
        let a = EventPattern::from_cluster(&cluster(&["x", "y", "z"]), 3);
        let mut reordered = cluster(&["x", "y", "z"]);
        reordered.events.reverse();
        let b = EventPattern::from_cluster(&reordered, 3);
        assert_eq!(a.pattern_id, b.pattern_id);
    }

    #[test]
    fn test_untyped_cluster_uses_default_diversity() {
        let mut c = cluster(&["a", "b", "c"]);
        for e in &mut c.events {
            e.event_type = None;
        }
        let pattern = EventPattern::from_cluster(&c, 3);
        assert!(pattern.event_sequence.is_empty());
        let expected = 0.6 * (3.0 / 20.0) + 0.4 * 0.5;
        assert!((pattern.generality_score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_subgraph_pattern() {
        let subgraph = FrequentSubgraph {
            subgraph_id: "subgraph_abc".to_string(),
            signature: SubgraphSignature {
                source_type: "strike".to_string(),
                relation_type: "causal".to_string(),
                target_type: "delay".to_string(),
            },
            nodes: Vec::new(),
            edges: vec![GraphEdge {
                id: "c0".to_string(),
                source_id: "s0".to_string(),
                target_id: "d0".to_string(),
                relation_type: "causal".to_string(),
                confidence: Some(0.9),
                description: String::new(),
            }],
            frequency: 6,
            support: 0.6,
            confidence: 0.9,
            pattern_type: PatternType::Causal,
            temporal_order: Vec::new(),
            causal_pairs: vec![("strike".to_string(), "delay".to_string())],
        };

        let pattern = EventPattern::from_subgraph(&subgraph);
        assert_eq!(pattern.name, "strike_causal_delay_pattern");
        assert_eq!(pattern.relation_sequence, vec![RelationType::Causal]);
        assert_eq!(pattern.causal_structure["strike"], vec!["delay"]);
        assert_eq!(pattern.event_sequence.len(), 2);
        assert!((pattern.generality_score - 0.6).abs() < 1e-6);
        assert_eq!(pattern.source_subgraphs, vec!["subgraph_abc"]);
        assert_eq!(
            pattern.embedding_text(),
            "strike_causal_delay_pattern: strike --causal--> delay observed 6 times event sequence: strike -> delay"
        );
        assert!(pattern.vector_id().starts_with("pattern_sp_"));
    }
}
