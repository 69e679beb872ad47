//! In-memory store implementations
//!
//! Used by tests and by single-process deployments. Both stores keep
//! deterministic ordering (`BTreeMap`) so ties resolve the same way each run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::domain::embedding::cosine_similarity;
use crate::domain::event::{Event, EventRelation};
use crate::domain::store::{
    GraphEdge, GraphNode, GraphStore, RecordKind, Subgraph, VectorMatch, VectorRecord, VectorStore,
};
use crate::error::{Error, Result};

// ========== Vector Store ==========

/// Brute-force cosine index held in memory
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<BTreeMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a record by id
    pub async fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.read().await.get(id).cloned()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut store = self.records.write().await;
        for record in records {
            store.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        kind: RecordKind,
    ) -> Result<Vec<VectorMatch>> {
        let store = self.records.read().await;
        let mut matches: Vec<VectorMatch> = store
            .values()
            .filter(|r| r.kind == kind)
            .map(|r| VectorMatch {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                distance: 1.0 - cosine_similarity(vector, &r.vector),
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

// ========== Graph Store ==========

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<String, GraphEdge>,
}

/// Property graph held in memory
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an event node
    pub async fn add_event(&self, event: &Event) -> Result<()> {
        let node = GraphNode::from_event(event)?;
        self.state.write().await.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Insert or replace a relation edge
    pub async fn add_relation(&self, relation: &EventRelation) {
        let edge = GraphEdge {
            id: relation.id.clone(),
            source_id: relation.source_event_id.clone(),
            target_id: relation.target_event_id.clone(),
            relation_type: relation.relation_type.as_str().to_string(),
            confidence: Some(relation.confidence),
            description: relation.description.clone(),
        };
        self.state.write().await.edges.insert(edge.id.clone(), edge);
    }

    /// Fetch a node by id
    pub async fn node(&self, id: &str) -> Option<GraphNode> {
        self.state.read().await.nodes.get(id).cloned()
    }

    /// All nodes carrying the given label
    pub async fn nodes_of_kind(&self, kind: &str) -> Vec<GraphNode> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }
}

impl GraphState {
    fn neighbourhood(&self, root: &GraphNode, max_depth: u32) -> Subgraph {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut seen_edges: BTreeSet<&str> = BTreeSet::new();
        let mut related = Vec::new();
        let mut edges = Vec::new();
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();

        visited.insert(root.id.as_str());
        queue.push_back((root.id.as_str(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self
                .edges
                .values()
                .filter(|e| e.source_id == current || e.target_id == current)
            {
                if seen_edges.insert(edge.id.as_str()) {
                    edges.push(edge.clone());
                }
                let next = if edge.source_id == current {
                    edge.target_id.as_str()
                } else {
                    edge.source_id.as_str()
                };
                if visited.insert(next) {
                    related.push(self.nodes.get(next).cloned().unwrap_or_else(|| GraphNode {
                        id: next.to_string(),
                        kind: "Event".to_string(),
                        properties: Map::new(),
                    }));
                    queue.push_back((next, depth + 1));
                }
            }
        }

        Subgraph {
            root: root.clone(),
            related,
            edges,
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn fetch_subgraph(&self, ids: &[String], max_depth: u32) -> Result<Vec<Subgraph>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .map(|root| state.neighbourhood(root, max_depth))
            .collect())
    }

    async fn write_node(&self, kind: &str, properties: Map<String, Value>) -> Result<()> {
        let id = properties
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::GraphStore("node properties require a string `id`".to_string()))?;

        self.state.write().await.nodes.insert(
            id.clone(),
            GraphNode {
                id,
                kind: kind.to_string(),
                properties,
            },
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::RelationType;

    #[tokio::test]
    async fn test_vector_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        let event = Event::new("first").with_id("e1");
        store
            .upsert(vec![VectorRecord::for_event(&event, vec![1.0, 0.0]).unwrap()])
            .await
            .unwrap();
        store
            .upsert(vec![VectorRecord::for_event(&event, vec![0.0, 1.0]).unwrap()])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("e1").await.unwrap().vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_vector_query_orders_and_filters_kind() {
        let store = InMemoryVectorStore::new();
        let near = Event::new("near").with_id("near");
        let far = Event::new("far").with_id("far");
        let mut pattern = VectorRecord::for_event(&Event::new("p").with_id("p"), vec![1.0, 0.0]).unwrap();
        pattern.kind = RecordKind::Pattern;

        store
            .upsert(vec![
                VectorRecord::for_event(&far, vec![0.0, 1.0]).unwrap(),
                VectorRecord::for_event(&near, vec![1.0, 0.1]).unwrap(),
                pattern,
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, RecordKind::Event).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].distance < hits[1].distance);

        let top1 = store.query(&[1.0, 0.0], 1, RecordKind::Event).await.unwrap();
        assert_eq!(top1.len(), 1);

        let patterns = store.query(&[1.0, 0.0], 10, RecordKind::Pattern).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].id, "p");
    }

    #[tokio::test]
    async fn test_graph_neighbourhood_respects_depth() {
        let graph = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            graph.add_event(&Event::new(id).with_id(id)).await.unwrap();
        }
        graph
            .add_relation(&EventRelation::new("a", "b", RelationType::Causal).with_confidence(0.9))
            .await;
        graph
            .add_relation(&EventRelation::new("b", "c", RelationType::TemporalBefore))
            .await;

        let one_hop = graph.fetch_subgraph(&["a".to_string()], 1).await.unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].related.len(), 1);
        assert_eq!(one_hop[0].edges.len(), 1);

        let two_hop = graph.fetch_subgraph(&["a".to_string()], 2).await.unwrap();
        assert_eq!(two_hop[0].related.len(), 2);
        assert_eq!(two_hop[0].edges.len(), 2);
        assert_eq!(two_hop[0].edges[0].confidence, Some(0.9));
    }

    #[tokio::test]
    async fn test_graph_skips_unknown_seeds() {
        let graph = InMemoryGraphStore::new();
        graph.add_event(&Event::new("a").with_id("a")).await.unwrap();
        let result = graph
            .fetch_subgraph(&["a".to_string(), "missing".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].related.is_empty());
    }

    #[tokio::test]
    async fn test_write_node_requires_id() {
        let graph = InMemoryGraphStore::new();
        let mut props = Map::new();
        props.insert("name".to_string(), Value::from("no id"));
        assert!(graph.write_node("Pattern", props).await.is_err());

        let mut props = Map::new();
        props.insert("id".to_string(), Value::from("p1"));
        graph.write_node("Pattern", props.clone()).await.unwrap();
        graph.write_node("Pattern", props).await.unwrap();
        assert_eq!(graph.nodes_of_kind("Pattern").await.len(), 1);
        assert!(graph.health_check().await.unwrap());
    }
}
