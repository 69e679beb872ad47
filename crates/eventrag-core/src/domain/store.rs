//! Vector and graph store ports
//!
//! The engine only consumes these through the traits below. Adapters live in
//! `crate::infrastructure`. Both stores are shared, read-mostly handles: all
//! writes are upserts keyed by id, so concurrent callers need no locking of
//! their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::event::Event;
use crate::error::Result;

/// Kind tag stored with every vector record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Pattern,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Pattern => "pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Self::Event),
            "pattern" => Some(Self::Pattern),
            _ => None,
        }
    }
}

/// A record written to the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub kind: RecordKind,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    /// Build the record for an event; the full event is kept in metadata
    pub fn for_event(event: &Event, vector: Vec<f32>) -> Result<Self> {
        let mut metadata = Map::new();
        metadata.insert("event".to_string(), serde_json::to_value(event)?);
        Ok(Self {
            id: event.id.clone(),
            kind: RecordKind::Event,
            vector,
            document: event.description.clone(),
            metadata,
        })
    }
}

/// A ranked vector store hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
    /// Cosine distance (1 - cosine similarity)
    pub distance: f32,
}

impl VectorMatch {
    /// Similarity in [0, 1]
    pub fn similarity(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }

    /// Rebuild the event this hit was written from
    ///
    /// Records written by other tools may lack the embedded event; those fall
    /// back to an event carrying only the id and document.
    pub fn to_event(&self) -> Event {
        self.metadata
            .get("event")
            .and_then(|v| serde_json::from_value::<Event>(v.clone()).ok())
            .unwrap_or_else(|| Event::new(self.document.clone()).with_id(self.id.clone()))
    }
}

/// Dense vector index
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Nearest records of one kind, ascending by distance
    async fn query(&self, vector: &[f32], top_k: usize, kind: RecordKind)
        -> Result<Vec<VectorMatch>>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;
}

/// A node returned by a graph traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    /// Node label, e.g. "Event" or "Pattern"
    pub kind: String,
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// Build an event node
    pub fn from_event(event: &Event) -> Result<Self> {
        let properties = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            id: event.id.clone(),
            kind: "Event".to_string(),
            properties,
        })
    }

    /// The event type stored on the node, or "unknown"
    pub fn event_type(&self) -> String {
        self.properties
            .get("event_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Interpret the node as an event
    pub fn to_event(&self) -> Event {
        serde_json::from_value::<Event>(Value::Object(self.properties.clone()))
            .map(|e| e.with_id(self.id.clone()))
            .unwrap_or_else(|_| {
                let description = self
                    .properties
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Event::new(description).with_id(self.id.clone())
            })
    }
}

/// A relation edge returned by a graph traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub description: String,
}

/// Bounded-depth neighbourhood around one seed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: GraphNode,
    /// Reachable nodes, excluding the root
    pub related: Vec<GraphNode>,
    /// Edges touching the root or any related node within the depth bound
    pub edges: Vec<GraphEdge>,
}

/// Property/relation graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// One subgraph per seed id that exists in the graph
    async fn fetch_subgraph(&self, ids: &[String], max_depth: u32) -> Result<Vec<Subgraph>>;

    /// Insert or replace a node keyed by `properties["id"]`
    async fn write_node(&self, kind: &str, properties: Map<String, Value>) -> Result<()>;

    /// Whether the store is reachable
    async fn health_check(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_match_rebuilds_event() {
        let event = Event::new("Flood closes bridge").with_type("disaster");
        let record = VectorRecord::for_event(&event, vec![1.0, 0.0]).unwrap();
        let hit = VectorMatch {
            id: record.id.clone(),
            document: record.document.clone(),
            metadata: record.metadata.clone(),
            distance: 0.25,
        };
        assert_eq!(hit.to_event(), event);
        assert!((hit.similarity() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_vector_match_without_event_metadata() {
        let hit = VectorMatch {
            id: "x".to_string(),
            document: "bare document".to_string(),
            metadata: Map::new(),
            distance: 1.4,
        };
        let event = hit.to_event();
        assert_eq!(event.id, "x");
        assert_eq!(event.description, "bare document");
        assert_eq!(hit.similarity(), 0.0);
    }

    #[test]
    fn test_graph_node_event_type() {
        let node = GraphNode::from_event(&Event::new("a").with_type("strike")).unwrap();
        assert_eq!(node.event_type(), "strike");
        let untyped = GraphNode::from_event(&Event::new("b")).unwrap();
        assert_eq!(untyped.event_type(), "unknown");
        assert_eq!(untyped.to_event().description, "b");
    }
}
