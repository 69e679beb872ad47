//! SQLite implementations of the store ports
//!
//! Vectors are stored as JSON arrays and ranked in process; the graph uses
//! recursive CTEs for bounded traversal. Every write is an
//! `INSERT … ON CONFLICT(id) DO UPDATE` upsert.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::embedding::cosine_similarity;
use crate::domain::event::{Event, EventRelation};
use crate::domain::patterns::{EventPattern, PatternRepository};
use crate::domain::store::{
    GraphEdge, GraphNode, GraphStore, RecordKind, Subgraph, VectorMatch, VectorRecord, VectorStore,
};
use crate::error::{Error, Result};
use crate::storage::Database;

// ========== Vector Store ==========

/// Vector store over the `vector_records` table
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    /// Upsert all records in one transaction
    async fn upsert_all(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let vector = serde_json::to_string(&record.vector)?;
            let metadata = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO vector_records (id, kind, vector, dimension, document, metadata, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    vector = excluded.vector,
                    dimension = excluded.dimension,
                    document = excluded.document,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.id)
            .bind(record.kind.as_str())
            .bind(&vector)
            .bind(record.vector.len() as i64)
            .bind(&record.document)
            .bind(&metadata)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if let Some(first) = records.first() {
            let dimension = first.vector.len();
            if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
                return Err(Error::VectorStore(format!(
                    "record '{}' has dimension {}, expected {}",
                    bad.id,
                    bad.vector.len(),
                    dimension
                )));
            }
        } else {
            return Ok(());
        }
        self.upsert_all(&records).await?;
        debug!(count = records.len(), "Vector records upserted");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        kind: RecordKind,
    ) -> Result<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<VectorRow> = sqlx::query_as(
            "SELECT id, vector, document, metadata FROM vector_records WHERE kind = ? AND dimension = ?",
        )
        .bind(kind.as_str())
        .bind(vector.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let stored: Vec<f32> = serde_json::from_str(&row.vector)?;
            matches.push(VectorMatch {
                distance: 1.0 - cosine_similarity(vector, &stored),
                metadata: parse_object(&row.metadata)?,
                id: row.id,
                document: row.document,
            });
        }

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ========== Graph Store ==========

/// Event graph over the `graph_nodes` / `graph_edges` tables
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    /// Insert or replace an event node
    pub async fn add_event(&self, event: &Event) -> Result<()> {
        let node = GraphNode::from_event(event)?;
        self.write_node(&node.kind, with_id(node.properties, &node.id))
            .await
    }

    /// Insert or replace a relation edge
    pub async fn add_relation(&self, relation: &EventRelation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_edges (id, source_id, target_id, relation_type, confidence, description)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                target_id = excluded.target_id,
                relation_type = excluded.relation_type,
                confidence = excluded.confidence,
                description = excluded.description
            "#,
        )
        .bind(&relation.id)
        .bind(&relation.source_event_id)
        .bind(&relation.target_event_id)
        .bind(relation.relation_type.as_str())
        .bind(relation.confidence)
        .bind(&relation.description)
        .execute(&self.pool)
        .await?;

        debug!(
            relation_id = %relation.id,
            source = %relation.source_event_id,
            target = %relation.target_event_id,
            "Relation saved"
        );
        Ok(())
    }

    pub async fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        let row: Option<NodeRow> =
            sqlx::query_as("SELECT id, kind, properties FROM graph_nodes WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(NodeRow::into_node).transpose()
    }

    pub async fn node_count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn edge_count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_edges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Node ids reachable from `root` with their shortest hop count
    async fn reachable(&self, root: &str, max_depth: u32) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            WITH RECURSIVE reachable(node_id, depth) AS (
                SELECT ?, 0

                UNION

                SELECT
                    CASE WHEN e.source_id = r.node_id THEN e.target_id ELSE e.source_id END,
                    r.depth + 1
                FROM reachable r
                JOIN graph_edges e ON (e.source_id = r.node_id OR e.target_id = r.node_id)
                WHERE r.depth < ?
            )
            SELECT node_id, MIN(depth) AS depth
            FROM reachable
            GROUP BY node_id
            ORDER BY depth, node_id
            "#,
        )
        .bind(root)
        .bind(i64::from(max_depth))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn subgraph(&self, root: GraphNode, max_depth: u32) -> Result<Subgraph> {
        let reachable = self.reachable(&root.id, max_depth).await?;

        let related_ids: Vec<&str> = reachable
            .iter()
            .filter(|(id, _)| *id != root.id)
            .map(|(id, _)| id.as_str())
            .collect();
        // nodes at the depth bound are reported but not expanded
        let frontier: Vec<&str> = reachable
            .iter()
            .filter(|(_, depth)| *depth < i64::from(max_depth))
            .map(|(id, _)| id.as_str())
            .collect();

        let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
        if !related_ids.is_empty() {
            let rows: Vec<NodeRow> = sqlx::query_as(
                "SELECT id, kind, properties FROM graph_nodes WHERE id IN (SELECT value FROM json_each(?))",
            )
            .bind(serde_json::to_string(&related_ids)?)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let node = row.into_node()?;
                nodes.insert(node.id.clone(), node);
            }
        }

        let related = related_ids
            .iter()
            .map(|id| {
                nodes.remove(*id).unwrap_or_else(|| GraphNode {
                    id: (*id).to_string(),
                    kind: "Event".to_string(),
                    properties: Map::new(),
                })
            })
            .collect();

        let edges = if frontier.is_empty() {
            Vec::new()
        } else {
            let frontier_json = serde_json::to_string(&frontier)?;
            let rows: Vec<EdgeRow> = sqlx::query_as(
                r#"
                SELECT id, source_id, target_id, relation_type, confidence, description
                FROM graph_edges
                WHERE source_id IN (SELECT value FROM json_each(?))
                   OR target_id IN (SELECT value FROM json_each(?))
                ORDER BY id
                "#,
            )
            .bind(&frontier_json)
            .bind(&frontier_json)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(EdgeRow::into_edge).collect()
        };

        Ok(Subgraph {
            root,
            related,
            edges,
        })
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn fetch_subgraph(&self, ids: &[String], max_depth: u32) -> Result<Vec<Subgraph>> {
        let mut subgraphs = Vec::new();
        for id in ids {
            if let Some(root) = self.node(id).await? {
                subgraphs.push(self.subgraph(root, max_depth).await?);
            }
        }
        Ok(subgraphs)
    }

    async fn write_node(&self, kind: &str, properties: Map<String, Value>) -> Result<()> {
        let id = properties
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::GraphStore("node properties require a string `id`".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, kind, properties, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                properties = excluded.properties,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(serde_json::to_string(&properties)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(node_id = %id, kind = %kind, "Node saved");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok())
    }
}

// ========== Pattern Repository ==========

/// Durable pattern repository over the `patterns` table
#[derive(Debug, Clone)]
pub struct SqlitePatternRepository {
    pool: SqlitePool,
}

impl SqlitePatternRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

#[async_trait]
impl PatternRepository for SqlitePatternRepository {
    async fn save(&self, pattern: &EventPattern) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO patterns (pattern_id, name, pattern_type, validation_score, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pattern_id) DO UPDATE SET
                name = excluded.name,
                pattern_type = excluded.pattern_type,
                validation_score = excluded.validation_score,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pattern.pattern_id)
        .bind(&pattern.name)
        .bind(pattern.pattern_type.as_str())
        .bind(pattern.validation_score)
        .bind(serde_json::to_string(pattern)?)
        .bind(pattern.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(pattern_id = %pattern.pattern_id, "Pattern saved");
        Ok(())
    }

    async fn get(&self, pattern_id: &str) -> Result<Option<EventPattern>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM patterns WHERE pattern_id = ?")
            .bind(pattern_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(data,)| serde_json::from_str(&data).map_err(Error::from))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<EventPattern>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM patterns ORDER BY pattern_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(Error::from))
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patterns")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ========== Database Row Types ==========

fn parse_object(json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn with_id(mut properties: Map<String, Value>, id: &str) -> Map<String, Value> {
    properties.insert("id".to_string(), Value::from(id));
    properties
}

#[derive(Debug, FromRow)]
struct VectorRow {
    id: String,
    vector: String,
    document: String,
    metadata: String,
}

#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    kind: String,
    properties: String,
}

impl NodeRow {
    fn into_node(self) -> Result<GraphNode> {
        Ok(GraphNode {
            properties: parse_object(&self.properties)?,
            id: self.id,
            kind: self.kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    id: String,
    source_id: String,
    target_id: String,
    relation_type: String,
    confidence: Option<f32>,
    description: String,
}

impl EdgeRow {
    fn into_edge(self) -> GraphEdge {
        GraphEdge {
            id: self.id,
            source_id: self.source_id,
            target_id: self.target_id,
            relation_type: self.relation_type,
            confidence: self.confidence,
            description: self.description,
        }
    }
}
