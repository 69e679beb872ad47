//! Query coordination across retrieval, enhancement and discovery
//!
//! A [`Query`] names one of four kinds. Comprehensive queries chain the
//! stages strictly in order:
//!
//! ```text
//!   retrieval ──► enhancement (if incomplete events) ──► discovery (over retrieved events)
//! ```
//!
//! Every stage runs on the coordinator's bounded worker pool. A stage error
//! fails the query, except in comprehensive mode where a failure after
//! retrieval keeps the retrieval output and marks the response partial.

mod health;
mod service;
mod stats;

pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use service::{CoordinatorConfig, GraphRagCoordinator};
pub use stats::QueryStats;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::enhancement::{AttributeStatistics, EnhancedEvent};
use crate::domain::event::{Event, IncompleteEvent};
use crate::domain::patterns::{ClusterMethod, EventPattern};

/// What a query asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Retrieval,
    Enhancement,
    PatternDiscovery,
    Comprehensive,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Enhancement => "enhancement",
            Self::PatternDiscovery => "pattern_discovery",
            Self::Comprehensive => "comprehensive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "retrieval" => Some(Self::Retrieval),
            "enhancement" => Some(Self::Enhancement),
            "pattern_discovery" => Some(Self::PatternDiscovery),
            "comprehensive" => Some(Self::Comprehensive),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query overrides; unset fields fall back to configured defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_max_depth: Option<u32>,
    /// Neighbour threshold for enhancement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancement_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sources: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_method: Option<ClusterMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_support: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
}

/// A coordinated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub kind: QueryKind,
    #[serde(default)]
    pub target_events: Vec<Event>,
    #[serde(default)]
    pub incomplete_events: Vec<IncompleteEvent>,
    #[serde(default)]
    pub parameters: QueryParameters,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    pub fn new(kind: QueryKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            kind,
            target_events: Vec::new(),
            incomplete_events: Vec::new(),
            parameters: QueryParameters::default(),
            submitted_at: Utc::now(),
        }
    }

    pub fn retrieval(text: impl Into<String>) -> Self {
        Self::new(QueryKind::Retrieval, text)
    }

    pub fn enhancement(incomplete_events: Vec<IncompleteEvent>) -> Self {
        Self::new(QueryKind::Enhancement, "").with_incomplete_events(incomplete_events)
    }

    pub fn pattern_discovery(target_events: Vec<Event>) -> Self {
        Self::new(QueryKind::PatternDiscovery, "").with_target_events(target_events)
    }

    pub fn comprehensive(text: impl Into<String>) -> Self {
        Self::new(QueryKind::Comprehensive, text)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_target_events(mut self, events: Vec<Event>) -> Self {
        self.target_events = events;
        self
    }

    pub fn with_incomplete_events(mut self, events: Vec<IncompleteEvent>) -> Self {
        self.incomplete_events = events;
        self
    }

    pub fn with_parameters(mut self, parameters: QueryParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Outcome of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    /// Retrieval succeeded but a later comprehensive stage failed
    Partial,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Retrieval settings and counts echoed back in a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub top_k: usize,
    /// Normalised weights fusion applied
    pub vector_weight: f32,
    pub graph_weight: f32,
    pub similarity_threshold: f32,
    pub graph_max_depth: u32,
    pub vector_count: usize,
    pub graph_count: usize,
    pub search_time_ms: u64,
    /// Degraded modality, if any
    pub error: Option<String>,
}

/// Discovery settings and counts echoed back in a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub total_events: usize,
    pub cluster_method: String,
    pub frequency_threshold: usize,
    /// Support floor applied, after defaults
    pub min_support: f32,
    /// Confidence floor applied, after defaults
    pub min_confidence: f32,
    pub clusters: usize,
    pub subgraphs: usize,
    pub candidates: usize,
    pub rejected: usize,
    pub persistence_failures: Vec<String>,
    pub graph_error: Option<String>,
}

/// Diagnostics attached to a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub query_kind: Option<QueryKind>,
    /// Stages that completed, in execution order
    pub stages_run: Vec<String>,
    /// stage → error, for stages that failed
    pub stage_errors: BTreeMap<String, String>,
    pub search: Option<SearchSummary>,
    pub enhancement_stats: Option<AttributeStatistics>,
    pub discovery: Option<DiscoverySummary>,
}

/// Result of processing a [`Query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub query_id: String,
    pub status: QueryStatus,
    pub retrieved_events: Vec<Event>,
    pub enhanced_events: Vec<EnhancedEvent>,
    pub discovered_patterns: Vec<EventPattern>,
    /// stage → confidence in [0, 1], plus "comprehensive" for chained queries
    pub confidence_scores: BTreeMap<String, f32>,
    pub execution_time_secs: f64,
    pub error_message: Option<String>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            status: QueryStatus::Success,
            retrieved_events: Vec::new(),
            enhanced_events: Vec::new(),
            discovered_patterns: Vec::new(),
            confidence_scores: BTreeMap::new(),
            execution_time_secs: 0.0,
            error_message: None,
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn confidence(&self, stage: &str) -> Option<f32> {
        self.confidence_scores.get(stage).copied()
    }
}
