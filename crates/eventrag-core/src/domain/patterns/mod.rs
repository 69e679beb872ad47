//! Pattern discovery
//!
//! ```text
//!   events ──embed──► clustering (k-means / DBSCAN) ──► EventCluster ──┐
//!      │                                                              ├─► EventPattern
//!      └──graph──► neighbourhoods ──► signature mining ──► FrequentSubgraph ┘
//!                                                              │
//!                                   PatternValidator ◄─────────┘
//!                                         │ ≥ semantic threshold
//!                                         ▼
//!                      vector index · graph node · PatternRepository
//! ```

pub mod clustering;
mod discoverer;
pub mod mining;
pub mod pattern;
pub mod repository;
pub mod validator;

pub use clustering::{ClusterMethod, EventCluster};
pub use discoverer::{DiscoveryConfig, DiscoveryOptions, DiscoveryReport, PatternDiscoverer};
pub use mining::FrequentSubgraph;
pub use pattern::{EventPattern, PatternInstance, PatternKind};
pub use repository::{InMemoryPatternRepository, PatternRepository};
pub use validator::{
    ModelBasedValidator, PatternJudge, PatternValidator, RuleBasedValidator, ValidatorKind,
};

use serde::{Deserialize, Serialize};

/// Broad family a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Causal,
    Sequential,
    Conditional,
    Associative,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Sequential => "sequential",
            Self::Conditional => "conditional",
            Self::Associative => "associative",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
