//! Eventrag Core Library
//!
//! Hybrid retrieval and reasoning over event graphs:
//! - Hybrid retrieval (dense vectors fused with graph structure)
//! - Attribute enhancement for incomplete events
//! - Pattern discovery (clustering and frequent subgraph mining)
//! - Query coordination over a bounded worker pool
//! - Storage (in-memory and SQLite)
//! - HTTP embedding and pattern judge adapters

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod runtime;
pub mod storage;

pub use engine::Engine;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::coordinator::{
        GraphRagCoordinator, Query, QueryKind, QueryParameters, QueryStatus, Response,
    };
    pub use crate::domain::embedding::{Embedder, Embedding, HashEmbedder};
    pub use crate::domain::enhancement::{AttributeEnhancer, EnhancedEvent};
    pub use crate::domain::event::{Event, EventRelation, IncompleteEvent, RelationType};
    pub use crate::domain::patterns::{ClusterMethod, EventPattern, PatternDiscoverer};
    pub use crate::domain::retrieval::{HybridRetriever, SearchParams};
    pub use crate::domain::store::{GraphStore, VectorStore};
    pub use crate::engine::Engine;
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::{InMemoryGraphStore, InMemoryVectorStore};
}
