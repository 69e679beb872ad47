//! Engine assembly
//!
//! Builds the retriever, enhancer, discoverer and coordinator from one
//! [`Config`] around caller-supplied or configured backends.
//!
//! ```text
//!   Embedder ─┐
//!   Vectors ──┼─► HybridRetriever ─┬─► AttributeEnhancer ─┐
//!   Graph ────┘                    └─► PatternDiscoverer ─┴─► GraphRagCoordinator
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, EmbeddingProvider, StorageBackend};
use crate::domain::coordinator::{GraphRagCoordinator, Query, Response};
use crate::domain::embedding::{Embedder, HashEmbedder};
use crate::domain::enhancement::AttributeEnhancer;
use crate::domain::patterns::validator::build_validator;
use crate::domain::patterns::{
    InMemoryPatternRepository, PatternDiscoverer, PatternJudge, PatternRepository, ValidatorKind,
};
use crate::domain::retrieval::HybridRetriever;
use crate::domain::store::{GraphStore, VectorStore};
use crate::error::{Error, Result};
use crate::infrastructure::memory::{InMemoryGraphStore, InMemoryVectorStore};
use crate::infrastructure::sqlite::{SqliteGraphStore, SqlitePatternRepository, SqliteVectorStore};
use crate::llm::{HttpEmbedder, LlmClient, LlmPatternJudge};
use crate::storage::Database;

/// A fully wired engine
pub struct Engine {
    config: Config,
    coordinator: Arc<GraphRagCoordinator>,
    database: Option<Database>,
}

impl Engine {
    /// Wire the engine around the given backends
    ///
    /// Discovered patterns are kept in a session-scoped repository.
    pub fn from_config(
        config: Config,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Result<Self> {
        Self::assemble(
            config,
            embedder,
            vectors,
            graph,
            Arc::new(InMemoryPatternRepository::new()),
            None,
        )
    }

    /// Wire the engine with the embedder and stores named in `config`
    pub async fn open(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(config.embedding.dimension)),
            EmbeddingProvider::Http => Arc::new(HttpEmbedder::new(&config.embedding)?),
        };

        match config.storage.backend {
            StorageBackend::Memory => Self::from_config(
                config,
                embedder,
                Arc::new(InMemoryVectorStore::new()),
                Arc::new(InMemoryGraphStore::new()),
            ),
            StorageBackend::Sqlite => {
                let db = Database::open(config.storage.resolved_database_path()).await?;
                Self::assemble(
                    config,
                    embedder,
                    Arc::new(SqliteVectorStore::from_database(&db)),
                    Arc::new(SqliteGraphStore::from_database(&db)),
                    Arc::new(SqlitePatternRepository::from_database(&db)),
                    Some(db),
                )
            }
        }
    }

    fn assemble(
        config: Config,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        repository: Arc<dyn PatternRepository>,
        database: Option<Database>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;

        let retriever = Arc::new(
            HybridRetriever::new(embedder, vectors, graph).with_config(config.retrieval.clone()),
        );
        let enhancer = Arc::new(
            AttributeEnhancer::new(retriever.clone()).with_config(config.enhancement.clone()),
        );

        let judge: Option<Arc<dyn PatternJudge>> = match config.discovery.validator {
            ValidatorKind::RuleBased => None,
            ValidatorKind::ModelBased => Some(Arc::new(LlmPatternJudge::new(
                LlmClient::from_config(&config.judge)?,
            ))),
        };
        let validator = build_validator(config.discovery.validator, judge)?;

        let discoverer = Arc::new(
            PatternDiscoverer::new(retriever.clone())
                .with_config(config.discovery.clone())
                .with_validator(validator)
                .with_repository(repository),
        );

        let coordinator = Arc::new(
            GraphRagCoordinator::new(retriever, enhancer, discoverer)
                .with_config(config.coordinator.clone()),
        );

        info!(
            validator = ?config.discovery.validator,
            storage = ?config.storage.backend,
            max_workers = config.coordinator.max_workers,
            "Engine assembled"
        );

        Ok(Self {
            config,
            coordinator,
            database,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<GraphRagCoordinator> {
        &self.coordinator
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        self.coordinator.retriever()
    }

    /// The SQLite database, when the engine was opened on one
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub async fn process_query(&self, query: &Query) -> Response {
        self.coordinator.process_query(query).await
    }

    /// Close the database pool, if any
    pub async fn close(&self) {
        if let Some(db) = &self.database {
            db.close().await;
        }
    }
}
