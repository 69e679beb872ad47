//! Error types for Eventrag

use thiserror::Error;

/// Result type alias using Eventrag's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Eventrag error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Query errors (E001-E099)
    #[error("{kind} query requires `{field}`")]
    MissingQueryField { kind: &'static str, field: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check that the service endpoint is reachable.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Pattern judge error: {0}")]
    JudgeError(String),

    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    // Store errors (E200-E299)
    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Graph store error: {0}")]
    GraphStore(String),

    #[error("Pattern '{0}' not found")]
    PatternNotFound(String),

    // Execution errors (E300-E399)
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Worker failed: {0}")]
    Worker(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // System errors (E900-E999)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingQueryField { .. } => "E001",
            Self::InvalidInput(_) => "E002",
            Self::NetworkError(_) => "E100",
            Self::EmbeddingFailed(_) => "E101",
            Self::JudgeError(_) => "E102",
            Self::RateLimited(_) => "E103",
            Self::VectorStore(_) => "E200",
            Self::GraphStore(_) => "E201",
            Self::PatternNotFound(_) => "E202",
            Self::Timeout { .. } => "E300",
            Self::Cancelled => "E301",
            Self::Worker(_) => "E302",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E900",
            Self::Serialization(_) => "E901",
            Self::Other(_) => "E999",
        }
    }

    /// Get a suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::MissingQueryField { field, .. } => {
                Some(format!("Supply `{}` on the query", field))
            }
            Self::NetworkError(_) => Some("Check the embedding and judge endpoints".to_string()),
            Self::Timeout { .. } => {
                Some("Raise `retrieval.call_timeout_secs` or `coordinator.stage_timeout_secs`".to_string())
            }
            Self::ConfigError(_) => Some("Check ~/.config/eventrag/config.toml".to_string()),
            _ => None,
        }
    }

    /// Whether the error stems from an external store or service rather than the caller
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::EmbeddingFailed(_)
                | Self::JudgeError(_)
                | Self::RateLimited(_)
                | Self::VectorStore(_)
                | Self::GraphStore(_)
                | Self::Timeout { .. }
                | Self::DatabaseError(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{:#}", err))
    }
}
