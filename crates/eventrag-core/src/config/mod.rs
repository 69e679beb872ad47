//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::coordinator::CoordinatorConfig;
use crate::domain::enhancement::EnhancementConfig;
use crate::domain::patterns::DiscoveryConfig;
use crate::domain::retrieval::RetrievalConfig;

/// Environment variable holding the pattern judge API key
pub const JUDGE_API_KEY_ENV: &str = "EVENTRAG_JUDGE_API_KEY";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "EVENTRAG_CONFIG_DIR";

/// Eventrag configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub enhancement: EnhancementConfig,
    pub discovery: DiscoveryConfig,
    pub coordinator: CoordinatorConfig,
    pub judge: JudgeConfig,
    pub storage: StorageConfig,
}

/// Which embedder backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Offline feature hashing
    #[default]
    Hash,
    /// Ollama-compatible `/api/embeddings` endpoint
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 30,
        }
    }
}

/// OpenAI-compatible chat endpoint used by the model-based pattern validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            timeout_secs: 60,
        }
    }
}

impl JudgeConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;
        Ok(env::var(JUDGE_API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    format!("***{}", &key[key.len() - 4..])
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Judge API keys must be provided via {}, not stored in configuration",
                JUDGE_API_KEY_ENV
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite file; the platform data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::storage::default_database_path)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("eventrag")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load and validate configuration from `path`
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.judge.enforce_env_only()?;

        check_weights(
            "retrieval",
            self.retrieval.vector_weight,
            self.retrieval.graph_weight,
        )?;
        check_weights(
            "enhancement",
            self.enhancement.vector_weight,
            self.enhancement.graph_weight,
        )?;
        check_weights(
            "coordinator",
            self.coordinator.default_vector_weight,
            self.coordinator.default_graph_weight,
        )?;

        for (key, value) in [
            ("retrieval.similarity_threshold", self.retrieval.similarity_threshold),
            ("enhancement.similarity_threshold", self.enhancement.similarity_threshold),
            ("enhancement.min_coverage", self.enhancement.min_coverage),
            ("enhancement.min_inference_accuracy", self.enhancement.min_inference_accuracy),
            ("enhancement.consensus_ratio", self.enhancement.consensus_ratio),
            ("discovery.min_pattern_support", self.discovery.min_pattern_support),
            ("discovery.semantic_threshold", self.discovery.semantic_threshold),
            (
                "coordinator.default_similarity_threshold",
                self.coordinator.default_similarity_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0.0 and 1.0, got {}", key, value));
            }
        }

        if self.coordinator.max_workers == 0 {
            return Err(anyhow!("coordinator.max_workers must be at least 1"));
        }
        if self.discovery.min_cluster_size == 0 {
            return Err(anyhow!("discovery.min_cluster_size must be at least 1"));
        }
        if self.embedding.dimension == 0 {
            return Err(anyhow!("embedding.dimension must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.judge.temperature) {
            return Err(anyhow!("judge.temperature must be between 0.0 and 2.0"));
        }
        Ok(())
    }

    /// Remove the config file at the default location
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn check_weights(section: &str, vector: f32, graph: f32) -> anyhow::Result<()> {
    if vector < 0.0 || graph < 0.0 {
        return Err(anyhow!("{} weights must be non-negative", section));
    }
    if vector + graph <= 0.0 {
        return Err(anyhow!("{} weights must not both be zero", section));
    }
    Ok(())
}
