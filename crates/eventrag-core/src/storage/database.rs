//! SQLite connection pool
//!
//! Shared by the vector, graph and pattern stores in
//! `crate::infrastructure::sqlite`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use super::migrations::{self, MigrationStatus};

/// Where the pool connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Private to the pool; gone once it closes
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Apply pending schema migrations on open
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            auto_migrate: true,
        }
    }

    pub fn memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            // a second connection would open a second, empty database
            max_connections: 1,
            ..Self::file(PathBuf::new())
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn without_migrations(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = match &self.location {
            DatabaseLocation::Memory => SqliteConnectOptions::new().in_memory(true),
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
            }
        };
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout))
    }
}

/// `eventrag/eventrag.db` under the platform data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("eventrag"))
        .unwrap_or_default()
        .join("eventrag.db")
}

/// A migrated SQLite pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    location: DatabaseLocation,
}

impl Database {
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open database {:?}", config.location))?;

        let db = Self {
            pool,
            location: config.location,
        };
        if config.auto_migrate {
            db.migrate().await?;
        }
        debug!(location = ?db.location, "Database ready");
        Ok(db)
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::connect(DatabaseConfig::file(path)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(DatabaseConfig::memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Backing file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            DatabaseLocation::File(path) => Some(path),
            DatabaseLocation::Memory => None,
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate database schema")
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        migrations::migration_status(&self.pool).await
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();
        db.health_check().await.unwrap();
        assert!(db.path().is_none());
        assert!(db.migration_status().await.unwrap().is_current());
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("store.db");

        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
        db.close().await;
    }

    #[tokio::test]
    async fn test_without_migrations_leaves_schema_pending() {
        let db = Database::connect(DatabaseConfig::memory().without_migrations())
            .await
            .unwrap();
        assert!(!db.migration_status().await.unwrap().is_current());

        db.migrate().await.unwrap();
        assert!(db.migration_status().await.unwrap().is_current());
    }

    #[test]
    fn test_default_path_ends_in_eventrag_db() {
        assert!(default_database_path().ends_with("eventrag.db"));
    }
}
