//! Schema migrations
//!
//! Each step runs in its own transaction together with the row recording
//! it in `_schema_versions`, so a failed step leaves the schema at the
//! previous version.

use sqlx::SqlitePool;
use tracing::{debug, info};

/// One versioned schema step
struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const VERSIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _schema_versions (
        version INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "vector records and event graph",
        sql: r#"
            CREATE TABLE IF NOT EXISTS vector_records (
                id TEXT PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('event', 'pattern')),
                vector TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                document TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_vector_records_kind_dim
                ON vector_records(kind, dimension);

            CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_graph_nodes_kind ON graph_nodes(kind);

            -- Edges may name nodes that were never written
            CREATE TABLE IF NOT EXISTS graph_edges (
                id TEXT PRIMARY KEY NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                confidence REAL,
                description TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);
        "#,
    },
    Migration {
        version: 2,
        name: "pattern repository",
        sql: r#"
            CREATE TABLE IF NOT EXISTS patterns (
                pattern_id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                validation_score REAL NOT NULL DEFAULT 0.0,
                data TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_score ON patterns(validation_score DESC);
        "#,
    },
];

/// Latest schema version known to this build
pub const CURRENT_VERSION: i32 = 2;

/// Where a database stands relative to [`CURRENT_VERSION`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied_version: i32,
    pub latest_version: i32,
    /// Names of the steps not yet applied, oldest first
    pub pending: Vec<&'static str>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(VERSIONS_TABLE).execute(pool).await?;
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _schema_versions")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every step newer than the recorded version
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let from = applied_version(pool).await?;
    if from >= CURRENT_VERSION {
        debug!(version = from, "Schema is current");
        return Ok(());
    }

    for step in MIGRATIONS.iter().filter(|m| m.version > from) {
        info!(version = step.version, name = step.name, "Applying schema migration");
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(step.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _schema_versions (version, name) VALUES (?, ?)")
            .bind(step.version)
            .bind(step.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    info!(from, to = CURRENT_VERSION, "Schema migrations completed");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let applied = applied_version(pool).await?;
    Ok(MigrationStatus {
        applied_version: applied,
        latest_version: CURRENT_VERSION,
        pending: MIGRATIONS
            .iter()
            .filter(|m| m.version > applied)
            .map(|m| m.name)
            .collect(),
    })
}
