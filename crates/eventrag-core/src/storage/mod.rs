//! SQLite storage
//!
//! - `database`: pool setup for file and in-memory databases
//! - `migrations`: versioned schema steps applied on open
//!
//! ```ignore
//! use eventrag_core::storage::Database;
//! use eventrag_core::infrastructure::SqliteVectorStore;
//!
//! let db = Database::in_memory().await?;
//! let vectors = SqliteVectorStore::from_database(&db);
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, DatabaseLocation, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
