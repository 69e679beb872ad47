//! Infrastructure layer
//!
//! Implementations of the store ports in `crate::domain::store`.

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryGraphStore, InMemoryVectorStore};
pub use sqlite::{SqliteGraphStore, SqlitePatternRepository, SqliteVectorStore};
