//! Pattern repository
//!
//! Discovered patterns are saved by id; saving a pattern that already exists
//! replaces it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::pattern::EventPattern;
use crate::error::Result;

/// Persistence for validated patterns
#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Insert or replace the pattern with the same id
    async fn save(&self, pattern: &EventPattern) -> Result<()>;

    async fn get(&self, pattern_id: &str) -> Result<Option<EventPattern>>;

    /// All patterns, ordered by id
    async fn list(&self) -> Result<Vec<EventPattern>>;

    async fn count(&self) -> Result<usize>;
}

/// Session-scoped repository
#[derive(Debug, Default)]
pub struct InMemoryPatternRepository {
    patterns: RwLock<BTreeMap<String, EventPattern>>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn save(&self, pattern: &EventPattern) -> Result<()> {
        self.patterns
            .write()
            .await
            .insert(pattern.pattern_id.clone(), pattern.clone());
        Ok(())
    }

    async fn get(&self, pattern_id: &str) -> Result<Option<EventPattern>> {
        Ok(self.patterns.read().await.get(pattern_id).cloned())
    }

    async fn list(&self) -> Result<Vec<EventPattern>> {
        Ok(self.patterns.read().await.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.patterns.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Event;
    use crate::domain::patterns::clustering::{ClusterAttributes, EventCluster};

    fn pattern(ids: &[&str], similarity: f32) -> EventPattern {
        let events: Vec<Event> = ids.iter().map(|id| Event::new("x").with_id(*id)).collect();
        EventPattern::from_cluster(
            &EventCluster {
                cluster_id: 0,
                label: "cluster_0_mixed".to_string(),
                representative: events[0].clone(),
                events,
                centroid: vec![1.0],
                intra_cluster_similarity: similarity,
                common_attributes: ClusterAttributes::default(),
            },
            ids.len(),
        )
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let repo = InMemoryPatternRepository::new();
        repo.save(&pattern(&["a", "b", "c"], 0.7)).await.unwrap();
        repo.save(&pattern(&["c", "b", "a"], 0.9)).await.unwrap();
        repo.save(&pattern(&["d", "e", "f"], 0.8)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        let id = pattern(&["a", "b", "c"], 0.0).pattern_id;
        let stored = repo.get(&id).await.unwrap().unwrap();
        assert!((stored.confidence - 0.9).abs() < 1e-6);
        assert!(repo.get("missing").await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 2);
    }
}
