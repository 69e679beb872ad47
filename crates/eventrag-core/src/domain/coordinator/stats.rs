use serde::{Deserialize, Serialize};

use super::QueryStatus;

/// Running query statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub partial_queries: u64,
    pub failed_queries: u64,
    /// Streaming mean over all recorded queries
    pub average_response_time_secs: f64,
}

impl QueryStats {
    /// Fold one finished query into the statistics
    pub fn record(&mut self, status: QueryStatus, elapsed_secs: f64) {
        self.total_queries += 1;
        match status {
            QueryStatus::Success => self.successful_queries += 1,
            QueryStatus::Partial => self.partial_queries += 1,
            QueryStatus::Failed => self.failed_queries += 1,
        }
        let n = self.total_queries as f64;
        self.average_response_time_secs += (elapsed_secs - self.average_response_time_secs) / n;
    }

    /// Share of queries that returned any usable output
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        (self.successful_queries + self.partial_queries) as f64 / self.total_queries as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_average() {
        let mut stats = QueryStats::default();
        stats.record(QueryStatus::Success, 1.0);
        stats.record(QueryStatus::Failed, 3.0);
        stats.record(QueryStatus::Partial, 5.0);

        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.partial_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert!((stats.average_response_time_secs - 3.0).abs() < 1e-9);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        let stats = QueryStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.average_response_time_secs, 0.0);
    }
}
