//! Checks applied to inferred attribute values

use chrono::DateTime;
use serde_json::Value;

use crate::domain::event::{Event, is_present};

/// Allowed sentiment labels
pub const SENTIMENTS: &[&str] = &["positive", "negative", "neutral"];

/// Type and range check for one attribute value
pub fn check_value(attribute: &str, value: &Value) -> bool {
    match attribute {
        "importance_score" => value
            .as_f64()
            .is_some_and(|score| (0.0..=1.0).contains(&score)),
        "sentiment" => value
            .as_str()
            .is_some_and(|s| SENTIMENTS.contains(&s.trim().to_lowercase().as_str())),
        "timestamp" => value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
        "entities" => value
            .as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(is_present)),
        "participants" => match value {
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.trim().is_empty(),
            _ => false,
        },
        "duration" => match value {
            Value::Number(n) => n.as_f64().is_some_and(|d| d >= 0.0),
            Value::String(s) => !s.trim().is_empty(),
            _ => false,
        },
        "event_type" | "location" | "impact_scope" => {
            value.as_str().is_some_and(|s| !s.trim().is_empty())
        }
        _ => is_present(value),
    }
}

/// Outcome of the graph consensus check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    /// Graph neighbours carrying the attribute at all
    pub voters: usize,
    /// Of those, how many agree with the candidate value
    pub agreeing: usize,
}

impl Consensus {
    /// Passes with no voters, or when the agreeing share reaches `ratio`
    pub fn passes(&self, ratio: f32) -> bool {
        self.voters == 0 || self.agreeing as f32 / self.voters as f32 >= ratio
    }
}

/// Count how many graph-retrieved neighbours agree with `value`
pub fn graph_consensus(attribute: &str, value: &Value, graph_neighbors: &[Event]) -> Consensus {
    let mut voters = 0;
    let mut agreeing = 0;
    for observed in graph_neighbors.iter().filter_map(|e| e.attribute(attribute)) {
        voters += 1;
        if &observed == value {
            agreeing += 1;
        }
    }
    Consensus { voters, agreeing }
}
