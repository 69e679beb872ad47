//! Attribute enhancement from neighbour consensus
//!
//! For an [`IncompleteEvent`], similar events are retrieved, each missing
//! attribute is tallied across them into an [`AttributeTemplate`], and the
//! dominant value is proposed when coverage and accuracy are high enough.
//! Proposals then pass type/range checks and an optional graph consensus
//! check; failures are dropped but still reported.

mod enhancer;
pub mod template;
pub mod validation;

pub use enhancer::{AttributeEnhancer, EnhancementConfig};
pub use template::AttributeTemplate;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::event::{Event, IncompleteEvent};

/// Attributes the enhancer knows how to infer
pub const SUPPORTED_ATTRIBUTES: &[&str] = &[
    "event_type",
    "location",
    "participants",
    "importance_score",
    "sentiment",
    "timestamp",
    "entities",
    "duration",
    "impact_scope",
];

/// Diagnostics for one enhancement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancementMetadata {
    /// Neighbours above the similarity threshold
    pub neighbor_count: usize,
    pub similarity_threshold: f32,
    /// Fewer neighbours than the requested minimum
    pub insufficient_sources: bool,
    pub templates_built: usize,
    /// attribute → coverage rate
    pub coverage_rates: BTreeMap<String, f32>,
    /// Requested attributes outside [`SUPPORTED_ATTRIBUTES`]
    pub unsupported_attributes: Vec<String>,
    /// Degradation reported by retrieval
    pub search_error: Option<String>,
    pub search_time_ms: u64,
    /// Set when enhancement of this event failed outright
    pub error: Option<String>,
}

/// Result of enhancing one incomplete event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedEvent {
    pub original: IncompleteEvent,
    /// Validated inferred values
    pub enhanced_attributes: BTreeMap<String, Value>,
    /// Confidence of each validated value
    pub attribute_confidences: BTreeMap<String, f32>,
    /// Up to 5 neighbour ids backing each inferred value
    pub inference_sources: BTreeMap<String, Vec<String>>,
    /// Validation outcome of every proposed value, including rejected ones
    pub validation_results: BTreeMap<String, bool>,
    /// mean(confidence) × validated / proposed
    pub total_confidence: f32,
    pub metadata: EnhancementMetadata,
    pub enhanced_at: DateTime<Utc>,
}

impl EnhancedEvent {
    /// A zero-confidence result for an event that could not be enhanced
    pub fn failed(original: IncompleteEvent, error: impl Into<String>) -> Self {
        Self {
            original,
            enhanced_attributes: BTreeMap::new(),
            attribute_confidences: BTreeMap::new(),
            inference_sources: BTreeMap::new(),
            validation_results: BTreeMap::new(),
            total_confidence: 0.0,
            metadata: EnhancementMetadata {
                error: Some(error.into()),
                ..EnhancementMetadata::default()
            },
            enhanced_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.metadata.error.is_some()
    }

    /// A new event with the validated attributes applied
    pub fn completed_event(&self) -> Event {
        self.enhanced_attributes
            .iter()
            .fold(self.original.event.clone(), |event, (name, value)| {
                event.with_attribute(name, value)
            })
    }
}

/// Per-attribute summary over a batch of enhancements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeStats {
    /// Times a value was proposed
    pub proposed: usize,
    /// Times a proposed value passed validation
    pub validated: usize,
    /// Mean confidence of validated values
    pub mean_confidence: f32,
    pub validation_rate: f32,
}

/// Summary over a batch of enhancements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeStatistics {
    pub total_events: usize,
    pub failed_events: usize,
    pub mean_total_confidence: f32,
    pub attributes: BTreeMap<String, AttributeStats>,
}

impl AttributeStatistics {
    /// Aggregate a batch
    pub fn from_events(events: &[EnhancedEvent]) -> Self {
        let mut stats = Self {
            total_events: events.len(),
            failed_events: events.iter().filter(|e| e.is_failed()).count(),
            ..Self::default()
        };
        if events.is_empty() {
            return stats;
        }

        stats.mean_total_confidence =
            events.iter().map(|e| e.total_confidence).sum::<f32>() / events.len() as f32;

        let mut confidence_sums: BTreeMap<String, f32> = BTreeMap::new();
        for event in events {
            for (attribute, passed) in &event.validation_results {
                let entry = stats.attributes.entry(attribute.clone()).or_default();
                entry.proposed += 1;
                if *passed {
                    entry.validated += 1;
                    *confidence_sums.entry(attribute.clone()).or_insert(0.0) += event
                        .attribute_confidences
                        .get(attribute)
                        .copied()
                        .unwrap_or(0.0);
                }
            }
        }

        for (attribute, entry) in stats.attributes.iter_mut() {
            entry.validation_rate = entry.validated as f32 / entry.proposed.max(1) as f32;
            if entry.validated > 0 {
                entry.mean_confidence =
                    confidence_sums.get(attribute).copied().unwrap_or(0.0) / entry.validated as f32;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enhanced(sentiment_ok: bool, confidence: f32) -> EnhancedEvent {
        let mut e = EnhancedEvent::failed(
            IncompleteEvent::new(Event::new("x"), ["sentiment"]),
            "placeholder",
        );
        e.metadata.error = None;
        e.validation_results.insert("sentiment".to_string(), sentiment_ok);
        if sentiment_ok {
            e.enhanced_attributes
                .insert("sentiment".to_string(), Value::from("positive"));
            e.attribute_confidences
                .insert("sentiment".to_string(), confidence);
        }
        e.total_confidence = if sentiment_ok { confidence } else { 0.0 };
        e
    }

    #[test]
    fn test_failed_event_has_zero_confidence() {
        let e = EnhancedEvent::failed(IncompleteEvent::new(Event::new("x"), ["location"]), "boom");
        assert!(e.is_failed());
        assert_eq!(e.total_confidence, 0.0);
        assert!(e.enhanced_attributes.is_empty());
    }

    #[test]
    fn test_completed_event_applies_attributes() {
        let e = enhanced(true, 0.9);
        let completed = e.completed_event();
        assert_eq!(completed.attribute("sentiment"), Some(Value::from("positive")));
        assert_eq!(e.original.event.attribute("sentiment"), None);
    }

    #[test]
    fn test_attribute_statistics() {
        let events = vec![enhanced(true, 0.8), enhanced(true, 0.6), enhanced(false, 0.0)];
        let stats = AttributeStatistics::from_events(&events);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.failed_events, 0);

        let sentiment = &stats.attributes["sentiment"];
        assert_eq!(sentiment.proposed, 3);
        assert_eq!(sentiment.validated, 2);
        assert!((sentiment.mean_confidence - 0.7).abs() < 1e-6);
        assert!((sentiment.validation_rate - 2.0 / 3.0).abs() < 1e-6);
        assert!((stats.mean_total_confidence - (1.4 / 3.0)).abs() < 1e-6);
    }
}
