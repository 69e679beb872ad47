//! Event records and the relations between them
//!
//! Events are produced upstream by the extraction pipeline and are treated as
//! read-only here. Enhancement never edits an event in place; it derives a new
//! one through [`Event::with_attribute`].
//!
//! Structured attributes are addressed by name so that neighbour consensus can
//! treat core fields (`event_type`, `timestamp`, ...) and free-form properties
//! (`sentiment`, `location`, ...) uniformly.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Attribute names exposed as dedicated fields rather than properties
pub const CORE_ATTRIBUTES: &[&str] = &["event_type", "timestamp", "entities", "importance_score"];

/// An extracted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: String,
    /// Free-text description
    pub description: String,
    /// When the event happened, if known
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Event type label (e.g. "acquisition", "outage")
    #[serde(default)]
    pub event_type: Option<String>,
    /// Names of the entities taking part
    #[serde(default)]
    pub entities: Vec<String>,
    /// Importance in [0, 1]
    #[serde(default)]
    pub importance_score: Option<f32>,
    /// Arbitrary extra attributes (location, participants, sentiment, ...)
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    /// Create an event with a fresh id
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            timestamp: None,
            event_type: None,
            entities: Vec::new(),
            importance_score: None,
            properties: Map::new(),
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the event type
    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the participating entities
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the importance score (clamped to 0.0-1.0)
    pub fn with_importance(mut self, score: f32) -> Self {
        self.importance_score = Some(score.clamp(0.0, 1.0));
        self
    }

    /// Set a free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Text used to embed this event
    ///
    /// The description followed by the type and entity list, so that events
    /// sharing a type or actors land close together.
    pub fn embedding_text(&self) -> String {
        let mut text = self.description.clone();
        if let Some(event_type) = self.event_type.as_deref().filter(|t| !t.is_empty()) {
            text.push_str(&format!(" [type: {}]", event_type));
        }
        if !self.entities.is_empty() {
            text.push_str(&format!(" [entities: {}]", self.entities.join(", ")));
        }
        text
    }

    /// Read a structured attribute by name
    ///
    /// Returns `None` when the event does not carry a usable value (absent,
    /// null, empty string or empty list).
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "event_type" => self
                .event_type
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| Value::String(t.clone())),
            "timestamp" => self.timestamp.map(|ts| Value::String(ts.to_rfc3339())),
            "entities" => {
                if self.entities.is_empty() {
                    None
                } else {
                    Some(Value::Array(
                        self.entities.iter().cloned().map(Value::String).collect(),
                    ))
                }
            }
            "importance_score" => self
                .importance_score
                .and_then(|score| serde_json::Number::from_f64(f64::from(score)))
                .map(Value::Number),
            other => self.properties.get(other).filter(|v| is_present(v)).cloned(),
        }
    }

    /// Return a copy of this event with an attribute set
    ///
    /// Values that do not fit a core field's type leave that field unchanged.
    pub fn with_attribute(&self, name: &str, value: &Value) -> Self {
        let mut event = self.clone();
        match name {
            "event_type" => {
                if let Some(s) = value.as_str() {
                    event.event_type = Some(s.to_string());
                }
            }
            "timestamp" => {
                if let Some(ts) = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                {
                    event.timestamp = Some(ts.with_timezone(&Utc));
                }
            }
            "entities" => {
                if let Some(items) = value.as_array() {
                    event.entities = items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
            }
            "importance_score" => {
                if let Some(score) = value.as_f64() {
                    event.importance_score = Some((score as f32).clamp(0.0, 1.0));
                }
            }
            other => {
                event.properties.insert(other.to_string(), value.clone());
            }
        }
        event
    }
}

/// Whether a JSON value counts as an observed attribute value
pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// An event with some attributes known to be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteEvent {
    /// The partially known event
    pub event: Event,
    /// Attribute names that should be inferred
    pub missing_attributes: BTreeSet<String>,
}

impl IncompleteEvent {
    /// Wrap an event with the attributes it lacks
    pub fn new<I, S>(event: Event, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event,
            missing_attributes: missing.into_iter().map(Into::into).collect(),
        }
    }
}

/// A directed relation between two events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRelation {
    /// Unique identifier
    pub id: String,
    /// Kind of relation
    pub relation_type: RelationType,
    /// Source event ID
    pub source_event_id: String,
    /// Target event ID
    pub target_event_id: String,
    /// Extraction confidence (0.0 to 1.0)
    pub confidence: f32,
    /// Strength of the relation (0.0 to 1.0)
    pub strength: f32,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Supporting evidence text
    #[serde(default)]
    pub evidence: String,
}

impl EventRelation {
    /// Create a relation between two events
    pub fn new(
        source_event_id: impl Into<String>,
        target_event_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relation_type,
            source_event_id: source_event_id.into(),
            target_event_id: target_event_id.into(),
            confidence: 0.5,
            strength: 0.5,
            description: String::new(),
            evidence: String::new(),
        }
    }

    /// Set the confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the strength
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Types of relations between events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causal,
    CausalDirect,
    CausalIndirect,
    TemporalBefore,
    TemporalAfter,
    TemporalSimultaneous,
    Conditional,
    ConditionalNecessary,
    ConditionalSufficient,
    Contrast,
    ContrastOpposite,
    ContrastSimilar,
    Correlation,
    Unknown,
}

impl RelationType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::CausalDirect => "causal_direct",
            Self::CausalIndirect => "causal_indirect",
            Self::TemporalBefore => "temporal_before",
            Self::TemporalAfter => "temporal_after",
            Self::TemporalSimultaneous => "temporal_simultaneous",
            Self::Conditional => "conditional",
            Self::ConditionalNecessary => "conditional_necessary",
            Self::ConditionalSufficient => "conditional_sufficient",
            Self::Contrast => "contrast",
            Self::ContrastOpposite => "contrast_opposite",
            Self::ContrastSimilar => "contrast_similar",
            Self::Correlation => "correlation",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from a string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "causal" => Some(Self::Causal),
            "causal_direct" => Some(Self::CausalDirect),
            "causal_indirect" => Some(Self::CausalIndirect),
            "temporal_before" | "before" => Some(Self::TemporalBefore),
            "temporal_after" | "after" => Some(Self::TemporalAfter),
            "temporal_simultaneous" | "during" | "simultaneous" => {
                Some(Self::TemporalSimultaneous)
            }
            "conditional" => Some(Self::Conditional),
            "conditional_necessary" => Some(Self::ConditionalNecessary),
            "conditional_sufficient" => Some(Self::ConditionalSufficient),
            "contrast" => Some(Self::Contrast),
            "contrast_opposite" => Some(Self::ContrastOpposite),
            "contrast_similar" => Some(Self::ContrastSimilar),
            "correlation" => Some(Self::Correlation),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// All relation types
    pub fn all() -> &'static [RelationType] {
        &[
            Self::Causal,
            Self::CausalDirect,
            Self::CausalIndirect,
            Self::TemporalBefore,
            Self::TemporalAfter,
            Self::TemporalSimultaneous,
            Self::Conditional,
            Self::ConditionalNecessary,
            Self::ConditionalSufficient,
            Self::Contrast,
            Self::ContrastOpposite,
            Self::ContrastSimilar,
            Self::Correlation,
            Self::Unknown,
        ]
    }

    pub fn is_causal(&self) -> bool {
        matches!(self, Self::Causal | Self::CausalDirect | Self::CausalIndirect)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Self::TemporalBefore | Self::TemporalAfter | Self::TemporalSimultaneous
        )
    }

    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Self::Conditional | Self::ConditionalNecessary | Self::ConditionalSufficient
        )
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_includes_type_and_entities() {
        let event = Event::new("Acme acquires Widgets")
            .with_type("acquisition")
            .with_entities(["Acme", "Widgets"]);
        assert_eq!(
            event.embedding_text(),
            "Acme acquires Widgets [type: acquisition] [entities: Acme, Widgets]"
        );

        let bare = Event::new("Something happened");
        assert_eq!(bare.embedding_text(), "Something happened");
    }

    #[test]
    fn test_attribute_reads_core_fields_and_properties() {
        let event = Event::new("Outage")
            .with_type("outage")
            .with_importance(0.5)
            .with_property("sentiment", "negative")
            .with_property("location", "");

        assert_eq!(event.attribute("event_type"), Some(Value::from("outage")));
        assert_eq!(event.attribute("importance_score"), Some(Value::from(0.5)));
        assert_eq!(event.attribute("sentiment"), Some(Value::from("negative")));
        assert_eq!(event.attribute("location"), None);
        assert_eq!(event.attribute("entities"), None);
        assert_eq!(event.attribute("timestamp"), None);
    }

    #[test]
    fn test_with_attribute_does_not_touch_original() {
        let event = Event::new("Launch");
        let updated = event
            .with_attribute("sentiment", &Value::from("positive"))
            .with_attribute("importance_score", &Value::from(1.7))
            .with_attribute("timestamp", &Value::from("2024-03-01T12:00:00Z"));

        assert!(event.properties.is_empty());
        assert_eq!(updated.attribute("sentiment"), Some(Value::from("positive")));
        assert_eq!(updated.importance_score, Some(1.0));
        assert!(updated.timestamp.is_some());
    }

    #[test]
    fn test_relation_type_roundtrip() {
        for t in RelationType::all() {
            assert_eq!(RelationType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(RelationType::parse("BEFORE"), Some(RelationType::TemporalBefore));
        assert_eq!(RelationType::parse("nonsense"), None);
    }

    #[test]
    fn test_relation_families() {
        assert!(RelationType::CausalIndirect.is_causal());
        assert!(RelationType::TemporalAfter.is_temporal());
        assert!(RelationType::ConditionalSufficient.is_conditional());
        assert!(!RelationType::Correlation.is_causal());
    }

    #[test]
    fn test_event_serde_defaults() {
        let event: Event =
            serde_json::from_str(r#"{"id": "e1", "description": "minimal"}"#).unwrap();
        assert_eq!(event.id, "e1");
        assert!(event.entities.is_empty());
        assert!(event.event_type.is_none());
    }
}
