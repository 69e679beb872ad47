//! Pattern validation strategies

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::pattern::EventPattern;
use crate::error::{Error, Result};

/// Scores a candidate pattern in [0, 1]
#[async_trait]
pub trait PatternValidator: Send + Sync {
    async fn validate(&self, pattern: &EventPattern) -> f32;

    fn name(&self) -> &str;
}

/// External judge consulted by [`ModelBasedValidator`]
#[async_trait]
pub trait PatternJudge: Send + Sync {
    async fn judge(&self, pattern: &EventPattern) -> Result<f32>;
}

/// Which validator discovery uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    #[default]
    RuleBased,
    ModelBased,
}

/// Heuristic scoring from frequency, support, confidence and shape
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedValidator;

impl RuleBasedValidator {
    pub fn score(pattern: &EventPattern) -> f32 {
        let mut score = 0.5;
        if pattern.frequency >= 5 {
            score += 0.1;
        }
        if pattern.support >= 0.2 {
            score += 0.1;
        }
        if pattern.confidence >= 0.7 {
            score += 0.1;
        }
        if (2..=5).contains(&pattern.sequence_len()) {
            score += 0.1;
        }
        if !pattern.relation_sequence.is_empty() {
            score += 0.1;
        }
        f32::min(score, 1.0)
    }
}

#[async_trait]
impl PatternValidator for RuleBasedValidator {
    async fn validate(&self, pattern: &EventPattern) -> f32 {
        Self::score(pattern)
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}

/// Judge-backed scoring, falling back to the rule score on judge failure
pub struct ModelBasedValidator {
    judge: Arc<dyn PatternJudge>,
}

impl ModelBasedValidator {
    pub fn new(judge: Arc<dyn PatternJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl PatternValidator for ModelBasedValidator {
    async fn validate(&self, pattern: &EventPattern) -> f32 {
        match self.judge.judge(pattern).await {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(score) => {
                warn!(pattern_id = %pattern.pattern_id, score, "Judge returned a non-finite score");
                RuleBasedValidator::score(pattern)
            }
            Err(e) => {
                warn!(pattern_id = %pattern.pattern_id, error = %e, "Pattern judge failed, using rule score");
                RuleBasedValidator::score(pattern)
            }
        }
    }

    fn name(&self) -> &str {
        "model_based"
    }
}

/// Build the validator selected by `kind`
pub fn build_validator(
    kind: ValidatorKind,
    judge: Option<Arc<dyn PatternJudge>>,
) -> Result<Arc<dyn PatternValidator>> {
    match (kind, judge) {
        (ValidatorKind::RuleBased, _) => Ok(Arc::new(RuleBasedValidator)),
        (ValidatorKind::ModelBased, Some(judge)) => Ok(Arc::new(ModelBasedValidator::new(judge))),
        (ValidatorKind::ModelBased, None) => Err(Error::ConfigError(
            "model_based validation needs a pattern judge".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::RelationType;
    use crate::domain::patterns::clustering::{ClusterAttributes, EventCluster};
    use crate::domain::event::Event;

    fn pattern() -> EventPattern {
        let events: Vec<Event> = (0..6)
            .map(|i| {
                Event::new("x")
                    .with_id(format!("e{}", i))
                    .with_type(if i % 2 == 0 { "strike" } else { "delay" })
            })
            .collect();
        let cluster = EventCluster {
            cluster_id: 0,
            label: "cluster_0_mixed".to_string(),
            representative: events[0].clone(),
            events,
            centroid: vec![1.0],
            intra_cluster_similarity: 0.95,
            common_attributes: ClusterAttributes::default(),
        };
        EventPattern::from_cluster(&cluster, 10)
    }

    struct FixedJudge(Result<f32>);

    #[async_trait]
    impl PatternJudge for FixedJudge {
        async fn judge(&self, _pattern: &EventPattern) -> Result<f32> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => Err(Error::JudgeError(e.to_string())),
            }
        }
    }

    #[test]
    fn test_rule_score() {
        // freq 6, support 0.6, confidence 0.95, two types, no relations
        let mut p = pattern();
        assert!((RuleBasedValidator::score(&p) - 0.9).abs() < 1e-6);

        p.relation_sequence.push(RelationType::Causal);
        assert!((RuleBasedValidator::score(&p) - 1.0).abs() < 1e-6);

        p.frequency = 1;
        p.support = 0.05;
        p.confidence = 0.1;
        p.event_sequence.clear();
        p.relation_sequence.clear();
        assert!((RuleBasedValidator::score(&p) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_model_validator_uses_judge() {
        let validator = ModelBasedValidator::new(Arc::new(FixedJudge(Ok(0.42))));
        assert!((validator.validate(&pattern()).await - 0.42).abs() < 1e-6);

        let clamped = ModelBasedValidator::new(Arc::new(FixedJudge(Ok(3.0))));
        assert_eq!(clamped.validate(&pattern()).await, 1.0);
    }

    #[tokio::test]
    async fn test_model_validator_falls_back() {
        let validator = ModelBasedValidator::new(Arc::new(FixedJudge(Err(Error::JudgeError(
            "offline".to_string(),
        )))));
        let p = pattern();
        assert_eq!(validator.validate(&p).await, RuleBasedValidator::score(&p));
    }

    #[test]
    fn test_build_validator() {
        assert_eq!(
            build_validator(ValidatorKind::RuleBased, None).unwrap().name(),
            "rule_based"
        );
        assert!(build_validator(ValidatorKind::ModelBased, None).is_err());
        let judge: Arc<dyn PatternJudge> = Arc::new(FixedJudge(Ok(0.5)));
        assert_eq!(
            build_validator(ValidatorKind::ModelBased, Some(judge)).unwrap().name(),
            "model_based"
        );
    }
}
