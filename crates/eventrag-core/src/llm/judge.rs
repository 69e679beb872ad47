//! Model-backed pattern judge

use async_trait::async_trait;
use tracing::debug;

use crate::domain::patterns::{EventPattern, PatternJudge};
use crate::error::{Error, Result};

use super::client::LlmClient;
use super::types::Message;

const SYSTEM_PROMPT: &str = "You rate event patterns mined from news and incident reports. \
Judge whether the pattern describes a plausible, reusable regularity. \
Reply with a single number between 0 and 1 and nothing else.";

/// Scores patterns by asking a chat model
#[derive(Debug, Clone)]
pub struct LlmPatternJudge {
    client: LlmClient,
}

impl LlmPatternJudge {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    fn prompt(pattern: &EventPattern) -> String {
        let relations: Vec<&str> = pattern
            .relation_sequence
            .iter()
            .map(|r| r.as_str())
            .collect();
        format!(
            "Pattern: {}\nDescription: {}\nType: {}\nEvent sequence: {}\nRelations: {}\n\
             Frequency: {}\nSupport: {:.2}\nConfidence: {:.2}",
            pattern.name,
            pattern.description,
            pattern.pattern_type,
            pattern.event_sequence.join(" -> "),
            if relations.is_empty() {
                "none".to_string()
            } else {
                relations.join(", ")
            },
            pattern.frequency,
            pattern.support,
            pattern.confidence,
        )
    }
}

#[async_trait]
impl PatternJudge for LlmPatternJudge {
    async fn judge(&self, pattern: &EventPattern) -> Result<f32> {
        let reply = self
            .client
            .complete(vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(Self::prompt(pattern)),
            ])
            .await?;

        let score = parse_score(&reply)?;
        debug!(pattern_id = %pattern.pattern_id, score = score, "Pattern judged");
        Ok(score)
    }
}

/// First number in `reply`, which must lie in [0, 1]
pub fn parse_score(reply: &str) -> Result<f32> {
    let token = reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|t| t.chars().any(|c| c.is_ascii_digit()))
        .ok_or_else(|| Error::JudgeError(format!("No score in reply: {:?}", reply)))?;

    let score: f32 = token
        .trim_matches('.')
        .parse()
        .map_err(|_| Error::JudgeError(format!("Unparseable score: {:?}", token)))?;

    if !(0.0..=1.0).contains(&score) {
        return Err(Error::JudgeError(format!("Score {} outside [0, 1]", score)));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.8").unwrap(), 0.8);
        assert_eq!(parse_score("Score: 0.65.").unwrap(), 0.65);
        assert_eq!(parse_score("1").unwrap(), 1.0);
        assert_eq!(parse_score(" 0 ").unwrap(), 0.0);
        assert!(parse_score("high").is_err());
        assert!(parse_score("7").is_err());
    }

    #[test]
    fn test_prompt_lists_sequence() {
        use crate::domain::event::Event;
        use crate::domain::patterns::clustering::{ClusterAttributes, EventCluster};

        let events: Vec<Event> = ["a", "b", "c"]
            .iter()
            .map(|id| Event::new("x").with_id(*id).with_type("strike"))
            .collect();
        let pattern = EventPattern::from_cluster(
            &EventCluster {
                cluster_id: 0,
                label: "cluster_0_strike".to_string(),
                representative: events[0].clone(),
                events,
                centroid: vec![1.0],
                intra_cluster_similarity: 0.9,
                common_attributes: ClusterAttributes::default(),
            },
            3,
        );

        let prompt = LlmPatternJudge::prompt(&pattern);
        assert!(prompt.contains("strike"));
        assert!(prompt.contains("Relations: none"));
    }
}
