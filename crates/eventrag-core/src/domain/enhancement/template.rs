use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::retrieval::FusedResult;

/// Maximum context snippets kept per template
pub const MAX_CONTEXT_SNIPPETS: usize = 10;

/// Maximum characters kept from each snippet
const SNIPPET_CHARS: usize = 200;

/// Observed distribution of one attribute across a neighbour set
///
/// Values are keyed by their compact JSON rendering so that equal values of
/// any shape share a bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeTemplate {
    pub attribute: String,
    /// value key → number of neighbours reporting it
    pub value_frequencies: BTreeMap<String, usize>,
    /// value key → the value itself
    pub values: BTreeMap<String, Value>,
    /// value key → fused scores of the neighbours reporting it
    pub confidence_samples: BTreeMap<String, Vec<f32>>,
    /// value key → ids of the neighbours reporting it
    pub sources: BTreeMap<String, Vec<String>>,
    pub context_snippets: Vec<String>,
    /// Number of neighbours exhibiting the attribute
    pub observations: usize,
    /// observations / neighbours
    pub coverage_rate: f32,
    /// min(mean confidence · coverage, 1)
    pub inference_accuracy: f32,
}

/// The value chosen from a template
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub value: &'a Value,
    pub frequency: usize,
    pub frequency_weight: f32,
    pub sources: &'a [String],
}

impl AttributeTemplate {
    /// Tally `attribute` over the neighbour set
    pub fn build(attribute: &str, neighbors: &[FusedResult]) -> Self {
        let mut template = Self {
            attribute: attribute.to_string(),
            ..Self::default()
        };

        let mut all_confidences = Vec::new();
        for neighbor in neighbors {
            let Some(value) = neighbor.event.attribute(attribute) else {
                continue;
            };
            let key = value.to_string();
            *template.value_frequencies.entry(key.clone()).or_insert(0) += 1;
            template
                .confidence_samples
                .entry(key.clone())
                .or_default()
                .push(neighbor.fused_score);
            template
                .sources
                .entry(key.clone())
                .or_default()
                .push(neighbor.event.id.clone());
            template.values.entry(key).or_insert(value);
            all_confidences.push(neighbor.fused_score);

            if template.context_snippets.len() < MAX_CONTEXT_SNIPPETS
                && !neighbor.event.description.is_empty()
            {
                template
                    .context_snippets
                    .push(neighbor.event.description.chars().take(SNIPPET_CHARS).collect());
            }
        }

        template.observations = all_confidences.len();
        if !neighbors.is_empty() {
            template.coverage_rate = template.observations as f32 / neighbors.len() as f32;
        }
        if !all_confidences.is_empty() {
            let mean = all_confidences.iter().sum::<f32>() / all_confidences.len() as f32;
            template.inference_accuracy = (mean * template.coverage_rate).clamp(0.0, 1.0);
        }
        template
    }

    /// Whether the template is strong enough to infer from
    pub fn is_inferable(&self, min_coverage: f32, min_accuracy: f32) -> bool {
        self.observations > 0
            && self.coverage_rate >= min_coverage
            && self.inference_accuracy >= min_accuracy
    }

    /// The most frequent value
    ///
    /// Ties go to the value with the higher summed confidence, then to the
    /// lexicographically smaller key.
    pub fn most_frequent(&self) -> Option<Candidate<'_>> {
        let summed = |key: &str| -> f32 {
            self.confidence_samples
                .get(key)
                .map(|s| s.iter().sum())
                .unwrap_or(0.0)
        };

        let (key, frequency) = self.value_frequencies.iter().max_by(|(ka, ca), (kb, cb)| {
            ca.cmp(cb)
                .then_with(|| summed(ka).total_cmp(&summed(kb)))
                .then_with(|| kb.cmp(ka))
        })?;

        Some(Candidate {
            value: self.values.get(key)?,
            frequency: *frequency,
            frequency_weight: *frequency as f32 / self.observations.max(1) as f32,
            sources: self.sources.get(key).map(Vec::as_slice).unwrap_or(&[]),
        })
    }
}
