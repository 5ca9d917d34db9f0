//! Conflict detection and resolution between stage outputs.
//!
//! Whenever two or more results in the same run assess the same subject,
//! the resolver measures their divergence. Small numeric gaps resolve to a
//! confidence-weighted mean, which is always inside the observed range;
//! large gaps escalate with both values preserved, and the run finishes
//! flagged for human review rather than silently picking a side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::outputs::AssessmentValue;
use crate::run::WorkerResult;
use crate::stage::Stage;

/// Two scores closer than this are the same judgment, not a conflict.
const SCORE_AGREEMENT_EPSILON: f64 = 1e-9;

/// How a conflict ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    AutoResolved,
    Escalated,
}

/// One competing value, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetingValue {
    pub stage: Stage,
    pub value: AssessmentValue,
    pub confidence: f64,
}

/// Immutable record of one resolved (or escalated) disagreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub subject: String,
    pub competing: Vec<CompetingValue>,
    pub resolution: Resolution,
    /// Present only for auto-resolved conflicts.
    pub resolved: Option<AssessmentValue>,
}

impl ConflictRecord {
    pub fn escalated(&self) -> bool {
        self.resolution == Resolution::Escalated
    }
}

/// Policy component that reconciles disagreeing assessments.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    threshold: f64,
}

impl ConflictResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Compare every subject touched by two or more of `results` and emit a
    /// record per disagreement. Agreements produce nothing.
    pub fn reconcile(&self, results: &[&WorkerResult]) -> Vec<ConflictRecord> {
        let mut by_subject: BTreeMap<String, Vec<CompetingValue>> = BTreeMap::new();
        for result in results {
            for assessment in result.output.assessments() {
                by_subject
                    .entry(assessment.subject)
                    .or_default()
                    .push(CompetingValue {
                        stage: result.stage,
                        value: assessment.value,
                        confidence: result.confidence,
                    });
            }
        }

        by_subject
            .into_iter()
            .filter_map(|(subject, competing)| self.resolve(subject, competing))
            .collect()
    }

    fn resolve(&self, subject: String, competing: Vec<CompetingValue>) -> Option<ConflictRecord> {
        if competing.len() < 2 {
            return None;
        }

        let scores: Vec<(f64, f64)> = competing
            .iter()
            .filter_map(|c| match c.value {
                AssessmentValue::Score(s) => Some((s, c.confidence)),
                _ => None,
            })
            .collect();

        if scores.len() == competing.len() {
            return self.resolve_scores(subject, competing, &scores);
        }

        let labels: Vec<&String> = competing
            .iter()
            .filter_map(|c| match &c.value {
                AssessmentValue::Label(l) => Some(l),
                _ => None,
            })
            .collect();
        if labels.len() == competing.len() {
            if labels.windows(2).all(|w| w[0] == w[1]) {
                return None;
            }
            log::warn!("escalating label conflict on '{subject}'");
            return Some(ConflictRecord {
                subject,
                competing,
                resolution: Resolution::Escalated,
                resolved: None,
            });
        }

        let item_sets: Vec<&Vec<String>> = competing
            .iter()
            .filter_map(|c| match &c.value {
                AssessmentValue::Items(items) => Some(items),
                _ => None,
            })
            .collect();
        if item_sets.len() == competing.len() {
            if item_sets.windows(2).all(|w| w[0] == w[1]) {
                return None;
            }
            // Order-preserving union: first occurrence wins.
            let mut union: Vec<String> = Vec::new();
            for items in &item_sets {
                for item in *items {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
            }
            return Some(ConflictRecord {
                subject,
                competing,
                resolution: Resolution::AutoResolved,
                resolved: Some(AssessmentValue::Items(union)),
            });
        }

        // Mixed value kinds on one subject means the outputs disagree about
        // what the subject even is. Escalate.
        log::warn!("mixed-kind assessments on '{subject}', escalating");
        Some(ConflictRecord {
            subject,
            competing,
            resolution: Resolution::Escalated,
            resolved: None,
        })
    }

    fn resolve_scores(
        &self,
        subject: String,
        competing: Vec<CompetingValue>,
        scores: &[(f64, f64)],
    ) -> Option<ConflictRecord> {
        let min = scores.iter().map(|(s, _)| *s).fold(f64::INFINITY, f64::min);
        let max = scores
            .iter()
            .map(|(s, _)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let divergence = max - min;

        if divergence < SCORE_AGREEMENT_EPSILON {
            return None;
        }

        if divergence <= self.threshold {
            let resolved = weighted_mean(scores);
            log::info!(
                "auto-resolved '{subject}': divergence {divergence:.2} <= {:.2}, value {resolved:.2}",
                self.threshold
            );
            return Some(ConflictRecord {
                subject,
                competing,
                resolution: Resolution::AutoResolved,
                resolved: Some(AssessmentValue::Score(resolved)),
            });
        }

        log::warn!(
            "escalating '{subject}': divergence {divergence:.2} > {:.2}",
            self.threshold
        );
        Some(ConflictRecord {
            subject,
            competing,
            resolution: Resolution::Escalated,
            resolved: None,
        })
    }
}

/// Confidence-weighted mean; equal weights when confidences sum to zero.
fn weighted_mean(scores: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = scores.iter().map(|(_, w)| *w).sum();
    if total_weight <= 0.0 {
        let n = scores.len() as f64;
        return scores.iter().map(|(s, _)| *s).sum::<f64>() / n;
    }
    scores.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight
}
