//! Final artifact assembly.
//!
//! Once WRITE delivers, the supervisor folds the four stage outputs and the
//! conflict ledger into one [`ProposalArtifact`]. Escalated conflicts travel
//! with the artifact as an explicit review flag; nothing is silently picked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ConflictRecord;
use crate::outputs::{subject, AssessmentValue, FundingPotential, Proposal};
use crate::run::Run;
use crate::stage::Stage;

/// Headline numbers for the cover sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    /// Evaluator's overall quality score, 0-10.
    pub quality_score: f64,
    /// Reconciled novelty score (auto-resolved value when the stages
    /// disagreed, evaluator's originality otherwise).
    pub novelty_score: f64,
    pub funding_potential: FundingPotential,
}

/// The assembled, caller-facing result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalArtifact {
    pub run_id: Uuid,
    pub title: String,
    pub proposal: Proposal,
    pub summary: AssessmentSummary,
    pub recommendation: String,
    pub conflicts: Vec<ConflictRecord>,
    /// True when any conflict escalated; the artifact needs human review.
    pub needs_review: bool,
    pub generated_at: DateTime<Utc>,
}

/// Fold a finished run into its artifact. `None` only if a required stage
/// result is missing, which the state machine rules out; the caller treats
/// that as a bug.
pub fn assemble(run: &Run) -> Option<ProposalArtifact> {
    let analysis = run.result(Stage::Analyze)?.output.as_analysis()?;
    let evaluation = run.result(Stage::Evaluate)?.output.as_evaluation()?;
    let proposal = run.result(Stage::Write)?.output.as_proposal()?;
    run.result(Stage::Innovate)?.output.as_innovation()?;

    let conflicts = run.conflicts().to_vec();
    let needs_review = conflicts.iter().any(|c| c.escalated());

    let novelty_score = conflicts
        .iter()
        .find(|c| c.subject == subject::NOVELTY)
        .and_then(|c| match c.resolved {
            Some(AssessmentValue::Score(v)) => Some(v),
            _ => None,
        })
        .unwrap_or(evaluation.scores.originality);

    let summary = AssessmentSummary {
        quality_score: evaluation.scores.overall,
        novelty_score,
        funding_potential: evaluation.funding_potential,
    };
    let recommendation =
        recommendation(evaluation.scores.overall, evaluation.funding_potential);

    Some(ProposalArtifact {
        run_id: run.id,
        title: analysis.title.clone(),
        proposal: proposal.clone(),
        summary,
        recommendation,
        conflicts,
        needs_review,
        generated_at: Utc::now(),
    })
}

/// Recommendation bands over overall score and funding potential.
fn recommendation(overall: f64, funding: FundingPotential) -> String {
    use FundingPotential::*;
    let text = if overall >= 8.0 && funding == High {
        "STRONGLY RECOMMEND - High quality work with strong funding potential"
    } else if overall >= 7.0 && matches!(funding, High | Medium) {
        "RECOMMEND - Solid work, likely fundable with minor improvements"
    } else if overall >= 6.0 {
        "CONDITIONAL - Promising work but needs significant improvements"
    } else if overall >= 4.0 {
        "MAJOR REVISIONS - Core ideas good but execution needs work"
    } else {
        "NOT RECOMMENDED - Significant issues need to be addressed"
    };
    text.to_string()
}
