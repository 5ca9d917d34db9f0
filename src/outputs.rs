//! Stage-specific structured outputs.
//!
//! The four stages form a closed set, so their outputs are a closed tagged
//! enum rather than a trait object: the supervisor routes on the tag and
//! never branches on type identity. Each output also knows how to expose
//! the [`Assessment`]s it bears on, which is what the conflict resolver
//! pairs across stages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stage::Stage;

/// Subjects that more than one stage may assess.
pub mod subject {
    pub const NOVELTY: &str = "novelty";
    pub const IMPACT: &str = "impact";
    pub const FUNDING_POTENTIAL: &str = "funding-potential";
}

// ---------------------------------------------------------------------------
// ANALYZE output
// ---------------------------------------------------------------------------

/// Novelty judgment on the 0-10 scale used throughout the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyAssessment {
    pub score: f64,
    #[serde(default)]
    pub justification: String,
}

/// Structured extraction of the source paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub key_contributions: Vec<String>,
    #[serde(default)]
    pub methodology: String,
    pub novelty: NoveltyAssessment,
    #[serde(default)]
    pub gaps: Vec<String>,
}

// ---------------------------------------------------------------------------
// EVALUATE output
// ---------------------------------------------------------------------------

/// Peer-review style quality scores, each 0-10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub originality: f64,
    pub methodology_rigor: f64,
    pub impact: f64,
    pub clarity: f64,
    pub overall: f64,
}

/// Coarse funding-potential judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundingPotential {
    High,
    Medium,
    Low,
}

impl fmt::Display for FundingPotential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingPotential::High => write!(f, "HIGH"),
            FundingPotential::Medium => write!(f, "MEDIUM"),
            FundingPotential::Low => write!(f, "LOW"),
        }
    }
}

/// Quality assessment of the analyzed paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub scores: Scores,
    pub funding_potential: FundingPotential,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

// ---------------------------------------------------------------------------
// INNOVATE output
// ---------------------------------------------------------------------------

/// One proposed follow-on research direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchDirection {
    pub title: String,
    #[serde(default)]
    pub rationale: String,
    pub impact_score: f64,
}

/// Breakthrough-potential judgment for the strongest direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakthrough {
    pub score: f64,
    #[serde(default)]
    pub justification: String,
}

/// Forward-looking extension of the paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Innovation {
    #[serde(default)]
    pub directions: Vec<ResearchDirection>,
    pub breakthrough: Breakthrough,
    /// Independent re-assessment of the paper's novelty, cross-checked
    /// against the upstream judgments by the conflict resolver.
    pub novelty_crosscheck: f64,
    pub funding_potential: FundingPotential,
}

// ---------------------------------------------------------------------------
// WRITE output
// ---------------------------------------------------------------------------

/// One rendered proposal section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSection {
    pub heading: String,
    pub body: String,
}

/// The synthesized grant proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub sections: Vec<ProposalSection>,
    pub full_text: String,
    pub word_count: usize,
}

// ---------------------------------------------------------------------------
// Closed output set + assessments
// ---------------------------------------------------------------------------

/// Output of exactly one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutput {
    Analysis(Analysis),
    Evaluation(Evaluation),
    Innovation(Innovation),
    Proposal(Proposal),
}

/// A single value an output asserts about a shared subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssessmentValue {
    Score(f64),
    Label(String),
    Items(Vec<String>),
}

impl fmt::Display for AssessmentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessmentValue::Score(s) => write!(f, "{s:.1}"),
            AssessmentValue::Label(l) => write!(f, "{l}"),
            AssessmentValue::Items(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

/// A (subject, value) pair extracted from a stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub subject: String,
    pub value: AssessmentValue,
}

impl Assessment {
    fn score(subject: &str, value: f64) -> Self {
        Self {
            subject: subject.to_string(),
            value: AssessmentValue::Score(value),
        }
    }

    fn label(subject: &str, value: impl fmt::Display) -> Self {
        Self {
            subject: subject.to_string(),
            value: AssessmentValue::Label(value.to_string()),
        }
    }
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Analysis(_) => Stage::Analyze,
            StageOutput::Evaluation(_) => Stage::Evaluate,
            StageOutput::Innovation(_) => Stage::Innovate,
            StageOutput::Proposal(_) => Stage::Write,
        }
    }

    pub fn as_analysis(&self) -> Option<&Analysis> {
        match self {
            StageOutput::Analysis(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_evaluation(&self) -> Option<&Evaluation> {
        match self {
            StageOutput::Evaluation(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_innovation(&self) -> Option<&Innovation> {
        match self {
            StageOutput::Innovation(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_proposal(&self) -> Option<&Proposal> {
        match self {
            StageOutput::Proposal(p) => Some(p),
            _ => None,
        }
    }

    /// Every judgment this output makes on a subject shared with other
    /// stages. The proposal makes none; it consumes judgments.
    pub fn assessments(&self) -> Vec<Assessment> {
        match self {
            StageOutput::Analysis(a) => {
                vec![Assessment::score(subject::NOVELTY, a.novelty.score)]
            }
            StageOutput::Evaluation(e) => vec![
                Assessment::score(subject::NOVELTY, e.scores.originality),
                Assessment::score(subject::IMPACT, e.scores.impact),
                Assessment::label(subject::FUNDING_POTENTIAL, e.funding_potential),
            ],
            StageOutput::Innovation(i) => vec![
                Assessment::score(subject::NOVELTY, i.novelty_crosscheck),
                Assessment::score(subject::IMPACT, i.breakthrough.score),
                Assessment::label(subject::FUNDING_POTENTIAL, i.funding_potential),
            ],
            StageOutput::Proposal(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_evaluation() -> Evaluation {
        Evaluation {
            scores: Scores {
                originality: 7.0,
                methodology_rigor: 8.0,
                impact: 6.5,
                clarity: 7.5,
                overall: 7.2,
            },
            funding_potential: FundingPotential::Medium,
            strengths: vec!["clear baseline".into()],
            weaknesses: vec![],
        }
    }

    #[test]
    fn evaluation_assessments_cover_shared_subjects() {
        let output = StageOutput::Evaluation(sample_evaluation());
        let assessments = output.assessments();
        let subjects: Vec<&str> = assessments
            .iter()
            .map(|a| a.subject.as_str())
            .collect();
        assert_eq!(
            subjects,
            vec![
                subject::NOVELTY,
                subject::IMPACT,
                subject::FUNDING_POTENTIAL
            ]
        );
    }

    #[test]
    fn proposal_asserts_nothing() {
        let output = StageOutput::Proposal(Proposal {
            sections: vec![],
            full_text: String::new(),
            word_count: 0,
        });
        assert!(output.assessments().is_empty());
    }

    #[test]
    fn analysis_parses_with_sparse_fields() {
        let value = serde_json::json!({
            "title": "Sparse Attention at Scale",
            "novelty": {"score": 8.0}
        });
        let analysis: Analysis = serde_json::from_value(value).unwrap();
        assert!(analysis.authors.is_empty());
        assert_eq!(analysis.novelty.score, 8.0);
        assert!(analysis.novelty.justification.is_empty());
    }

    #[test]
    fn funding_potential_uppercase_wire_form() {
        assert_eq!(
            serde_json::to_string(&FundingPotential::High).unwrap(),
            "\"HIGH\""
        );
        let parsed: FundingPotential = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(parsed, FundingPotential::Low);
    }
}
