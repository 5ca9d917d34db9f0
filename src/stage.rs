//! Pipeline stages and their dependency graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of the proposal pipeline.
///
/// EVALUATE and INNOVATE both depend only on ANALYZE and may run
/// concurrently; WRITE gates on both of them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    /// Extract structured information from the source paper.
    Analyze,
    /// Score quality and funding potential of the analyzed paper.
    Evaluate,
    /// Propose follow-on research directions.
    Innovate,
    /// Synthesize the grant proposal from everything upstream.
    Write,
}

impl Stage {
    /// All stages, in dependency order.
    pub const ALL: [Stage; 4] = [
        Stage::Analyze,
        Stage::Evaluate,
        Stage::Innovate,
        Stage::Write,
    ];

    /// Stages that must have delivered a result before this one is eligible.
    pub fn prerequisites(self) -> &'static [Stage] {
        match self {
            Stage::Analyze => &[],
            Stage::Evaluate | Stage::Innovate => &[Stage::Analyze],
            Stage::Write => &[Stage::Evaluate, Stage::Innovate],
        }
    }

    /// Mailbox name of the worker specialized for this stage.
    pub fn worker_name(self) -> &'static str {
        match self {
            Stage::Analyze => "analyst",
            Stage::Evaluate => "evaluator",
            Stage::Innovate => "innovator",
            Stage::Write => "writer",
        }
    }

    /// Reverse lookup from a worker mailbox name.
    pub fn for_worker(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.worker_name() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Analyze => write!(f, "ANALYZE"),
            Stage::Evaluate => write!(f, "EVALUATE"),
            Stage::Innovate => write!(f, "INNOVATE"),
            Stage::Write => write!(f, "WRITE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_graph() {
        assert!(Stage::Analyze.prerequisites().is_empty());
        assert_eq!(Stage::Evaluate.prerequisites(), &[Stage::Analyze]);
        assert_eq!(Stage::Innovate.prerequisites(), &[Stage::Analyze]);
        assert_eq!(
            Stage::Write.prerequisites(),
            &[Stage::Evaluate, Stage::Innovate]
        );
    }

    #[test]
    fn worker_name_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::for_worker(stage.worker_name()), Some(stage));
        }
        assert_eq!(Stage::for_worker("supervisor"), None);
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Stage::Evaluate).unwrap(),
            "\"EVALUATE\""
        );
    }
}
