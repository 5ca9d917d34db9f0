//! WRITE worker: grant-proposal synthesis.
//!
//! Unlike the assessment stages, synthesis makes one completion call per
//! proposal section: six calls, fixed order. Section bodies are prose, not
//! JSON; a blank body is a malformed response.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::conflict::ConflictRecord;
use crate::error::WorkerFailure;
use crate::llm::{CompletionConstraints, CompletionModel};
use crate::outputs::{Analysis, Evaluation, Innovation, Proposal, ProposalSection, StageOutput};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;
use crate::worker::Worker;

use super::parse_payload;

/// Section plan, in rendering order.
const SECTIONS: [(&str, &str); 6] = [
    (
        "Executive Summary",
        "Summarize the proposed research program in one page: what, why now, and expected payoff.",
    ),
    (
        "Project Description",
        "Describe the research problem, the prior paper's contribution, and the proposed extensions.",
    ),
    (
        "Research Plan",
        "Lay out the concrete research directions as work packages with methods and milestones.",
    ),
    (
        "Broader Impacts",
        "Explain scientific and societal impact beyond the immediate results.",
    ),
    (
        "Budget Justification",
        "Justify personnel, equipment, and compute in proportion to the research plan.",
    ),
    (
        "Timeline",
        "Give a phased timeline across the funding period with deliverables per phase.",
    ),
];

#[derive(Debug, Deserialize)]
struct WriteInput {
    analysis: Analysis,
    evaluation: Evaluation,
    innovation: Innovation,
    #[serde(default)]
    conflicts: Vec<ConflictRecord>,
}

/// Synthesizes all upstream outputs into a grant-proposal draft.
#[derive(Debug)]
pub struct Writer {
    model: Arc<dyn CompletionModel>,
    constraints: CompletionConstraints,
}

impl Writer {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            constraints: CompletionConstraints::default(),
        }
    }

    fn context(input: &WriteInput) -> String {
        let mut context = format!(
            "PAPER: {}\nOVERALL QUALITY: {:.1}/10\nFUNDING POTENTIAL: {}\n\
             KEY CONTRIBUTIONS: {}\nPROPOSED DIRECTIONS: {}",
            input.analysis.title,
            input.evaluation.scores.overall,
            input.evaluation.funding_potential,
            input.analysis.key_contributions.join("; "),
            input
                .innovation
                .directions
                .iter()
                .map(|d| d.title.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        );
        let escalated: Vec<&str> = input
            .conflicts
            .iter()
            .filter(|c| c.escalated())
            .map(|c| c.subject.as_str())
            .collect();
        if !escalated.is_empty() {
            context.push_str(&format!(
                "\nUNRESOLVED REVIEWER DISAGREEMENT ON: {} (acknowledge, do not paper over)",
                escalated.join(", ")
            ));
        }
        context
    }

    fn section_prompt(context: &str, heading: &str, guidance: &str) -> String {
        format!(
            "You are an experienced grant writer drafting an NSF-style proposal.\n\
             Write the \"{heading}\" section. {guidance}\n\
             Respond with the section body as plain prose, no heading.\n\
             \n\
             CONTEXT:\n{context}"
        )
    }
}

#[async_trait]
impl Worker for Writer {
    fn name(&self) -> &'static str {
        Stage::Write.worker_name()
    }

    fn stage(&self) -> Stage {
        Stage::Write
    }

    async fn handle(&self, task: &Task) -> Result<WorkerResult, WorkerFailure> {
        let input: WriteInput = parse_payload(task)?;
        let context = Self::context(&input);

        let mut sections = Vec::with_capacity(SECTIONS.len());
        for (heading, guidance) in SECTIONS {
            let prompt = Self::section_prompt(&context, heading, guidance);
            let body = self
                .model
                .complete(&prompt, &self.constraints)
                .await
                .map_err(WorkerFailure::from)?;
            if body.trim().is_empty() {
                return Err(WorkerFailure::MalformedResponse {
                    reason: format!("empty body for section '{heading}'"),
                });
            }
            sections.push(ProposalSection {
                heading: heading.to_string(),
                body: body.trim().to_string(),
            });
        }

        let full_text = std::iter::once(format!("# {}\n", input.analysis.title))
            .chain(
                sections
                    .iter()
                    .map(|s| format!("## {}\n\n{}\n", s.heading, s.body)),
            )
            .collect::<Vec<_>>()
            .join("\n");
        let word_count = full_text.split_whitespace().count();
        log::info!("writer: proposal drafted, {word_count} words");

        Ok(WorkerResult {
            task_id: task.id,
            stage: Stage::Write,
            output: StageOutput::Proposal(Proposal {
                sections,
                full_text,
                word_count,
            }),
            confidence: 1.0,
            produced_at: Utc::now(),
        })
    }
}
