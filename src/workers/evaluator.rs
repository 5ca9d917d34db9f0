//! EVALUATE worker: quality assessment and funding-potential review.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::WorkerFailure;
use crate::llm::{extract_json, CompletionConstraints, CompletionModel};
use crate::outputs::{Analysis, Evaluation, StageOutput};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;
use crate::worker::Worker;

use super::{parse_output, parse_payload};

#[derive(Debug, Deserialize)]
struct EvaluateInput {
    analysis: Analysis,
}

/// Critical-but-fair reviewer: scores originality, methodology rigor,
/// impact, and clarity, and judges funding potential.
#[derive(Debug)]
pub struct Evaluator {
    model: Arc<dyn CompletionModel>,
    constraints: CompletionConstraints,
}

impl Evaluator {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            constraints: CompletionConstraints::default(),
        }
    }

    fn prompt(&self, analysis: &Analysis) -> String {
        format!(
            "You are a critical but fair peer reviewer. Assess the paper \
             from this analysis.\n\
             \n\
             Respond with a single JSON object:\n\
             {{\n\
               \"scores\": {{\"originality\": 0-10, \"methodology_rigor\": 0-10,\n\
                            \"impact\": 0-10, \"clarity\": 0-10, \"overall\": 0-10}},\n\
               \"funding_potential\": \"HIGH\" | \"MEDIUM\" | \"LOW\",\n\
               \"strengths\": [string], \"weaknesses\": [string],\n\
               \"confidence\": number 0-1\n\
             }}\n\
             \n\
             ANALYSIS:\n{}",
            serde_json::to_string_pretty(analysis).unwrap_or_default()
        )
    }
}

#[async_trait]
impl Worker for Evaluator {
    fn name(&self) -> &'static str {
        Stage::Evaluate.worker_name()
    }

    fn stage(&self) -> Stage {
        Stage::Evaluate
    }

    async fn handle(&self, task: &Task) -> Result<WorkerResult, WorkerFailure> {
        let input: EvaluateInput = parse_payload(task)?;
        let prompt = self.prompt(&input.analysis);

        let text = self
            .model
            .complete(&prompt, &self.constraints)
            .await
            .map_err(WorkerFailure::from)?;
        let value = extract_json(&text).map_err(WorkerFailure::from)?;
        let (evaluation, confidence) = parse_output::<Evaluation>(value)?;

        log::info!(
            "evaluator: overall {:.1}/10, funding {}",
            evaluation.scores.overall,
            evaluation.funding_potential
        );
        Ok(WorkerResult {
            task_id: task.id,
            stage: Stage::Evaluate,
            output: StageOutput::Evaluation(evaluation),
            confidence,
            produced_at: Utc::now(),
        })
    }
}
