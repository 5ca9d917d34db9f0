//! ANALYZE worker: paper analysis and information extraction.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::WorkerFailure;
use crate::extract::ExtractedDocument;
use crate::llm::{extract_json, CompletionConstraints, CompletionModel};
use crate::outputs::{Analysis, StageOutput};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;
use crate::worker::Worker;

use super::{parse_output, parse_payload, truncate_for_prompt};

#[derive(Debug, Deserialize)]
struct AnalyzeInput {
    document: ExtractedDocument,
}

/// Extracts structured information from the source paper: metadata,
/// contributions, methodology, a novelty judgment, and open gaps.
#[derive(Debug)]
pub struct Analyst {
    model: Arc<dyn CompletionModel>,
    constraints: CompletionConstraints,
}

impl Analyst {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            constraints: CompletionConstraints::default(),
        }
    }

    fn prompt(&self, document: &ExtractedDocument) -> String {
        format!(
            "You are a precise, detail-oriented research analyst. Extract \
             structured information from the paper below.\n\
             \n\
             Respond with a single JSON object:\n\
             {{\n\
               \"title\": string,\n\
               \"authors\": [string],\n\
               \"key_contributions\": [string],\n\
               \"methodology\": string,\n\
               \"novelty\": {{\"score\": number 0-10, \"justification\": string}},\n\
               \"gaps\": [string],\n\
               \"confidence\": number 0-1\n\
             }}\n\
             \n\
             PAPER TEXT:\n{}",
            truncate_for_prompt(&document.text)
        )
    }
}

#[async_trait]
impl Worker for Analyst {
    fn name(&self) -> &'static str {
        Stage::Analyze.worker_name()
    }

    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    async fn handle(&self, task: &Task) -> Result<WorkerResult, WorkerFailure> {
        let input: AnalyzeInput = parse_payload(task)?;
        let prompt = self.prompt(&input.document);

        let text = self
            .model
            .complete(&prompt, &self.constraints)
            .await
            .map_err(WorkerFailure::from)?;
        let value = extract_json(&text).map_err(WorkerFailure::from)?;
        let (analysis, confidence) = parse_output::<Analysis>(value)?;

        log::info!(
            "analyst: '{}' novelty {:.1}/10",
            analysis.title,
            analysis.novelty.score
        );
        Ok(WorkerResult {
            task_id: task.id,
            stage: Stage::Analyze,
            output: StageOutput::Analysis(analysis),
            confidence,
            produced_at: Utc::now(),
        })
    }
}
