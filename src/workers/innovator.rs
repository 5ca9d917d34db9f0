//! INNOVATE worker: research directions and breakthrough potential.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::WorkerFailure;
use crate::llm::{extract_json, CompletionConstraints, CompletionModel};
use crate::outputs::{Analysis, Innovation, StageOutput};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;
use crate::worker::Worker;

use super::{parse_output, parse_payload};

#[derive(Debug, Deserialize)]
struct InnovateInput {
    analysis: Analysis,
}

/// Proposes follow-on research directions and independently re-assesses the
/// paper's novelty, which the conflict resolver cross-checks against the
/// upstream judgments.
#[derive(Debug)]
pub struct Innovator {
    model: Arc<dyn CompletionModel>,
    constraints: CompletionConstraints,
}

impl Innovator {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            constraints: CompletionConstraints::default(),
        }
    }

    fn prompt(&self, analysis: &Analysis) -> String {
        format!(
            "You are a visionary research strategist. Starting from this \
             paper analysis, propose where the work should go next.\n\
             \n\
             Respond with a single JSON object:\n\
             {{\n\
               \"directions\": [{{\"title\": string, \"rationale\": string,\n\
                                 \"impact_score\": 0-10}}],\n\
               \"breakthrough\": {{\"score\": 0-10, \"justification\": string}},\n\
               \"novelty_crosscheck\": your own 0-10 novelty score for the paper,\n\
               \"funding_potential\": \"HIGH\" | \"MEDIUM\" | \"LOW\",\n\
               \"confidence\": number 0-1\n\
             }}\n\
             \n\
             ANALYSIS:\n{}",
            serde_json::to_string_pretty(analysis).unwrap_or_default()
        )
    }
}

#[async_trait]
impl Worker for Innovator {
    fn name(&self) -> &'static str {
        Stage::Innovate.worker_name()
    }

    fn stage(&self) -> Stage {
        Stage::Innovate
    }

    async fn handle(&self, task: &Task) -> Result<WorkerResult, WorkerFailure> {
        let input: InnovateInput = parse_payload(task)?;
        let prompt = self.prompt(&input.analysis);

        let text = self
            .model
            .complete(&prompt, &self.constraints)
            .await
            .map_err(WorkerFailure::from)?;
        let value = extract_json(&text).map_err(WorkerFailure::from)?;
        let (innovation, confidence) = parse_output::<Innovation>(value)?;

        log::info!(
            "innovator: {} directions, breakthrough {:.1}/10",
            innovation.directions.len(),
            innovation.breakthrough.score
        );
        Ok(WorkerResult {
            task_id: task.id,
            stage: Stage::Innovate,
            output: StageOutput::Innovation(innovation),
            confidence,
            produced_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::outputs::NoveltyAssessment;

    fn innovate_task() -> Task {
        let analysis = Analysis {
            title: "Sparse Attention".into(),
            authors: vec![],
            key_contributions: vec![],
            methodology: String::new(),
            novelty: NoveltyAssessment {
                score: 8.0,
                justification: String::new(),
            },
            gaps: vec![],
        };
        Task::new(Stage::Innovate, serde_json::json!({ "analysis": analysis }))
    }

    #[tokio::test]
    async fn parses_scripted_innovation() {
        let model = ScriptedModel::new();
        model.push_response(
            r#"{"directions": [{"title": "Streaming variant",
                                "rationale": "memory-bound workloads",
                                "impact_score": 7.5}],
                "breakthrough": {"score": 7.0, "justification": "scales training"},
                "novelty_crosscheck": 7.8,
                "funding_potential": "HIGH",
                "confidence": 0.7}"#,
        );

        let innovator = Innovator::new(Arc::new(model));
        let result = innovator.handle(&innovate_task()).await.unwrap();
        let innovation = result.output.as_innovation().unwrap();
        assert_eq!(innovation.directions.len(), 1);
        assert_eq!(innovation.novelty_crosscheck, 7.8);
        assert_eq!(result.confidence, 0.7);
    }
}
