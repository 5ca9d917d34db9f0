//! The run ledger: authoritative record of one pipeline execution.
//!
//! A [`Run`] is created on submission, owned exclusively by the supervisor's
//! dispatch loop for its lifetime (no concurrent writers, hence no locking),
//! and published externally only as immutable [`RunSnapshot`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::artifact::ProposalArtifact;
use crate::config::PipelineConfig;
use crate::conflict::ConflictRecord;
use crate::error::WorkerFailure;
use crate::extract::ExtractedDocument;
use crate::outputs::StageOutput;
use crate::stage::Stage;

/// Per-stage progress. A stage only ever moves forward:
/// `Pending -> Dispatched -> {Done, Failed}`, with `Dispatched ->
/// AwaitingRetry -> Dispatched` loops while retry budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Dispatched,
    AwaitingRetry,
    Done,
    Failed,
}

impl StageStatus {
    /// Coarse "work has started and not finished" view.
    pub fn in_progress(self) -> bool {
        matches!(self, StageStatus::Dispatched | StageStatus::AwaitingRetry)
    }
}

/// Ledger entry for one stage of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    /// Attempts dispatched so far (1-based once work starts).
    pub attempts: u32,
    pub last_failure: Option<WorkerFailure>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            attempts: 0,
            last_failure: None,
        }
    }
}

/// Caller-visible run outcome. Terminal variants are final; the ledger
/// refuses every mutation afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    /// The pipeline finished, but at least one conflict escalated and the
    /// artifact carries a review flag. Still a success, never silent.
    SucceededWithEscalations,
    Failed { stage: Stage, reason: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// A validated stage result, owned by the supervisor once delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: Uuid,
    pub stage: Stage,
    pub output: StageOutput,
    /// Self-reported output confidence in [0, 1]; weights conflict
    /// resolution.
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

/// What the supervisor should do about a recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Budget remains: schedule attempt `next_attempt` after backoff.
    Retry { next_attempt: u32 },
    /// Non-retryable or budget exhausted; the run is now failed.
    Terminal,
}

/// In-memory record of one pipeline execution.
#[derive(Debug)]
pub struct Run {
    pub id: Uuid,
    pub document: String,
    pub extracted: ExtractedDocument,
    config: PipelineConfig,
    stages: BTreeMap<Stage, StageRecord>,
    results: BTreeMap<Stage, WorkerResult>,
    conflicts: Vec<ConflictRecord>,
    status: RunStatus,
    artifact: Option<ProposalArtifact>,
    created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(document: String, extracted: ExtractedDocument, config: PipelineConfig) -> Self {
        let stages = Stage::ALL
            .into_iter()
            .map(|s| (s, StageRecord::default()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            document,
            extracted,
            config,
            stages,
            results: BTreeMap::new(),
            conflicts: Vec::new(),
            status: RunStatus::Running,
            artifact: None,
            created_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn stage(&self, stage: Stage) -> &StageRecord {
        &self.stages[&stage]
    }

    pub fn result(&self, stage: Stage) -> Option<&WorkerResult> {
        self.results.get(&stage)
    }

    pub fn results(&self) -> impl Iterator<Item = &WorkerResult> {
        self.results.values()
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    /// A stage is eligible once the run is live, the stage has not started,
    /// and every prerequisite has delivered a result.
    pub fn is_eligible(&self, stage: Stage) -> bool {
        self.status == RunStatus::Running
            && self.stage(stage).status == StageStatus::Pending
            && stage
                .prerequisites()
                .iter()
                .all(|p| self.stage(*p).status == StageStatus::Done)
    }

    /// Record that `attempt` of `stage` went out to a worker.
    pub fn mark_dispatched(&mut self, stage: Stage, attempt: u32) {
        let record = self.stages.entry(stage).or_default();
        if !matches!(
            record.status,
            StageStatus::Pending | StageStatus::AwaitingRetry
        ) {
            log::error!(
                "run {}: illegal dispatch of {stage} from {:?}",
                self.id,
                record.status
            );
            return;
        }
        record.status = StageStatus::Dispatched;
        record.attempts = attempt;
    }

    /// Record a validated result. Returns false when the result must be
    /// discarded (terminal run, wrong state). Discards are total: a late
    /// result is never partially merged.
    pub fn record_result(&mut self, result: WorkerResult) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        let record = self.stages.entry(result.stage).or_default();
        if record.status != StageStatus::Dispatched {
            log::warn!(
                "run {}: dropping result for {} in state {:?}",
                self.id,
                result.stage,
                record.status
            );
            return false;
        }
        record.status = StageStatus::Done;
        record.last_failure = None;
        self.results.insert(result.stage, result);
        true
    }

    /// Record a failure (worker-reported or synthesized from a timeout) and
    /// decide between retry and terminal failure.
    pub fn record_failure(&mut self, stage: Stage, failure: WorkerFailure) -> FailureDisposition {
        let max_retries = self.config.max_retries;
        let record = self.stages.entry(stage).or_default();
        if record.status != StageStatus::Dispatched {
            log::warn!(
                "run {}: dropping failure for {stage} in state {:?}",
                self.id,
                record.status
            );
            return FailureDisposition::Terminal;
        }

        let retryable = failure.retryable() && record.attempts < max_retries;
        record.last_failure = Some(failure.clone());

        if retryable {
            record.status = StageStatus::AwaitingRetry;
            FailureDisposition::Retry {
                next_attempt: record.attempts + 1,
            }
        } else {
            record.status = StageStatus::Failed;
            self.status = RunStatus::Failed {
                stage,
                reason: failure.to_string(),
            };
            FailureDisposition::Terminal
        }
    }

    /// Append resolved conflict records. Records are immutable once added.
    pub fn record_conflicts(&mut self, mut records: Vec<ConflictRecord>) {
        self.conflicts.append(&mut records);
    }

    /// Cancel the run if it is still live. In-flight tasks are allowed to
    /// finish; their results will be discarded by `record_result`.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RunStatus::Cancelled;
        true
    }

    /// Attach the assembled artifact and settle the terminal status.
    pub fn finish(&mut self, artifact: ProposalArtifact) {
        if self.status != RunStatus::Running {
            log::error!("run {}: finish called in state {:?}", self.id, self.status);
            return;
        }
        let escalated = self.conflicts.iter().any(|c| c.escalated());
        self.artifact = Some(artifact);
        self.status = if escalated {
            RunStatus::SucceededWithEscalations
        } else {
            RunStatus::Succeeded
        };
    }

    /// Immutable copy for external readers.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            document: self.document.clone(),
            status: self.status.clone(),
            stages: self.stages.clone(),
            results: self.results.clone(),
            conflicts: self.conflicts.clone(),
            artifact: self.artifact.clone(),
            created_at: self.created_at,
        }
    }
}

/// Serializable point-in-time view of a run. Stable enough to answer status
/// queries after a restart if persisted externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: Uuid,
    pub document: String,
    pub status: RunStatus,
    pub stages: BTreeMap<Stage, StageRecord>,
    pub results: BTreeMap<Stage, WorkerResult>,
    pub conflicts: Vec<ConflictRecord>,
    pub artifact: Option<ProposalArtifact>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{Analysis, NoveltyAssessment, StageOutput};

    fn test_run() -> Run {
        Run::new(
            "paper.txt".into(),
            ExtractedDocument {
                text: "text".into(),
                metadata: BTreeMap::new(),
            },
            PipelineConfig::default(),
        )
    }

    fn analysis_result(task_id: Uuid) -> WorkerResult {
        WorkerResult {
            task_id,
            stage: Stage::Analyze,
            output: StageOutput::Analysis(Analysis {
                title: "t".into(),
                authors: vec![],
                key_contributions: vec![],
                methodology: String::new(),
                novelty: NoveltyAssessment {
                    score: 7.0,
                    justification: String::new(),
                },
                gaps: vec![],
            }),
            confidence: 1.0,
            produced_at: Utc::now(),
        }
    }

    fn transient() -> WorkerFailure {
        WorkerFailure::Transient {
            reason: "rate limited".into(),
        }
    }

    #[test]
    fn in_progress_covers_dispatch_and_retry_wait() {
        assert!(StageStatus::Dispatched.in_progress());
        assert!(StageStatus::AwaitingRetry.in_progress());
        assert!(!StageStatus::Pending.in_progress());
        assert!(!StageStatus::Done.in_progress());
        assert!(!StageStatus::Failed.in_progress());
    }

    #[test]
    fn only_analyze_is_initially_eligible() {
        let run = test_run();
        assert!(run.is_eligible(Stage::Analyze));
        assert!(!run.is_eligible(Stage::Evaluate));
        assert!(!run.is_eligible(Stage::Innovate));
        assert!(!run.is_eligible(Stage::Write));
    }

    #[test]
    fn evaluate_and_innovate_unlock_together_write_waits() {
        let mut run = test_run();
        run.mark_dispatched(Stage::Analyze, 1);
        assert!(run.record_result(analysis_result(Uuid::new_v4())));

        assert!(run.is_eligible(Stage::Evaluate));
        assert!(run.is_eligible(Stage::Innovate));
        assert!(!run.is_eligible(Stage::Write));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut run = test_run();
        run.mark_dispatched(Stage::Analyze, 1);
        assert_eq!(
            run.record_failure(Stage::Analyze, transient()),
            FailureDisposition::Retry { next_attempt: 2 }
        );
        run.mark_dispatched(Stage::Analyze, 2);
        assert_eq!(
            run.record_failure(Stage::Analyze, transient()),
            FailureDisposition::Retry { next_attempt: 3 }
        );
        run.mark_dispatched(Stage::Analyze, 3);
        // Third attempt exhausts the default budget of 3.
        assert_eq!(
            run.record_failure(Stage::Analyze, transient()),
            FailureDisposition::Terminal
        );
        assert!(matches!(
            run.status(),
            RunStatus::Failed {
                stage: Stage::Analyze,
                ..
            }
        ));
    }

    #[test]
    fn non_retryable_failure_is_immediately_terminal() {
        let mut run = test_run();
        run.mark_dispatched(Stage::Analyze, 1);
        let disposition = run.record_failure(
            Stage::Analyze,
            WorkerFailure::MalformedResponse {
                reason: "not json".into(),
            },
        );
        assert_eq!(disposition, FailureDisposition::Terminal);
    }

    #[test]
    fn terminal_run_discards_late_results() {
        let mut run = test_run();
        run.mark_dispatched(Stage::Analyze, 1);
        assert!(run.cancel());
        assert!(!run.record_result(analysis_result(Uuid::new_v4())));
        // Status never moves backward from a terminal state.
        assert_eq!(run.status(), &RunStatus::Cancelled);
        assert!(!run.cancel());
    }

    #[test]
    fn snapshot_serializes_and_round_trips() {
        let mut run = test_run();
        run.mark_dispatched(Stage::Analyze, 1);
        run.record_result(analysis_result(Uuid::new_v4()));

        let json = serde_json::to_string(&run.snapshot()).unwrap();
        let parsed: RunSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stages[&Stage::Analyze].status, StageStatus::Done);
        assert_eq!(parsed.stages[&Stage::Write].status, StageStatus::Pending);
        assert_eq!(parsed.status, RunStatus::Running);
    }
}
