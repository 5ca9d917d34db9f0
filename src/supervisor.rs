//! The supervisor: run ownership, dispatch, retries, and conflict policy.
//!
//! One dispatch loop owns every [`Run`] and all routing decisions; nothing
//! else mutates pipeline state. Callers talk to the loop through a
//! [`SupervisorHandle`], which submits documents, cancels runs, and awaits
//! terminal snapshots. Timeouts and retry backoffs are spawned sleep tasks
//! that report back into the same loop, so every state transition is still
//! single-threaded.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::artifact;
use crate::config::PipelineConfig;
use crate::conflict::ConflictResolver;
use crate::error::{SubmitError, WorkerFailure};
use crate::extract::{DocumentExtractor, ExtractedDocument};
use crate::llm::CompletionModel;
use crate::message::{Mailbox, Message, MessageChannel, MessagePayload, SUPERVISOR};
use crate::run::{FailureDisposition, Run, RunSnapshot, StageStatus, WorkerResult};
use crate::stage::Stage;
use crate::task::Task;
use crate::worker::{spawn_worker, WorkerState};
use crate::workers::{Analyst, Evaluator, Innovator, Writer};

/// Caller requests, serialized into the dispatch loop.
enum Command {
    Submit {
        document: String,
        extracted: ExtractedDocument,
        config: PipelineConfig,
        reply: oneshot::Sender<Uuid>,
    },
    Cancel {
        run_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Wait {
        run_id: Uuid,
        reply: oneshot::Sender<Option<RunSnapshot>>,
    },
}

/// Deadline and backoff expirations, reported by spawned sleep tasks.
enum TimerEvent {
    StageTimeout {
        run_id: Uuid,
        task_id: Uuid,
        stage: Stage,
        attempt: u32,
    },
    RetryDue {
        run_id: Uuid,
        task: Task,
    },
}

enum Event {
    Command(Command),
    Inbound(Message),
    Timer(TimerEvent),
}

/// One queued dispatch, waiting for its stage's worker to go idle.
struct Queued {
    run_id: Uuid,
    task: Task,
}

/// Supervisor-side record of one worker.
struct WorkerEntry {
    state: WorkerState,
    queue: VecDeque<Queued>,
}

/// A dispatched task the supervisor is waiting on.
struct InFlight {
    run_id: Uuid,
    task: Task,
}

/// The completion backends for the four stage workers.
pub struct PipelineModels {
    pub analyst: Arc<dyn CompletionModel>,
    pub evaluator: Arc<dyn CompletionModel>,
    pub innovator: Arc<dyn CompletionModel>,
    pub writer: Arc<dyn CompletionModel>,
}

impl PipelineModels {
    /// All four workers on the same backend.
    pub fn shared(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            analyst: model.clone(),
            evaluator: model.clone(),
            innovator: model.clone(),
            writer: model,
        }
    }
}

/// Spawn the four stage workers and the dispatch loop, returning the handle
/// callers submit through. The pipeline runs until every handle clone is
/// dropped, then shuts its channel down, which stops the workers.
pub fn start(
    default_config: PipelineConfig,
    models: PipelineModels,
    extractor: Arc<dyn DocumentExtractor>,
) -> SupervisorHandle {
    let channel = MessageChannel::new();
    let mailbox = channel.register(SUPERVISOR);
    log::info!("starting pipeline workers (grantforge {})", crate::VERSION);

    // Worker-side hard cap, twice the default dispatch budget: backstops the
    // per-run timers so a capability that never returns cannot pin a worker
    // (and the retries parked behind it) forever.
    let cap = |stage: Stage| default_config.timeout_for(stage) * 2;
    spawn_worker(
        Arc::new(Analyst::new(models.analyst)),
        channel.clone(),
        cap(Stage::Analyze),
    );
    spawn_worker(
        Arc::new(Evaluator::new(models.evaluator)),
        channel.clone(),
        cap(Stage::Evaluate),
    );
    spawn_worker(
        Arc::new(Innovator::new(models.innovator)),
        channel.clone(),
        cap(Stage::Innovate),
    );
    spawn_worker(
        Arc::new(Writer::new(models.writer)),
        channel.clone(),
        cap(Stage::Write),
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let snapshots = Arc::new(DashMap::new());

    let workers = Stage::ALL
        .into_iter()
        .map(|stage| {
            (
                stage,
                WorkerEntry {
                    state: WorkerState::Idle,
                    queue: VecDeque::new(),
                },
            )
        })
        .collect();

    let supervisor = Supervisor {
        channel,
        mailbox,
        commands: command_rx,
        timer_tx,
        timers: timer_rx,
        runs: HashMap::new(),
        workers,
        inflight: HashMap::new(),
        waiters: HashMap::new(),
        snapshots: snapshots.clone(),
    };
    tokio::spawn(supervisor.run());

    SupervisorHandle {
        commands: command_tx,
        extractor,
        snapshots,
        default_config,
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable caller-facing interface to a running pipeline.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    extractor: Arc<dyn DocumentExtractor>,
    snapshots: Arc<DashMap<Uuid, RunSnapshot>>,
    default_config: PipelineConfig,
}

impl SupervisorHandle {
    /// Submit a document under the pipeline's default configuration.
    pub async fn submit(&self, document: &str) -> Result<Uuid, SubmitError> {
        self.submit_with(document, self.default_config.clone()).await
    }

    /// Submit a document with per-run policy overrides. Extraction happens
    /// here, before a run exists; its failures never enter the retry
    /// machinery.
    pub async fn submit_with(
        &self,
        document: &str,
        config: PipelineConfig,
    ) -> Result<Uuid, SubmitError> {
        let extracted = self.extractor.extract(document).await?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                document: document.to_string(),
                extracted,
                config,
                reply,
            })
            .map_err(|_| SubmitError::Shutdown)?;
        response.await.map_err(|_| SubmitError::Shutdown)
    }

    /// Latest published snapshot of a run. Never blocks the dispatch loop.
    pub fn status(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.snapshots.get(&run_id).map(|entry| entry.value().clone())
    }

    /// Cancel a live run. Returns false if the run is unknown or already
    /// terminal. In-flight work is allowed to finish and then discarded.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Cancel { run_id, reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Wait for a run to reach a terminal state and return its snapshot.
    /// `None` for unknown runs or a shut-down pipeline.
    pub async fn wait(&self, run_id: Uuid) -> Option<RunSnapshot> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Wait { run_id, reply }).is_err() {
            return None;
        }
        response.await.ok().flatten()
    }

    /// Evict a finished run's snapshot from the store, releasing the last
    /// memory held for it. Returns false for unknown or still-live runs;
    /// live runs keep publishing and cannot be forgotten.
    pub fn forget(&self, run_id: Uuid) -> bool {
        self.snapshots
            .remove_if(&run_id, |_, snapshot| snapshot.status.is_terminal())
            .is_some()
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

struct Supervisor {
    channel: MessageChannel,
    mailbox: Mailbox,
    commands: mpsc::UnboundedReceiver<Command>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    runs: HashMap<Uuid, Run>,
    workers: BTreeMap<Stage, WorkerEntry>,
    inflight: HashMap<Uuid, InFlight>,
    waiters: HashMap<Uuid, Vec<oneshot::Sender<Option<RunSnapshot>>>>,
    snapshots: Arc<DashMap<Uuid, RunSnapshot>>,
}

impl Supervisor {
    async fn run(mut self) {
        log::info!("supervisor loop started");
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },
                message = self.mailbox.recv() => match message {
                    Some(message) => Event::Inbound(message),
                    None => break,
                },
                timer = self.timers.recv() => match timer {
                    Some(timer) => Event::Timer(timer),
                    None => break,
                },
            };

            match event {
                Event::Command(command) => self.on_command(command),
                Event::Inbound(message) => self.on_message(message),
                Event::Timer(timer) => self.on_timer(timer),
            }
            self.pump();
        }
        self.channel.shutdown();
        log::info!("supervisor loop stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                document,
                extracted,
                config,
                reply,
            } => {
                let run = Run::new(document, extracted, config);
                let run_id = run.id;
                log::info!("run {run_id}: submitted '{}'", run.document);
                self.runs.insert(run_id, run);
                self.publish(run_id);
                self.enqueue_eligible(run_id);
                let _ = reply.send(run_id);
            }
            Command::Cancel { run_id, reply } => {
                let cancelled = self
                    .runs
                    .get_mut(&run_id)
                    .map(Run::cancel)
                    .unwrap_or(false);
                if cancelled {
                    if let Some(run) = self.runs.get(&run_id) {
                        let abandoned = Stage::ALL
                            .into_iter()
                            .filter(|stage| run.stage(*stage).status.in_progress())
                            .count();
                        log::info!("run {run_id}: cancelled ({abandoned} stage(s) in progress)");
                    }
                    for entry in self.workers.values_mut() {
                        entry.queue.retain(|queued| queued.run_id != run_id);
                    }
                    self.retire(run_id);
                }
                let _ = reply.send(cancelled);
            }
            Command::Wait { run_id, reply } => {
                if self.runs.contains_key(&run_id) {
                    self.waiters.entry(run_id).or_default().push(reply);
                } else {
                    // Terminal runs live only in the snapshot store.
                    let snapshot = self
                        .snapshots
                        .get(&run_id)
                        .map(|entry| entry.value().clone());
                    let _ = reply.send(snapshot);
                }
            }
        }
    }

    fn on_message(&mut self, message: Message) {
        match message.payload {
            MessagePayload::Result(result) => self.on_result(result),
            MessagePayload::Failure(notice) => {
                self.release_worker(notice.stage, notice.task_id);
                match self.inflight.remove(&notice.task_id) {
                    Some(inflight) => self.handle_failure(
                        inflight.run_id,
                        notice.stage,
                        inflight.task,
                        notice.failure,
                    ),
                    None => log::debug!("stale failure for task {}", notice.task_id),
                }
            }
            MessagePayload::Heartbeat { worker } => self.on_heartbeat(&worker),
            MessagePayload::Task(task) => {
                log::warn!("supervisor received a task message for {}", task.stage);
            }
        }
    }

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::StageTimeout {
                run_id,
                task_id,
                stage,
                attempt,
            } => {
                // Only fires if this exact attempt is still outstanding.
                let current = self.inflight.get(&task_id).map(|f| f.task.attempt);
                if current != Some(attempt) {
                    return;
                }
                let Some(inflight) = self.inflight.remove(&task_id) else {
                    return;
                };
                log::warn!("run {run_id}: {stage} attempt {attempt} timed out");
                // The worker stays busy until its late reply arrives; the
                // retry queues behind it and the late reply is discarded.
                self.handle_failure(
                    run_id,
                    stage,
                    inflight.task,
                    WorkerFailure::Transient {
                        reason: "stage timed out".into(),
                    },
                );
            }
            TimerEvent::RetryDue { run_id, task } => {
                let stage = task.stage;
                let live = self
                    .runs
                    .get(&run_id)
                    .map(|run| {
                        !run.status().is_terminal()
                            && run.stage(stage).status == StageStatus::AwaitingRetry
                    })
                    .unwrap_or(false);
                if !live {
                    log::debug!("run {run_id}: dropping stale retry for {stage}");
                    return;
                }
                if let Some(entry) = self.workers.get_mut(&stage) {
                    entry.queue.push_back(Queued { run_id, task });
                }
            }
        }
    }

    fn on_result(&mut self, result: WorkerResult) {
        let stage = result.stage;
        let task_id = result.task_id;
        self.release_worker(stage, task_id);

        let Some(inflight) = self.inflight.remove(&task_id) else {
            log::debug!("discarding stale result for task {task_id}");
            return;
        };
        let run_id = inflight.run_id;
        let recorded = self
            .runs
            .get_mut(&run_id)
            .map(|run| run.record_result(result))
            .unwrap_or(false);
        if recorded {
            log::info!("run {run_id}: {stage} done");
            self.after_stage_done(run_id, stage);
        } else {
            self.publish(run_id);
        }
    }

    /// Conflict resolution, downstream unlocking, and artifact assembly.
    fn after_stage_done(&mut self, run_id: Uuid, stage: Stage) {
        let mut finished = false;
        if let Some(run) = self.runs.get_mut(&run_id) {
            match stage {
                Stage::Analyze => {}
                Stage::Evaluate | Stage::Innovate => {
                    let both_done = run.stage(Stage::Evaluate).status == StageStatus::Done
                        && run.stage(Stage::Innovate).status == StageStatus::Done;
                    if both_done {
                        let resolver = ConflictResolver::new(run.config().conflict_threshold);
                        let records = {
                            let results: Vec<&WorkerResult> = run.results().collect();
                            resolver.reconcile(&results)
                        };
                        if !records.is_empty() {
                            log::info!("run {run_id}: {} conflict(s) recorded", records.len());
                            run.record_conflicts(records);
                        }
                    }
                }
                Stage::Write => {
                    match artifact::assemble(run) {
                        Some(artifact) => run.finish(artifact),
                        // assemble only fails on missing upstream results,
                        // which the eligibility rules rule out.
                        None => log::error!("run {run_id}: stage results missing at assembly"),
                    }
                    finished = true;
                }
            }
        }
        self.enqueue_eligible(run_id);
        self.publish(run_id);
        if finished {
            self.retire(run_id);
        }
    }

    /// Record a failure (worker-reported or synthesized) and either schedule
    /// the retry or settle the run.
    fn handle_failure(&mut self, run_id: Uuid, stage: Stage, task: Task, failure: WorkerFailure) {
        let Some(run) = self.runs.get_mut(&run_id) else {
            return;
        };
        if run.status().is_terminal() {
            return;
        }
        match run.record_failure(stage, failure) {
            FailureDisposition::Retry { next_attempt } => {
                let delay = run.config().backoff_for(next_attempt);
                log::info!("run {run_id}: retrying {stage} attempt {next_attempt} in {delay:?}");
                self.schedule(
                    delay,
                    TimerEvent::RetryDue {
                        run_id,
                        task: task.next_attempt(),
                    },
                );
                self.publish(run_id);
            }
            FailureDisposition::Terminal => {
                log::warn!("run {run_id}: {stage} failed terminally");
                self.publish(run_id);
                self.retire(run_id);
            }
        }
    }

    /// Queue every newly eligible stage of `run_id`, assembling each task's
    /// payload from the upstream results already in the ledger.
    fn enqueue_eligible(&mut self, run_id: Uuid) {
        for stage in Stage::ALL {
            let eligible = self
                .runs
                .get(&run_id)
                .map(|run| run.is_eligible(stage))
                .unwrap_or(false);
            if !eligible || self.already_scheduled(run_id, stage) {
                continue;
            }
            let payload = self
                .runs
                .get(&run_id)
                .and_then(|run| payload_for(run, stage));
            let Some(payload) = payload else {
                log::error!("run {run_id}: cannot assemble payload for {stage}");
                continue;
            };
            let task = Task::new(stage, payload);
            if let Some(entry) = self.workers.get_mut(&stage) {
                entry.queue.push_back(Queued { run_id, task });
            }
        }
    }

    fn already_scheduled(&self, run_id: Uuid, stage: Stage) -> bool {
        let queued = self
            .workers
            .get(&stage)
            .map(|entry| entry.queue.iter().any(|q| q.run_id == run_id))
            .unwrap_or(false);
        queued
            || self
                .inflight
                .values()
                .any(|f| f.run_id == run_id && f.task.stage == stage)
    }

    /// Hand each idle worker the next dispatchable task from its queue.
    fn pump(&mut self) {
        for stage in Stage::ALL {
            self.try_dispatch(stage);
        }
    }

    fn try_dispatch(&mut self, stage: Stage) {
        loop {
            let queued = {
                let Some(entry) = self.workers.get_mut(&stage) else {
                    return;
                };
                if entry.state != WorkerState::Idle {
                    return;
                }
                match entry.queue.pop_front() {
                    Some(queued) => queued,
                    None => return,
                }
            };
            let Queued { run_id, task } = queued;

            let Some(run) = self.runs.get_mut(&run_id) else {
                continue;
            };
            if run.status().is_terminal() {
                continue;
            }
            run.mark_dispatched(stage, task.attempt);
            let timeout = run.config().timeout_for(stage);

            let task_id = task.id;
            let attempt = task.attempt;
            match self
                .channel
                .send(Message::task(SUPERVISOR, stage.worker_name(), task.clone()))
            {
                Ok(()) => {
                    if let Some(entry) = self.workers.get_mut(&stage) {
                        entry.state = WorkerState::Busy(task_id);
                    }
                    self.inflight.insert(task_id, InFlight { run_id, task });
                    self.schedule(
                        timeout,
                        TimerEvent::StageTimeout {
                            run_id,
                            task_id,
                            stage,
                            attempt,
                        },
                    );
                    log::debug!("run {run_id}: dispatched {stage} attempt {attempt}");
                    self.publish(run_id);
                    return;
                }
                Err(err) => {
                    log::error!("{stage} worker unreachable: {err}");
                    self.fail_worker(stage, run_id, &err.to_string());
                    return;
                }
            }
        }
    }

    /// The worker's mailbox is gone: mark it failed and terminally fail the
    /// run we just tried plus everything queued behind it.
    fn fail_worker(&mut self, stage: Stage, dispatched_run: Uuid, reason: &str) {
        let stranded: Vec<Queued> = match self.workers.get_mut(&stage) {
            Some(entry) => {
                entry.state = WorkerState::Failed;
                entry.queue.drain(..).collect()
            }
            None => Vec::new(),
        };
        self.record_delivery_failure(dispatched_run, stage, reason, None);
        for queued in stranded {
            self.record_delivery_failure(queued.run_id, stage, reason, Some(queued.task.attempt));
        }
    }

    fn record_delivery_failure(
        &mut self,
        run_id: Uuid,
        stage: Stage,
        reason: &str,
        mark_attempt: Option<u32>,
    ) {
        let Some(run) = self.runs.get_mut(&run_id) else {
            return;
        };
        if run.status().is_terminal() {
            return;
        }
        if let Some(attempt) = mark_attempt {
            run.mark_dispatched(stage, attempt);
        }
        run.record_failure(
            stage,
            WorkerFailure::Delivery {
                reason: reason.to_string(),
            },
        );
        self.publish(run_id);
        self.retire(run_id);
    }

    fn on_heartbeat(&mut self, worker: &str) {
        let Some(stage) = Stage::for_worker(worker) else {
            log::warn!("heartbeat from unknown worker '{worker}'");
            return;
        };
        if let Some(entry) = self.workers.get_mut(&stage) {
            if entry.state == WorkerState::Failed {
                log::info!("{worker} is back online");
                entry.state = WorkerState::Idle;
            } else {
                log::debug!("heartbeat from {worker}");
            }
        }
    }

    fn release_worker(&mut self, stage: Stage, task_id: Uuid) {
        if let Some(entry) = self.workers.get_mut(&stage) {
            if entry.state == WorkerState::Busy(task_id) {
                entry.state = WorkerState::Idle;
            }
        }
    }

    fn schedule(&self, delay: Duration, event: TimerEvent) {
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(event);
        });
    }

    fn publish(&self, run_id: Uuid) {
        if let Some(run) = self.runs.get(&run_id) {
            self.snapshots.insert(run_id, run.snapshot());
        }
    }

    /// Publish the final snapshot, settle waiters, and drop the run from
    /// the loop's map. A run is held in memory only for its active
    /// lifetime; post-terminal queries are the snapshot store's job.
    fn retire(&mut self, run_id: Uuid) {
        let Some(run) = self.runs.get(&run_id) else {
            return;
        };
        if !run.status().is_terminal() {
            return;
        }
        let snapshot = run.snapshot();
        self.snapshots.insert(run_id, snapshot.clone());
        if let Some(waiters) = self.waiters.remove(&run_id) {
            for waiter in waiters {
                let _ = waiter.send(Some(snapshot.clone()));
            }
        }
        self.runs.remove(&run_id);
        log::debug!("run {run_id}: retired to the snapshot store");
    }
}

/// Assemble the task payload for `stage` from the run's ledger. Workers
/// never fetch upstream state; everything they need travels in the task.
fn payload_for(run: &Run, stage: Stage) -> Option<serde_json::Value> {
    match stage {
        Stage::Analyze => Some(serde_json::json!({ "document": run.extracted })),
        Stage::Evaluate | Stage::Innovate => {
            let analysis = run.result(Stage::Analyze)?.output.as_analysis()?;
            Some(serde_json::json!({ "analysis": analysis }))
        }
        Stage::Write => {
            let analysis = run.result(Stage::Analyze)?.output.as_analysis()?;
            let evaluation = run.result(Stage::Evaluate)?.output.as_evaluation()?;
            let innovation = run.result(Stage::Innovate)?.output.as_innovation()?;
            Some(serde_json::json!({
                "analysis": analysis,
                "evaluation": evaluation,
                "innovation": innovation,
                "conflicts": run.conflicts(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Resolution;
    use crate::error::ExtractionError;
    use crate::llm::{CompletionError, ScriptedModel};
    use crate::outputs::AssessmentValue;
    use crate::run::RunStatus;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct StaticExtractor;

    #[async_trait]
    impl DocumentExtractor for StaticExtractor {
        async fn extract(&self, document: &str) -> Result<ExtractedDocument, ExtractionError> {
            Ok(ExtractedDocument {
                text: format!("full text of {document}"),
                metadata: BTreeMap::new(),
            })
        }
    }

    struct Script {
        analyst: Arc<ScriptedModel>,
        evaluator: Arc<ScriptedModel>,
        innovator: Arc<ScriptedModel>,
        writer: Arc<ScriptedModel>,
    }

    impl Script {
        fn new() -> Self {
            Self {
                analyst: Arc::new(ScriptedModel::new()),
                evaluator: Arc::new(ScriptedModel::new()),
                innovator: Arc::new(ScriptedModel::new()),
                writer: Arc::new(ScriptedModel::new()),
            }
        }

        fn models(&self) -> PipelineModels {
            PipelineModels {
                analyst: self.analyst.clone(),
                evaluator: self.evaluator.clone(),
                innovator: self.innovator.clone(),
                writer: self.writer.clone(),
            }
        }

        /// One full agreeing pass: novelty 7.0 everywhere.
        fn happy_path(&self) {
            self.analyst.push_response(analysis_json(7.0));
            self.evaluator.push_response(evaluation_json(7.0));
            self.innovator.push_response(innovation_json(7.0));
            self.push_sections();
        }

        fn push_sections(&self) {
            for i in 0..6 {
                self.writer.push_response(format!("Body of section {i}."));
            }
        }
    }

    fn analysis_json(novelty: f64) -> String {
        format!(
            r#"{{"title": "Sparse Attention", "authors": ["A. Author"],
                 "key_contributions": ["O(n log n) attention"],
                 "methodology": "ablation study",
                 "novelty": {{"score": {novelty}, "justification": "new pattern"}},
                 "gaps": [], "confidence": 0.9}}"#
        )
    }

    fn evaluation_json(originality: f64) -> String {
        format!(
            r#"{{"scores": {{"originality": {originality}, "methodology_rigor": 8.0,
                             "impact": 7.0, "clarity": 7.0, "overall": 7.5}},
                 "funding_potential": "HIGH",
                 "strengths": ["solid"], "weaknesses": [], "confidence": 0.8}}"#
        )
    }

    fn innovation_json(crosscheck: f64) -> String {
        format!(
            r#"{{"directions": [{{"title": "streaming variant",
                                  "rationale": "memory", "impact_score": 7.0}}],
                 "breakthrough": {{"score": 7.0, "justification": "scales"}},
                 "novelty_crosscheck": {crosscheck},
                 "funding_potential": "HIGH", "confidence": 0.7}}"#
        )
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn start_pipeline(script: &Script, config: PipelineConfig) -> SupervisorHandle {
        let _ = env_logger::builder().is_test(true).try_init();
        start(config, script.models(), Arc::new(StaticExtractor))
    }

    #[tokio::test]
    async fn pipeline_completes_and_assembles_artifact() {
        let script = Script::new();
        script.happy_path();
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::Succeeded);
        for stage in Stage::ALL {
            assert_eq!(snapshot.stages[&stage].status, StageStatus::Done);
        }
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.title, "Sparse Attention");
        assert_eq!(artifact.proposal.sections.len(), 6);
        assert!(artifact.recommendation.starts_with("RECOMMEND"));
        assert!(!artifact.needs_review);

        // The published snapshot agrees with the waited one.
        let published = handle.status(run_id).unwrap();
        assert_eq!(published.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(7.0));
        script.evaluator.push_error(CompletionError::TimedOut);
        script.evaluator.push_error(CompletionError::RateLimited);
        script.evaluator.push_response(evaluation_json(7.0));
        script.innovator.push_response(innovation_json(7.0));
        script.push_sections();
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::Succeeded);
        assert_eq!(snapshot.stages[&Stage::Evaluate].attempts, 3);
        assert_eq!(snapshot.stages[&Stage::Evaluate].status, StageStatus::Done);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run_and_skip_downstream() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(7.0));
        for _ in 0..3 {
            script.evaluator.push_error(CompletionError::TimedOut);
        }
        script.innovator.push_response(innovation_json(7.0));
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert!(matches!(
            snapshot.status,
            RunStatus::Failed {
                stage: Stage::Evaluate,
                ..
            }
        ));
        assert_eq!(snapshot.stages[&Stage::Evaluate].attempts, 3);
        assert_eq!(snapshot.stages[&Stage::Write].status, StageStatus::Pending);
        assert_eq!(snapshot.stages[&Stage::Write].attempts, 0);
        assert!(snapshot.artifact.is_none());
    }

    #[tokio::test]
    async fn malformed_synthesis_fails_without_retry() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(7.0));
        script.evaluator.push_response(evaluation_json(7.0));
        script.innovator.push_response(innovation_json(7.0));
        script
            .writer
            .push_error(CompletionError::Malformed("gibberish".into()));
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert!(matches!(
            snapshot.status,
            RunStatus::Failed {
                stage: Stage::Write,
                ..
            }
        ));
        assert_eq!(snapshot.stages[&Stage::Write].attempts, 1);
        assert_eq!(snapshot.stages[&Stage::Analyze].status, StageStatus::Done);
        assert_eq!(snapshot.stages[&Stage::Evaluate].status, StageStatus::Done);
        assert_eq!(snapshot.stages[&Stage::Innovate].status, StageStatus::Done);
    }

    #[tokio::test]
    async fn cancelled_run_discards_inflight_work() {
        let script = Script::new();
        script
            .analyst
            .push_delayed_response(Duration::from_millis(200), analysis_json(7.0));
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.cancel(run_id).await);
        assert!(!handle.cancel(run_id).await);

        let snapshot = handle.wait(run_id).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        assert!(snapshot.artifact.is_none());

        // The late analysis result is discarded, not merged.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = handle.status(run_id).unwrap();
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        assert!(snapshot.results.is_empty());
    }

    #[tokio::test]
    async fn slow_stage_times_out_and_the_retry_succeeds() {
        let script = Script::new();
        script
            .analyst
            .push_delayed_response(Duration::from_millis(150), analysis_json(7.0));
        script.analyst.push_response(analysis_json(7.0));
        script.evaluator.push_response(evaluation_json(7.0));
        script.innovator.push_response(innovation_json(7.0));
        script.push_sections();

        let config = PipelineConfig {
            stage_timeout: Duration::from_millis(50),
            timeout_overrides: BTreeMap::new(),
            backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let handle = start_pipeline(&script, config);

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::Succeeded);
        assert_eq!(snapshot.stages[&Stage::Analyze].attempts, 2);
    }

    #[tokio::test]
    async fn close_scores_auto_resolve_within_range() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(7.0));
        script.evaluator.push_response(evaluation_json(7.0));
        script.innovator.push_response(innovation_json(7.3));
        script.push_sections();

        let config = PipelineConfig {
            conflict_threshold: 1.0,
            backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let handle = start_pipeline(&script, config);

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::Succeeded);
        let novelty = snapshot
            .conflicts
            .iter()
            .find(|c| c.subject == "novelty")
            .unwrap();
        assert_eq!(novelty.resolution, Resolution::AutoResolved);
        match novelty.resolved {
            Some(AssessmentValue::Score(v)) => assert!((7.0..=7.3).contains(&v)),
            ref other => panic!("expected resolved score, got {other:?}"),
        }
        let artifact = snapshot.artifact.unwrap();
        assert!(!artifact.needs_review);
        assert!((7.0..=7.3).contains(&artifact.summary.novelty_score));
    }

    #[tokio::test]
    async fn divergent_scores_escalate_for_review() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(3.0));
        script.evaluator.push_response(evaluation_json(3.0));
        script.innovator.push_response(innovation_json(8.5));
        script.push_sections();
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::SucceededWithEscalations);
        let novelty = snapshot
            .conflicts
            .iter()
            .find(|c| c.subject == "novelty")
            .unwrap();
        assert!(novelty.escalated());
        assert!(novelty.resolved.is_none());
        assert_eq!(novelty.competing.len(), 3);
        assert!(snapshot.artifact.unwrap().needs_review);
    }

    #[tokio::test]
    async fn concurrent_runs_share_the_worker_pool() {
        let script = Script::new();
        for _ in 0..3 {
            script.analyst.push_response(analysis_json(7.0));
            script.evaluator.push_response(evaluation_json(7.0));
            script.innovator.push_response(innovation_json(7.0));
            script.push_sections();
        }
        let handle = start_pipeline(&script, fast_config());

        let documents = ["a.txt", "b.txt", "c.txt"];
        let run_ids: Vec<Uuid> = join_all(documents.iter().map(|d| handle.submit(d)))
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        let snapshots = join_all(run_ids.iter().map(|id| handle.wait(*id))).await;
        for snapshot in snapshots {
            let snapshot = snapshot.unwrap();
            assert_eq!(snapshot.status, RunStatus::Succeeded);
            assert!(snapshot.artifact.is_some());
        }
    }

    #[tokio::test]
    async fn finished_runs_are_served_from_the_snapshot_store() {
        let script = Script::new();
        script.happy_path();
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Succeeded);

        // The loop has dropped the run by now; waits and status queries are
        // answered from the published snapshot instead.
        let replayed = handle.wait(run_id).await.unwrap();
        assert_eq!(replayed.status, RunStatus::Succeeded);
        assert!(replayed.artifact.is_some());
        assert!(handle.status(run_id).is_some());

        assert!(handle.forget(run_id));
        assert!(handle.status(run_id).is_none());
        assert!(handle.wait(run_id).await.is_none());
        assert!(!handle.forget(run_id));
    }

    #[tokio::test]
    async fn live_runs_cannot_be_forgotten() {
        let script = Script::new();
        script
            .analyst
            .push_delayed_response(Duration::from_millis(200), analysis_json(7.0));
        let handle = start_pipeline(&script, fast_config());

        let run_id = handle.submit("paper.txt").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.forget(run_id));

        assert!(handle.cancel(run_id).await);
        assert!(handle.forget(run_id));
        assert!(handle.status(run_id).is_none());
    }

    #[tokio::test]
    async fn evaluate_times_out_twice_then_succeeds() {
        let script = Script::new();
        script.analyst.push_response(analysis_json(7.0));
        script
            .evaluator
            .push_delayed_response(Duration::from_millis(100), evaluation_json(7.0));
        script
            .evaluator
            .push_delayed_response(Duration::from_millis(100), evaluation_json(7.0));
        script.evaluator.push_response(evaluation_json(7.0));
        script.innovator.push_response(innovation_json(7.0));
        script.push_sections();

        let config = PipelineConfig {
            stage_timeout: Duration::from_millis(40),
            timeout_overrides: BTreeMap::new(),
            backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let handle = start_pipeline(&script, config);

        let run_id = handle.submit("paper.txt").await.unwrap();
        let snapshot = handle.wait(run_id).await.unwrap();

        assert_eq!(snapshot.status, RunStatus::Succeeded);
        assert_eq!(snapshot.stages[&Stage::Evaluate].attempts, 3);
        assert_eq!(snapshot.stages[&Stage::Evaluate].status, StageStatus::Done);
        assert!(snapshot.artifact.is_some());
    }

    #[tokio::test]
    async fn unknown_run_yields_no_snapshot() {
        let script = Script::new();
        let handle = start_pipeline(&script, fast_config());
        let bogus = Uuid::new_v4();
        assert!(handle.wait(bogus).await.is_none());
        assert!(handle.status(bogus).is_none());
        assert!(!handle.cancel(bogus).await);
    }
}
