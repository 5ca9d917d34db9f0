//! Generic worker contract and mailbox loop.
//!
//! A worker is one long-lived tokio task: it receives a task message,
//! performs one unit of work (delegating semantic reasoning to its
//! completion model), replies with a result or a failure, and retains
//! nothing. Workers hold no shared state, so re-invoking `handle` with the
//! same task is always safe.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::WorkerFailure;
use crate::message::{FailureNotice, Message, MessageChannel, MessagePayload};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;

/// Supervisor-side view of a worker instance. A worker processes at most
/// one task at a time; the supervisor never dispatches to a busy worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy(Uuid),
    Failed,
}

/// One stage specialization.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Mailbox name; equals `self.stage().worker_name()`.
    fn name(&self) -> &'static str;

    /// The single stage this worker handles.
    fn stage(&self) -> Stage;

    /// Perform one unit of work. Prerequisite inputs are already in the
    /// task payload; a worker never fetches upstream results itself.
    async fn handle(&self, task: &Task) -> Result<WorkerResult, WorkerFailure>;
}

/// Register the worker's mailbox and spawn its consuming loop.
///
/// Registration happens before the spawn, so tasks are routable as soon as
/// this returns. The loop announces itself with one heartbeat and exits
/// when the channel shuts down. `hard_timeout` caps one `handle` call: a
/// delegated capability that never returns frees the worker with a
/// retryable failure instead of pinning it (and the retries parked behind
/// it) forever.
pub fn spawn_worker(
    worker: Arc<dyn Worker>,
    channel: MessageChannel,
    hard_timeout: Duration,
) -> JoinHandle<()> {
    let mut mailbox = channel.register(worker.name());

    tokio::spawn(async move {
        if let Err(err) = channel.send(Message::heartbeat(worker.name())) {
            log::error!("{}: cannot reach supervisor: {err}", worker.name());
            return;
        }

        while let Some(message) = mailbox.recv().await {
            let kind = message.kind();
            match message.payload {
                MessagePayload::Task(task) => {
                    let reply = run_task(worker.as_ref(), &task, hard_timeout).await;
                    if channel.send(reply).is_err() {
                        log::error!("{}: supervisor mailbox gone, stopping", worker.name());
                        break;
                    }
                }
                _ => log::warn!("{}: ignoring {kind:?} message", worker.name()),
            }
        }
        log::debug!("{}: loop stopped", mailbox.recipient());
    })
}

async fn run_task(worker: &dyn Worker, task: &Task, hard_timeout: Duration) -> Message {
    if task.stage != worker.stage() {
        // Misrouted task: a supervisor bug, not something to retry.
        let failure = WorkerFailure::MalformedPayload {
            reason: format!(
                "{} received a {} task",
                worker.name(),
                task.stage.worker_name()
            ),
        };
        log::error!("{}: {failure}", worker.name());
        return Message::failure(
            worker.name(),
            FailureNotice {
                task_id: task.id,
                stage: task.stage,
                failure,
            },
        );
    }

    log::debug!(
        "{}: handling task {} attempt {}",
        worker.name(),
        task.id,
        task.attempt
    );
    match tokio::time::timeout(hard_timeout, worker.handle(task)).await {
        Ok(Ok(result)) => Message::result(worker.name(), result),
        Ok(Err(failure)) => {
            log::warn!("{}: task {} failed: {failure}", worker.name(), task.id);
            Message::failure(
                worker.name(),
                FailureNotice {
                    task_id: task.id,
                    stage: task.stage,
                    failure,
                },
            )
        }
        Err(_) => {
            log::warn!(
                "{}: task {} abandoned after {hard_timeout:?}",
                worker.name(),
                task.id
            );
            Message::failure(
                worker.name(),
                FailureNotice {
                    task_id: task.id,
                    stage: task.stage,
                    failure: WorkerFailure::Transient {
                        reason: format!("worker gave up after {hard_timeout:?}"),
                    },
                },
            )
        }
    }
}
