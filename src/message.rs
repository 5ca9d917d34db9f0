//! Typed, ordered message delivery between the supervisor and its workers.
//!
//! One mailbox per recipient, many concurrent senders, exactly one consuming
//! loop per mailbox. Delivery is at-most-once and FIFO per sender-recipient
//! pair; retransmission is supervisor policy, never a channel guarantee.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ChannelError, RecvError, WorkerFailure};
use crate::run::WorkerResult;
use crate::stage::Stage;
use crate::task::Task;

/// Mailbox name of the supervisor's dispatch loop.
pub const SUPERVISOR: &str = "supervisor";

/// Message discriminant, for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Task,
    Result,
    Failure,
    Heartbeat,
}

/// A worker's failure reply for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNotice {
    pub task_id: Uuid,
    pub stage: Stage,
    pub failure: WorkerFailure,
}

/// Typed message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    Task(Task),
    Result(WorkerResult),
    Failure(FailureNotice),
    Heartbeat { worker: String },
}

/// The sole unit of inter-component communication. Immutable once sent; no
/// component reads another's internal state directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Equal to the task id for task-correlated traffic.
    pub correlation_id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub payload: MessagePayload,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn task(sender: &str, recipient: &str, task: Task) -> Self {
        Self {
            correlation_id: task.id,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            payload: MessagePayload::Task(task),
            sent_at: Utc::now(),
        }
    }

    /// A worker's result reply, addressed to the supervisor.
    pub fn result(sender: &str, result: WorkerResult) -> Self {
        Self {
            correlation_id: result.task_id,
            sender: sender.to_string(),
            recipient: SUPERVISOR.to_string(),
            payload: MessagePayload::Result(result),
            sent_at: Utc::now(),
        }
    }

    /// A worker's failure reply, addressed to the supervisor.
    pub fn failure(sender: &str, notice: FailureNotice) -> Self {
        Self {
            correlation_id: notice.task_id,
            sender: sender.to_string(),
            recipient: SUPERVISOR.to_string(),
            payload: MessagePayload::Failure(notice),
            sent_at: Utc::now(),
        }
    }

    /// Liveness signal a worker emits when its loop starts.
    pub fn heartbeat(worker: &str) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            sender: worker.to_string(),
            recipient: SUPERVISOR.to_string(),
            payload: MessagePayload::Heartbeat {
                worker: worker.to_string(),
            },
            sent_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.payload {
            MessagePayload::Task(_) => MessageKind::Task,
            MessagePayload::Result(_) => MessageKind::Result,
            MessagePayload::Failure(_) => MessageKind::Failure,
            MessagePayload::Heartbeat { .. } => MessageKind::Heartbeat,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Routing table from recipient name to mailbox sender. Cheap to clone;
/// clones share the same routes.
#[derive(Debug, Clone, Default)]
pub struct MessageChannel {
    routes: Arc<DashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the mailbox for `recipient` and hand back its
    /// consuming end. Registration is synchronous: once this returns, sends
    /// to `recipient` are routable.
    pub fn register(&self, recipient: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(recipient.to_string(), tx);
        log::debug!("registered mailbox '{recipient}'");
        Mailbox {
            recipient: recipient.to_string(),
            rx,
        }
    }

    /// Enqueue `message` for asynchronous delivery to its recipient.
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        log::trace!(
            "{} -> {} [{:?}] corr={}",
            message.sender,
            message.recipient,
            message.kind(),
            message.correlation_id
        );
        let tx = self
            .routes
            .get(&message.recipient)
            .ok_or_else(|| ChannelError::UnknownRecipient(message.recipient.clone()))?;
        tx.send(message)
            .map_err(|err| ChannelError::Closed(err.0.recipient.clone()))
    }

    /// Drop every route, closing all mailboxes. Consuming loops observe the
    /// close as an end-of-stream on `recv`.
    pub fn shutdown(&self) {
        self.routes.clear();
    }
}

/// The consuming end of one recipient's queue.
#[derive(Debug)]
pub struct Mailbox {
    recipient: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Wait for the next message; `None` once the channel shuts down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Wait for the next message, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, RecvError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvError::Disconnected),
            Err(_) => Err(RecvError::TimedOut),
        }
    }
}
