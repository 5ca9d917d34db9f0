//! Failure taxonomy for the pipeline core.
//!
//! Retryable failures are absorbed by the supervisor's retry loop and never
//! surface to the caller unless retries exhaust. Terminal failures abort the
//! dependent downstream stages of their run only. Channel delivery errors
//! are a bug class: the channel must not drop messages under normal
//! operation, so they are logged and fail the affected stage terminally.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::CompletionError;

/// A worker's reply when it could not produce a result.
///
/// Only [`WorkerFailure::Transient`] is surfaced for retry; everything else
/// marks a bug (malformed payload) or an unrecoverable response and fails
/// the stage terminally.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WorkerFailure {
    /// Transient capability error (rate limit, timeout). Worth retrying.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// The delegated capability replied with something unparseable.
    #[error("malformed completion response: {reason}")]
    MalformedResponse { reason: String },

    /// The task payload itself could not be decoded. A supervisor-side bug,
    /// not something a retry can fix.
    #[error("malformed task payload: {reason}")]
    MalformedPayload { reason: String },

    /// The message channel refused delivery.
    #[error("channel delivery failed: {reason}")]
    Delivery { reason: String },
}

impl WorkerFailure {
    /// Whether the supervisor should re-dispatch the stage.
    pub fn retryable(&self) -> bool {
        matches!(self, WorkerFailure::Transient { .. })
    }
}

impl From<CompletionError> for WorkerFailure {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::RateLimited | CompletionError::TimedOut => {
                WorkerFailure::Transient {
                    reason: err.to_string(),
                }
            }
            CompletionError::Malformed(reason) => WorkerFailure::MalformedResponse { reason },
        }
    }
}

/// Pre-pipeline document extraction failure. Always terminal: a run is never
/// created for a document that cannot be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("unreadable document '{document}': {reason}")]
    Unreadable { document: String, reason: String },

    #[error("document '{document}' contains no extractable text")]
    Empty { document: String },
}

/// Message channel delivery error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("no mailbox registered for recipient '{0}'")]
    UnknownRecipient(String),

    #[error("mailbox for recipient '{0}' is closed")]
    Closed(String),
}

/// Outcome of a bounded mailbox receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// No message arrived within the budget. Not an error in itself; the
    /// caller decides what an elapsed budget means.
    #[error("receive timed out")]
    TimedOut,

    /// All senders are gone.
    #[error("channel disconnected")]
    Disconnected,
}

/// Why a submission was rejected before a run was created.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("supervisor is shut down")]
    Shutdown,
}
