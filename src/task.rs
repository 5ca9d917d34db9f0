//! Unit of dispatch between the supervisor and a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// One unit of stage work.
///
/// Created by the supervisor when a stage becomes eligible to run and
/// dropped once its terminal result is recorded in the run. The id doubles
/// as the message correlation id and is stable across retries; only the
/// attempt counter moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub stage: Stage,
    /// Stage input, assembled by the supervisor from upstream results.
    /// Workers never fetch upstream state themselves.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// 1-based attempt counter.
    pub attempt: u32,
}

impl Task {
    pub fn new(stage: Stage, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            payload,
            created_at: Utc::now(),
            attempt: 1,
        }
    }

    /// The same unit of work, one attempt later.
    pub fn next_attempt(&self) -> Task {
        Task {
            id: self.id,
            stage: self.stage,
            payload: self.payload.clone(),
            created_at: Utc::now(),
            attempt: self.attempt + 1,
        }
    }
}
