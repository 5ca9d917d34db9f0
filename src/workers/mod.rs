//! The four stage specializations.
//!
//! Each worker assembles a prompt from its task payload, makes a bounded,
//! deterministic number of completion calls, and parses the reply into its
//! stage's structured output. Parsing failures are terminal; transient
//! capability errors are surfaced for the supervisor's retry loop.

mod analyst;
mod evaluator;
mod innovator;
mod writer;

pub use analyst::Analyst;
pub use evaluator::Evaluator;
pub use innovator::Innovator;
pub use writer::Writer;

use serde::de::DeserializeOwned;

use crate::error::WorkerFailure;
use crate::task::Task;

/// Decode the supervisor-assembled task payload.
fn parse_payload<T: DeserializeOwned>(task: &Task) -> Result<T, WorkerFailure> {
    serde_json::from_value(task.payload.clone()).map_err(|err| WorkerFailure::MalformedPayload {
        reason: err.to_string(),
    })
}

/// Decode a model's JSON object into the stage output type, pulling the
/// optional self-reported `confidence` off the top level first.
fn parse_output<T: DeserializeOwned>(value: serde_json::Value) -> Result<(T, f64), WorkerFailure> {
    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    let output =
        serde_json::from_value(value).map_err(|err| WorkerFailure::MalformedResponse {
            reason: err.to_string(),
        })?;
    Ok((output, confidence))
}

/// Truncation applied to paper text before it enters a prompt.
const PROMPT_TEXT_BUDGET: usize = 10_000;

fn truncate_for_prompt(text: &str) -> &str {
    match text.char_indices().nth(PROMPT_TEXT_BUDGET) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
