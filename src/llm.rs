//! Delegated reasoning boundary.
//!
//! Every worker hands its semantic reasoning to a [`CompletionModel`]. The
//! core makes no claim about what backs the trait: a network LLM client, a
//! local model, or the deterministic [`ScriptedModel`] used in tests and
//! offline runs all satisfy the same contract.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Default generation budget per completion call.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Per-call constraints passed alongside the prompt.
#[derive(Debug, Clone)]
pub struct CompletionConstraints {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for CompletionConstraints {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.3,
        }
    }
}

/// Errors a completion backend may surface.
///
/// Rate limiting and timeouts are transient; a malformed response is not.
/// Re-sending the same prompt to a confused backend is not a recovery
/// strategy, so workers map it to a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion rate limited")]
    RateLimited,

    #[error("completion timed out")]
    TimedOut,

    #[error("malformed completion response: {0}")]
    Malformed(String),
}

/// The delegated reasoning capability used inside each worker.
#[async_trait]
pub trait CompletionModel: Send + Sync + fmt::Debug {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Produce a completion for `prompt` under `constraints`.
    async fn complete(
        &self,
        prompt: &str,
        constraints: &CompletionConstraints,
    ) -> Result<String, CompletionError>;
}

/// Pull the first JSON object out of completion text.
///
/// Models wrap structured output in code fences or lead with prose; this
/// scans for the first balanced `{...}` (string-aware) and parses it. A
/// response with no parseable object is malformed.
pub fn extract_json(text: &str) -> Result<serde_json::Value, CompletionError> {
    let start = text
        .find('{')
        .ok_or_else(|| CompletionError::Malformed("no JSON object in response".into()))?;

    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate)
                        .map_err(|e| CompletionError::Malformed(e.to_string()));
                }
            }
            _ => {}
        }
    }

    Err(CompletionError::Malformed(
        "unterminated JSON object in response".into(),
    ))
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ScriptedReply {
    delay: Option<Duration>,
    reply: Result<String, CompletionError>,
}

/// Deterministic [`CompletionModel`] backed by a queue of canned replies.
///
/// Each `complete` call pops the next scripted reply in order; an optional
/// delay simulates a slow backend. An exhausted script answers with a
/// malformed-response error so a miscounted test fails loudly instead of
/// hanging.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn push_response(&self, text: impl Into<String>) {
        self.push(ScriptedReply {
            delay: None,
            reply: Ok(text.into()),
        });
    }

    /// Queue a successful completion that arrives after `delay`.
    pub fn push_delayed_response(&self, delay: Duration, text: impl Into<String>) {
        self.push(ScriptedReply {
            delay: Some(delay),
            reply: Ok(text.into()),
        });
    }

    /// Queue an error reply.
    pub fn push_error(&self, error: CompletionError) {
        self.push(ScriptedReply {
            delay: None,
            reply: Err(error),
        });
    }

    /// Number of replies still queued.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn push(&self, reply: ScriptedReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _prompt: &str,
        _constraints: &CompletionConstraints,
    ) -> Result<String, CompletionError> {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(_) => None,
        };
        let Some(next) = next else {
            log::warn!("scripted model exhausted");
            return Err(CompletionError::Malformed("script exhausted".into()));
        };
        if let Some(delay) = next.delay {
            tokio::time::sleep(delay).await;
        }
        next.reply
    }
}
