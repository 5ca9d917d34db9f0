//! Pipeline tuning knobs.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::stage::Stage;

/// Per-run policy configuration. Every knob has a documented default;
/// callers override per submission.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum attempts per stage (first attempt included) before the stage
    /// fails terminally. Default 3.
    pub max_retries: u32,

    /// Per-dispatch time budget; expiry counts as a retryable failure.
    /// Default 30s.
    pub stage_timeout: Duration,

    /// Stage-specific timeout overrides. By default the writer gets 45s;
    /// synthesis makes several completion calls.
    pub timeout_overrides: BTreeMap<Stage, Duration>,

    /// Numeric score gap above which a conflict escalates for human review
    /// instead of auto-resolving. Scores share a 0-10 scale. Default 2.0.
    pub conflict_threshold: f64,

    /// Base delay for exponential retry backoff. Attempt `n` waits
    /// `backoff_base * 2^(n-2)` before re-dispatch; attempt 1 never waits.
    /// Default 250ms.
    pub backoff_base: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut timeout_overrides = BTreeMap::new();
        timeout_overrides.insert(Stage::Write, Duration::from_secs(45));
        Self {
            max_retries: 3,
            stage_timeout: Duration::from_secs(30),
            timeout_overrides,
            conflict_threshold: 2.0,
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl PipelineConfig {
    /// Dispatch budget for `stage`.
    pub fn timeout_for(&self, stage: Stage) -> Duration {
        self.timeout_overrides
            .get(&stage)
            .copied()
            .unwrap_or(self.stage_timeout)
    }

    /// Backoff before re-dispatching attempt `attempt` (1-based; attempt 1
    /// never waits, it is the initial dispatch).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.backoff_base * 2u32.pow(exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.stage_timeout, Duration::from_secs(30));
        assert_eq!(config.timeout_for(Stage::Write), Duration::from_secs(45));
        assert_eq!(config.timeout_for(Stage::Analyze), Duration::from_secs(30));
        assert_eq!(config.conflict_threshold, 2.0);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff_for(2), Duration::from_millis(250));
        assert_eq!(config.backoff_for(3), Duration::from_millis(500));
        assert_eq!(config.backoff_for(4), Duration::from_millis(1000));
    }
}
