//! # GrantForge
//!
//! An orchestration core that turns a research paper into a grant-proposal
//! draft by routing work through four stateful AI workers: ANALYZE, then
//! EVALUATE and INNOVATE concurrently, then WRITE.
//!
//! A single supervisor loop owns every run: it dispatches stage tasks over
//! typed message channels, absorbs transient failures with bounded
//! exponential-backoff retries, reconciles disagreeing assessments through
//! an explicit conflict-resolution policy, and assembles the final proposal
//! artifact. Semantic reasoning is delegated behind the [`llm`] completion
//! boundary, so the core runs identically against a live backend or the
//! deterministic scripted model used in tests.

pub mod artifact;
pub mod config;
pub mod conflict;
pub mod error;
pub mod export;
pub mod extract;
pub mod llm;
pub mod message;
pub mod outputs;
pub mod run;
pub mod stage;
pub mod supervisor;
pub mod task;
pub mod worker;
pub mod workers;

pub use artifact::ProposalArtifact;
pub use config::PipelineConfig;
pub use extract::{DocumentExtractor, PlainTextExtractor};
pub use llm::{CompletionModel, ScriptedModel};
pub use run::{RunSnapshot, RunStatus};
pub use stage::Stage;
pub use supervisor::{start, PipelineModels, SupervisorHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
