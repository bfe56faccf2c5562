//! Per-message pipeline: intake in the [`Orchestrator`], heavy work in the
//! [`HeavyStageRunner`], coordinated through flag files in the working directory.

pub mod combine;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod state;

pub use combine::{AttachmentStatus, CombinedRecord, ContentSummary, Metadata};
pub use error::{IntakeError, PipelineError};
pub use job::{JobOutcome, JobResult, MessageJob};
pub use orchestrator::Orchestrator;
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Retryable};
pub use runner::{HeavyStageRunner, StageTimings};
pub use state::JobState;
