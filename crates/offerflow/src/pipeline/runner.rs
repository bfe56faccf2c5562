//! The heavy stage: everything that happens to a message after intake, inside a pool slot.
//!
//! Every exit either deletes the working directory (exported, or spam) or leaves it on
//! disk with an error logged. A directory that survives a run needs manual attention.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::export::{ExportReceipt, OfferExporter};
use crate::offer::{OfferExtractor, OfferRecord, SpamClassifier};
use crate::pipeline::combine::CombinedRecord;
use crate::pipeline::error::PipelineError;
use crate::pipeline::job::{JobResult, MessageJob};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::pipeline::state::JobState;
use crate::sanitize::redact_path;
use crate::store::Flag;

/// Flag polling budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimings {
    pub flag_poll: Duration,
    /// Applies to each of `processing_complete` and `all_present`.
    pub flag_timeout: Duration,
    pub verify_poll: Duration,
    pub verify_attempts: u32,
}

impl Default for StageTimings {
    fn default() -> Self {
        Self {
            flag_poll: Duration::from_millis(500),
            flag_timeout: Duration::from_secs(60),
            verify_poll: Duration::from_millis(200),
            verify_attempts: 5,
        }
    }
}

enum Finished {
    Spam(String),
    Exported(ExportReceipt),
}

pub struct HeavyStageRunner {
    spam: SpamClassifier,
    extractor: Arc<dyn OfferExtractor>,
    exporter: Arc<dyn OfferExporter>,
    retry: RetryPolicy,
    timings: StageTimings,
}

impl HeavyStageRunner {
    pub fn new(
        spam: SpamClassifier,
        extractor: Arc<dyn OfferExtractor>,
        exporter: Arc<dyn OfferExporter>,
    ) -> Self {
        Self {
            spam,
            extractor,
            exporter,
            retry: RetryPolicy::default(),
            timings: StageTimings::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timings(mut self, timings: StageTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Drives one job to a terminal state. Never fails; the outcome is in the result.
    pub async fn run(&self, job: MessageJob) -> JobResult {
        let span = info_span!("heavy_stage", job_id = %job.id, uid = job.uid);
        async {
            let mut state = JobState::Intake;
            match self.drive(&job, &mut state).await {
                Ok(Finished::Exported(receipt)) => {
                    info!(sheet = %receipt.sheet_title, "Offer exported, working directory removed");
                    JobResult::exported(&job, receipt)
                }
                Ok(Finished::Spam(keyword)) => {
                    info!(keyword = %keyword, "Spam discarded, working directory removed");
                    JobResult::spam(&job, keyword)
                }
                Err(e) => {
                    let reason = e.to_string();
                    let stage = state.name();
                    match state.fail(reason.clone()) {
                        Ok(failed) => debug!(state = %failed, "Job failed"),
                        Err(t) => warn!(error = %t, "Job failed after reaching a terminal state"),
                    }
                    error!(
                        stage,
                        dir = %redact_path(job.dir.path()),
                        error = %reason,
                        "Job stopped; working directory kept for inspection"
                    );
                    JobResult::failure(&job, reason)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, job: &MessageJob, state: &mut JobState) -> Result<Finished, PipelineError> {
        let dir = &job.dir;
        let t = self.timings;

        dir.wait_for_flag(Flag::ProcessingComplete, t.flag_poll, t.flag_timeout)
            .instrument(info_span!("wait_content"))
            .await?;
        advance(state, JobState::content_ready)?;

        dir.wait_for_flag(Flag::AllPresent, t.flag_poll, t.flag_timeout)
            .instrument(info_span!("wait_combined"))
            .await?;
        advance(state, JobState::combined)?;

        let record = CombinedRecord::read(dir).await?;
        advance(state, JobState::classifying)?;

        if let Some(keyword) = self.spam.matched_keyword(&record.subject, &record.body) {
            let keyword = keyword.to_string();
            async {
                dir.write_flag(Flag::Spam).await?;
                dir.remove().await
            }
            .instrument(info_span!("discard_spam", keyword = %keyword))
            .await?;
            advance(state, JobState::done)?;
            return Ok(Finished::Spam(keyword));
        }

        let offer = self
            .extract(&record)
            .instrument(info_span!("extract"))
            .await?;
        advance(state, JobState::exporting)?;

        let receipt = async {
            dir.write_json(&dir.offer_file_name(), &offer).await?;
            let receipt = self.exporter.export(&offer).await.map_err(|e| {
                warn!(retryable = e.is_retryable(), "Export collaborator failed");
                PipelineError::Export(e)
            })?;
            dir.write_flag(Flag::SheetsProcessed).await?;
            Ok::<_, PipelineError>(receipt)
        }
        .instrument(info_span!("export"))
        .await?;

        let verify_budget = t.verify_poll.saturating_mul(t.verify_attempts);
        dir.wait_for_flag(Flag::SheetsProcessed, t.verify_poll, verify_budget)
            .await
            .map_err(PipelineError::Verification)?;
        dir.remove().await?;
        advance(state, JobState::done)?;

        Ok(Finished::Exported(receipt))
    }

    async fn extract(&self, record: &CombinedRecord) -> Result<OfferRecord, PipelineError> {
        let (offer, attempts) = retry_with_backoff(&self.retry, |attempt| {
            debug!(attempt, "Requesting structured extraction");
            self.extractor.summarize(record)
        })
        .await?;
        let offer = offer.clean();
        info!(
            attempts,
            products = offer.products.len(),
            supplier = offer.supplier_name().unwrap_or("unknown"),
            "Structured extraction finished"
        );
        Ok(offer)
    }
}

fn advance(
    state: &mut JobState,
    step: fn(JobState) -> Result<JobState, crate::error::TransitionError>,
) -> Result<(), PipelineError> {
    *state = step(state.clone())?;
    Ok(())
}
