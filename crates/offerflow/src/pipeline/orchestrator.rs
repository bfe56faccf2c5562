//! Intake: one raw mailbox message in, one fully written working directory out.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::email::{
    AttachmentPart, AttachmentPolicy, Mailbox, MessageContentExtractor, MessageHandler,
    RawMessage,
};
use crate::normalizer::AttachmentNormalizer;
use crate::pipeline::combine::{AttachmentStatus, CombinedRecord, ContentSummary, Metadata};
use crate::pipeline::error::IntakeError;
use crate::pipeline::job::{JobResult, MessageJob};
use crate::pipeline::runner::HeavyStageRunner;
use crate::sanitize::{redact_address, redact_path};
use crate::store::{DataLayout, Flag, WorkingDirectory, BODY_FILE, METADATA_FILE, SUBJECT_FILE};
use crate::worker::WorkerPool;

/// Written when the message bytes cannot be parsed, so the empty job is still inspectable.
pub const RAW_MESSAGE_FILE: &str = "message.eml";

pub struct Orchestrator {
    layout: Arc<DataLayout>,
    mailbox: Arc<dyn Mailbox>,
    content: MessageContentExtractor,
    policy: AttachmentPolicy,
    normalizer: Arc<AttachmentNormalizer>,
    pool: Arc<WorkerPool<JobResult>>,
    runner: Arc<HeavyStageRunner>,
}

impl Orchestrator {
    pub fn new(
        layout: Arc<DataLayout>,
        mailbox: Arc<dyn Mailbox>,
        normalizer: Arc<AttachmentNormalizer>,
        pool: Arc<WorkerPool<JobResult>>,
        runner: Arc<HeavyStageRunner>,
    ) -> Self {
        Self {
            layout,
            mailbox,
            content: MessageContentExtractor,
            policy: AttachmentPolicy::default(),
            normalizer,
            pool,
            runner,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool<JobResult>> {
        &self.pool
    }

    /// Writes content, attachments, manifest and combined record, committing
    /// `processing_complete` and then `all_present`.
    ///
    /// No flag is written unless the content was extracted. On error the directory
    /// (if allocated) stays behind.
    pub async fn intake(&self, message: &RawMessage) -> Result<MessageJob, IntakeError> {
        let dir = self.layout.allocate().await?;
        debug!(dir = %redact_path(dir.path()), "Working directory allocated");

        let parsed = match self.content.extract(&message.bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                if let Err(write_err) = dir.write_file(RAW_MESSAGE_FILE, &message.bytes).await {
                    warn!(error = %write_err, "Could not keep raw message for inspection");
                }
                return Err(e.into());
            }
        };
        if let Some(from) = parsed.from.as_deref() {
            debug!(from = %redact_address(from), "Message parsed");
        }

        let content = parsed.content;
        dir.write_file(SUBJECT_FILE, content.subject.as_bytes()).await?;
        dir.write_file(BODY_FILE, content.body.as_bytes()).await?;

        let mut attachments = Vec::new();
        for part in parsed.attachments {
            if !self.policy.is_allowed(&part.filename, &part.mime_type) {
                warn!(
                    file = %part.filename,
                    mime = %part.mime_type,
                    "Skipping attachment type that is not allowed"
                );
                continue;
            }
            attachments.push(self.store_attachment(&dir, part).await);
        }

        let metadata = Metadata {
            email_id: dir.id().to_string(),
            content: ContentSummary {
                subject: content.subject,
                body: content.body,
            },
            attachments,
        };
        dir.write_json(METADATA_FILE, &metadata).await?;
        dir.write_flag(Flag::ProcessingComplete).await?;

        CombinedRecord::write(&dir).await?;
        dir.write_flag(Flag::AllPresent).await?;

        let failed = metadata.attachments.iter().filter(|a| !a.processed).count();
        info!(
            email_id = %dir.id(),
            attachments = metadata.attachments.len(),
            failed_attachments = failed,
            "Message ready for heavy processing"
        );
        Ok(MessageJob::new(message.uid, dir))
    }

    /// Saves one allowed attachment and normalizes it. Failures end up in the manifest.
    async fn store_attachment(&self, dir: &WorkingDirectory, part: AttachmentPart) -> AttachmentStatus {
        let extension = part.extension();
        let path = match dir.save_attachment(&part.filename, &part.content).await {
            Ok(path) => path,
            Err(e) => {
                warn!(file = %part.filename, error = %e, "Could not save attachment");
                return AttachmentStatus {
                    filename: part.filename,
                    processed: false,
                    error: Some(e.to_string()),
                };
            }
        };
        let filename = saved_name(&path, &part.filename);

        let normalizer = Arc::clone(&self.normalizer);
        let outcome = tokio::task::spawn_blocking(move || normalizer.normalize(&path, &extension))
            .instrument(info_span!("normalize_attachment", file = %filename))
            .await;

        match outcome {
            Ok(Ok(_)) => AttachmentStatus {
                filename,
                processed: true,
                error: None,
            },
            Ok(Err(e)) => {
                warn!(file = %filename, error = %e, "Attachment could not be normalized");
                AttachmentStatus {
                    filename,
                    processed: false,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                error!(file = %filename, error = %e, "Attachment extractor crashed");
                AttachmentStatus {
                    filename,
                    processed: false,
                    error: Some(format!("extractor crashed: {}", e)),
                }
            }
        }
    }
}

fn saved_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[async_trait]
impl MessageHandler for Orchestrator {
    /// Intake, mark seen, dispatch. Returns without waiting for a worker slot.
    /// Every error is logged here and goes no further.
    async fn handle(&self, message: RawMessage) {
        let uid = message.uid;
        async {
            let job = match self.intake(&message).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "Intake failed; message left unseen");
                    return;
                }
            };

            if let Err(e) = self.mailbox.mark_seen(uid).await {
                warn!(error = %e, "Could not mark message as seen");
            }

            let runner = Arc::clone(&self.runner);
            let label = job.id.clone();
            self.pool.dispatch(label, async move { runner.run(job).await });
        }
        .instrument(info_span!("orchestrate", uid))
        .await
    }
}
