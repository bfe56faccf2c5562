use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::export::ExportReceipt;
use crate::store::WorkingDirectory;

/// One mailbox message on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct MessageJob {
    /// Same as the working directory id.
    pub id: String,
    /// Mailbox UID the job was created from.
    pub uid: u32,
    pub dir: WorkingDirectory,
    pub created_at: DateTime<Utc>,
}

impl MessageJob {
    pub fn new(uid: u32, dir: WorkingDirectory) -> Self {
        Self {
            id: dir.id().to_string(),
            uid,
            dir,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Exported and the working directory deleted.
    Exported(ExportReceipt),
    /// Classified as spam and the working directory deleted.
    Spam { keyword: String },
    /// Left on disk for inspection.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub dir: PathBuf,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn exported(job: &MessageJob, receipt: ExportReceipt) -> Self {
        Self::new(job, JobOutcome::Exported(receipt))
    }

    pub fn spam(job: &MessageJob, keyword: impl Into<String>) -> Self {
        Self::new(
            job,
            JobOutcome::Spam {
                keyword: keyword.into(),
            },
        )
    }

    pub fn failure(job: &MessageJob, reason: impl Into<String>) -> Self {
        Self::new(
            job,
            JobOutcome::Failed {
                reason: reason.into(),
            },
        )
    }

    fn new(job: &MessageJob, outcome: JobOutcome) -> Self {
        Self {
            job_id: job.id.clone(),
            dir: job.dir.path().to_path_buf(),
            outcome,
        }
    }

    /// The job reached a confirmed end state and its directory is gone.
    pub fn is_settled(&self) -> bool {
        !matches!(self.outcome, JobOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
