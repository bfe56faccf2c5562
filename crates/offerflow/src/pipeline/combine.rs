//! The per-message manifest and the combined record built from a working directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::normalizer::PROCESSED_SUFFIX;
use crate::sanitize::redact_path;
use crate::store::{WorkingDirectory, BODY_FILE, METADATA_FILE, SUBJECT_FILE};

/// `metadata.json`: what the orchestrator wrote and how each attachment fared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub email_id: String,
    pub content: ContentSummary,
    pub attachments: Vec<AttachmentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentStatus {
    pub filename: String,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `all_<id>.json`: the single document handed to structured extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedRecord {
    pub email_id: String,
    pub subject: String,
    pub body: String,
    pub metadata: Metadata,
    /// Contents of every `*_processed.json`, in filename order.
    pub attachments: Vec<Value>,
}

impl CombinedRecord {
    /// Reads the manifest, content files and processed attachments of `dir`.
    ///
    /// A processed file that cannot be parsed is skipped with a warning; missing
    /// content or manifest files are errors.
    pub async fn collect(dir: &WorkingDirectory) -> Result<Self, StoreError> {
        let subject = dir.read_text(SUBJECT_FILE).await?;
        let body = dir.read_text(BODY_FILE).await?;
        let metadata: Metadata = dir.read_json(METADATA_FILE).await?;

        let mut attachments = Vec::new();
        for name in processed_files(dir) {
            match dir.read_json::<Value>(&name).await {
                Ok(value) => attachments.push(value),
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable processed attachment"),
            }
        }

        debug!(
            dir = %redact_path(dir.path()),
            attachments = attachments.len(),
            "collected combined record"
        );
        Ok(Self {
            email_id: dir.id().to_string(),
            subject,
            body,
            metadata,
            attachments,
        })
    }

    /// Collects and writes `all_<id>.json`.
    pub async fn write(dir: &WorkingDirectory) -> Result<Self, StoreError> {
        let record = Self::collect(dir).await?;
        dir.write_json(&dir.combined_file_name(), &record).await?;
        Ok(record)
    }

    pub async fn read(dir: &WorkingDirectory) -> Result<Self, StoreError> {
        dir.read_json(&dir.combined_file_name()).await
    }

    /// Attachment filenames listed in the manifest.
    pub fn attachment_names(&self) -> Vec<&str> {
        self.metadata
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect()
    }
}

fn processed_files(dir: &WorkingDirectory) -> Vec<String> {
    let pattern = format!(
        "{}/*{}",
        glob::Pattern::escape(&dir.path().to_string_lossy()),
        PROCESSED_SUFFIX
    );
    let mut names: Vec<String> = match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_string())
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "invalid processed-file pattern");
            Vec::new()
        }
    };
    names.sort();
    names
}
