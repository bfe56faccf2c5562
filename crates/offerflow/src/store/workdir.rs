use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::normalizer::processed_file_name;
use crate::sanitize::split_extension;

pub const SUBJECT_FILE: &str = "email_subject.txt";
pub const BODY_FILE: &str = "email_body.txt";
pub const METADATA_FILE: &str = "metadata.json";

/// Zero-byte marker files. Existence is the only meaning; content is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Content and every attachment have been written.
    ProcessingComplete,
    /// The combined record has been written; the sole readiness signal for heavy work.
    AllPresent,
    Spam,
    /// The offer was exported.
    SheetsProcessed,
}

impl Flag {
    pub const fn file_name(self) -> &'static str {
        match self {
            Flag::ProcessingComplete => "processing_complete",
            Flag::AllPresent => "all_present",
            Flag::Spam => "spam",
            Flag::SheetsProcessed => "sheets_processed",
        }
    }
}

/// Per-message working directory, owned by exactly one job for its whole life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    id: String,
    path: PathBuf,
}

impl WorkingDirectory {
    /// Wraps an existing `email_<id>` directory. The id is taken from the directory name.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.strip_prefix("email_").unwrap_or(n).to_string())
            .unwrap_or_default();
        Self { id, path }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn combined_file_name(&self) -> String {
        format!("all_{}.json", self.id)
    }

    pub fn offer_file_name(&self) -> String {
        format!("processed_offer_{}.json", self.id)
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Writes `name` atomically: readers see either nothing or the complete file.
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, StoreError> {
        let target = self.file(name);
        let staging = self.file(&format!(".{}.tmp", name));

        tokio::fs::write(&staging, content)
            .await
            .map_err(|source| StoreError::WriteFile {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|source| StoreError::WriteFile {
                path: target.clone(),
                source,
            })?;

        debug!(file = name, bytes = content.len(), "wrote artifact");
        Ok(target)
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: self.file(name),
            source,
        })?;
        self.write_file(name, &bytes).await
    }

    pub async fn read_text(&self, name: &str) -> Result<String, StoreError> {
        let path = self.file(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::ReadFile { path, source })
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.file(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::ReadFile {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })
    }

    /// Saves a raw attachment without ever overwriting an earlier one.
    ///
    /// A second `offer.pdf` in the same message lands as `offer_2.pdf`. A name whose
    /// `<stem>_processed.json` already exists is skipped too, so `offer.docx` after a
    /// normalized `offer.pdf` becomes `offer_2.docx`. Returns the path actually written.
    pub async fn save_attachment(
        &self,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let (stem, ext) = split_extension(filename);

        for counter in 1..=1000 {
            let candidate = if counter == 1 {
                filename.to_string()
            } else {
                format!("{}_{}{}", stem, counter, ext)
            };
            let processed = self.file(&processed_file_name(&candidate));
            if tokio::fs::try_exists(&processed).await.unwrap_or(false) {
                continue;
            }
            let path = self.file(&candidate);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content)
                        .await
                        .map_err(|source| StoreError::WriteFile {
                            path: path.clone(),
                            source,
                        })?;
                    file.flush().await.map_err(|source| StoreError::WriteFile {
                        path: path.clone(),
                        source,
                    })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StoreError::WriteFile { path, source }),
            }
        }

        Err(StoreError::FileExists(self.file(filename)))
    }

    /// Existence test only; an unreadable directory counts as "not yet".
    pub async fn flag_exists(&self, flag: Flag) -> bool {
        tokio::fs::try_exists(self.file(flag.file_name()))
            .await
            .unwrap_or(false)
    }

    /// Idempotent: writing a flag that already exists succeeds and changes nothing.
    pub async fn write_flag(&self, flag: Flag) -> Result<(), StoreError> {
        let path = self.file(flag.file_name());
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map(|_| ())
            .map_err(|source| StoreError::WriteFile { path, source })
    }

    /// Polls until `flag` exists or `timeout` elapses.
    pub async fn wait_for_flag(
        &self,
        flag: Flag,
        poll: Duration,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let started = tokio::time::Instant::now();
        loop {
            if self.flag_exists(flag).await {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(StoreError::FlagTimeout {
                    flag: flag.file_name(),
                    path: self.path.clone(),
                    waited,
                });
            }
            tokio::time::sleep(poll.min(timeout - waited)).await;
        }
    }

    /// Deletes the directory and everything in it. Already gone is not an error.
    pub async fn remove(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::RemoveDirectory {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
