use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::store::workdir::WorkingDirectory;

const WORKDIR_PREFIX: &str = "email_";

/// The on-disk data tree:
///
/// ```text
/// <root>/attachments/
/// <root>/processed/
/// <root>/processed/combined/email_<id>/
/// ```
#[derive(Debug)]
pub struct DataLayout {
    root: PathBuf,
    last_id: AtomicU64,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_id: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join("attachments")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn combined_dir(&self) -> PathBuf {
        self.processed_dir().join("combined")
    }

    /// Creates every directory of the layout that is missing.
    pub async fn ensure(&self) -> Result<(), StoreError> {
        for dir in [self.attachments_dir(), self.combined_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::CreateDirectory { path: dir, source })?;
        }
        Ok(())
    }

    /// Millisecond timestamp, bumped past the previously issued id so two messages
    /// arriving in the same millisecond still get distinct directories.
    fn next_id(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut current = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last_id.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Allocates a fresh working directory.
    ///
    /// The directory is created with `create_dir` (not `create_dir_all`), so an id already
    /// used by another process is detected and skipped instead of being shared.
    pub async fn allocate(&self) -> Result<WorkingDirectory, StoreError> {
        let parent = self.combined_dir();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|source| StoreError::CreateDirectory {
                path: parent.clone(),
                source,
            })?;

        loop {
            let path = parent.join(format!("{}{}", WORKDIR_PREFIX, self.next_id()));
            match tokio::fs::create_dir(&path).await {
                Ok(()) => return Ok(WorkingDirectory::open(path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StoreError::CreateDirectory { path, source }),
            }
        }
    }

    /// Working directories still on disk. After a run these are the jobs that need
    /// manual attention.
    pub fn pending(&self) -> Result<Vec<WorkingDirectory>, StoreError> {
        let combined = self.combined_dir();
        if !combined.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in WalkDir::new(&combined).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|source| StoreError::ListDirectory {
                path: combined.clone(),
                source,
            })?;
            let is_workdir = entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(WORKDIR_PREFIX));
            if is_workdir {
                dirs.push(WorkingDirectory::open(entry.into_path()));
            }
        }
        Ok(dirs)
    }

    /// Removes every working directory and raw attachment, then recreates the layout.
    /// Returns the number of working directories removed.
    pub async fn reset(&self) -> Result<usize, StoreError> {
        let pending = self.pending()?;
        for dir in &pending {
            dir.remove().await?;
        }

        let attachments = self.attachments_dir();
        match tokio::fs::remove_dir_all(&attachments).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                warn!(error = %source, "could not clear attachments directory");
                return Err(StoreError::RemoveDirectory {
                    path: attachments,
                    source,
                });
            }
        }

        self.ensure().await?;
        info!(removed = pending.len(), "data directories reset");
        Ok(pending.len())
    }
}
