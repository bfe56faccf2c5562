use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::email::EmailError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum OfferflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Mailbox error: {0}")]
    Email(#[from] EmailError),

    #[error("Structured extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Unsupported attachment format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read attachment '{path}': {source}")]
    ReadAttachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write normalized output '{path}': {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process Word document: {0}")]
    WordProcessing(String),

    #[error("Failed to process spreadsheet: {0}")]
    SpreadsheetProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove directory '{path}': {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Flag '{flag}' did not appear in '{path}' within {waited:?}")]
    FlagTimeout {
        flag: &'static str,
        path: PathBuf,
        waited: Duration,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Job panicked: {0}")]
    JobPanicked(String),
}

/// Failure of the structured-extraction collaborator.
///
/// The heavy-stage runner retries only errors for which [`ExtractionError::is_retryable`]
/// returns true; everything else ends the job on the first occurrence.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction request failed: {0}")]
    Transport(String),

    #[error("Extraction request timed out")]
    Timeout,

    #[error("Extraction service is rate limiting requests")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Extraction service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Extraction service rejected the credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Extraction response did not contain a usable JSON object: {0}")]
    InvalidJson(String),

    #[error("Unexpected extraction response: {0}")]
    InvalidResponse(String),

    #[error("Extraction credentials unavailable: {0}")]
    Credentials(String),
}

impl ExtractionError {
    /// Model output is nondeterministic, so unparsable JSON is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited { .. } | Self::InvalidJson(_) => {
                true
            }
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized { .. } | Self::InvalidResponse(_) | Self::Credentials(_) => false,
        }
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Failure of the export collaborator.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export request failed: {0}")]
    Transport(String),

    #[error("Spreadsheet API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Template sheet '{0}' not found in spreadsheet")]
    TemplateNotFound(String),

    #[error("Unexpected spreadsheet API response: {0}")]
    InvalidResponse(String),

    #[error("Export credentials unavailable: {0}")]
    Credentials(String),
}

impl ExportError {
    /// Only used to annotate the failure log; the runner never re-exports on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::TemplateNotFound(_) | Self::InvalidResponse(_) | Self::Credentials(_) => false,
        }
    }
}

/// A job state machine step that is not allowed from the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal job state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

pub type Result<T> = std::result::Result<T, OfferflowError>;
