use thiserror::Error;

use crate::email::EmailError;
use crate::error::{ExportError, ExtractionError, StoreError, TransitionError};
use crate::pipeline::retry::RetryError;

/// Why a heavy-stage run ended without a confirmed outcome. The working directory is kept.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Working directory step failed: {0}")]
    Store(#[from] StoreError),

    #[error("Structured extraction {0}")]
    Extraction(#[from] RetryError<ExtractionError>),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Export flag could not be confirmed: {0}")]
    Verification(StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Why intake stopped before the message reached the worker pool.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Message content could not be extracted: {0}")]
    Content(#[from] EmailError),

    #[error("Working directory step failed: {0}")]
    Store(#[from] StoreError),
}
