//! Email-to-spreadsheet pipeline for supplier offers.
//!
//! Each unseen mailbox message gets its own working directory. The
//! [`pipeline::Orchestrator`] writes content, attachments and a combined record there,
//! and a bounded [`worker::WorkerPool`] runs the structured extraction and export.

pub mod config;
pub mod email;
pub mod error;
pub mod export;
pub mod normalizer;
pub mod offer;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod worker;

pub use config::{load_config, Config};
pub use error::{
    ConfigError, ExportError, ExtractionError, NormalizeError, OfferflowError, Result, StoreError,
    WorkerError,
};
pub use pipeline::{HeavyStageRunner, JobOutcome, JobResult, JobState, Orchestrator};
pub use secrets::{SecretError, SecretSource};
pub use store::{DataLayout, Flag, WorkingDirectory};
pub use worker::WorkerPool;
