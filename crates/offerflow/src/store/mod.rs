//! Durable per-message working directories.
//!
//! Stages never share memory: the orchestrator and the heavy-stage runner communicate
//! only through files and zero-byte flags inside a job's working directory.

pub mod layout;
pub mod workdir;

pub use layout::DataLayout;
pub use workdir::{Flag, WorkingDirectory, BODY_FILE, METADATA_FILE, SUBJECT_FILE};
