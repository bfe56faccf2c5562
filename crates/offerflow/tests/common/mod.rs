//! Shared test utilities for offerflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temporary data directory
//! - Builders for raw MIME messages and offer records
//! - Spy collaborators standing in for the mailbox, extraction and export services

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
