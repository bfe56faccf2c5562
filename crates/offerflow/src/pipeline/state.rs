//! In-memory lifecycle of one message job.
//!
//! The flag files in the working directory stay the durable record; [`JobState`] is what a
//! single process knows about the job while it drives it. Every step goes through a
//! transition function so an out-of-order step is an error rather than a silent skip.

use std::fmt;

use crate::error::TransitionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Working directory allocated, inputs being written.
    Intake,
    /// `processing_complete` observed.
    ContentReady,
    /// `all_present` observed.
    Combined,
    /// Spam check and structured extraction.
    Classifying,
    Exporting,
    Done,
    Failed(String),
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::ContentReady => "content_ready",
            Self::Combined => "combined",
            Self::Classifying => "classifying",
            Self::Exporting => "exporting",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    pub fn content_ready(self) -> Result<Self, TransitionError> {
        match self {
            Self::Intake => Ok(Self::ContentReady),
            other => Err(other.rejected("content_ready")),
        }
    }

    pub fn combined(self) -> Result<Self, TransitionError> {
        match self {
            Self::ContentReady => Ok(Self::Combined),
            other => Err(other.rejected("combined")),
        }
    }

    pub fn classifying(self) -> Result<Self, TransitionError> {
        match self {
            Self::Combined => Ok(Self::Classifying),
            other => Err(other.rejected("classifying")),
        }
    }

    pub fn exporting(self) -> Result<Self, TransitionError> {
        match self {
            Self::Classifying => Ok(Self::Exporting),
            other => Err(other.rejected("exporting")),
        }
    }

    /// Spam ends the job straight from `Classifying`; everything else finishes after export.
    pub fn done(self) -> Result<Self, TransitionError> {
        match self {
            Self::Classifying | Self::Exporting => Ok(Self::Done),
            other => Err(other.rejected("done")),
        }
    }

    /// Any non-terminal state may fail.
    pub fn fail(self, reason: impl Into<String>) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(self.rejected("failed"));
        }
        Ok(Self::Failed(reason.into()))
    }

    fn rejected(&self, to: &'static str) -> TransitionError {
        TransitionError {
            from: self.name(),
            to,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}
