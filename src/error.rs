//! Error taxonomy for the tracking core.
//!
//! Infrastructure code (SQLite, settings, CLI) works in `anyhow`; anything that reaches the
//! session state machine or the finalizer is narrowed to [`TrackingError`] so callers can match
//! on the failure kind.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Transition names reported by [`TrackingError::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
    Cancel,
    Finalize,
    StartSegment,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::Cancel => "cancel",
            Transition::Finalize => "finalize",
            Transition::StartSegment => "startSegment",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackingError {
    /// A transition was attempted from a state that does not allow it. The session is left
    /// exactly as it was before the call.
    #[error("cannot {transition} while {state}")]
    InvalidState {
        transition: Transition,
        state: &'static str,
    },

    #[error("session has already been finalized")]
    AlreadyFinalized,

    /// The store rejected an insert or delete. The stopped session (or the record being deleted)
    /// is retained so the caller may retry.
    #[error("persistence error: {message}")]
    Persistence { message: String },
}

impl TrackingError {
    pub(crate) fn invalid(transition: Transition, state: &'static str) -> Self {
        TrackingError::InvalidState { transition, state }
    }

    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        TrackingError::Persistence {
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
