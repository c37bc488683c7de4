use thiserror::Error;

use crate::ids::SpanId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpanlaneError {
    #[error("duplicate span: span {id} already exists")]
    DuplicateSpan { id: SpanId },

    #[error("invalid state for span {id}: {reason}")]
    InvalidState { id: SpanId, reason: String },

    #[error("unknown span: {id}")]
    UnknownSpan { id: SpanId },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("ingest error: {0}")]
    Ingest(String),
}

impl SpanlaneError {
    pub fn invalid_state(id: SpanId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            id,
            reason: reason.into(),
        }
    }

    /// True for errors that reject a single event and leave the model untouched.
    pub fn is_event_rejection(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSpan { .. } | Self::InvalidState { .. } | Self::UnknownSpan { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpanlaneError>;
