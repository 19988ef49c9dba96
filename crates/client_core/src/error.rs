use shared::error::ApiError;
use thiserror::Error;

use crate::{dispatcher::CommandKind, log::Severity};

/// Failures surfaced to the activity log. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("another operation is already in progress")]
    AlreadyRunning,
    #[error("a {0} request is still in flight")]
    CommandPending(CommandKind),
    #[error("flashing service unreachable: {0}")]
    Unreachable(String),
    #[error("flashing service rejected the request: {0}")]
    RemoteRejected(#[from] ApiError),
    #[error("operation ended without a completion report; outcome unknown")]
    UnknownOutcome,
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn severity(&self) -> Severity {
        match self {
            ClientError::AlreadyRunning
            | ClientError::CommandPending(_)
            | ClientError::UnknownOutcome => Severity::Warning,
            ClientError::Validation(_)
            | ClientError::Unreachable(_)
            | ClientError::RemoteRejected(_) => Severity::Error,
        }
    }

    /// Whether the failure means the request never produced a running operation.
    pub fn voids_dispatch(&self) -> bool {
        matches!(
            self,
            ClientError::Unreachable(_) | ClientError::RemoteRejected(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::malformed(err.status().map(|s| s.as_u16()), &err).into()
        } else {
            ClientError::Unreachable(err.to_string())
        }
    }
}
