use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Conflict,
    NotFound,
    Internal,
    Unexpected,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorCode::BadRequest,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            500..=599 => ErrorCode::Internal,
            _ => ErrorCode::Unexpected,
        }
    }
}

/// Error document returned by the service alongside a non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn malformed(status: Option<u16>, detail: impl std::fmt::Display) -> Self {
        Self {
            code: ErrorCode::Unexpected,
            status,
            message: format!("malformed response: {detail}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
