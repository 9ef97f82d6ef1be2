//! Error types for tool invocation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of an invocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    PayloadTooLarge,
    ToolTimeout,
    ToolFailure,
    InternalError,
}

impl ErrorKind {
    /// Error code as exposed to API callers
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::ToolTimeout => "TOOL_TIMEOUT",
            ErrorKind::ToolFailure => "TOOL_FAILURE",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Invocation errors
///
/// `InvalidRequest` and `PayloadTooLarge` are raised before any process is
/// spawned. `ToolTimeout` and `ToolFailure` are raised after the scratch
/// directory has been released.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{tool} timed out after {timeout_ms}ms")]
    ToolTimeout { tool: &'static str, timeout_ms: u64 },

    #[error("{tool} exited with status {code:?}")]
    ToolFailure {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InvokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            InvokeError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            InvokeError::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            InvokeError::ToolFailure { .. } => ErrorKind::ToolFailure,
            InvokeError::Internal(_) | InvokeError::Io(_) => ErrorKind::InternalError,
        }
    }

    /// Whether the same request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvokeError::ToolTimeout { .. })
    }
}
