//! Error types for the conversion server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tool_invoker::{ErrorKind, InvokeError};

/// Server error types
///
/// Messages placed in responses never include scratch paths, tool stderr or
/// the chain of an internal error; those are logged instead.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Tool timeout after {0}ms")]
    ToolTimeout(u64),

    #[error("{0} failed to process the document")]
    ToolFailure(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
    retryable: bool,
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServerError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ServerError::ToolTimeout(_) => ErrorKind::ToolTimeout,
            ServerError::ToolFailure(_) => ErrorKind::ToolFailure,
            ServerError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::ToolTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::ToolFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller
    pub fn public_message(&self) -> String {
        match self {
            ServerError::InvalidRequest(msg) => msg.clone(),
            ServerError::PayloadTooLarge { limit } => {
                format!("Document exceeds the maximum size of {} bytes", limit)
            }
            ServerError::ToolTimeout(ms) => {
                format!("Conversion did not finish within {}ms, try again later", ms)
            }
            ServerError::ToolFailure(_) => {
                "The document could not be processed; it may be damaged or encrypted".to_string()
            }
            ServerError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Internal(detail) = &self {
            tracing::error!("Internal error: {}", detail);
        }

        let body = ErrorResponse {
            success: false,
            error: self.public_message(),
            code: self.kind().code(),
            retryable: matches!(self, ServerError::ToolTimeout(_)),
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<InvokeError> for ServerError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::InvalidRequest(msg) => ServerError::InvalidRequest(msg),
            InvokeError::PayloadTooLarge { limit, .. } => ServerError::PayloadTooLarge { limit },
            InvokeError::ToolTimeout { timeout_ms, .. } => ServerError::ToolTimeout(timeout_ms),
            InvokeError::ToolFailure { tool, code, stderr } => {
                tracing::warn!("{} failed with {:?}: {}", tool, code, stderr);
                ServerError::ToolFailure(tool)
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}
