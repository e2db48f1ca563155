use std::fmt;

use shared::{error::ApiError, protocol::RequestError};
use thiserror::Error;

/// Where the session client currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    SessionActive,
    OperationInFlight,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::NoSession => "without a session",
            SessionPhase::SessionActive => "idle",
            SessionPhase::OperationInFlight => "busy with another request",
        })
    }
}

/// Failure reported by a dataset service capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// The service understood the request and refused it.
    #[error("{}", .0.message)]
    Rejected(ApiError),
    /// No usable response: connection failure, timeout, or an error body that
    /// could not be read.
    #[error("{0}")]
    Transport(String),
    /// A success response whose payload could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid upload result: {0}")]
    InvalidUploadResult(String),
    #[error("no active session ({0})")]
    NoActiveSession(SessionPhase),
    #[error("invalid operation request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("upload failed: {}", .0.message)]
    Upload(ApiError),
    #[error("operation failed: {}", .0.message)]
    Operation(ApiError),
    #[error("reset failed: {}", .0.message)]
    Reset(ApiError),
    #[error("export failed: {}", .0.message)]
    ExportFailed(ApiError),
    #[error("network error: {0}")]
    Transport(String),
    #[error("operation result does not continue the session history; reset to resynchronize")]
    HistoryMismatch,
    #[error("session was replaced while the request was in flight")]
    Superseded,
}

impl SessionError {
    /// Caller-contract violations that never reached the service.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            SessionError::NoActiveSession(_) | SessionError::InvalidRequest(_)
        )
    }

    /// Text suitable for an error notice.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NoActiveSession(SessionPhase::OperationInFlight) => {
                "Another request is still running. Please wait for it to finish.".to_string()
            }
            SessionError::NoActiveSession(_) => {
                "No dataset loaded. Please upload a CSV file first.".to_string()
            }
            SessionError::Upload(e)
            | SessionError::Operation(e)
            | SessionError::Reset(e)
            | SessionError::ExportFailed(e) => e.message.clone(),
            SessionError::Transport(message) => format!("Network error: {message}"),
            other => other.to_string(),
        }
    }
}
