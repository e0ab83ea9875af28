//! Forwarding failures and how each one is reported to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::http::response::{Response, StatusCode};
use crate::jsonrpc::{ErrorEnvelope, INTERNAL_ERROR, SERVER_ERROR};

/// Why a forward attempt produced no backend reply.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// DNS failure, refused connection, or connect timeout.
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// The whole exchange overran the request deadline.
    #[error("Node unreachable: timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with something that is not a complete HTTP reply.
    #[error("Bad node response: {0}")]
    BadResponse(String),

    /// Fault inside the relay.
    #[error("Proxy error: {0}")]
    Internal(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Unreachable(_) | ForwardError::Timeout(_) => {
                StatusCode::ServiceUnavailable
            }
            ForwardError::BadResponse(_) => StatusCode::BadGateway,
            ForwardError::Internal(_) => StatusCode::InternalServerError,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ForwardError::Internal(_) => INTERNAL_ERROR,
            _ => SERVER_ERROR,
        }
    }

    /// JSON-RPC error response for this failure.
    pub fn to_response(&self) -> Response {
        let envelope = ErrorEnvelope::new(self.code(), self.to_string());
        Response::json_with_status(self.status(), envelope.to_bytes())
    }
}
