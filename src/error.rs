//! Service error type shared across the request path.
//!
//! Every failure inside a request unwinds to the HTTP boundary as a
//! `ReaderError`, where it is rendered either as a JSON envelope
//! (non-streaming) or as a final `error` frame on the event stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Error kinds visible to clients
#[derive(Debug, Clone)]
pub enum ReaderError {
    /// Bad URL, overlong prompt, out-of-range turn count
    InvalidArgument(String),
    /// Missing or rejected credentials
    Unauthenticated(String),
    /// Account balance exhausted
    InsufficientBalance(String),
    /// Caller exceeded its rate allowance
    RateLimited(String),
    /// Navigation timeout, crashed context, relaunch failure
    UpstreamBrowserFailure(String),
    /// Model stream aborted or provider rejected the request
    UpstreamModelFailure(String),
    /// Object storage or record store failure
    StorageFailure(String),
    /// Everything else
    Internal(String),
}

impl ReaderError {
    /// Stable machine-readable code for the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::UpstreamBrowserFailure(_) => "UPSTREAM_BROWSER_FAILURE",
            Self::UpstreamModelFailure(_) => "UPSTREAM_MODEL_FAILURE",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientBalance(_) => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamBrowserFailure(_) | Self::UpstreamModelFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::StorageFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::Unauthenticated(m)
            | Self::InsufficientBalance(m)
            | Self::RateLimited(m)
            | Self::UpstreamBrowserFailure(m)
            | Self::UpstreamModelFailure(m)
            | Self::StorageFailure(m)
            | Self::Internal(m) => m,
        }
    }
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ReaderError {}

impl From<anyhow::Error> for ReaderError {
    fn from(err: anyhow::Error) -> Self {
        // Use {:#} to preserve the full error chain with context
        Self::Internal(format!("{err:#}"))
    }
}

/// Convenience alias for Result with `ReaderError`
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Non-streaming error envelope: `{ code, message }`
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for ReaderError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            code: self.code(),
            message: self.message(),
        };
        (self.status(), axum::Json(&envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ReaderError::InvalidArgument("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ReaderError::UpstreamBrowserFailure("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ReaderError::RateLimited("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn anyhow_conversion_preserves_chain() {
        let inner = anyhow::anyhow!("root cause");
        let wrapped = inner.context("while doing something");
        let err: ReaderError = wrapped.into();
        let text = err.to_string();
        assert!(text.contains("while doing something"));
        assert!(text.contains("root cause"));
    }
}
