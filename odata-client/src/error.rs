//! Batch client error types.

use odata_core::BatchError;
use std::time::Duration;
use thiserror::Error;

/// Result type for batch client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Batch client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing or parsing of the batch payload failed.
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Service root or batch endpoint is not a usable URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Header name or value cannot be sent.
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    /// Outer batch response carried a status other than 200 or 202.
    #[error("Unexpected batch response status: {status} - {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Outer batch response is not `multipart/mixed` with a boundary.
    #[error("Batch response has no multipart boundary (Content-Type: {0})")]
    MissingBoundary(String),

    /// Request body pipe was closed before the batch was complete.
    #[error("Request body stream closed")]
    StreamClosed,

    /// Background request task failed.
    #[error("Batch request task failed: {0}")]
    Task(String),

    /// Interceptor error.
    #[error("Interceptor error: {0}")]
    Interceptor(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Check if the whole batch may be resent.
    ///
    /// Wire-format errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_)) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Get the HTTP status code of the outer response, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The wire-format error, if this is one.
    pub fn as_batch_error(&self) -> Option<&BatchError> {
        match self {
            Self::Batch(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            ClientError::UnexpectedStatus {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ClientError::UnexpectedStatus {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!ClientError::Batch(BatchError::EmptyChangeset).is_retryable());
    }

    #[test]
    fn test_status_code() {
        let err = ClientError::UnexpectedStatus {
            status: 404,
            message: "Not Found".into(),
        };
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(ClientError::StreamClosed.status_code(), None);
    }

    #[test]
    fn test_batch_error_passthrough() {
        let err: ClientError = BatchError::UseAfterClose.into();
        assert!(matches!(err.as_batch_error(), Some(BatchError::UseAfterClose)));
        assert_eq!(err.to_string(), "Batch error: Batch resource used after close");
    }
}
