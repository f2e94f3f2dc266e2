//! Batch engine error types.
//!
//! Wire-format errors carry the 1-based line number of the offending line so
//! that a malformed payload can be diagnosed without re-scanning it.

use thiserror::Error;

/// Result type for batch engine operations.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors raised while framing or parsing a batch payload.
#[derive(Debug, Error)]
pub enum BatchError {
    // Structural framing
    /// Boundary token is syntactically invalid or collides with a payload.
    #[error("Invalid boundary '{boundary}': {reason}")]
    InvalidBoundary {
        /// The rejected token.
        boundary: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Stream ended before the opening `--boundary` delimiter.
    #[error("Missing opening delimiter '--{boundary}' (line {line})")]
    MissingBoundaryDelimiter {
        /// Boundary that was expected.
        boundary: String,
        /// Last line read.
        line: usize,
    },

    /// Stream ended before the closing `--boundary--` delimiter.
    #[error("Missing close delimiter '--{boundary}--' (line {line})")]
    MissingCloseDelimiter {
        /// Boundary that was expected.
        boundary: String,
        /// Last line read.
        line: usize,
    },

    /// Line terminator violates the framing rules.
    #[error("Malformed stream at line {line}: {message}")]
    MalformedStream {
        /// Offending line.
        line: usize,
        /// Details.
        message: String,
    },

    /// A single line exceeded the configured maximum.
    #[error("Line {line} exceeds the maximum length of {max} bytes")]
    LineTooLong {
        /// Offending line.
        line: usize,
        /// Configured maximum.
        max: usize,
    },

    // Part headers
    /// Header block not terminated by a blank line.
    #[error("Missing blank line after headers (line {line})")]
    MissingBlankLine {
        /// Line where the blank line was expected.
        line: usize,
    },

    /// Header line is not `Name: value`.
    #[error("Invalid header at line {line}: {header}")]
    InvalidHeader {
        /// Offending line.
        line: usize,
        /// Raw header text.
        header: String,
    },

    /// Part carries no Content-Type header.
    #[error("Missing Content-Type header (line {line})")]
    MissingContentType {
        /// First line of the part.
        line: usize,
    },

    /// Part Content-Type is neither `application/http` nor `multipart/mixed`.
    #[error("Invalid Content-Type '{content_type}' (line {line})")]
    InvalidContentType {
        /// First line of the part.
        line: usize,
        /// Rejected value.
        content_type: String,
    },

    /// `application/http` part has no Content-Transfer-Encoding header.
    #[error("Missing Content-Transfer-Encoding header (line {line})")]
    MissingContentTransferEncoding {
        /// First line of the part.
        line: usize,
    },

    /// Content-Transfer-Encoding is not `binary`.
    #[error("Invalid Content-Transfer-Encoding '{encoding}' (line {line})")]
    InvalidContentTransferEncoding {
        /// First line of the part.
        line: usize,
        /// Rejected value.
        encoding: String,
    },

    // Changesets
    /// Changeset member has no Content-ID.
    #[error("Missing Content-ID in changeset member (line {line})")]
    MissingContentId {
        /// First line of the member part.
        line: usize,
    },

    /// Content-ID used twice in the same changeset.
    #[error("Duplicate Content-ID '{content_id}' in changeset (line {line})")]
    DuplicateContentId {
        /// First line of the member part, 0 when raised by the serializer.
        line: usize,
        /// Duplicated identifier.
        content_id: String,
    },

    /// GET (or another non-mutating method) inside a changeset.
    #[error("Method {method} is not allowed inside a changeset (line {line})")]
    InvalidChangesetMethod {
        /// Request line, 0 when raised by the serializer.
        line: usize,
        /// Rejected method.
        method: String,
    },

    /// Changeset without members.
    #[error("Changeset must contain at least one request")]
    EmptyChangeset,

    // Embedded HTTP messages
    /// Status line of an embedded response is malformed.
    #[error("Invalid status line at line {line}: {status_line}")]
    InvalidStatusLine {
        /// Offending line.
        line: usize,
        /// Raw status line.
        status_line: String,
    },

    /// Request line of an embedded request is malformed.
    #[error("Invalid request line at line {line}: {request_line}")]
    InvalidRequestLine {
        /// Offending line.
        line: usize,
        /// Raw request line.
        request_line: String,
    },

    /// Embedded message is not HTTP/1.1.
    #[error("Invalid HTTP version '{version}' (line {line})")]
    InvalidHttpVersion {
        /// Offending line.
        line: usize,
        /// Rejected version token.
        version: String,
    },

    /// Embedded request method is unknown or not permitted.
    #[error("Invalid method '{method}' (line {line})")]
    InvalidMethod {
        /// Offending line.
        line: usize,
        /// Rejected method.
        method: String,
    },

    /// Embedded request URI cannot be parsed or resolved.
    #[error("Invalid URI '{uri}' (line {line})")]
    InvalidUri {
        /// Offending line.
        line: usize,
        /// Rejected URI.
        uri: String,
    },

    // Security constraints
    /// Header not permitted on an individual sub-request.
    #[error("Forbidden header '{header}' (line {line})")]
    ForbiddenHeader {
        /// Offending line.
        line: usize,
        /// Header name.
        header: String,
    },

    /// Absolute URI outside the service root.
    #[error("Forbidden absolute URI '{uri}' (line {line})")]
    ForbiddenAbsoluteUri {
        /// Offending line.
        line: usize,
        /// Rejected URI.
        uri: String,
    },

    // Caller usage
    /// Standalone retrieve items must use GET.
    #[error("Only GET is allowed for a query operation, got {method}")]
    InvalidQueryOperationMethod {
        /// Rejected method.
        method: String,
    },

    /// Item kind not supported by the negotiated protocol version.
    #[error("Unsupported batch item: {0}")]
    UnsupportedItem(String),

    /// Iterator or response item used after `close()`.
    #[error("Batch resource used after close")]
    UseAfterClose,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// Line number of the offending wire line, if this is a wire error.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::MissingBoundaryDelimiter { line, .. }
            | Self::MissingCloseDelimiter { line, .. }
            | Self::MalformedStream { line, .. }
            | Self::LineTooLong { line, .. }
            | Self::MissingBlankLine { line }
            | Self::InvalidHeader { line, .. }
            | Self::MissingContentType { line }
            | Self::InvalidContentType { line, .. }
            | Self::MissingContentTransferEncoding { line }
            | Self::InvalidContentTransferEncoding { line, .. }
            | Self::MissingContentId { line }
            | Self::DuplicateContentId { line, .. }
            | Self::InvalidChangesetMethod { line, .. }
            | Self::InvalidStatusLine { line, .. }
            | Self::InvalidRequestLine { line, .. }
            | Self::InvalidHttpVersion { line, .. }
            | Self::InvalidMethod { line, .. }
            | Self::InvalidUri { line, .. }
            | Self::ForbiddenHeader { line, .. }
            | Self::ForbiddenAbsoluteUri { line, .. } => Some(*line).filter(|l| *l > 0),
            _ => None,
        }
    }

    /// Check if this error invalidates the boundary/offset tracking of a stream.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::InvalidBoundary { .. }
                | Self::MissingBoundaryDelimiter { .. }
                | Self::MissingCloseDelimiter { .. }
                | Self::MalformedStream { .. }
                | Self::LineTooLong { .. }
                | Self::MissingBlankLine { .. }
                | Self::InvalidHeader { .. }
                | Self::MissingContentType { .. }
                | Self::InvalidContentType { .. }
                | Self::MissingContentTransferEncoding { .. }
                | Self::InvalidContentTransferEncoding { .. }
                | Self::Io(_)
        )
    }

    /// Check if this error was caused by the caller rather than the wire.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidQueryOperationMethod { .. }
                | Self::UnsupportedItem(_)
                | Self::UseAfterClose
                | Self::EmptyChangeset
        ) || (matches!(
            self,
            Self::DuplicateContentId { .. } | Self::InvalidChangesetMethod { .. }
        ) && self.line().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_reported_for_wire_errors() {
        let err = BatchError::MissingContentType { line: 7 };
        assert_eq!(err.line(), Some(7));
        assert!(err.is_framing());
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_serializer_errors_have_no_line() {
        let err = BatchError::InvalidChangesetMethod {
            line: 0,
            method: "GET".to_string(),
        };
        assert_eq!(err.line(), None);
        assert!(err.is_usage());
    }

    #[test]
    fn test_use_after_close_is_usage() {
        assert!(BatchError::UseAfterClose.is_usage());
        assert!(!BatchError::UseAfterClose.is_framing());
    }
}
