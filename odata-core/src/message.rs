//! HTTP messages embedded in `application/http` batch parts.
//!
//! A batch part carries exactly one raw HTTP/1.1 request or response: a
//! request or status line, headers, a blank line and an opaque body. The
//! body is never interpreted here.

use crate::headers::{self, HeaderContext, read_header_block};
use crate::wire::{self, CRLF};
use crate::{BatchConfig, BatchError, LineEnding, LineScanner, Result};
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Cursor;
use url::Url;

/// Protocol version written on every embedded message.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// The MERGE extension method used by OData 3.0 for partial updates.
pub fn merge_method() -> Method {
    // MERGE is a valid token, so this never falls back
    Method::from_bytes(b"MERGE").unwrap_or(Method::PATCH)
}

/// Methods allowed on a sub-request line.
pub(crate) fn is_permitted_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) || method.as_str() == "MERGE"
}

/// A single HTTP request carried inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl SubRequest {
    /// Create a request with the given method and URI.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a GET request.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create a POST request.
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Create a PUT request.
    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    /// Create a PATCH request.
    pub fn patch(uri: impl Into<String>) -> Self {
        Self::new(Method::PATCH, uri)
    }

    /// Create a MERGE request.
    pub fn merge(uri: impl Into<String>) -> Self {
        Self::new(merge_method(), uri)
    }

    /// Create a DELETE request.
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Bytes::from(bytes);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize JSON body");
            }
        }
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI as written by the caller.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request headers.
    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn header_map_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Request body.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Whether this is a read-only query.
    pub fn is_query(&self) -> bool {
        self.method == Method::GET
    }

    /// Write request line, headers and the blank line; the body is left to
    /// the caller so that it can be streamed without copying.
    pub(crate) fn write_head(&self, uri: &str, out: &mut BytesMut) {
        wire::put_line(out, &format!("{} {} {}", self.method, uri, HTTP_VERSION));
        wire::put_headers(out, &self.headers);
        if !self.body.is_empty() && !self.headers.contains_key(CONTENT_LENGTH) {
            wire::put_header(out, "Content-Length", self.body.len().to_string().as_bytes());
        }
        out.put_slice(CRLF);
    }

    /// Parse an embedded request whose first line is line `first_line` of the
    /// enclosing payload.
    pub fn parse(message: Bytes, first_line: usize, config: &BatchConfig) -> Result<Self> {
        let mut scanner =
            LineScanner::with_config(Cursor::new(message.clone()), config).starting_at(first_line);

        let line = scanner
            .next_line()?
            .ok_or_else(|| BatchError::InvalidRequestLine {
                line: first_line,
                request_line: String::new(),
            })?;
        if line.ending() != LineEnding::None {
            scanner.check_framing(&line)?;
        }

        let text = line.text();
        let invalid = || BatchError::InvalidRequestLine {
            line: line.number(),
            request_line: text.to_string(),
        };
        let mut tokens = text.split(' ');
        let (method, uri, version) = match (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        {
            (Some(m), Some(u), Some(v), None) if !m.is_empty() && !u.is_empty() => (m, u, v),
            _ => return Err(invalid()),
        };

        if version != HTTP_VERSION {
            return Err(BatchError::InvalidHttpVersion {
                line: line.number(),
                version: version.to_string(),
            });
        }

        let method = Method::from_bytes(method.as_bytes())
            .ok()
            .filter(is_permitted_method)
            .ok_or_else(|| BatchError::InvalidMethod {
                line: line.number(),
                method: method.to_string(),
            })?;

        let headers = read_header_block(&mut scanner, HeaderContext::Message)?;
        let body = bounded_body(&message, scanner.position(), &headers);

        Ok(Self {
            method,
            uri: uri.to_string(),
            headers,
            body,
        })
    }
}

/// A single HTTP response carried inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubResponse {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    body: Bytes,
    content_id: Option<String>,
}

impl SubResponse {
    /// Create a response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            content_id: None,
        }
    }

    /// Create a 200 OK response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Set the body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Bytes::from(bytes);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize JSON body");
            }
        }
        self
    }

    /// Set the Content-ID correlating this response with a changeset member.
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase as received.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header_value(&self, name: impl AsRef<str>) -> Option<&str> {
        headers::header_str(&self.headers, name.as_ref())
    }

    /// Response body.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parse the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Content-ID of the changeset member this response answers.
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response signals a failure (4xx or 5xx).
    pub fn is_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    pub(crate) fn set_content_id(&mut self, content_id: Option<String>) {
        self.content_id = content_id;
    }

    /// Write status line, headers and the blank line.
    pub(crate) fn write_head(&self, out: &mut BytesMut) {
        wire::put_line(
            out,
            &format!("{} {} {}", HTTP_VERSION, self.status.as_u16(), self.reason),
        );
        wire::put_headers(out, &self.headers);
        if !self.body.is_empty() && !self.headers.contains_key(CONTENT_LENGTH) {
            wire::put_header(out, "Content-Length", self.body.len().to_string().as_bytes());
        }
        out.put_slice(CRLF);
    }

    /// Parse an embedded response whose first line is line `first_line` of
    /// the enclosing payload.
    pub fn parse(message: Bytes, first_line: usize, config: &BatchConfig) -> Result<Self> {
        let mut scanner =
            LineScanner::with_config(Cursor::new(message.clone()), config).starting_at(first_line);

        let line = scanner
            .next_line()?
            .ok_or_else(|| BatchError::InvalidStatusLine {
                line: first_line,
                status_line: String::new(),
            })?;
        if line.ending() != LineEnding::None {
            scanner.check_framing(&line)?;
        }

        let text = line.text();
        let invalid = || BatchError::InvalidStatusLine {
            line: line.number(),
            status_line: text.to_string(),
        };
        let mut tokens = text.splitn(3, ' ');
        let version = tokens.next().unwrap_or_default();
        let code = tokens.next().ok_or_else(invalid)?;
        let reason = tokens.next().unwrap_or_default().trim();

        if !version.starts_with("HTTP/") {
            return Err(invalid());
        }
        if version != HTTP_VERSION && version != "HTTP/1.0" {
            return Err(BatchError::InvalidHttpVersion {
                line: line.number(),
                version: version.to_string(),
            });
        }
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or_else(invalid)?;

        let headers = read_header_block(&mut scanner, HeaderContext::Message)?;
        let body = bounded_body(&message, scanner.position(), &headers);

        Ok(Self {
            status,
            reason: reason.to_string(),
            headers,
            body,
            content_id: None,
        })
    }
}

/// Remaining bytes after the header block, cut to Content-Length when it is
/// present and shorter.
fn bounded_body(message: &Bytes, position: u64, headers: &HeaderMap) -> Bytes {
    let start = (position as usize).min(message.len());
    let mut body = message.slice(start..);
    if let Some(len) = headers::header_str(headers, "content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        && len < body.len()
    {
        body.truncate(len);
    }
    body
}

/// Check a sub-request URI against the service root.
///
/// Absolute URIs must lie below `base`; relative URIs (including `$<id>`
/// Content-ID references) must resolve.
pub fn validate_uri(uri: &str, line: usize, base: Option<&Url>) -> Result<()> {
    let invalid = || BatchError::InvalidUri {
        line,
        uri: uri.to_string(),
    };
    if uri.is_empty() || uri.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }

    match Url::parse(uri) {
        Ok(absolute) => {
            if let Some(base) = base {
                let root = base.as_str();
                let inside = absolute.as_str().starts_with(root)
                    || absolute.as_str() == root.trim_end_matches('/');
                if !inside {
                    return Err(BatchError::ForbiddenAbsoluteUri {
                        line,
                        uri: uri.to_string(),
                    });
                }
            }
            Ok(())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if uri.starts_with('$') {
                return Ok(());
            }
            let fallback;
            let base = match base {
                Some(base) => base,
                None => {
                    fallback = Url::parse("http://localhost/").map_err(|_| invalid())?;
                    &fallback
                }
            };
            base.join(uri).map(|_| ()).map_err(|_| invalid())
        }
        Err(_) => Err(invalid()),
    }
}

/// Resolve a relative sub-request URI against the service root.
pub fn resolve_uri(uri: &str, base: Option<&Url>) -> String {
    if uri.starts_with('$') || Url::parse(uri).is_ok() {
        return uri.to_string();
    }
    match base.map(|b| b.join(uri)) {
        Some(Ok(resolved)) => resolved.to_string(),
        _ => uri.to_string(),
    }
}
