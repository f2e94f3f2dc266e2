//! Splitting a multipart/mixed stream into raw parts at one nesting level.

use crate::headers::{self, APPLICATION_HTTP, BINARY, CONTENT_TRANSFER_ENCODING, HeaderContext,
    MULTIPART_MIXED, read_header_block};
use crate::{BatchConfig, BatchError, Boundary, Delimiter, LineEnding, LineScanner, Result};
use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use std::io::{BufRead, Cursor};

/// Nesting level being split, which decides the per-part header rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartContext {
    /// Top level of a batch: parts are single messages or changesets.
    Batch,
    /// Inside a changeset: parts are single messages carrying a Content-ID.
    Changeset,
}

/// What a raw part contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    /// One embedded HTTP message (`application/http`).
    Http,
    /// A nested multipart (changeset) with its own boundary.
    Multipart(Boundary),
}

/// A part cut out of a multipart stream, body not yet interpreted.
#[derive(Debug, Clone)]
pub struct RawPart {
    headers: HeaderMap,
    body: Bytes,
    kind: PartKind,
    content_id: Option<String>,
    line: usize,
    body_line: usize,
}

impl RawPart {
    /// MIME headers of the part.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body bytes, exclusive of the CRLF that precedes the next delimiter.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Part content kind.
    pub fn kind(&self) -> &PartKind {
        &self.kind
    }

    /// Check if the part is itself a multipart that needs splitting.
    pub fn is_nested_multipart(&self) -> bool {
        matches!(self.kind, PartKind::Multipart(_))
    }

    /// Boundary of a nested multipart.
    pub fn inner_boundary(&self) -> Option<&Boundary> {
        match &self.kind {
            PartKind::Multipart(boundary) => Some(boundary),
            PartKind::Http => None,
        }
    }

    /// Content-ID from the part headers or, failing that, the embedded message.
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Line of the first part header.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Line on which the body starts.
    pub fn body_line(&self) -> usize {
        self.body_line
    }

    /// Split off the body, keeping line numbering.
    pub fn into_body(self) -> (Bytes, usize) {
        (self.body, self.body_line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Parts,
    Done,
}

/// Forward-only splitter yielding the parts of one multipart level.
#[derive(Debug)]
pub struct PartSplitter<R> {
    scanner: LineScanner<R>,
    boundary: Boundary,
    context: PartContext,
    config: BatchConfig,
    state: State,
}

impl<R: BufRead> PartSplitter<R> {
    /// Split the stream read by `scanner` at `boundary`.
    pub fn new(
        scanner: LineScanner<R>,
        boundary: Boundary,
        context: PartContext,
        config: &BatchConfig,
    ) -> Self {
        Self {
            scanner,
            boundary,
            context,
            config: config.clone(),
            state: State::Preamble,
        }
    }

    /// Boundary this splitter looks for.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Whether the close delimiter has been reached or splitting failed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Number of the last line read.
    pub fn line_number(&self) -> usize {
        self.scanner.line_number()
    }

    /// Read the next part, `None` once the close delimiter has been consumed.
    pub fn next_part(&mut self) -> Result<Option<RawPart>> {
        let result = self.read_part();
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    fn read_part(&mut self) -> Result<Option<RawPart>> {
        match self.state {
            State::Done => return Ok(None),
            State::Preamble => {
                if !self.skip_preamble()? {
                    self.state = State::Done;
                    return Ok(None);
                }
                self.state = State::Parts;
            }
            State::Parts => {}
        }

        let line = self.scanner.line_number() + 1;
        let part_headers = read_header_block(&mut self.scanner, HeaderContext::Part(&self.boundary))?;
        let kind = self.validate_headers(&part_headers, line)?;

        let body_line = self.scanner.line_number() + 1;
        let (body, close) = self.read_body()?;
        if close {
            self.state = State::Done;
        }

        let content_id = headers::header_str(&part_headers, headers::CONTENT_ID)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| embedded_content_id(&body));
        if self.context == PartContext::Changeset
            && self.config.require_content_id
            && content_id.is_none()
        {
            return Err(BatchError::MissingContentId { line });
        }

        tracing::trace!(
            boundary = %self.boundary,
            line,
            body_len = body.len(),
            nested = matches!(kind, PartKind::Multipart(_)),
            "Split part"
        );

        Ok(Some(RawPart {
            headers: part_headers,
            body,
            kind,
            content_id,
            line,
            body_line,
        }))
    }

    /// Skip to the opening delimiter. Returns `false` for a multipart that
    /// closes without any part.
    fn skip_preamble(&mut self) -> Result<bool> {
        loop {
            let Some(line) = self.scanner.next_line()? else {
                return Err(BatchError::MissingBoundaryDelimiter {
                    boundary: self.boundary.to_string(),
                    line: self.scanner.line_number(),
                });
            };
            match self.boundary.match_line(line.content()) {
                Some(Delimiter::Part) => {
                    self.scanner.check_framing(&line)?;
                    return Ok(true);
                }
                Some(Delimiter::Close) => {
                    if line.is_terminated() {
                        self.scanner.check_framing(&line)?;
                    }
                    return Ok(false);
                }
                None => {}
            }
        }
    }

    fn validate_headers(&self, part_headers: &HeaderMap, line: usize) -> Result<PartKind> {
        for name in part_headers.keys() {
            if self.config.is_forbidden_header(name.as_str()) {
                return Err(BatchError::ForbiddenHeader {
                    line,
                    header: name.to_string(),
                });
            }
        }

        let content_type = part_headers
            .get(CONTENT_TYPE)
            .ok_or(BatchError::MissingContentType { line })?;
        let content_type = content_type
            .to_str()
            .map_err(|_| BatchError::InvalidContentType {
                line,
                content_type: String::from_utf8_lossy(content_type.as_bytes()).into_owned(),
            })?;

        match headers::media_type(content_type).as_str() {
            APPLICATION_HTTP => {
                let encoding = headers::header_str(part_headers, CONTENT_TRANSFER_ENCODING)
                    .ok_or(BatchError::MissingContentTransferEncoding { line })?;
                if !encoding.trim().eq_ignore_ascii_case(BINARY) {
                    return Err(BatchError::InvalidContentTransferEncoding {
                        line,
                        encoding: encoding.to_string(),
                    });
                }
                Ok(PartKind::Http)
            }
            MULTIPART_MIXED if self.context == PartContext::Batch => {
                let inner = Boundary::from_content_type(content_type)?;
                if inner == self.boundary {
                    return Err(BatchError::InvalidBoundary {
                        boundary: inner.to_string(),
                        reason: "changeset boundary equals the batch boundary".to_string(),
                    });
                }
                Ok(PartKind::Multipart(inner))
            }
            _ => Err(BatchError::InvalidContentType {
                line,
                content_type: content_type.to_string(),
            }),
        }
    }

    /// Collect body lines up to the next delimiter. Returns the body and
    /// whether that delimiter was the close delimiter.
    fn read_body(&mut self) -> Result<(Bytes, bool)> {
        let mut body = BytesMut::new();
        let mut pending: Option<LineEnding> = None;

        loop {
            let Some(line) = self.scanner.next_line()? else {
                return Err(BatchError::MissingCloseDelimiter {
                    boundary: self.boundary.to_string(),
                    line: self.scanner.line_number(),
                });
            };

            match self.boundary.match_line(line.content()) {
                Some(Delimiter::Part) => {
                    self.scanner.check_framing(&line)?;
                    return Ok((body.freeze(), false));
                }
                Some(Delimiter::Close) => {
                    if line.is_terminated() {
                        self.scanner.check_framing(&line)?;
                    }
                    return Ok((body.freeze(), true));
                }
                None => {
                    // the terminator before a delimiter belongs to the delimiter
                    if let Some(ending) = pending.take() {
                        body.extend_from_slice(ending.as_bytes());
                    }
                    if !line.is_terminated() {
                        return Err(BatchError::MissingCloseDelimiter {
                            boundary: self.boundary.to_string(),
                            line: line.number(),
                        });
                    }
                    body.extend_from_slice(line.content());
                    pending = Some(line.ending());
                }
            }
        }
    }
}

impl PartSplitter<Cursor<Bytes>> {
    /// Split an in-memory nested multipart whose first line is `first_line`
    /// of the enclosing payload.
    pub fn nested(
        body: Bytes,
        first_line: usize,
        boundary: Boundary,
        config: &BatchConfig,
    ) -> Self {
        let scanner = LineScanner::with_config(Cursor::new(body), config).starting_at(first_line);
        Self::new(scanner, boundary, PartContext::Changeset, config)
    }
}

impl<R: BufRead> Iterator for PartSplitter<R> {
    type Item = Result<RawPart>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part().transpose()
    }
}

/// Content-ID header of the embedded message, found by scanning the header
/// block that follows its first line.
fn embedded_content_id(body: &[u8]) -> Option<String> {
    body.split(|b| *b == b'\n')
        .skip(1)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_at(memchr::memchr(b':', line)?);
            name.trim_ascii()
                .eq_ignore_ascii_case(b"content-id")
                .then(|| String::from_utf8_lossy(value[1..].trim_ascii()).into_owned())
        })
        .filter(|id| !id.is_empty())
}
