//! Pull-based parsing of batch responses.

use crate::splitter::PartContext;
use crate::{
    BatchConfig, BatchError, Boundary, ChangesetResponse, LineScanner, PartKind, PartSplitter,
    Result, SubResponse,
};
use http::header::{LOCATION, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use std::io::BufRead;
use std::time::Duration;

/// A top-level response that is neither part of a changeset nor asynchronous.
#[derive(Debug)]
pub struct SingleResponse {
    status: StatusCode,
    content_id: Option<String>,
    response: Option<SubResponse>,
}

impl SingleResponse {
    fn new(response: SubResponse) -> Self {
        Self {
            status: response.status(),
            content_id: response.content_id().map(str::to_string),
            response: Some(response),
        }
    }

    /// Status code, available after close.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Content-ID, available after close.
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Check if the status signals failure (4xx or 5xx).
    pub fn is_breaking(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    /// The full embedded response.
    pub fn response(&self) -> Result<&SubResponse> {
        self.response.as_ref().ok_or(BatchError::UseAfterClose)
    }

    /// Response headers.
    pub fn headers(&self) -> Result<&HeaderMap> {
        self.response().map(SubResponse::headers)
    }

    /// Response body.
    pub fn body(&self) -> Result<&[u8]> {
        self.response().map(|r| r.bytes().as_ref())
    }

    /// Take the embedded response, closing this item.
    pub fn into_response(mut self) -> Result<SubResponse> {
        self.response.take().ok_or(BatchError::UseAfterClose)
    }

    /// Release the body. Calling it again has no effect.
    pub fn close(&mut self) {
        self.response = None;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.response.is_none()
    }
}

/// Marker for an operation the service continues asynchronously.
///
/// Polling the monitor is left to the caller.
#[derive(Debug)]
pub struct AsyncResponse {
    status: StatusCode,
    headers: HeaderMap,
    closed: bool,
}

impl AsyncResponse {
    /// Check whether a response announces asynchronous processing: a 202
    /// that applied `respond-async` or points to a monitor resource.
    pub fn is_async(response: &SubResponse) -> bool {
        if response.status() != StatusCode::ACCEPTED {
            return false;
        }
        let respond_async = response
            .headers()
            .get_all("preference-applied")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|pref| pref.trim().eq_ignore_ascii_case("respond-async"));
        respond_async || response.headers().contains_key(LOCATION)
    }

    fn new(response: SubResponse) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            closed: false,
        }
    }

    /// Status code (202).
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Monitor resource to poll for the outcome.
    pub fn monitor_uri(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Delay requested before polling, when given in seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Response headers.
    pub fn headers(&self) -> Result<&HeaderMap> {
        if self.closed {
            return Err(BatchError::UseAfterClose);
        }
        Ok(&self.headers)
    }

    /// Mark the item as released. Calling it again has no effect.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

/// One top-level entry of a batch response.
#[derive(Debug)]
pub enum ResponseItem {
    /// Response to a retrieve or outside-update request.
    Single(SingleResponse),
    /// Responses to the members of a changeset.
    Changeset(ChangesetResponse),
    /// An operation continued asynchronously.
    Async(AsyncResponse),
}

impl ResponseItem {
    /// Check if this item answers a changeset.
    pub fn is_changeset(&self) -> bool {
        matches!(self, ResponseItem::Changeset(_))
    }

    /// Check if this item needs special handling: a failed status, a failed
    /// or malformed changeset, or an asynchronous continuation.
    pub fn is_breaking(&self) -> bool {
        match self {
            ResponseItem::Single(single) => single.is_breaking(),
            ResponseItem::Changeset(changeset) => changeset.is_breaking(),
            ResponseItem::Async(_) => true,
        }
    }

    /// Check if this item is an asynchronous marker.
    pub fn is_async(&self) -> bool {
        matches!(self, ResponseItem::Async(_))
    }

    /// The single response, if this is one.
    pub fn as_single(&self) -> Option<&SingleResponse> {
        match self {
            ResponseItem::Single(single) => Some(single),
            _ => None,
        }
    }

    /// The changeset response, if this is one.
    pub fn as_changeset_mut(&mut self) -> Option<&mut ChangesetResponse> {
        match self {
            ResponseItem::Changeset(changeset) => Some(changeset),
            _ => None,
        }
    }

    /// The asynchronous marker, if this is one.
    pub fn as_async(&self) -> Option<&AsyncResponse> {
        match self {
            ResponseItem::Async(marker) => Some(marker),
            _ => None,
        }
    }

    /// Release any buffered body. Calling it again has no effect.
    pub fn close(&mut self) {
        match self {
            ResponseItem::Single(single) => single.close(),
            ResponseItem::Changeset(changeset) => changeset.close(),
            ResponseItem::Async(marker) => marker.close(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Closed,
}

/// Forward-only parser turning a batch response stream into [`ResponseItem`]s.
///
/// Items come out in wire order. A structural error is returned once and
/// ends the sequence; a breaking item does not.
#[derive(Debug)]
pub struct BatchResponseParser<R> {
    splitter: PartSplitter<R>,
    config: BatchConfig,
    state: State,
    items: usize,
}

impl<R: BufRead> BatchResponseParser<R> {
    /// Parse a response body framed with `boundary`.
    pub fn new(reader: R, boundary: Boundary, config: &BatchConfig) -> Self {
        let scanner = LineScanner::with_config(reader, config);
        Self {
            splitter: PartSplitter::new(scanner, boundary, PartContext::Batch, config),
            config: config.clone(),
            state: State::Open,
            items: 0,
        }
    }

    /// Parse a response body, taking the boundary from its Content-Type.
    pub fn from_content_type(reader: R, content_type: &str, config: &BatchConfig) -> Result<Self> {
        let boundary = Boundary::from_content_type(content_type)?;
        Ok(Self::new(reader, boundary, config))
    }

    /// Outer boundary.
    pub fn boundary(&self) -> &Boundary {
        self.splitter.boundary()
    }

    /// Number of items returned so far.
    pub fn items_read(&self) -> usize {
        self.items
    }

    /// Read the next item. Fails with [`BatchError::UseAfterClose`] once the
    /// parser has been closed.
    pub fn next_item(&mut self) -> Result<Option<ResponseItem>> {
        match self.state {
            State::Closed => return Err(BatchError::UseAfterClose),
            State::Finished => return Ok(None),
            State::Open => {}
        }

        let part = match self.splitter.next_part() {
            Ok(Some(part)) => part,
            Ok(None) => {
                self.state = State::Finished;
                tracing::debug!(boundary = %self.boundary(), items = self.items, "Batch response complete");
                return Ok(None);
            }
            Err(e) => {
                self.state = State::Finished;
                tracing::error!(boundary = %self.boundary(), error = %e, "Malformed batch response");
                return Err(e);
            }
        };

        let line = part.line();
        let item = match part.kind().clone() {
            PartKind::Multipart(inner) => {
                let (body, body_line) = part.into_body();
                ResponseItem::Changeset(ChangesetResponse::parse(body, body_line, inner, &self.config))
            }
            PartKind::Http => {
                let content_id = part.content_id().map(str::to_string);
                let (body, body_line) = part.into_body();
                let mut response = match SubResponse::parse(body, body_line, &self.config) {
                    Ok(response) => response,
                    Err(e) => {
                        self.state = State::Finished;
                        tracing::error!(line, error = %e, "Malformed embedded response");
                        return Err(e);
                    }
                };
                response.set_content_id(content_id);
                if AsyncResponse::is_async(&response) {
                    ResponseItem::Async(AsyncResponse::new(response))
                } else {
                    ResponseItem::Single(SingleResponse::new(response))
                }
            }
        };

        self.items += 1;
        if item.is_breaking() {
            tracing::warn!(item = self.items, line, "Breaking batch response item");
        } else {
            tracing::debug!(item = self.items, line, changeset = item.is_changeset(), "Parsed batch response item");
        }
        Ok(Some(item))
    }

    /// Stop parsing and release the stream. Calling it again has no effect.
    pub fn close(&mut self) {
        if self.state != State::Closed {
            self.state = State::Closed;
            tracing::trace!(items = self.items, "Closed batch response parser");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}

impl<R: BufRead> Iterator for BatchResponseParser<R> {
    type Item = Result<ResponseItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}
