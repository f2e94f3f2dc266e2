//! Outer `$batch` response.
//!
//! The body stays on the connection until the items are pulled. A blocking
//! task runs the forward-only parser over the live byte stream and hands
//! finished items to the [`ResponseIterator`] through a bounded channel, so
//! only a few chunks and items are held in memory at any time.

use crate::{ClientError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use odata_core::{BatchConfig, BatchError, BatchResponseParser, Boundary, ResponseItem};
use std::io::{self, BufRead, BufReader, Cursor};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::{StreamReader, SyncIoBridge};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
const DEFAULT_CAPACITY: usize = 8;

enum Body {
    Buffered(Bytes),
    Streaming(BoxStream<'static, io::Result<Bytes>>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// The outer response to a `$batch` request.
///
/// Items are read through [`response_iterator`](Self::response_iterator),
/// which can be obtained once.
#[derive(Debug)]
pub struct BatchResponse {
    status: StatusCode,
    headers: HeaderMap,
    boundary: Option<Boundary>,
    // the lock keeps the response `Sync` for interceptors
    body: Mutex<Option<Body>>,
    config: BatchConfig,
    chunk_size: usize,
    capacity: usize,
}

impl BatchResponse {
    pub(crate) fn from_reqwest(
        response: reqwest::Response,
        config: &BatchConfig,
        chunk_size: usize,
        capacity: usize,
    ) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(io::Error::other);
        Self::from_stream(status, headers, stream, config, chunk_size, capacity)
    }

    /// Wrap a response whose body arrives as a byte stream.
    ///
    /// Nothing is read until [`response_iterator`](Self::response_iterator)
    /// is called; `chunk_size` and `capacity` bound what is buffered ahead of
    /// the consumer.
    pub fn from_stream<S>(
        status: StatusCode,
        headers: HeaderMap,
        stream: S,
        config: &BatchConfig,
        chunk_size: usize,
        capacity: usize,
    ) -> Result<Self>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let mut response = Self::with_body(status, headers, Body::Streaming(stream.boxed()), config)?;
        response.chunk_size = chunk_size.max(1);
        response.capacity = capacity.max(1);
        Ok(response)
    }

    /// Wrap an already received response.
    ///
    /// A 200 must be `multipart/mixed` with a boundary. A 202 without one is
    /// an asynchronous acknowledgement of the whole batch.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, config: &BatchConfig) -> Result<Self> {
        Self::with_body(status, headers, Body::Buffered(body), config)
    }

    fn with_body(status: StatusCode, headers: HeaderMap, body: Body, config: &BatchConfig) -> Result<Self> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let boundary = match Boundary::from_content_type(&content_type) {
            Ok(boundary) => Some(boundary),
            Err(_) if status == StatusCode::ACCEPTED => None,
            Err(_) => return Err(ClientError::MissingBoundary(content_type)),
        };

        Ok(Self {
            status,
            headers,
            boundary,
            body: Mutex::new(Some(body)),
            config: config.clone(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            capacity: DEFAULT_CAPACITY,
        })
    }

    /// Outer status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Outer response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).and_then(|v| v.to_str().ok())
    }

    /// Boundary of the response body, absent for an asynchronous batch.
    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    /// Announced body size. Streamed bodies without a `Content-Length`
    /// report `None`.
    pub fn content_length(&self) -> Option<u64> {
        let announced = self
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok());
        let body = self.body.lock().unwrap_or_else(PoisonError::into_inner);
        match &*body {
            Some(Body::Buffered(bytes)) => Some(bytes.len() as u64),
            _ => announced,
        }
    }

    /// Whether the service accepted the batch for asynchronous processing.
    pub fn is_async(&self) -> bool {
        self.status == StatusCode::ACCEPTED && self.boundary.is_none()
    }

    /// Status monitor of an asynchronous batch.
    pub fn monitor_uri(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    /// Suggested polling delay of an asynchronous batch.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header(RETRY_AFTER.as_str())
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
    }

    /// Take the pull-based iterator over the response items.
    ///
    /// Must be called inside a Tokio runtime. Fails with
    /// [`BatchError::UseAfterClose`] when called a second time or after
    /// [`close`](Self::close).
    pub fn response_iterator(&mut self) -> Result<ResponseIterator> {
        let Some(boundary) = self.boundary.clone() else {
            let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or_default();
            return Err(ClientError::MissingBoundary(content_type.to_string()));
        };
        let handle = Handle::try_current().map_err(|e| ClientError::Task(e.to_string()))?;
        let body = self
            .body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BatchError::UseAfterClose)?;

        let reader: Box<dyn BufRead + Send> = match body {
            Body::Buffered(bytes) => Box::new(Cursor::new(bytes)),
            Body::Streaming(stream) => Box::new(BufReader::with_capacity(
                self.chunk_size,
                SyncIoBridge::new_with_handle(StreamReader::new(stream), handle.clone()),
            )),
        };
        Ok(ResponseIterator::spawn(reader, boundary, &self.config, self.capacity, &handle))
    }

    /// Release the body without reading it.
    pub fn close(&mut self) {
        *self.body.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether the body has been handed out or released.
    pub fn is_closed(&self) -> bool {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

/// Forward-only iterator over the items of a batch response.
///
/// Each item is parsed as soon as its bytes have arrived. Dropping or
/// closing the iterator stops the parser at its next item.
#[derive(Debug)]
pub struct ResponseIterator {
    receiver: Option<mpsc::Receiver<odata_core::Result<ResponseItem>>>,
    task: Option<JoinHandle<()>>,
    boundary: Boundary,
    items: usize,
}

impl ResponseIterator {
    fn spawn(
        reader: Box<dyn BufRead + Send>,
        boundary: Boundary,
        config: &BatchConfig,
        capacity: usize,
        handle: &Handle,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let parser = BatchResponseParser::new(reader, boundary.clone(), config);
        let task = handle.spawn_blocking(move || {
            for item in parser {
                let failed = item.is_err();
                if sender.blocking_send(item).is_err() {
                    tracing::debug!("Response iterator dropped, stopping parser");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        Self {
            receiver: Some(receiver),
            task: Some(task),
            boundary,
            items: 0,
        }
    }

    /// Outer boundary.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Number of items returned so far.
    pub fn items_read(&self) -> usize {
        self.items
    }

    /// Wait for the next item, `None` once the close delimiter was read.
    pub async fn next_item(&mut self) -> Result<Option<ResponseItem>> {
        let receiver = self.receiver.as_mut().ok_or(BatchError::UseAfterClose)?;
        match receiver.recv().await {
            Some(Ok(item)) => {
                self.items += 1;
                Ok(Some(item))
            }
            Some(Err(err)) => Err(err.into()),
            None => {
                if let Some(task) = self.task.take() {
                    task.await.map_err(|e| ClientError::Task(e.to_string()))?;
                }
                Ok(None)
            }
        }
    }

    /// Like [`next_item`](Self::next_item), shaped for `while let` loops.
    pub async fn next(&mut self) -> Option<Result<ResponseItem>> {
        self.next_item().await.transpose()
    }

    /// Drain every remaining item, stopping at the first error.
    pub async fn collect_items(&mut self) -> Result<Vec<ResponseItem>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Stop reading. Later calls fail with [`BatchError::UseAfterClose`].
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            tracing::trace!(items = self.items, "Closed response iterator");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}
