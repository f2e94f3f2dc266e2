//! Batch Manager: streams a batch onto a live request and hands back the
//! response for pull-based iteration.

use crate::{BatchClientConfig, BatchResponse, ClientError, Interceptor, Result};
use bytes::{Bytes, BytesMut};
use http::StatusCode;
use odata_core::{BatchItem, BatchRequestSerializer, Boundary, Changeset, SubRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Byte sink feeding the body of an in-flight request.
///
/// Bytes are buffered up to the chunk size and pushed through a bounded
/// channel, so a writer waits whenever the connection falls behind.
#[derive(Debug)]
pub struct BodyStreamWriter {
    sender: Option<mpsc::Sender<Bytes>>,
    buffer: BytesMut,
    chunk_size: usize,
    written: u64,
}

impl BodyStreamWriter {
    /// Create a writer and the request body it feeds.
    pub fn channel(chunk_size: usize, capacity: usize) -> (Self, reqwest::Body) {
        let (writer, receiver) = Self::pipe(chunk_size, capacity);
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|chunk| (Ok::<_, std::io::Error>(chunk), receiver))
        });
        (writer, reqwest::Body::wrap_stream(stream))
    }

    fn pipe(chunk_size: usize, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let chunk_size = chunk_size.max(1);
        let writer = Self {
            sender: Some(sender),
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            written: 0,
        };
        (writer, receiver)
    }

    /// Append bytes to the body.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.sender.is_none() {
            return Err(ClientError::StreamClosed);
        }
        self.buffer.extend_from_slice(bytes);
        self.written += bytes.len() as u64;
        while self.buffer.len() >= self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size).freeze();
            self.send(chunk).await?;
        }
        Ok(())
    }

    /// Append an owned chunk, passing large chunks through without copying.
    pub async fn append_bytes(&mut self, bytes: Bytes) -> Result<()> {
        if bytes.len() < self.chunk_size {
            return self.append(&bytes).await;
        }
        self.flush().await?;
        self.written += bytes.len() as u64;
        self.send(bytes).await
    }

    /// Push any buffered bytes to the wire.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return match self.sender {
                Some(_) => Ok(()),
                None => Err(ClientError::StreamClosed),
            };
        }
        let chunk = self.buffer.split().freeze();
        self.send(chunk).await
    }

    /// Flush and end the body.
    pub async fn close(&mut self) -> Result<()> {
        if self.sender.is_none() {
            return Ok(());
        }
        let result = self.flush().await;
        self.sender = None;
        result
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Whether the body has ended.
    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(ClientError::StreamClosed)?;
        tracing::trace!(bytes = chunk.len(), "Pushing body chunk");
        if sender.send(chunk).await.is_err() {
            self.sender = None;
            return Err(ClientError::StreamClosed);
        }
        Ok(())
    }
}

type InFlight = JoinHandle<reqwest::Result<reqwest::Response>>;

/// One `$batch` exchange in progress.
///
/// The outer request is already running when the manager is handed out;
/// every `add_*` call serializes its item straight onto the request body.
/// [`execute`](Self::execute) returns as soon as the response headers are in;
/// the body is read while the items are pulled.
pub struct BatchManager {
    writer: BodyStreamWriter,
    serializer: BatchRequestSerializer,
    config: Arc<BatchClientConfig>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    request: Option<InFlight>,
}

impl std::fmt::Debug for BatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("boundary", self.serializer.boundary())
            .field("items", &self.serializer.items_written())
            .field("bytes", &self.writer.bytes_written())
            .finish()
    }
}

impl BatchManager {
    pub(crate) fn new(
        writer: BodyStreamWriter,
        serializer: BatchRequestSerializer,
        config: Arc<BatchClientConfig>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        request: InFlight,
    ) -> Self {
        Self {
            writer,
            serializer,
            config,
            interceptors,
            request: Some(request),
        }
    }

    /// Outer boundary of the batch.
    pub fn boundary(&self) -> &Boundary {
        self.serializer.boundary()
    }

    /// Number of items written so far.
    pub fn items_written(&self) -> usize {
        self.serializer.items_written()
    }

    /// The raw body writer.
    ///
    /// Bytes appended here bypass the serializer and must be valid framing.
    pub fn body_stream_writer(&mut self) -> &mut BodyStreamWriter {
        &mut self.writer
    }

    /// Add a standalone GET.
    pub async fn add_retrieve(&mut self, request: SubRequest) -> Result<()> {
        self.add_item(&BatchItem::Retrieve(request)).await
    }

    /// Add a changeset.
    pub async fn add_changeset(&mut self, changeset: Changeset) -> Result<()> {
        self.add_item(&BatchItem::Changeset(changeset)).await
    }

    /// Add an update outside any changeset.
    pub async fn add_outside_update(&mut self, request: SubRequest) -> Result<()> {
        self.add_item(&BatchItem::OutsideUpdate(request)).await
    }

    /// Serialize one item onto the request body.
    pub async fn add_item(&mut self, item: &BatchItem) -> Result<()> {
        let frames = self.serializer.encode_item(item)?;
        self.push(frames).await
    }

    /// Close the batch, wait for the service and return its response.
    pub async fn execute(mut self) -> Result<BatchResponse> {
        let tail = self.serializer.finish()?;
        self.push(vec![tail]).await?;
        if let Err(err) = self.writer.close().await {
            return Err(self.transport_failure(err).await);
        }

        let handle = self.request.take().ok_or(ClientError::StreamClosed)?;
        let response = match handle.await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(self.map_transport(err)),
            Err(err) => return Err(ClientError::Task(err.to_string())),
        };

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            let message = match response.text().await {
                Ok(text) if !text.is_empty() => text,
                _ => status.canonical_reason().unwrap_or_default().to_string(),
            };
            tracing::warn!(status = status.as_u16(), "Batch request rejected");
            return Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
                message,
            });
        }

        let response = BatchResponse::from_reqwest(
            response,
            &self.config.batch,
            self.config.chunk_size,
            self.config.channel_capacity,
        )?;
        for interceptor in &self.interceptors {
            interceptor.intercept_response(&response).await?;
        }

        tracing::debug!(
            items = self.serializer.items_written(),
            bytes = self.writer.bytes_written(),
            status = status.as_u16(),
            "Batch executed"
        );
        Ok(response)
    }

    /// Abandon the batch: the body is cut off and the request cancelled.
    pub fn abort(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        self.writer.sender = None;
        if let Some(handle) = self.request.take() {
            tracing::debug!(boundary = %self.serializer.boundary(), "Aborting batch request");
            handle.abort();
        }
    }

    async fn push(&mut self, frames: Vec<Bytes>) -> Result<()> {
        for frame in frames {
            if let Err(err) = self.writer.append_bytes(frame).await {
                return Err(self.transport_failure(err).await);
            }
        }
        Ok(())
    }

    /// A closed pipe means the request ended early; report why.
    async fn transport_failure(&mut self, err: ClientError) -> ClientError {
        if !matches!(err, ClientError::StreamClosed) {
            return err;
        }
        let Some(handle) = self.request.take() else {
            return err;
        };
        match handle.await {
            Ok(Ok(response)) => ClientError::UnexpectedStatus {
                status: response.status().as_u16(),
                message: "service answered before the batch was complete".to_string(),
            },
            Ok(Err(e)) => self.map_transport(e),
            Err(e) => ClientError::Task(e.to_string()),
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.config.timeout)
        } else {
            ClientError::Http(err)
        }
    }
}

impl Drop for BatchManager {
    fn drop(&mut self) {
        self.cancel();
    }
}
