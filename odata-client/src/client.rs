//! OData batch client.

use crate::{
    BatchClientConfig, BatchManager, BatchResponse, BodyStreamWriter, ClientError, Interceptor,
    Result,
};
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use odata_core::{BatchItem, BatchRequestSerializer};
use std::sync::Arc;

/// Client sending `$batch` requests to one OData service.
#[derive(Clone)]
pub struct ODataClient {
    inner: reqwest::Client,
    config: Arc<BatchClientConfig>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for ODataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataClient")
            .field("service_root", &self.config.service_root)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl ODataClient {
    /// Create a new client with the given configuration.
    pub fn new(config: BatchClientConfig) -> Result<Self> {
        config.batch_url()?;

        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(config.gzip)
            .brotli(config.brotli)
            .build()?;

        Ok(Self {
            inner,
            config: Arc::new(config),
            interceptors: Vec::new(),
        })
    }

    /// Add an interceptor run on every batch exchange, in registration order.
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Get the client configuration.
    pub fn config(&self) -> &BatchClientConfig {
        &self.config
    }

    /// Start a batch.
    ///
    /// The outer POST is sent right away and its body stays open until
    /// [`BatchManager::execute`] is called.
    pub async fn batch(&self) -> Result<BatchManager> {
        let url = self.config.batch_url()?;
        let serializer = BatchRequestSerializer::new(&self.config.batch)?;
        let (writer, body) =
            BodyStreamWriter::channel(self.config.chunk_size, self.config.channel_capacity);

        let mut request = reqwest::Request::new(Method::POST, url);
        self.outer_headers(request.headers_mut(), &serializer.content_type())?;
        *request.body_mut() = Some(body);

        for interceptor in &self.interceptors {
            interceptor.intercept_request(&mut request).await?;
        }

        tracing::debug!(
            url = %request.url(),
            boundary = %serializer.boundary(),
            version = self.config.batch.version.as_str(),
            "Starting batch"
        );

        let client = self.inner.clone();
        let in_flight = tokio::spawn(async move { client.execute(request).await });

        Ok(BatchManager::new(
            writer,
            serializer,
            self.config.clone(),
            self.interceptors.clone(),
            in_flight,
        ))
    }

    /// Send a complete list of items as one batch.
    pub async fn send(&self, items: &[BatchItem]) -> Result<BatchResponse> {
        let mut manager = self.batch().await?;
        for item in items {
            manager.add_item(item).await?;
        }
        manager.execute().await
    }

    fn outer_headers(&self, headers: &mut HeaderMap, content_type: &str) -> Result<()> {
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(ACCEPT, HeaderValue::from_static("multipart/mixed"));
        for (name, value) in self.config.batch.version.headers() {
            headers.insert(header_name(name)?, HeaderValue::from_static(value));
        }
        for (name, value) in &self.config.default_headers {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        Ok(())
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| ClientError::InvalidHeader(name.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(value.to_string()))
}
