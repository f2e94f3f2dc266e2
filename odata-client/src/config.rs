//! Batch client configuration.

use crate::{ClientError, Result};
use odata_core::BatchConfig;
use std::time::Duration;
use url::Url;

/// Batch client configuration.
#[derive(Debug, Clone)]
pub struct BatchClientConfig {
    /// Service root; `$batch` is appended to it.
    pub service_root: String,
    /// Timeout of the whole batch exchange.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Headers added to every outer batch request.
    pub default_headers: Vec<(String, String)>,
    /// Bytes buffered before a chunk is pushed to the wire.
    pub chunk_size: usize,
    /// Number of chunks in flight before writers wait.
    pub channel_capacity: usize,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Engine settings used to frame and parse the batch.
    pub batch: BatchConfig,
}

impl Default for BatchClientConfig {
    fn default() -> Self {
        Self {
            service_root: "http://localhost/".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("odata-client/{}", env!("CARGO_PKG_VERSION")),
            default_headers: Vec::new(),
            chunk_size: 16 * 1024,
            channel_capacity: 8,
            gzip: true,
            brotli: true,
            batch: BatchConfig::default(),
        }
    }
}

impl BatchClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> BatchClientConfigBuilder {
        BatchClientConfigBuilder::default()
    }

    /// Service root with a trailing slash so relative references resolve under it.
    pub fn service_root_url(&self) -> Result<Url> {
        let mut root = Url::parse(&self.service_root)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.service_root)))?;
        if root.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(self.service_root.clone()));
        }
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        Ok(root)
    }

    /// The `$batch` endpoint of the service.
    pub fn batch_url(&self) -> Result<Url> {
        Ok(self.service_root_url()?.join("$batch")?)
    }
}

/// Builder for batch client configuration.
#[derive(Debug, Default)]
pub struct BatchClientConfigBuilder {
    config: BatchClientConfig,
}

impl BatchClientConfigBuilder {
    /// Set the service root.
    pub fn service_root(mut self, url: impl Into<String>) -> Self {
        self.config.service_root = url.into();
        self
    }

    /// Set the batch exchange timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a header to every outer batch request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the chunk size of the streamed request body.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes.max(1);
        self
    }

    /// Set how many chunks may be queued before writers wait.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Set the engine configuration.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    /// Build the configuration.
    ///
    /// The service root also becomes the engine's base URI unless one is
    /// already set.
    pub fn build(mut self) -> BatchClientConfig {
        if self.config.batch.base_uri.is_none() {
            self.config.batch.base_uri = Some(self.config.service_root.clone());
        }
        self.config
    }
}

#[cfg(feature = "config")]
impl From<odata_config::Settings> for BatchClientConfig {
    fn from(settings: odata_config::Settings) -> Self {
        let batch = settings.batch_config();
        let mut builder = BatchClientConfig::builder()
            .service_root(settings.client.service_root)
            .timeout(Duration::from_secs(settings.client.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.client.connect_timeout_secs))
            .chunk_size(settings.client.chunk_size)
            .channel_capacity(settings.client.channel_capacity)
            .batch(batch);
        if let Some(user_agent) = settings.client.user_agent {
            builder = builder.user_agent(user_agent);
        }
        for (name, value) in settings.client.default_headers {
            builder = builder.default_header(name, value);
        }
        builder.build()
    }
}
