// Toolkit settings

use crate::{ConfigError, ConfigValidator, Result, Validate};
use odata_core::logging::LogConfig;
use odata_core::BatchConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Everything the toolkit can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Batch engine
    pub batch: BatchConfig,
    /// Batch client
    pub client: ClientSettings,
    /// Logging
    pub logging: LogConfig,
}

/// Upper bound accepted for `batch.max_line_length`.
pub const MAX_LINE_LENGTH_LIMIT: usize = 16 * 1024 * 1024;

/// Client settings, durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Service root the `$batch` URL is resolved against
    pub service_root: String,
    /// Whole-request timeout
    pub timeout_secs: u64,
    /// Connection timeout
    pub connect_timeout_secs: u64,
    /// User-Agent override
    pub user_agent: Option<String>,
    /// Headers added to every outer batch request
    pub default_headers: BTreeMap<String, String>,
    /// Bytes buffered per body chunk, both directions
    pub chunk_size: usize,
    /// Chunks or response items in flight before the producer waits
    pub channel_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            service_root: "http://localhost/".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: None,
            default_headers: BTreeMap::new(),
            chunk_size: 16 * 1024,
            channel_capacity: 8,
        }
    }
}

impl Settings {
    /// Engine configuration, rooted at the client's service root unless a
    /// base URI is set explicitly.
    pub fn batch_config(&self) -> BatchConfig {
        let mut batch = self.batch.clone();
        if batch.base_uri.is_none() {
            batch.base_uri = Some(self.client.service_root.clone());
        }
        batch
    }

    /// Override fields from normalized variables (see [`EnvLoader`](crate::EnvLoader)).
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "version" => self.batch.version = parse_enum(key, value)?,
                "strict_crlf" => self.batch.strict_crlf = parse(key, value)?,
                "max_line_length" => self.batch.max_line_length = Some(parse(key, value)?),
                "require_content_id" => self.batch.require_content_id = parse(key, value)?,
                "forbidden_headers" => {
                    self.batch.forbidden_headers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                "base_uri" => self.batch.base_uri = Some(value.clone()),
                "service_root" => self.client.service_root = value.clone(),
                "timeout_secs" => self.client.timeout_secs = parse(key, value)?,
                "connect_timeout_secs" => self.client.connect_timeout_secs = parse(key, value)?,
                "user_agent" => self.client.user_agent = Some(value.clone()),
                "chunk_size" => self.client.chunk_size = parse(key, value)?,
                "channel_capacity" => self.client.channel_capacity = parse(key, value)?,
                "log_level" => self.logging.level = parse_enum(key, &value.to_lowercase())?,
                "log_format" => self.logging.format = parse_enum(key, &value.to_lowercase())?,
                "log_filter" => self.logging.env_filter = Some(value.clone()),
                other => tracing::trace!(key = other, "Ignoring unknown setting"),
            }
        }
        Ok(())
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_url(&self.client.service_root, "client.service_root")?;
        if let Some(base) = &self.batch.base_uri {
            ConfigValidator::is_url(base, "batch.base_uri")?;
        }
        if let Some(max) = self.batch.max_line_length {
            ConfigValidator::in_range(max, 80, MAX_LINE_LENGTH_LIMIT, "batch.max_line_length")?;
        }
        for header in &self.batch.forbidden_headers {
            ConfigValidator::is_header_name(header, "batch.forbidden_headers")?;
        }
        ConfigValidator::in_range(self.client.timeout_secs, 1, 3600, "client.timeout_secs")?;
        ConfigValidator::in_range(
            self.client.connect_timeout_secs,
            1,
            3600,
            "client.connect_timeout_secs",
        )?;
        ConfigValidator::in_range(self.client.chunk_size, 1, 16 * 1024 * 1024, "client.chunk_size")?;
        ConfigValidator::in_range(self.client.channel_capacity, 1, 1024, "client.channel_capacity")?;
        if let Some(user_agent) = &self.client.user_agent {
            ConfigValidator::not_empty(user_agent, "client.user_agent")?;
        }
        for name in self.client.default_headers.keys() {
            ConfigValidator::is_header_name(name, "client.default_headers")?;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parse through serde so enum names match the file formats.
fn parse_enum<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_string())).map_err(|_| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    })
}
