//! Batch engine configuration.
//!
//! ```rust
//! use odata_core::{BatchConfig, ODataVersion};
//!
//! let config = BatchConfig::builder()
//!     .version(ODataVersion::V3)
//!     .base_uri("https://services.example.com/Northwind.svc/")
//!     .strict_crlf(false)
//!     .build();
//!
//! assert!(!config.strict_crlf);
//! ```

use crate::{BatchError, ODataVersion, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Headers that may not appear on an individual sub-request.
pub const DEFAULT_FORBIDDEN_HEADERS: &[&str] = &[
    "Authorization",
    "Proxy-Authorization",
    "Expect",
    "From",
    "Max-Forwards",
    "Range",
    "TE",
];

/// Configuration shared by the serializers and parsers of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Protocol version.
    pub version: ODataVersion,

    /// Reject framing lines terminated by a bare LF.
    pub strict_crlf: bool,

    /// Maximum length of a single line, unbounded when `None`.
    pub max_line_length: Option<usize>,

    /// Require a Content-ID on every changeset member.
    pub require_content_id: bool,

    /// Header names refused on sub-requests (case-insensitive).
    pub forbidden_headers: Vec<String>,

    /// Service root used to resolve and police sub-request URIs.
    pub base_uri: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            version: ODataVersion::V4,
            strict_crlf: true,
            max_line_length: None,
            require_content_id: true,
            forbidden_headers: DEFAULT_FORBIDDEN_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            base_uri: None,
        }
    }
}

impl BatchConfig {
    /// Create a new builder
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// OData 3.0 defaults
    pub fn v3() -> Self {
        Self {
            version: ODataVersion::V3,
            ..Self::default()
        }
    }

    /// OData 4.0 defaults
    pub fn v4() -> Self {
        Self::default()
    }

    /// Tolerant parsing for servers that frame with bare LF or omit Content-IDs
    pub fn lenient() -> Self {
        Self {
            strict_crlf: false,
            require_content_id: false,
            ..Self::default()
        }
    }

    /// Check whether a header name is refused on sub-requests.
    pub fn is_forbidden_header(&self, name: &str) -> bool {
        self.forbidden_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Parse the configured service root.
    ///
    /// A root without a trailing slash is treated as a directory so that
    /// `Products(1)` resolves below it rather than replacing its last segment.
    pub fn base_url(&self) -> Result<Option<Url>> {
        let Some(base) = &self.base_uri else {
            return Ok(None);
        };
        let normalized = if base.ends_with('/') {
            base.clone()
        } else {
            format!("{}/", base)
        };
        Url::parse(&normalized)
            .map(Some)
            .map_err(|_| BatchError::InvalidUri {
                line: 0,
                uri: base.clone(),
            })
    }
}

/// Builder for BatchConfig
#[derive(Debug, Clone, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Set the protocol version
    pub fn version(mut self, version: ODataVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Enable or disable strict CRLF framing
    pub fn strict_crlf(mut self, strict: bool) -> Self {
        self.config.strict_crlf = strict;
        self
    }

    /// Set the maximum line length
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = Some(max);
        self
    }

    /// Require or relax Content-ID on changeset members
    pub fn require_content_id(mut self, require: bool) -> Self {
        self.config.require_content_id = require;
        self
    }

    /// Add a forbidden sub-request header
    pub fn forbid_header(mut self, name: impl Into<String>) -> Self {
        self.config.forbidden_headers.push(name.into());
        self
    }

    /// Replace the forbidden header list
    pub fn forbidden_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.forbidden_headers = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the service root
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.base_uri = Some(uri.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> BatchConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.version, ODataVersion::V4);
        assert!(config.strict_crlf);
        assert!(config.require_content_id);
        assert!(config.is_forbidden_header("authorization"));
        assert!(!config.is_forbidden_header("Accept"));
    }

    #[test]
    fn test_builder() {
        let config = BatchConfig::builder()
            .version(ODataVersion::V3)
            .max_line_length(4096)
            .forbid_header("Cookie")
            .build();
        assert_eq!(config.version, ODataVersion::V3);
        assert_eq!(config.max_line_length, Some(4096));
        assert!(config.is_forbidden_header("cookie"));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = BatchConfig::builder()
            .base_uri("http://host/service.svc")
            .build();
        let base = config.base_url().unwrap().unwrap();
        assert_eq!(base.as_str(), "http://host/service.svc/");
        assert_eq!(
            base.join("Products(1)").unwrap().as_str(),
            "http://host/service.svc/Products(1)"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = BatchConfig::builder().base_uri("not a url").build();
        assert!(matches!(
            config.base_url(),
            Err(BatchError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"version": "v3", "strict_crlf": false}"#).unwrap();
        assert_eq!(config.version, ODataVersion::V3);
        assert!(!config.strict_crlf);
        assert!(config.require_content_id);
    }
}
