//! Interceptors applied to the outer `$batch` exchange.
//!
//! Individual sub-requests never carry credentials; authentication is added
//! once to the outer request.

use crate::{BatchResponse, ClientError, Result};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use reqwest::Request;

/// Hook into the outer batch request and response.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or modify the outer request before it is sent.
    async fn intercept_request(&self, request: &mut Request) -> Result<()> {
        let _ = request;
        Ok(())
    }

    /// Inspect the outer response once it has been received.
    async fn intercept_response(&self, response: &BatchResponse) -> Result<()> {
        let _ = response;
        Ok(())
    }
}

/// Logs the outer batch exchange.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable logging of headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept_request(&self, request: &mut Request) -> Result<()> {
        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            "Sending batch request"
        );

        if self.log_headers {
            for (name, value) in request.headers() {
                tracing::trace!(header = %name, value = ?value, "Request header");
            }
        }
        Ok(())
    }

    async fn intercept_response(&self, response: &BatchResponse) -> Result<()> {
        tracing::debug!(
            status = %response.status(),
            bytes = ?response.content_length(),
            "Received batch response"
        );

        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(header = %name, value = ?value, "Response header");
            }
        }
        Ok(())
    }
}

/// Adds credentials to the outer batch request.
#[derive(Clone)]
pub struct AuthInterceptor {
    auth_type: AuthType,
}

#[derive(Clone)]
enum AuthType {
    Bearer(String),
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match &self.auth_type {
            AuthType::Bearer(_) => "bearer",
            AuthType::Basic { .. } => "basic",
            AuthType::ApiKey { .. } => "api-key",
        };
        f.debug_struct("AuthInterceptor").field("scheme", &scheme).finish()
    }
}

impl AuthInterceptor {
    /// Create a bearer token interceptor.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Bearer(token.into()),
        }
    }

    /// Create a basic auth interceptor.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Basic {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Create an API key interceptor.
    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::ApiKey {
                header: header.into(),
                key: key.into(),
            },
        }
    }

    fn header(&self) -> Result<(HeaderName, HeaderValue)> {
        let (name, value) = match &self.auth_type {
            AuthType::Bearer(token) => (AUTHORIZATION, format!("Bearer {token}")),
            AuthType::Basic { username, password } => {
                use base64::Engine;
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                (AUTHORIZATION, format!("Basic {credentials}"))
            }
            AuthType::ApiKey { header, key } => {
                let name = HeaderName::from_bytes(header.as_bytes())
                    .map_err(|e| ClientError::Interceptor(format!("{header}: {e}")))?;
                (name, key.clone())
            }
        };
        let mut value = HeaderValue::from_str(&value)
            .map_err(|e| ClientError::Interceptor(format!("{name}: {e}")))?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept_request(&self, request: &mut Request) -> Result<()> {
        let (name, value) = self.header()?;
        request.headers_mut().insert(name, value);
        Ok(())
    }
}
