//! # OData Batch Client
//!
//! Sends OData `$batch` requests over a live HTTP connection. Items are
//! serialized straight onto a streamed request body as they are added, and
//! the response is read back item by item.
//!
//! ## Features
//!
//! - **Streamed requests**: the payload is never assembled in memory
//! - **Backpressure**: a bounded pipe between the serializer and the connection
//! - **Forward-only responses**: items are parsed off the live connection as they are pulled
//! - **Interceptors**: authentication and logging on the outer request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use odata_client::{BatchClientConfig, ODataClient};
//! use odata_core::{Changeset, ResponseItem, SubRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ODataClient::new(
//!         BatchClientConfig::builder()
//!             .service_root("https://services.odata.org/V4/OData/OData.svc/")
//!             .build(),
//!     )?;
//!
//!     let mut batch = client.batch().await?;
//!     batch.add_retrieve(SubRequest::get("Products(1)")).await?;
//!     batch
//!         .add_changeset(Changeset::new().add(SubRequest::delete("Products(2)")))
//!         .await?;
//!
//!     let mut response = batch.execute().await?;
//!     let mut items = response.response_iterator()?;
//!     while let Some(item) = items.next().await {
//!         match item? {
//!             ResponseItem::Single(single) => println!("{}", single.status()),
//!             ResponseItem::Changeset(changeset) => println!("breaking: {}", changeset.is_breaking()),
//!             ResponseItem::Async(pending) => println!("poll {:?}", pending.monitor_uri()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod interceptor;
mod manager;
mod response;

pub use client::ODataClient;
pub use config::{BatchClientConfig, BatchClientConfigBuilder};
pub use error::{ClientError, Result};
pub use interceptor::{AuthInterceptor, Interceptor, LoggingInterceptor};
pub use manager::{BatchManager, BodyStreamWriter};
pub use response::{BatchResponse, ResponseIterator};

// Re-export common types
pub use http::{HeaderMap, Method, StatusCode};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use odata_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::ODataClient;
    pub use crate::config::{BatchClientConfig, BatchClientConfigBuilder};
    pub use crate::error::{ClientError, Result};
    pub use crate::interceptor::{AuthInterceptor, Interceptor, LoggingInterceptor};
    pub use crate::manager::{BatchManager, BodyStreamWriter};
    pub use crate::response::{BatchResponse, ResponseIterator};
    pub use odata_core::prelude::*;
}
