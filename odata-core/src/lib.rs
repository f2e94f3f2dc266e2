//! # OData Batch Core
//!
//! The protocol engine behind OData `$batch` requests: framing a sequence of
//! sub-requests and changesets as a `multipart/mixed` payload, and reading
//! a batch response back as an ordered sequence of items.
//!
//! ## Features
//!
//! - **Streaming serialization**: items are framed one at a time, bodies are never copied
//! - **Pull-based parsing**: response items are produced as the stream is consumed
//! - **Changeset atomicity**: failed or malformed changesets are flagged as breaking
//! - **Diagnostics**: every wire error carries the offending line number
//! - **Service side**: request parsing, dispatch and response serialization
//!
//! ## Writing a batch
//!
//! ```rust
//! use odata_core::{BatchConfig, BatchItem, BatchRequestSerializer, Changeset, SubRequest};
//!
//! # fn main() -> odata_core::Result<()> {
//! let mut serializer = BatchRequestSerializer::new(&BatchConfig::default())?;
//! let mut body = Vec::new();
//! serializer.serialize(
//!     &[
//!         BatchItem::Retrieve(SubRequest::get("Products(1)")),
//!         Changeset::new()
//!             .add(SubRequest::post("Products").json(&serde_json::json!({"Name": "Tea"})))
//!             .into(),
//!     ],
//!     &mut body,
//! )?;
//! assert!(body.ends_with(format!("--{}--\r\n", serializer.boundary()).as_bytes()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading a batch response
//!
//! ```rust
//! use odata_core::{BatchConfig, BatchResponseParser, ResponseItem};
//! use std::io::Cursor;
//!
//! # fn main() -> odata_core::Result<()> {
//! let body = "--batch_1\r\n\
//!     Content-Type: application/http\r\n\
//!     Content-Transfer-Encoding: binary\r\n\
//!     \r\n\
//!     HTTP/1.1 200 OK\r\n\
//!     \r\n\
//!     {\"ID\":1}\r\n\
//!     --batch_1--\r\n";
//!
//! let parser = BatchResponseParser::from_content_type(
//!     Cursor::new(body),
//!     "multipart/mixed; boundary=batch_1",
//!     &BatchConfig::default(),
//! )?;
//! for item in parser {
//!     if let ResponseItem::Single(response) = item? {
//!         assert_eq!(response.status(), 200);
//!         assert_eq!(response.body()?, b"{\"ID\":1}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod boundary;
mod changeset;
mod config;
mod error;
pub mod headers;
mod item;
mod line;
pub mod logging;
mod message;
mod request_parser;
mod response;
mod serializer;
mod server;
mod splitter;
mod version;
mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use boundary::{Boundary, BoundaryKind, Delimiter, MAX_BOUNDARY_LENGTH};
pub use changeset::ChangesetResponse;
pub use config::{BatchConfig, BatchConfigBuilder, DEFAULT_FORBIDDEN_HEADERS};
pub use error::{BatchError, Result};
pub use item::{BatchItem, Changeset, ChangesetRequest};
pub use line::{Line, LineEnding, LineScanner};
pub use message::{HTTP_VERSION, SubRequest, SubResponse, merge_method, resolve_uri, validate_uri};
pub use request_parser::BatchRequestParser;
pub use response::{AsyncResponse, BatchResponseParser, ResponseItem, SingleResponse};
pub use serializer::{
    BatchRequestSerializer, BatchResponsePart, BatchResponseSerializer, write_frames,
};
pub use server::{BatchDispatcher, DispatchedBatch, RequestHandler};
pub use splitter::{PartContext, PartKind, PartSplitter, RawPart};
pub use version::ODataVersion;

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, Method, StatusCode};

/// Prelude for common imports.
///
/// ```
/// use odata_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BatchConfig, BatchError, BatchItem, BatchRequestSerializer, BatchResponseParser,
        Boundary, Changeset, ChangesetResponse, ODataVersion, ResponseItem, Result, SubRequest,
        SubResponse,
    };
    pub use http::{Method, StatusCode};
}
