// OData batch toolkit
//
// Streams OData v3/v4 `$batch` requests as multipart/mixed payloads and reads
// batch responses back item by item, with changeset atomicity on both the
// client and the service side.

// Re-export the batch engine
pub use odata_core::*;

// Re-export optional crates
#[cfg(feature = "client")]
pub use odata_client;

#[cfg(feature = "config")]
pub use odata_config;

// Prelude for common imports
pub mod prelude {
    pub use odata_core::prelude::*;
    pub use odata_core::{
        AsyncResponse, BatchDispatcher, BatchRequestParser, BatchResponsePart,
        BatchResponseSerializer, RequestHandler, SingleResponse,
    };

    #[cfg(feature = "client")]
    pub use odata_client::{BatchClientConfig, BatchManager, BatchResponse, ODataClient};

    #[cfg(feature = "config")]
    pub use odata_config::{Settings, SettingsLoader};
}
