//! OData protocol versions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// OData protocol version spoken by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ODataVersion {
    /// OData 3.0
    #[serde(rename = "3.0", alias = "v3", alias = "V3")]
    V3,
    /// OData 4.0 (default)
    #[default]
    #[serde(rename = "4.0", alias = "v4", alias = "V4")]
    V4,
}

impl ODataVersion {
    /// Name of the header carrying the protocol version.
    pub fn version_header(&self) -> &'static str {
        match self {
            ODataVersion::V3 => "DataServiceVersion",
            ODataVersion::V4 => "OData-Version",
        }
    }

    /// Name of the header carrying the maximum accepted version.
    pub fn max_version_header(&self) -> &'static str {
        match self {
            ODataVersion::V3 => "MaxDataServiceVersion",
            ODataVersion::V4 => "OData-MaxVersion",
        }
    }

    /// Version header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ODataVersion::V3 => "3.0",
            ODataVersion::V4 => "4.0",
        }
    }

    /// Whether single-part updates outside a changeset are allowed.
    pub fn supports_outside_update(&self) -> bool {
        matches!(self, ODataVersion::V4)
    }

    /// Whether relative sub-request URIs are expanded against the service root.
    pub fn uses_absolute_uris(&self) -> bool {
        matches!(self, ODataVersion::V3)
    }

    /// Headers identifying the version on the outer batch request.
    pub fn headers(&self) -> [(&'static str, &'static str); 2] {
        [
            (self.version_header(), self.as_str()),
            (self.max_version_header(), self.as_str()),
        ]
    }
}

impl fmt::Display for ODataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
