// Low-level helpers for writing framing lines.

use bytes::{BufMut, BytesMut};
use http::HeaderMap;
use std::borrow::Cow;

pub(crate) const CRLF: &[u8] = b"\r\n";

// Canonical spelling of headers that commonly appear in batch payloads,
// sorted by lowercase name for binary search.
static CANONICAL_HEADERS: &[(&str, &str)] = &[
    ("accept", "Accept"),
    ("content-id", "Content-ID"),
    ("content-length", "Content-Length"),
    ("content-transfer-encoding", "Content-Transfer-Encoding"),
    ("content-type", "Content-Type"),
    ("dataserviceversion", "DataServiceVersion"),
    ("etag", "ETag"),
    ("if-match", "If-Match"),
    ("if-none-match", "If-None-Match"),
    ("location", "Location"),
    ("maxdataserviceversion", "MaxDataServiceVersion"),
    ("odata-entityid", "OData-EntityId"),
    ("odata-maxversion", "OData-MaxVersion"),
    ("odata-version", "OData-Version"),
    ("prefer", "Prefer"),
    ("preference-applied", "Preference-Applied"),
    ("retry-after", "Retry-After"),
];

/// Canonical header spelling for known names, Title-Case otherwise.
pub(crate) fn canonical_name(name: &str) -> Cow<'static, str> {
    if let Ok(idx) = CANONICAL_HEADERS.binary_search_by(|(k, _)| k.cmp(&name)) {
        return Cow::Borrowed(CANONICAL_HEADERS[idx].1);
    }
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    Cow::Owned(out)
}

pub(crate) fn put_line(out: &mut BytesMut, line: &str) {
    out.put_slice(line.as_bytes());
    out.put_slice(CRLF);
}

pub(crate) fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(CRLF);
}

pub(crate) fn put_headers(out: &mut BytesMut, headers: &HeaderMap) {
    for (name, value) in headers {
        put_header(out, &canonical_name(name.as_str()), value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        assert!(CANONICAL_HEADERS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("content-id"), "Content-ID");
        assert_eq!(canonical_name("odata-version"), "OData-Version");
        assert_eq!(canonical_name("x-custom-header"), "X-Custom-Header");
    }

    #[test]
    fn test_put_header() {
        let mut out = BytesMut::new();
        put_header(&mut out, "Content-ID", b"1");
        assert_eq!(&out[..], b"Content-ID: 1\r\n");
    }
}
