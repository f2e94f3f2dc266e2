//! Streaming serializers for batch requests and batch responses.
//!
//! Serializers are sans-IO: every item is validated first and then turned
//! into a short list of frames (framing bytes interleaved with the untouched
//! bodies), so a payload of any size can be pushed to a pipe or written to
//! a [`Write`] sink without assembling it in memory.

use crate::headers::{APPLICATION_HTTP, BINARY};
use crate::message::{self, resolve_uri, validate_uri};
use crate::wire::{self, CRLF};
use crate::{
    BatchConfig, BatchError, BatchItem, Boundary, BoundaryKind, Changeset, Result, SubRequest,
    SubResponse,
};
use bytes::{BufMut, Bytes, BytesMut};
use http::Method;
use std::collections::HashSet;
use std::io::Write;
use url::Url;

/// Write frames to a sink, returning the number of bytes written.
pub fn write_frames<W: Write>(frames: &[Bytes], sink: &mut W) -> Result<usize> {
    let mut written = 0;
    for frame in frames {
        sink.write_all(frame)?;
        written += frame.len();
    }
    Ok(written)
}

fn put_delimiter(out: &mut BytesMut, boundary: &Boundary) {
    wire::put_line(out, &boundary.delimiter());
}

fn put_http_part_headers(out: &mut BytesMut, content_id: Option<&str>) {
    wire::put_header(out, "Content-Type", APPLICATION_HTTP.as_bytes());
    wire::put_header(out, "Content-Transfer-Encoding", BINARY.as_bytes());
    if let Some(id) = content_id {
        wire::put_header(out, "Content-ID", id.as_bytes());
    }
    out.put_slice(CRLF);
}

fn put_multipart_part_headers(out: &mut BytesMut, inner: &Boundary) {
    wire::put_header(out, "Content-Type", inner.content_type().as_bytes());
    out.put_slice(CRLF);
}

/// Push the head, then the body as its own frame, then the CRLF owned by the
/// following delimiter.
fn push_message(frames: &mut Vec<Bytes>, head: BytesMut, body: &Bytes) {
    let mut head = head;
    if body.is_empty() {
        head.put_slice(CRLF);
        frames.push(head.freeze());
    } else {
        frames.push(head.freeze());
        frames.push(body.clone());
        frames.push(Bytes::from_static(CRLF));
    }
}

/// Serializer for the request side of a batch.
#[derive(Debug)]
pub struct BatchRequestSerializer {
    boundary: Boundary,
    config: BatchConfig,
    base: Option<Url>,
    used_boundaries: HashSet<Boundary>,
    items: usize,
    closed: bool,
}

impl BatchRequestSerializer {
    /// Create a serializer with a freshly generated outer boundary.
    pub fn new(config: &BatchConfig) -> Result<Self> {
        Self::with_boundary(Boundary::generate(BoundaryKind::Batch), config)
    }

    /// Create a serializer using a caller-chosen outer boundary.
    pub fn with_boundary(boundary: Boundary, config: &BatchConfig) -> Result<Self> {
        let base = config.base_url()?;
        let mut used_boundaries = HashSet::new();
        used_boundaries.insert(boundary.clone());
        Ok(Self {
            boundary,
            config: config.clone(),
            base,
            used_boundaries,
            items: 0,
            closed: false,
        })
    }

    /// Outer boundary.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Content-Type of the whole batch request.
    pub fn content_type(&self) -> String {
        self.boundary.content_type()
    }

    /// Number of items serialized so far.
    pub fn items_written(&self) -> usize {
        self.items
    }

    /// Whether the close delimiter has been produced.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Validate and frame one item. Nothing is produced if validation fails.
    pub fn encode_item(&mut self, item: &BatchItem) -> Result<Vec<Bytes>> {
        if self.closed {
            return Err(BatchError::UseAfterClose);
        }
        for body in item.bodies() {
            if self.boundary.occurs_in(body) {
                return Err(BatchError::InvalidBoundary {
                    boundary: self.boundary.to_string(),
                    reason: format!("occurs in the body of {} item {}", item.kind(), self.items + 1),
                });
            }
        }

        let frames = match item {
            BatchItem::Retrieve(request) => {
                if request.method() != Method::GET {
                    return Err(BatchError::InvalidQueryOperationMethod {
                        method: request.method().to_string(),
                    });
                }
                let uri = self.check_request(request)?;
                self.encode_single(request, &uri)
            }
            BatchItem::OutsideUpdate(request) => {
                if !self.config.version.supports_outside_update() {
                    return Err(BatchError::UnsupportedItem(format!(
                        "outside-update items require OData 4.0, batch uses {}",
                        self.config.version
                    )));
                }
                let uri = self.check_request(request)?;
                self.encode_single(request, &uri)
            }
            BatchItem::Changeset(changeset) => self.encode_changeset(changeset)?,
        };

        self.items += 1;
        tracing::debug!(
            boundary = %self.boundary,
            item = self.items,
            kind = item.kind(),
            frames = frames.len(),
            "Serialized batch item"
        );
        Ok(frames)
    }

    /// Produce the outer close delimiter.
    pub fn finish(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(BatchError::UseAfterClose);
        }
        self.closed = true;
        let mut out = BytesMut::new();
        wire::put_line(&mut out, &self.boundary.close_delimiter());
        tracing::debug!(boundary = %self.boundary, items = self.items, "Closed batch request");
        Ok(out.freeze())
    }

    /// Encode an item straight into a sink.
    pub fn write_item<W: Write>(&mut self, item: &BatchItem, sink: &mut W) -> Result<usize> {
        let frames = self.encode_item(item)?;
        write_frames(&frames, sink)
    }

    /// Write the close delimiter into a sink.
    pub fn finish_to<W: Write>(&mut self, sink: &mut W) -> Result<usize> {
        let close = self.finish()?;
        sink.write_all(&close)?;
        Ok(close.len())
    }

    /// Serialize a whole batch into a sink.
    pub fn serialize<W: Write>(&mut self, items: &[BatchItem], sink: &mut W) -> Result<usize> {
        let mut written = 0;
        for item in items {
            written += self.write_item(item, sink)?;
        }
        written += self.finish_to(sink)?;
        sink.flush()?;
        Ok(written)
    }

    /// Validate method, headers and URI; returns the URI to put on the wire.
    fn check_request(&self, request: &SubRequest) -> Result<String> {
        if !message::is_permitted_method(request.method()) {
            return Err(BatchError::InvalidMethod {
                line: 0,
                method: request.method().to_string(),
            });
        }
        for name in request.header_map().keys() {
            if self.config.is_forbidden_header(name.as_str()) {
                return Err(BatchError::ForbiddenHeader {
                    line: 0,
                    header: name.to_string(),
                });
            }
        }
        validate_uri(request.uri(), 0, self.base.as_ref())?;
        if self.config.version.uses_absolute_uris() {
            Ok(resolve_uri(request.uri(), self.base.as_ref()))
        } else {
            Ok(request.uri().to_string())
        }
    }

    fn encode_single(&self, request: &SubRequest, uri: &str) -> Vec<Bytes> {
        let mut head = BytesMut::with_capacity(256);
        put_delimiter(&mut head, &self.boundary);
        put_http_part_headers(&mut head, None);
        request.write_head(uri, &mut head);

        let mut frames = Vec::with_capacity(3);
        push_message(&mut frames, head, request.body_bytes());
        frames
    }

    fn encode_changeset(&mut self, changeset: &Changeset) -> Result<Vec<Bytes>> {
        if changeset.is_empty() {
            return Err(BatchError::EmptyChangeset);
        }

        let mut uris = Vec::with_capacity(changeset.len());
        let mut explicit = HashSet::new();
        for member in changeset.requests() {
            let method = member.request.method();
            if method == Method::GET {
                return Err(BatchError::InvalidChangesetMethod {
                    line: 0,
                    method: method.to_string(),
                });
            }
            uris.push(self.check_request(&member.request)?);
            if let Some(id) = &member.content_id
                && !explicit.insert(id.as_str())
            {
                return Err(BatchError::DuplicateContentId {
                    line: 0,
                    content_id: id.clone(),
                });
            }
        }

        let content_ids = assign_content_ids(changeset, &explicit);

        let bodies: Vec<&[u8]> = changeset
            .requests()
            .iter()
            .map(|m| m.request.body_bytes().as_ref())
            .collect();
        let used = &self.used_boundaries;
        let inner =
            Boundary::generate_avoiding(BoundaryKind::Changeset, |b| used.contains(b), &bodies);
        self.used_boundaries.insert(inner.clone());

        let mut frames = Vec::with_capacity(changeset.len() * 3 + 1);
        let mut head = BytesMut::with_capacity(128);
        put_delimiter(&mut head, &self.boundary);
        put_multipart_part_headers(&mut head, &inner);

        for ((member, uri), content_id) in changeset.requests().iter().zip(&uris).zip(&content_ids)
        {
            put_delimiter(&mut head, &inner);
            put_http_part_headers(&mut head, Some(content_id));
            member.request.write_head(uri, &mut head);
            push_message(&mut frames, head, member.request.body_bytes());
            head = BytesMut::with_capacity(256);
        }

        wire::put_line(&mut head, &inner.close_delimiter());
        frames.push(head.freeze());

        tracing::debug!(
            changeset = %inner,
            members = changeset.len(),
            "Framed changeset"
        );
        Ok(frames)
    }
}

/// Content-IDs for every member: caller-supplied ones kept, the rest numbered
/// from 1 skipping numbers the caller already used.
fn assign_content_ids(changeset: &Changeset, explicit: &HashSet<&str>) -> Vec<String> {
    let mut next = 1usize;
    changeset
        .requests()
        .iter()
        .map(|member| match &member.content_id {
            Some(id) => id.clone(),
            None => loop {
                let candidate = next.to_string();
                next += 1;
                if !explicit.contains(candidate.as_str()) {
                    break candidate;
                }
            },
        })
        .collect()
}

/// A top-level entry of a batch response.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponsePart {
    /// Response to a retrieve or outside-update item.
    Single(SubResponse),
    /// Responses to the members of a changeset, in member order.
    Changeset(Vec<SubResponse>),
}

/// Serializer for the response side of a batch.
#[derive(Debug)]
pub struct BatchResponseSerializer {
    boundary: Boundary,
    used_boundaries: HashSet<Boundary>,
    parts: usize,
    closed: bool,
}

impl Default for BatchResponseSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchResponseSerializer {
    /// Create a serializer with a freshly generated outer boundary.
    pub fn new() -> Self {
        Self::with_boundary(Boundary::generate(BoundaryKind::BatchResponse))
    }

    /// Create a serializer using a caller-chosen outer boundary.
    pub fn with_boundary(boundary: Boundary) -> Self {
        let mut used_boundaries = HashSet::new();
        used_boundaries.insert(boundary.clone());
        Self {
            boundary,
            used_boundaries,
            parts: 0,
            closed: false,
        }
    }

    /// Outer boundary.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Content-Type of the whole batch response.
    pub fn content_type(&self) -> String {
        self.boundary.content_type()
    }

    /// Frame one response part.
    pub fn encode_part(&mut self, part: &BatchResponsePart) -> Result<Vec<Bytes>> {
        if self.closed {
            return Err(BatchError::UseAfterClose);
        }
        let bodies: Vec<&[u8]> = match part {
            BatchResponsePart::Single(response) => vec![response.bytes().as_ref()],
            BatchResponsePart::Changeset(responses) => {
                responses.iter().map(|r| r.bytes().as_ref()).collect()
            }
        };
        if bodies.iter().any(|b| self.boundary.occurs_in(b)) {
            return Err(BatchError::InvalidBoundary {
                boundary: self.boundary.to_string(),
                reason: format!("occurs in the body of response part {}", self.parts + 1),
            });
        }

        let mut frames = Vec::new();
        let mut head = BytesMut::with_capacity(256);
        put_delimiter(&mut head, &self.boundary);

        match part {
            BatchResponsePart::Single(response) => {
                put_http_part_headers(&mut head, response.content_id());
                response.write_head(&mut head);
                push_message(&mut frames, head, response.bytes());
            }
            BatchResponsePart::Changeset(responses) => {
                let used = &self.used_boundaries;
                let inner = Boundary::generate_avoiding(
                    BoundaryKind::ChangesetResponse,
                    |b| used.contains(b),
                    &bodies,
                );
                self.used_boundaries.insert(inner.clone());
                put_multipart_part_headers(&mut head, &inner);

                for response in responses {
                    put_delimiter(&mut head, &inner);
                    put_http_part_headers(&mut head, response.content_id());
                    response.write_head(&mut head);
                    push_message(&mut frames, head, response.bytes());
                    head = BytesMut::with_capacity(256);
                }
                wire::put_line(&mut head, &inner.close_delimiter());
                frames.push(head.freeze());
            }
        }

        self.parts += 1;
        Ok(frames)
    }

    /// Produce the outer close delimiter.
    pub fn finish(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(BatchError::UseAfterClose);
        }
        self.closed = true;
        let mut out = BytesMut::new();
        wire::put_line(&mut out, &self.boundary.close_delimiter());
        Ok(out.freeze())
    }

    /// Serialize a whole batch response into a sink.
    pub fn serialize<W: Write>(
        &mut self,
        parts: &[BatchResponsePart],
        sink: &mut W,
    ) -> Result<usize> {
        let mut written = 0;
        for part in parts {
            written += write_frames(&self.encode_part(part)?, sink)?;
        }
        let close = self.finish()?;
        sink.write_all(&close)?;
        sink.flush()?;
        Ok(written + close.len())
    }

    /// Serialize a whole batch response into one buffer.
    pub fn to_bytes(&mut self, parts: &[BatchResponsePart]) -> Result<Bytes> {
        let mut out = Vec::new();
        self.serialize(parts, &mut out)?;
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ODataVersion;
    use http::StatusCode;

    fn serialize(items: &[BatchItem], config: &BatchConfig) -> Result<String> {
        let mut ser =
            BatchRequestSerializer::with_boundary(Boundary::parse("batch_1").unwrap(), config)?;
        let mut out = Vec::new();
        ser.serialize(items, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_retrieve_framing() {
        let text = serialize(
            &[BatchItem::Retrieve(SubRequest::get("Products(1)"))],
            &BatchConfig::default(),
        )
        .unwrap();
        assert_eq!(
            text,
            "--batch_1\r\n\
             Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             \r\n\
             GET Products(1) HTTP/1.1\r\n\
             \r\n\
             \r\n\
             --batch_1--\r\n"
        );
    }

    #[test]
    fn test_retrieve_requires_get() {
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        let err = ser
            .encode_item(&BatchItem::Retrieve(SubRequest::post("Products")))
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidQueryOperationMethod { .. }));
        assert_eq!(ser.items_written(), 0);
    }

    #[test]
    fn test_outside_update_method_check() {
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        let options = SubRequest::new(Method::OPTIONS, "Products");
        let err = ser.encode_item(&BatchItem::OutsideUpdate(options)).unwrap_err();
        assert!(matches!(err, BatchError::InvalidMethod { line: 0, ref method } if method == "OPTIONS"));

        let merge = SubRequest::merge("Products(1)").body("{}");
        assert!(ser.encode_item(&BatchItem::OutsideUpdate(merge)).is_ok());
        assert_eq!(ser.items_written(), 1);
    }

    #[test]
    fn test_changeset_assigns_content_ids() {
        let cs = Changeset::new()
            .add(SubRequest::post("Products").body("{}"))
            .add_with_id("1", SubRequest::post("Orders").body("{}"))
            .add(SubRequest::delete("Products(2)"));
        let text = serialize(&[cs.into()], &BatchConfig::default()).unwrap();
        let ids: Vec<_> = text
            .lines()
            .filter_map(|l| l.strip_prefix("Content-ID: "))
            .collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
        assert!(text.contains("Content-Type: multipart/mixed; boundary=changeset_"));
    }

    #[test]
    fn test_changeset_rejects_get_and_duplicates() {
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        let get = Changeset::new().add(SubRequest::get("Products"));
        assert!(matches!(
            ser.encode_item(&get.into()),
            Err(BatchError::InvalidChangesetMethod { line: 0, .. })
        ));

        let dup = Changeset::new()
            .add_with_id("a", SubRequest::post("A"))
            .add_with_id("a", SubRequest::post("B"));
        assert!(matches!(
            ser.encode_item(&dup.into()),
            Err(BatchError::DuplicateContentId { .. })
        ));

        assert!(matches!(
            ser.encode_item(&Changeset::new().into()),
            Err(BatchError::EmptyChangeset)
        ));
    }

    #[test]
    fn test_distinct_changeset_boundaries() {
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        let cs = || BatchItem::from(Changeset::new().add(SubRequest::post("A")));
        let first = ser.encode_item(&cs()).unwrap();
        let second = ser.encode_item(&cs()).unwrap();

        let boundary_of = |frames: &[Bytes]| {
            let text = String::from_utf8(frames[0].to_vec()).unwrap();
            let start = text.find("boundary=").unwrap() + "boundary=".len();
            text[start..].lines().next().unwrap().to_string()
        };
        let a = boundary_of(&first);
        let b = boundary_of(&second);
        assert_ne!(a, b);
        assert_ne!(a, ser.boundary().as_str());
        assert_ne!(b, ser.boundary().as_str());
    }

    #[test]
    fn test_outside_update_requires_v4() {
        let item = BatchItem::OutsideUpdate(SubRequest::patch("Products(1)").body("{}"));
        assert!(serialize(std::slice::from_ref(&item), &BatchConfig::v4()).is_ok());
        assert!(matches!(
            serialize(&[item], &BatchConfig::v3()),
            Err(BatchError::UnsupportedItem(_))
        ));
    }

    #[test]
    fn test_v3_resolves_relative_uris() {
        let config = BatchConfig::builder()
            .version(ODataVersion::V3)
            .base_uri("http://host/svc")
            .build();
        let text = serialize(&[BatchItem::Retrieve(SubRequest::get("Products"))], &config).unwrap();
        assert!(text.contains("GET http://host/svc/Products HTTP/1.1\r\n"));
    }

    #[test]
    fn test_forbidden_sub_request_header() {
        let item = BatchItem::Retrieve(SubRequest::get("A").header("Authorization", "Bearer x"));
        assert!(matches!(
            serialize(&[item], &BatchConfig::default()),
            Err(BatchError::ForbiddenHeader { line: 0, .. })
        ));
    }

    #[test]
    fn test_body_colliding_with_outer_boundary() {
        let item = BatchItem::OutsideUpdate(SubRequest::post("A").body("x\r\n--batch_1\r\n"));
        assert!(matches!(
            serialize(&[item], &BatchConfig::default()),
            Err(BatchError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn test_body_frame_is_zero_copy() {
        let body = Bytes::from_static(b"large media payload");
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        let frames = ser
            .encode_item(&BatchItem::OutsideUpdate(SubRequest::put("Media(1)").body(body.clone())))
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].as_ptr(), body.as_ptr());
    }

    #[test]
    fn test_use_after_finish() {
        let mut ser = BatchRequestSerializer::new(&BatchConfig::default()).unwrap();
        ser.finish().unwrap();
        assert!(ser.is_closed());
        assert!(matches!(ser.finish(), Err(BatchError::UseAfterClose)));
    }

    #[test]
    fn test_response_serializer_changeset() {
        let mut ser = BatchResponseSerializer::with_boundary(Boundary::parse("batchresponse_1").unwrap());
        let bytes = ser
            .to_bytes(&[
                BatchResponsePart::Single(SubResponse::ok().body("{}")),
                BatchResponsePart::Changeset(vec![
                    SubResponse::new(StatusCode::CREATED).with_content_id("1"),
                ]),
            ])
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("--batchresponse_1\r\n"));
        assert!(text.contains("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}\r\n"));
        assert!(text.contains("Content-ID: 1\r\n\r\nHTTP/1.1 201 Created\r\n"));
        assert!(text.ends_with("--batchresponse_1--\r\n"));
    }
}
