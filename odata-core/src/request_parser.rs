//! Service-side parsing of incoming batch requests.

use crate::message::validate_uri;
use crate::splitter::PartContext;
use crate::{
    BatchConfig, BatchError, BatchItem, Boundary, Changeset, ChangesetRequest, LineScanner,
    PartKind, PartSplitter, RawPart, Result, SubRequest,
};
use bytes::Bytes;
use http::Method;
use std::collections::HashSet;
use std::io::BufRead;
use url::Url;

/// Forward-only parser turning a batch request body into [`BatchItem`]s.
///
/// Any violation ends the sequence: the error is returned once and later
/// calls yield `None`.
#[derive(Debug)]
pub struct BatchRequestParser<R> {
    splitter: PartSplitter<R>,
    config: BatchConfig,
    base: Option<Url>,
    failed: bool,
    items: usize,
}

impl<R: BufRead> BatchRequestParser<R> {
    /// Parse a request body framed with `boundary`.
    pub fn new(reader: R, boundary: Boundary, config: &BatchConfig) -> Result<Self> {
        let scanner = LineScanner::with_config(reader, config);
        Ok(Self {
            splitter: PartSplitter::new(scanner, boundary, PartContext::Batch, config),
            base: config.base_url()?,
            config: config.clone(),
            failed: false,
            items: 0,
        })
    }

    /// Parse a request body, taking the boundary from its Content-Type.
    pub fn from_content_type(reader: R, content_type: &str, config: &BatchConfig) -> Result<Self> {
        Self::new(reader, Boundary::from_content_type(content_type)?, config)
    }

    /// Outer boundary.
    pub fn boundary(&self) -> &Boundary {
        self.splitter.boundary()
    }

    /// Number of items returned so far.
    pub fn items_read(&self) -> usize {
        self.items
    }

    /// Read the next item.
    pub fn next_item(&mut self) -> Result<Option<BatchItem>> {
        if self.failed {
            return Ok(None);
        }
        let result = self.read_item();
        match &result {
            Ok(Some(item)) => {
                self.items += 1;
                tracing::debug!(item = self.items, kind = item.kind(), "Parsed batch request item");
            }
            Ok(None) => {}
            Err(e) => {
                self.failed = true;
                tracing::warn!(error = %e, "Rejected batch request");
            }
        }
        result
    }

    fn read_item(&mut self) -> Result<Option<BatchItem>> {
        let Some(part) = self.splitter.next_part()? else {
            return Ok(None);
        };

        match part.kind().clone() {
            PartKind::Multipart(inner) => {
                let (body, body_line) = part.into_body();
                self.read_changeset(body, body_line, inner).map(Some)
            }
            PartKind::Http => {
                let request = self.read_request(part)?;
                if request.method() == Method::GET {
                    Ok(Some(BatchItem::Retrieve(request)))
                } else if self.config.version.supports_outside_update() {
                    Ok(Some(BatchItem::OutsideUpdate(request)))
                } else {
                    Err(BatchError::InvalidQueryOperationMethod {
                        method: request.method().to_string(),
                    })
                }
            }
        }
    }

    fn read_changeset(&self, body: Bytes, body_line: usize, inner: Boundary) -> Result<BatchItem> {
        let mut splitter = PartSplitter::nested(body, body_line, inner, &self.config);
        let mut changeset = Changeset::new();
        let mut seen = HashSet::new();

        while let Some(part) = splitter.next_part()? {
            let line = part.line();
            let content_id = part.content_id().map(str::to_string);
            let request = self.read_request(part)?;

            if request.method() == Method::GET {
                return Err(BatchError::InvalidChangesetMethod {
                    line,
                    method: request.method().to_string(),
                });
            }
            if let Some(id) = &content_id
                && !seen.insert(id.clone())
            {
                return Err(BatchError::DuplicateContentId {
                    line,
                    content_id: id.clone(),
                });
            }
            changeset.push(ChangesetRequest {
                content_id,
                request,
            });
        }

        if changeset.is_empty() {
            return Err(BatchError::EmptyChangeset);
        }
        Ok(BatchItem::Changeset(changeset))
    }

    fn read_request(&self, part: RawPart) -> Result<SubRequest> {
        let (body, body_line) = part.into_body();
        let request = SubRequest::parse(body, body_line, &self.config)?;

        for name in request.header_map().keys() {
            if self.config.is_forbidden_header(name.as_str()) {
                return Err(BatchError::ForbiddenHeader {
                    line: body_line,
                    header: name.to_string(),
                });
            }
        }
        validate_uri(request.uri(), body_line, self.base.as_ref())?;
        Ok(request)
    }
}

impl<R: BufRead> Iterator for BatchRequestParser<R> {
    type Item = Result<BatchItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchRequestSerializer;
    use std::io::Cursor;

    fn parse(body: &str, config: &BatchConfig) -> Result<Vec<BatchItem>> {
        BatchRequestParser::new(
            Cursor::new(body.as_bytes().to_vec()),
            Boundary::parse("batch_1").unwrap(),
            config,
        )?
        .collect()
    }

    #[test]
    fn test_parses_what_the_serializer_writes() {
        let config = BatchConfig::default();
        let items = vec![
            BatchItem::Retrieve(SubRequest::get("Products(1)")),
            Changeset::new()
                .add(SubRequest::post("Products").body(r#"{"Name":"Tea"}"#))
                .add(SubRequest::delete("Products(9)"))
                .into(),
            BatchItem::OutsideUpdate(SubRequest::patch("Products(2)").body("{}")),
        ];
        let mut ser =
            BatchRequestSerializer::with_boundary(Boundary::parse("batch_1").unwrap(), &config)
                .unwrap();
        let mut wire = Vec::new();
        ser.serialize(&items, &mut wire).unwrap();

        let parsed = parse(std::str::from_utf8(&wire).unwrap(), &config).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], items[0]);
        match &parsed[1] {
            BatchItem::Changeset(cs) => {
                assert_eq!(cs.len(), 2);
                assert_eq!(cs.requests()[0].content_id.as_deref(), Some("1"));
                assert_eq!(cs.requests()[1].content_id.as_deref(), Some("2"));
                assert_eq!(&cs.requests()[0].request.body_bytes()[..], br#"{"Name":"Tea"}"#);
            }
            other => panic!("expected changeset, got {other:?}"),
        }
        assert!(matches!(&parsed[2], BatchItem::OutsideUpdate(r) if r.uri() == "Products(2)"));
    }

    #[test]
    fn test_get_in_changeset_is_rejected() {
        let body = "--batch_1\r\n\
            Content-Type: multipart/mixed; boundary=cs\r\n\
            \r\n\
            --cs\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            Content-ID: 1\r\n\
            \r\n\
            GET Products HTTP/1.1\r\n\
            \r\n\
            \r\n\
            --cs--\r\n\
            --batch_1--\r\n";
        assert!(matches!(
            parse(body, &BatchConfig::default()),
            Err(BatchError::InvalidChangesetMethod { line: 5, .. })
        ));
    }

    #[test]
    fn test_duplicate_content_id() {
        let member = "--cs\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            Content-ID: 1\r\n\
            \r\n\
            DELETE Products(1) HTTP/1.1\r\n\
            \r\n\
            \r\n";
        let body = format!(
            "--batch_1\r\nContent-Type: multipart/mixed; boundary=cs\r\n\r\n{member}{member}--cs--\r\n--batch_1--\r\n"
        );
        assert!(matches!(
            parse(&body, &BatchConfig::default()),
            Err(BatchError::DuplicateContentId { line: 13, .. })
        ));
    }

    #[test]
    fn test_forbidden_header_on_sub_request() {
        let body = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            GET Products HTTP/1.1\r\n\
            Authorization: Basic Zm9vOmJhcg==\r\n\
            \r\n\
            \r\n\
            --batch_1--\r\n";
        assert!(matches!(
            parse(body, &BatchConfig::default()),
            Err(BatchError::ForbiddenHeader { line: 5, .. })
        ));
    }

    #[test]
    fn test_absolute_uri_outside_service_root() {
        let config = BatchConfig::builder().base_uri("http://host/svc/").build();
        let body = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            GET http://other/svc/Products HTTP/1.1\r\n\
            \r\n\
            \r\n\
            --batch_1--\r\n";
        assert!(matches!(
            parse(body, &config),
            Err(BatchError::ForbiddenAbsoluteUri { line: 5, .. })
        ));
    }

    #[test]
    fn test_v3_rejects_top_level_update() {
        let body = "--batch_1\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            DELETE Products(1) HTTP/1.1\r\n\
            \r\n\
            \r\n\
            --batch_1--\r\n";
        assert!(matches!(
            parse(body, &BatchConfig::v3()),
            Err(BatchError::InvalidQueryOperationMethod { .. })
        ));
        assert!(parse(body, &BatchConfig::v4()).is_ok());
    }
}
