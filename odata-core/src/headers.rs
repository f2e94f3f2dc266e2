//! Header block parsing shared by MIME parts and embedded HTTP messages.

use crate::{Boundary, BatchError, Line, LineEnding, LineScanner, Result};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use memchr::memchr;
use std::io::BufRead;

/// MIME type of a batch part carrying one HTTP message.
pub const APPLICATION_HTTP: &str = "application/http";
/// MIME type of a batch or changeset envelope.
pub const MULTIPART_MIXED: &str = "multipart/mixed";
/// The only transfer encoding allowed on `application/http` parts.
pub const BINARY: &str = "binary";
/// Content-Transfer-Encoding header name.
pub const CONTENT_TRANSFER_ENCODING: &str = "content-transfer-encoding";
/// Content-ID header name.
pub const CONTENT_ID: &str = "content-id";

/// Where a header block sits, which decides how it must end.
#[derive(Debug, Clone, Copy)]
pub(crate) enum HeaderContext<'a> {
    /// MIME part headers: must end with a blank line before the next delimiter.
    Part(&'a Boundary),
    /// Headers of an embedded HTTP message: end of input also ends the block.
    Message,
}

/// Read header lines up to and including the terminating blank line.
pub(crate) fn read_header_block<R: BufRead>(
    scanner: &mut LineScanner<R>,
    context: HeaderContext<'_>,
) -> Result<HeaderMap> {
    let mut fields: Vec<(Line, usize, Vec<u8>)> = Vec::new();

    loop {
        let Some(line) = scanner.next_line()? else {
            match context {
                HeaderContext::Part(_) => {
                    return Err(BatchError::MissingBlankLine {
                        line: scanner.line_number() + 1,
                    });
                }
                HeaderContext::Message => break,
            }
        };

        match context {
            HeaderContext::Part(boundary) => {
                if boundary.match_line(line.content()).is_some() {
                    return Err(BatchError::MissingBlankLine {
                        line: line.number(),
                    });
                }
                scanner.check_framing(&line)?;
            }
            HeaderContext::Message => {
                if line.ending() != LineEnding::None {
                    scanner.check_framing(&line)?;
                }
            }
        }

        if line.is_blank() {
            break;
        }

        // obsolete line folding
        if matches!(line.content().first(), Some(b' ' | b'\t')) {
            if let Some((_, _, value)) = fields.last_mut() {
                value.push(b' ');
                value.extend_from_slice(trim(line.content()));
                continue;
            }
            return Err(invalid_header(&line));
        }

        let colon = memchr(b':', line.content()).ok_or_else(|| invalid_header(&line))?;
        let value = trim(&line.content()[colon + 1..]).to_vec();
        fields.push((line, colon, value));
    }

    let mut headers = HeaderMap::with_capacity(fields.len());
    for (line, colon, value) in fields {
        let name = HeaderName::from_bytes(trim(&line.content()[..colon]))
            .map_err(|_| invalid_header(&line))?;
        let value = HeaderValue::from_bytes(&value).map_err(|_| invalid_header(&line))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Get a header as a string, ignoring values that are not visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Lowercased media type of a Content-Type value, parameters stripped.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Content-ID of a part, looked up on the MIME headers first and then on the
/// embedded message headers.
pub fn content_id(part_headers: &HeaderMap, message_headers: &HeaderMap) -> Option<String> {
    header_str(part_headers, CONTENT_ID)
        .or_else(|| header_str(message_headers, CONTENT_ID))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn invalid_header(line: &Line) -> BatchError {
    BatchError::InvalidHeader {
        line: line.number(),
        header: line.text().into_owned(),
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    bytes.trim_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan(input: &'static [u8]) -> LineScanner<Cursor<&'static [u8]>> {
        LineScanner::new(Cursor::new(input))
    }

    #[test]
    fn test_part_headers_until_blank_line() {
        let boundary = Boundary::parse("b").unwrap();
        let mut s = scan(b"Content-Type: application/http\r\nContent-ID: 1\r\n\r\nbody\r\n");
        let headers = read_header_block(&mut s, HeaderContext::Part(&boundary)).unwrap();
        assert_eq!(header_str(&headers, "content-type"), Some("application/http"));
        assert_eq!(header_str(&headers, "Content-ID"), Some("1"));
        assert_eq!(s.next_line().unwrap().unwrap().content(), b"body");
    }

    #[test]
    fn test_part_headers_missing_blank_line() {
        let boundary = Boundary::parse("b").unwrap();
        let mut s = scan(b"Content-Type: application/http\r\n--b--\r\n");
        let err = read_header_block(&mut s, HeaderContext::Part(&boundary)).unwrap_err();
        assert!(matches!(err, BatchError::MissingBlankLine { line: 2 }));
    }

    #[test]
    fn test_message_headers_end_at_eof() {
        let mut s = scan(b"Content-Length: 0\r\n");
        let headers = read_header_block(&mut s, HeaderContext::Message).unwrap();
        assert_eq!(header_str(&headers, "content-length"), Some("0"));
    }

    #[test]
    fn test_folded_header() {
        let mut s = scan(b"X-Long: first\r\n  second\r\n\r\n");
        let headers = read_header_block(&mut s, HeaderContext::Message).unwrap();
        assert_eq!(header_str(&headers, "x-long"), Some("first second"));
    }

    #[test]
    fn test_invalid_header_line() {
        let mut s = scan(b"no colon here\r\n\r\n");
        let err = read_header_block(&mut s, HeaderContext::Message).unwrap_err();
        assert!(matches!(err, BatchError::InvalidHeader { line: 1, .. }));
    }

    #[test]
    fn test_media_type_and_content_id() {
        assert_eq!(
            media_type("Multipart/Mixed; boundary=x"),
            "multipart/mixed"
        );
        let mut part = HeaderMap::new();
        let mut message = HeaderMap::new();
        assert_eq!(content_id(&part, &message), None);
        message.insert("content-id", HeaderValue::from_static("7"));
        assert_eq!(content_id(&part, &message).as_deref(), Some("7"));
        part.insert("content-id", HeaderValue::from_static("3"));
        assert_eq!(content_id(&part, &message).as_deref(), Some("3"));
    }
}
