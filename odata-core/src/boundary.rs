//! Multipart boundary tokens.

use crate::{BatchError, Result};
use memchr::memmem;
use std::fmt;

/// Maximum boundary length allowed by RFC 2046.
pub const MAX_BOUNDARY_LENGTH: usize = 70;

/// Nesting level a generated boundary is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// Outer boundary of a batch request
    Batch,
    /// Inner boundary of a changeset in a request
    Changeset,
    /// Outer boundary of a batch response
    BatchResponse,
    /// Inner boundary of a changeset in a response
    ChangesetResponse,
}

impl BoundaryKind {
    fn prefix(&self) -> &'static str {
        match self {
            BoundaryKind::Batch => "batch_",
            BoundaryKind::Changeset => "changeset_",
            BoundaryKind::BatchResponse => "batchresponse_",
            BoundaryKind::ChangesetResponse => "changesetresponse_",
        }
    }
}

/// Kind of delimiter line matched by [`Boundary::match_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `--boundary`, opens the next part
    Part,
    /// `--boundary--`, closes the multipart
    Close,
}

/// A validated multipart boundary token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary(String);

impl Boundary {
    /// Generate a fresh random boundary.
    pub fn generate(kind: BoundaryKind) -> Self {
        Self(format!("{}{}", kind.prefix(), uuid::Uuid::new_v4()))
    }

    /// Generate a boundary that is not `taken` and occurs in none of `payloads`.
    pub fn generate_avoiding<F>(kind: BoundaryKind, taken: F, payloads: &[&[u8]]) -> Self
    where
        F: Fn(&Boundary) -> bool,
    {
        loop {
            let candidate = Self::generate(kind);
            if !taken(&candidate) && !payloads.iter().any(|p| candidate.occurs_in(p)) {
                return candidate;
            }
            tracing::debug!(boundary = %candidate, "Regenerating colliding boundary");
        }
    }

    /// Validate a boundary token.
    pub fn parse(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let invalid = |reason: &str| BatchError::InvalidBoundary {
            boundary: token.clone(),
            reason: reason.to_string(),
        };

        if token.is_empty() {
            return Err(invalid("empty boundary"));
        }
        if token.len() > MAX_BOUNDARY_LENGTH {
            return Err(invalid("longer than 70 characters"));
        }
        if token.ends_with(' ') {
            return Err(invalid("ends with a space"));
        }
        if let Some(c) = token.chars().find(|c| !is_bchar(*c)) {
            return Err(invalid(&format!("character '{}' not allowed", c)));
        }
        Ok(Self(token))
    }

    /// Extract the boundary parameter of a `multipart/*` content type.
    pub fn from_content_type(content_type: &str) -> Result<Self> {
        let value = content_type
            .split(';')
            .skip(1)
            .find_map(|param| {
                let (name, value) = param.split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("boundary")
                    .then(|| value.trim().trim_matches('"'))
            })
            .ok_or_else(|| BatchError::InvalidBoundary {
                boundary: String::new(),
                reason: format!("no boundary parameter in '{}'", content_type),
            })?;
        Self::parse(value)
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `--boundary`
    pub fn delimiter(&self) -> String {
        format!("--{}", self.0)
    }

    /// `--boundary--`
    pub fn close_delimiter(&self) -> String {
        format!("--{}--", self.0)
    }

    /// `multipart/mixed; boundary=...` content type for this boundary.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.0)
    }

    /// Whether the delimiter appears anywhere in `payload`.
    pub fn occurs_in(&self, payload: &[u8]) -> bool {
        memmem::find(payload, self.delimiter().as_bytes()).is_some()
    }

    /// Classify a line (terminator excluded) as a delimiter of this boundary.
    ///
    /// Trailing linear whitespace (transport padding) is ignored.
    pub fn match_line(&self, line: &[u8]) -> Option<Delimiter> {
        let line = trim_padding(line);
        let rest = line.strip_prefix(b"--")?.strip_prefix(self.0.as_bytes())?;
        match rest {
            b"" => Some(Delimiter::Part),
            b"--" => Some(Delimiter::Close),
            _ => None,
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Boundary {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_bchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c)
}

fn trim_padding(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b' ' | b'\t'] = line {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_prefix_and_is_valid() {
        let b = Boundary::generate(BoundaryKind::Changeset);
        assert!(b.as_str().starts_with("changeset_"));
        assert!(Boundary::parse(b.as_str()).is_ok());
        assert_ne!(b, Boundary::generate(BoundaryKind::Changeset));
    }

    #[test]
    fn test_generate_avoiding_taken() {
        let outer = Boundary::generate(BoundaryKind::Batch);
        let inner = Boundary::generate_avoiding(BoundaryKind::Changeset, |b| *b == outer, &[]);
        assert_ne!(inner, outer);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(Boundary::parse("").is_err());
        assert!(Boundary::parse("a".repeat(71)).is_err());
        assert!(Boundary::parse("ends ").is_err());
        assert!(Boundary::parse("semi;colon").is_err());
        assert!(Boundary::parse("batch_36522ad7-fc75-4b56-8c71-56071383e77b").is_ok());
    }

    #[test]
    fn test_from_content_type() {
        let b = Boundary::from_content_type("multipart/mixed; boundary=batch_1").unwrap();
        assert_eq!(b.as_str(), "batch_1");
        let b = Boundary::from_content_type("multipart/mixed;Boundary=\"cs 1\"").unwrap();
        assert_eq!(b.as_str(), "cs 1");
        assert!(Boundary::from_content_type("multipart/mixed").is_err());
    }

    #[test]
    fn test_match_line() {
        let b = Boundary::parse("batch_1").unwrap();
        assert_eq!(b.match_line(b"--batch_1"), Some(Delimiter::Part));
        assert_eq!(b.match_line(b"--batch_1--"), Some(Delimiter::Close));
        assert_eq!(b.match_line(b"--batch_1  "), Some(Delimiter::Part));
        assert_eq!(b.match_line(b"--batch_12"), None);
        assert_eq!(b.match_line(b"x--batch_1"), None);
    }

    #[test]
    fn test_occurs_in() {
        let b = Boundary::parse("batch_1").unwrap();
        assert!(b.occurs_in(b"text --batch_1 more"));
        assert!(!b.occurs_in(b"batch_1"));
    }
}
