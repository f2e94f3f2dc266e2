//! Changeset responses and their atomicity flag.
//!
//! A changeset response is split as soon as it is read so that
//! [`ChangesetResponse::is_breaking`] can be answered before the caller
//! iterates. Members that parsed before a structural error stay available;
//! the error itself is yielded once after them.

use crate::{BatchConfig, BatchError, Boundary, PartSplitter, Result, SubResponse};
use bytes::Bytes;
use http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// The responses to the members of one changeset.
#[derive(Debug)]
pub struct ChangesetResponse {
    boundary: Boundary,
    line: usize,
    members: Vec<SubResponse>,
    cursor: usize,
    error: Option<BatchError>,
    structural_failure: bool,
    breaking: bool,
    state: State,
}

impl ChangesetResponse {
    /// Split a changeset body whose first line is `first_line` of the payload.
    pub fn parse(body: Bytes, first_line: usize, boundary: Boundary, config: &BatchConfig) -> Self {
        let mut splitter = PartSplitter::nested(body, first_line, boundary.clone(), config);
        let mut members = Vec::new();
        let mut error = None;

        loop {
            let part = match splitter.next_part() {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            };
            let content_id = part.content_id().map(str::to_string);
            let (body, body_line) = part.into_body();
            match SubResponse::parse(body, body_line, config) {
                Ok(mut response) => {
                    response.set_content_id(content_id);
                    members.push(response);
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let structural_failure = error.is_some();
        if let Some(e) = &error {
            tracing::warn!(changeset = %boundary, line = first_line, error = %e, "Changeset response is malformed");
        }
        let breaking = structural_failure || members.iter().any(SubResponse::is_error);
        if breaking {
            tracing::warn!(
                changeset = %boundary,
                members = members.len(),
                "Changeset did not commit"
            );
        }

        Self {
            boundary,
            line: first_line,
            members,
            cursor: 0,
            error,
            structural_failure,
            breaking,
            state: State::Open,
        }
    }

    /// Always `true`.
    pub fn is_changeset(&self) -> bool {
        true
    }

    /// Check if any member failed or the changeset itself was malformed.
    ///
    /// Stays available after [`close`](Self::close).
    pub fn is_breaking(&self) -> bool {
        self.breaking
    }

    /// Whether splitting the changeset hit a structural error.
    pub fn is_malformed(&self) -> bool {
        self.structural_failure
    }

    /// The structural error, until it has been yielded by iteration.
    pub fn error(&self) -> Option<&BatchError> {
        self.error.as_ref()
    }

    /// Inner boundary of the changeset.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Line on which the changeset body starts.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Number of members that parsed successfully.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no member parsed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First member whose status signals failure.
    pub fn failed_member(&self) -> Option<&SubResponse> {
        self.members.iter().find(|m| m.is_error())
    }

    /// Status codes of all parsed members, in order.
    pub fn statuses(&self) -> Vec<StatusCode> {
        self.members.iter().map(SubResponse::status).collect()
    }

    /// All parsed members.
    pub fn members(&self) -> Result<&[SubResponse]> {
        self.ensure_open()?;
        Ok(&self.members)
    }

    /// Member answering the request with the given Content-ID.
    pub fn member_by_content_id(&self, content_id: &str) -> Result<Option<&SubResponse>> {
        self.ensure_open()?;
        Ok(self
            .members
            .iter()
            .find(|m| m.content_id() == Some(content_id)))
    }

    /// Next member, then the structural error if there was one.
    pub fn next_member(&mut self) -> Result<Option<SubResponse>> {
        self.ensure_open()?;
        if let Some(member) = self.members.get(self.cursor) {
            self.cursor += 1;
            return Ok(Some(member.clone()));
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Release the buffered members. Calling it again has no effect.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.members = Vec::new();
        self.error = None;
        tracing::trace!(changeset = %self.boundary, "Closed changeset response");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(BatchError::UseAfterClose),
        }
    }
}

impl Iterator for ChangesetResponse {
    type Item = Result<SubResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_member().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "--cs\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 1\r\n\
        \r\n\
        HTTP/1.1 201 Created\r\n\
        \r\n\
        \r\n\
        --cs\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 2\r\n\
        \r\n\
        HTTP/1.1 404 Not Found\r\n\
        \r\n\
        \r\n\
        --cs\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 3\r\n\
        \r\n\
        HTTP/1.1 204 No Content\r\n\
        \r\n\
        \r\n\
        --cs--";

    fn changeset(body: &'static str) -> ChangesetResponse {
        ChangesetResponse::parse(
            Bytes::from_static(body.as_bytes()),
            1,
            Boundary::parse("cs").unwrap(),
            &BatchConfig::default(),
        )
    }

    #[test]
    fn test_failed_member_marks_changeset_breaking() {
        let mut cs = changeset(BODY);
        assert!(cs.is_changeset());
        assert!(cs.is_breaking());
        assert!(!cs.is_malformed());
        assert_eq!(
            cs.statuses(),
            vec![StatusCode::CREATED, StatusCode::NOT_FOUND, StatusCode::NO_CONTENT]
        );
        assert_eq!(cs.failed_member().unwrap().content_id(), Some("2"));

        let first = cs.next_member().unwrap().unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(first.content_id(), Some("1"));
        let rest: Vec<_> = cs.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_structural_error_after_good_members() {
        let body = "--cs\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            Content-ID: 1\r\n\
            \r\n\
            HTTP/1.1 201 Created\r\n\
            \r\n\
            \r\n\
            --cs\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            HTTP/1.1 201 Created\r\n\
            \r\n\
            \r\n\
            --cs--";
        let mut cs = changeset(body);
        assert!(cs.is_breaking());
        assert!(cs.is_malformed());
        assert_eq!(cs.len(), 1);
        assert!(matches!(cs.error(), Some(BatchError::MissingContentId { line: 10 })));

        assert!(cs.next_member().unwrap().is_some());
        assert!(matches!(
            cs.next_member(),
            Err(BatchError::MissingContentId { .. })
        ));
        assert!(cs.next_member().unwrap().is_none());
        assert!(cs.is_breaking());
    }

    #[test]
    fn test_all_success_is_not_breaking() {
        let body = "--cs\r\n\
            Content-Type: application/http\r\n\
            Content-Transfer-Encoding: binary\r\n\
            Content-ID: 1\r\n\
            \r\n\
            HTTP/1.1 204 No Content\r\n\
            \r\n\
            \r\n\
            --cs--\r\n";
        let cs = changeset(body);
        assert!(!cs.is_breaking());
        assert!(cs.member_by_content_id("1").unwrap().is_some());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut cs = changeset(BODY);
        cs.next_member().unwrap();
        cs.close();
        cs.close();
        assert!(cs.is_closed());
        assert!(cs.is_breaking());
        assert!(matches!(cs.next_member(), Err(BatchError::UseAfterClose)));
        assert!(matches!(cs.members(), Err(BatchError::UseAfterClose)));
    }
}
