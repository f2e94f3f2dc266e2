//! Items submitted in a batch request.

use crate::SubRequest;

/// A member of a changeset: a mutating request plus its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesetRequest {
    /// Caller-supplied Content-ID, assigned by the serializer when `None`.
    pub content_id: Option<String>,
    /// The request itself.
    pub request: SubRequest,
}

impl ChangesetRequest {
    /// Wrap a request without an explicit Content-ID.
    pub fn new(request: SubRequest) -> Self {
        Self {
            content_id: None,
            request,
        }
    }

    /// Wrap a request with an explicit Content-ID.
    pub fn with_content_id(content_id: impl Into<String>, request: SubRequest) -> Self {
        Self {
            content_id: Some(content_id.into()),
            request,
        }
    }
}

impl From<SubRequest> for ChangesetRequest {
    fn from(request: SubRequest) -> Self {
        Self::new(request)
    }
}

/// An ordered group of mutating requests executed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    requests: Vec<ChangesetRequest>,
}

impl Changeset {
    /// Create an empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, letting the serializer pick its Content-ID.
    pub fn add(mut self, request: SubRequest) -> Self {
        self.requests.push(ChangesetRequest::new(request));
        self
    }

    /// Append a request with an explicit Content-ID.
    pub fn add_with_id(mut self, content_id: impl Into<String>, request: SubRequest) -> Self {
        self.requests
            .push(ChangesetRequest::with_content_id(content_id, request));
        self
    }

    /// Append a member in place.
    pub fn push(&mut self, member: impl Into<ChangesetRequest>) {
        self.requests.push(member.into());
    }

    /// Members in submission order.
    pub fn requests(&self) -> &[ChangesetRequest] {
        &self.requests
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the changeset has no members.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl FromIterator<SubRequest> for Changeset {
    fn from_iter<I: IntoIterator<Item = SubRequest>>(iter: I) -> Self {
        Self {
            requests: iter.into_iter().map(ChangesetRequest::new).collect(),
        }
    }
}

/// One top-level entry of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    /// A single read-only request.
    Retrieve(SubRequest),
    /// An atomic group of mutating requests.
    Changeset(Changeset),
    /// A single mutating request outside any changeset (OData 4.0 only).
    OutsideUpdate(SubRequest),
}

impl BatchItem {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchItem::Retrieve(_) => "retrieve",
            BatchItem::Changeset(_) => "changeset",
            BatchItem::OutsideUpdate(_) => "outside-update",
        }
    }

    /// Check if this item is a changeset.
    pub fn is_changeset(&self) -> bool {
        matches!(self, BatchItem::Changeset(_))
    }

    /// Bodies carried by this item, used for boundary collision checks.
    pub fn bodies(&self) -> Vec<&[u8]> {
        match self {
            BatchItem::Retrieve(req) | BatchItem::OutsideUpdate(req) => {
                vec![req.body_bytes().as_ref()]
            }
            BatchItem::Changeset(cs) => cs
                .requests()
                .iter()
                .map(|m| m.request.body_bytes().as_ref())
                .collect(),
        }
    }
}

impl From<Changeset> for BatchItem {
    fn from(changeset: Changeset) -> Self {
        BatchItem::Changeset(changeset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_builder_keeps_order() {
        let cs = Changeset::new()
            .add(SubRequest::post("Products"))
            .add_with_id("k", SubRequest::delete("Products(1)"));
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.requests()[0].content_id, None);
        assert_eq!(cs.requests()[1].content_id.as_deref(), Some("k"));
        assert_eq!(cs.requests()[1].request.uri(), "Products(1)");
    }

    #[test]
    fn test_item_kind() {
        assert_eq!(BatchItem::Retrieve(SubRequest::get("A")).kind(), "retrieve");
        assert!(BatchItem::from(Changeset::new()).is_changeset());
    }

    #[test]
    fn test_bodies() {
        let item: BatchItem = [
            SubRequest::post("A").body("one"),
            SubRequest::post("B").body("two"),
        ]
        .into_iter()
        .collect::<Changeset>()
        .into();
        assert_eq!(item.bodies(), vec![&b"one"[..], &b"two"[..]]);
    }
}
