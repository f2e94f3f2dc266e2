//! Executing a parsed batch against a service.

use crate::{
    BatchConfig, BatchError, BatchItem, BatchRequestParser, BatchResponsePart,
    BatchResponseSerializer, Changeset, Result, SubRequest, SubResponse,
};
use bytes::Bytes;
use http::StatusCode;
use http::header::LOCATION;
use std::collections::HashMap;
use std::io::BufRead;

/// Executes individual sub-requests on behalf of the dispatcher.
pub trait RequestHandler {
    /// Produce the response for one request.
    fn handle(&mut self, request: &SubRequest) -> SubResponse;
}

impl<F> RequestHandler for F
where
    F: FnMut(&SubRequest) -> SubResponse,
{
    fn handle(&mut self, request: &SubRequest) -> SubResponse {
        self(request)
    }
}

/// A serialized batch response ready to be sent.
#[derive(Debug, Clone)]
pub struct DispatchedBatch {
    /// Content-Type header of the response, carrying its boundary.
    pub content_type: String,
    /// Response body.
    pub body: Bytes,
    /// Number of top-level parts written.
    pub parts: usize,
}

/// Runs the items of a batch request through a [`RequestHandler`].
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    config: BatchConfig,
    atomic_changesets: bool,
}

impl BatchDispatcher {
    /// Create a dispatcher with atomic changesets.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            atomic_changesets: true,
        }
    }

    /// Whether a failed member replaces its whole changeset with that error.
    ///
    /// When disabled every member runs and its own response is returned.
    pub fn atomic_changesets(mut self, atomic: bool) -> Self {
        self.atomic_changesets = atomic;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute one item.
    pub fn execute<H: RequestHandler>(&self, item: &BatchItem, handler: &mut H) -> BatchResponsePart {
        match item {
            BatchItem::Retrieve(request) | BatchItem::OutsideUpdate(request) => {
                BatchResponsePart::Single(handler.handle(request))
            }
            BatchItem::Changeset(changeset) => self.execute_changeset(changeset, handler),
        }
    }

    fn execute_changeset<H: RequestHandler>(
        &self,
        changeset: &Changeset,
        handler: &mut H,
    ) -> BatchResponsePart {
        let mut locations: HashMap<String, String> = HashMap::new();
        let mut responses = Vec::with_capacity(changeset.len());

        for member in changeset.requests() {
            let request = resolve_reference(&member.request, &locations);
            let mut response = handler.handle(&request);
            response.set_content_id(member.content_id.clone());

            if let (Some(id), Some(location)) = (&member.content_id, response.header_value(LOCATION.as_str())) {
                locations.insert(id.clone(), location.to_string());
            }

            if response.is_error() && self.atomic_changesets {
                tracing::warn!(
                    status = response.status().as_u16(),
                    content_id = ?member.content_id,
                    "Changeset member failed, rolling back changeset"
                );
                return BatchResponsePart::Single(response);
            }
            responses.push(response);
        }
        BatchResponsePart::Changeset(responses)
    }

    /// Parse a batch request and execute each item in order.
    pub fn dispatch<R, H>(
        &self,
        reader: R,
        content_type: &str,
        handler: &mut H,
    ) -> Result<Vec<BatchResponsePart>>
    where
        R: BufRead,
        H: RequestHandler,
    {
        let parser = BatchRequestParser::from_content_type(reader, content_type, &self.config)?;
        let mut parts = Vec::new();
        for item in parser {
            parts.push(self.execute(&item?, handler));
        }
        tracing::debug!(parts = parts.len(), "Dispatched batch");
        Ok(parts)
    }

    /// Parse, execute and serialize a whole batch.
    ///
    /// A malformed request is returned as an error before any handler runs
    /// for the offending item; see [`error_status`](Self::error_status).
    pub fn respond<R, H>(&self, reader: R, content_type: &str, handler: &mut H) -> Result<DispatchedBatch>
    where
        R: BufRead,
        H: RequestHandler,
    {
        let parts = self.dispatch(reader, content_type, handler)?;
        let mut serializer = BatchResponseSerializer::new();
        let body = serializer.to_bytes(&parts)?;
        Ok(DispatchedBatch {
            content_type: serializer.content_type(),
            body,
            parts: parts.len(),
        })
    }

    /// Map a request-level error to the status a service answers with.
    pub fn error_status(error: &BatchError) -> StatusCode {
        match error {
            BatchError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BatchError::ForbiddenHeader { .. } | BatchError::ForbiddenAbsoluteUri { .. } => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Replace a leading `$<content-id>` segment with the location created by
/// the referenced member.
fn resolve_reference(request: &SubRequest, locations: &HashMap<String, String>) -> SubRequest {
    let Some(reference) = request.uri().strip_prefix('$') else {
        return request.clone();
    };
    let (id, rest) = reference
        .find('/')
        .map_or((reference, ""), |slash| reference.split_at(slash));
    match locations.get(id) {
        Some(location) => SubRequest::new(request.method().clone(), format!("{location}{rest}"))
            .headers(request.header_map().clone())
            .body(request.body_bytes().clone()),
        None => request.clone(),
    }
}
