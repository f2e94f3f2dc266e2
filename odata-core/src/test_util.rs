//! A scriptable mock service for tests.

use crate::{RequestHandler, SubRequest, SubResponse};
use http::{Method, StatusCode};
use serde_json::json;
use std::collections::HashMap;

/// Answers each request with a response echoing it.
///
/// - GET returns 200 with a JSON document naming the method and URI.
/// - POST returns 201 with a `Location` and the request body.
/// - Any other method returns 204.
///
/// Responses can be overridden per URI, e.g. to make one member of a
/// changeset fail.
#[derive(Debug, Default, Clone)]
pub struct EchoHandler {
    scripted: HashMap<String, SubResponse>,
    handled: Vec<SubRequest>,
    created: usize,
}

impl EchoHandler {
    /// Create a handler with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for `uri` with `response`.
    pub fn respond(mut self, uri: impl Into<String>, response: SubResponse) -> Self {
        self.scripted.insert(uri.into(), response);
        self
    }

    /// Answer requests for `uri` with an empty response of `status`.
    pub fn fail(self, uri: impl Into<String>, status: StatusCode) -> Self {
        self.respond(uri, SubResponse::new(status))
    }

    /// Answer requests for `uri` with an asynchronous 202 pointing at `monitor`.
    pub fn respond_async(self, uri: impl Into<String>, monitor: impl Into<String>) -> Self {
        self.respond(
            uri,
            SubResponse::new(StatusCode::ACCEPTED)
                .header("Location", monitor)
                .header("Preference-Applied", "respond-async")
                .header("Retry-After", "1"),
        )
    }

    /// Requests seen so far, in order.
    pub fn handled(&self) -> &[SubRequest] {
        &self.handled
    }
}

impl RequestHandler for EchoHandler {
    fn handle(&mut self, request: &SubRequest) -> SubResponse {
        self.handled.push(request.clone());
        if let Some(response) = self.scripted.get(request.uri()) {
            return response.clone();
        }

        match *request.method() {
            Method::GET => SubResponse::ok().json(&json!({
                "method": request.method().as_str(),
                "uri": request.uri(),
            })),
            Method::POST => {
                self.created += 1;
                let mut response = SubResponse::new(StatusCode::CREATED)
                    .header("Location", format!("{}({})", request.uri(), self.created))
                    .body(request.body_bytes().clone());
                if let Some(content_type) = request.header_map().get(http::header::CONTENT_TYPE)
                    && let Ok(value) = content_type.to_str()
                {
                    response = response.header("Content-Type", value);
                }
                response
            }
            _ => SubResponse::new(StatusCode::NO_CONTENT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_defaults() {
        let mut echo = EchoHandler::new();
        let get = echo.handle(&SubRequest::get("Products(1)"));
        assert_eq!(get.status(), StatusCode::OK);
        let doc: serde_json::Value = get.json_body().unwrap();
        assert_eq!(doc["uri"], "Products(1)");

        let post = echo.handle(&SubRequest::post("Products").body("{}"));
        assert_eq!(post.status(), StatusCode::CREATED);
        assert_eq!(post.header_value("location"), Some("Products(1)"));

        let delete = echo.handle(&SubRequest::delete("Products(1)"));
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);
        assert_eq!(echo.handled().len(), 3);
    }

    #[test]
    fn test_scripted_failure() {
        let mut echo = EchoHandler::new().fail("Products(2)", StatusCode::NOT_FOUND);
        assert_eq!(
            echo.handle(&SubRequest::delete("Products(2)")).status(),
            StatusCode::NOT_FOUND
        );
    }
}
