//! Integration tests for common batch workflows.
//!
//! These tests drive the crates together: settings feed the client, the
//! client streams a batch to a service running the dispatcher, and the
//! response is iterated item by item.

use odata::*;
use odata_client::{BatchClientConfig, ODataClient};
use odata_config::SettingsLoader;
use odata_core::test_util::EchoHandler;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// =============================================================================
// Helpers
// =============================================================================

/// Service that keeps every request its handler saw.
#[derive(Clone)]
struct RecordingService {
    dispatcher: BatchDispatcher,
    seen: Arc<Mutex<Vec<SubRequest>>>,
}

impl Respond for RecordingService {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mut handler = EchoHandler::new();
        let result = self
            .dispatcher
            .respond(Cursor::new(request.body.clone()), &content_type, &mut handler);
        if let Ok(mut seen) = self.seen.lock() {
            seen.extend(handler.handled().iter().cloned());
        }
        match result {
            Ok(batch) => ResponseTemplate::new(200).set_body_raw(batch.body.to_vec(), &batch.content_type),
            Err(e) => ResponseTemplate::new(BatchDispatcher::error_status(&e).as_u16())
                .set_body_string(e.to_string()),
        }
    }
}

async fn start(config: BatchConfig) -> (MockServer, Arc<Mutex<Vec<SubRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(RecordingService {
            dispatcher: BatchDispatcher::new(config),
            seen: seen.clone(),
        })
        .mount(&server)
        .await;
    (server, seen)
}

// =============================================================================
// Settings to client
// =============================================================================

#[tokio::test]
async fn test_settings_drive_the_client() {
    let (server, seen) = start(BatchConfig::default()).await;

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[batch]
version = "4.0"

[client]
service_root = "{}/svc/"
chunk_size = 128
channel_capacity = 1
"#,
        server.uri()
    )
    .unwrap();
    let settings = SettingsLoader::new().without_env().file(file.path()).load().unwrap();
    let config: BatchClientConfig = settings.into();
    assert_eq!(config.chunk_size, 128);

    let client = ODataClient::new(config).unwrap();
    let mut response = client
        .send(&[
            BatchItem::Retrieve(SubRequest::get("Products(1)")),
            Changeset::new()
                .add(SubRequest::post("Products").json(&serde_json::json!({"Name": "Tea"})))
                .into(),
        ])
        .await
        .unwrap();

    let items: Vec<ResponseItem> = response
        .response_iterator()
        .unwrap()
        .collect_items()
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert!(!items.iter().any(ResponseItem::is_breaking));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].uri(), "Products(1)");
    assert_eq!(seen[1].method(), Method::POST);
}

// =============================================================================
// Protocol versions
// =============================================================================

#[tokio::test]
async fn test_v3_batch_uses_absolute_uris() {
    let server = MockServer::start().await;
    let root = format!("{}/svc/", server.uri());
    let engine = BatchConfig::builder()
        .version(ODataVersion::V3)
        .base_uri(root.clone())
        .build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .respond_with(RecordingService {
            dispatcher: BatchDispatcher::new(engine.clone()),
            seen: seen.clone(),
        })
        .mount(&server)
        .await;

    let client = ODataClient::new(
        BatchClientConfig::builder()
            .service_root(root.clone())
            .batch(engine)
            .build(),
    )
    .unwrap();
    let mut batch = client.batch().await.unwrap();
    batch.add_retrieve(SubRequest::get("Products(1)")).await.unwrap();
    assert!(matches!(
        batch
            .add_outside_update(SubRequest::delete("Products(1)"))
            .await,
        Err(odata_client::ClientError::Batch(BatchError::UnsupportedItem(_)))
    ));
    let response = batch.execute().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].uri(), format!("{root}Products(1)"));
}

// =============================================================================
// Changesets
// =============================================================================

#[tokio::test]
async fn test_content_id_reference_across_members() {
    let (server, seen) = start(BatchConfig::default()).await;
    let client = ODataClient::new(
        BatchClientConfig::builder()
            .service_root(format!("{}/svc/", server.uri()))
            .build(),
    )
    .unwrap();

    let mut response = client
        .send(&[Changeset::new()
            .add_with_id("order", SubRequest::post("Orders").body("{}"))
            .add_with_id("line", SubRequest::post("$order/Lines").body("{}"))
            .into()])
        .await
        .unwrap();

    let mut items = response.response_iterator().unwrap();
    let mut item = items.next().await.unwrap().unwrap();
    let changeset = item.as_changeset_mut().unwrap();
    let line = changeset.member_by_content_id("line").unwrap().unwrap();
    assert_eq!(line.status(), StatusCode::CREATED);
    item.close();
    assert!(items.next().await.is_none());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[1].uri(), "Orders(1)/Lines");
}

#[test]
fn test_service_side_rejects_get_in_changeset() {
    let body = "--batch_1\r\n\
        Content-Type: multipart/mixed; boundary=cs_1\r\n\
        \r\n\
        --cs_1\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 1\r\n\
        \r\n\
        GET Products HTTP/1.1\r\n\
        \r\n\
        \r\n\
        --cs_1--\r\n\
        --batch_1--\r\n";

    let mut handler = EchoHandler::new();
    let err = BatchDispatcher::new(BatchConfig::default())
        .respond(Cursor::new(body), "multipart/mixed; boundary=batch_1", &mut handler)
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidChangesetMethod { line: 5, .. }));
    assert_eq!(BatchDispatcher::error_status(&err), StatusCode::BAD_REQUEST);
    assert!(handler.handled().is_empty());
}
