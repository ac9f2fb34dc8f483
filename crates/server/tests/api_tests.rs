//! Integration tests for the HTTP API.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use common::{TestServer, UploadForm, seeded_bytes};
use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
use stowage_metadata::IdempotencyRepo;
use time::OffsetDateTime;
use uuid::Uuid;

fn owner(id: i64) -> OwnerId {
    OwnerId::new(id).unwrap()
}

async fn record_status(server: &TestServer, user: i64, key: Uuid) -> Option<IdempotencyStatus> {
    server
        .metadata()
        .find_by_owner_and_key(owner(user), IdempotencyKey::parse(&key.to_string()).unwrap())
        .await
        .unwrap()
        .map(|row| row.status().unwrap())
}

#[tokio::test]
async fn test_upload_hello_returns_file_metadata() {
    let server = TestServer::new().await;
    let key = Uuid::new_v4();

    let response = server
        .send(UploadForm::new(1, key, b"hello").into_request())
        .await;

    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["file_size"], 5);
    assert_eq!(response.body["original_filename"], "hello.txt");
    assert_eq!(response.body["content_type"], "text/plain");
    assert!(response.body["file_id"].as_i64().unwrap() > 0);
    assert!(
        response.body["download_url"]
            .as_str()
            .unwrap()
            .contains("user-1/")
    );
    assert!(response.body.get("message").is_none());

    assert_eq!(
        record_status(&server, 1, key).await,
        Some(IdempotencyStatus::Completed)
    );
    assert_eq!(server.object_count(), 1);
}

#[tokio::test]
async fn test_replay_returns_identical_body_without_writing() {
    let server = TestServer::new().await;
    let key = Uuid::new_v4();

    let first = server
        .send(UploadForm::new(1, key, b"hello").into_request())
        .await;
    let second = server
        .send(UploadForm::new(1, key, b"a different body").into_request())
        .await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.raw, second.raw);
    assert_eq!(server.object_count(), 1);

    let listed = server.request("GET", "/files", Some(1)).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_key_different_owners_are_independent() {
    let server = TestServer::new().await;
    let key = Uuid::new_v4();

    let a = server
        .send(UploadForm::new(1, key, b"one").into_request())
        .await;
    let b = server
        .send(UploadForm::new(2, key, b"two!").into_request())
        .await;

    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);
    assert_ne!(a.body["file_id"], b.body["file_id"]);
    assert_eq!(b.body["file_size"], 4);
}

#[tokio::test]
async fn test_in_flight_duplicate_gets_conflict() {
    let server = TestServer::new().await;
    let key = IdempotencyKey::new();
    server
        .metadata()
        .insert_in_progress(owner(1), key, None, OffsetDateTime::now_utc())
        .await
        .unwrap();

    let response = server
        .send(UploadForm::new(1, *key.as_uuid(), b"hello").into_request())
        .await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["code"], "IDEMPOTENCY_CONFLICT");
    assert_eq!(response.headers.get("retry-after").unwrap(), "1");
    assert_eq!(server.object_count(), 0);
}

#[tokio::test]
async fn test_failed_record_can_be_retried() {
    let server = TestServer::new().await;
    let key = IdempotencyKey::new();
    let now = OffsetDateTime::now_utc();
    let row = server
        .metadata()
        .insert_in_progress(owner(1), key, None, now)
        .await
        .unwrap();
    server
        .metadata()
        .mark_failed(row.id, "storage went away", now)
        .await
        .unwrap();

    let response = server
        .send(UploadForm::new(1, *key.as_uuid(), b"hello").into_request())
        .await;

    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["file_size"], 5);
    assert_eq!(
        record_status(&server, 1, *key.as_uuid()).await,
        Some(IdempotencyStatus::Completed)
    );
}

#[tokio::test]
async fn test_saga_header_is_linked() {
    let server = TestServer::new().await;
    let key = Uuid::new_v4();
    let saga = Uuid::new_v4();
    let mut form = UploadForm::new(1, key, b"hello");
    form.saga_id = Some(saga.to_string());

    let response = server.send(form.into_request()).await;
    assert_eq!(response.status, StatusCode::OK);

    let row = server
        .metadata()
        .find_by_owner_and_key(owner(1), IdempotencyKey::parse(&key.to_string()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.saga_id, Some(saga));
}

#[tokio::test]
async fn test_malformed_headers_are_rejected_before_any_write() {
    let server = TestServer::new().await;

    let mut bad_key = UploadForm::new(1, Uuid::new_v4(), b"hello");
    bad_key.key = Some("not-a-uuid".to_string());
    let mut missing_key = UploadForm::new(1, Uuid::new_v4(), b"hello");
    missing_key.key = None;
    let mut missing_user = UploadForm::new(1, Uuid::new_v4(), b"hello");
    missing_user.user_id = None;
    let mut zero_user = UploadForm::new(1, Uuid::new_v4(), b"hello");
    zero_user.user_id = Some("0".to_string());
    let mut bad_saga = UploadForm::new(1, Uuid::new_v4(), b"hello");
    bad_saga.saga_id = Some("saga".to_string());

    for form in [bad_key, missing_key, missing_user, zero_user, bad_saga] {
        let response = server.send(form.clone().into_request()).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{form:?}");
        assert_eq!(response.body["code"], "INVALID_ARGUMENT");
    }

    assert_eq!(server.object_count(), 0);
    let listed = server.request("GET", "/files", Some(1)).await;
    assert!(listed.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_file_field_is_rejected() {
    let server = TestServer::new().await;
    let key = Uuid::new_v4();
    let mut form = UploadForm::new(1, key, b"hello");
    form.field = "attachment".to_string();

    let response = server.send(form.into_request()).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(record_status(&server, 1, key).await, None);
}

#[tokio::test]
async fn test_oversized_upload_fails_the_record() {
    let server = TestServer::with_config(|config| {
        config.server.max_upload_size_bytes = 1024;
    })
    .await;
    let key = Uuid::new_v4();

    let response = server
        .send(
            UploadForm::new(1, key, b"")
                .with_data(seeded_bytes(7, 4096))
                .into_request(),
        )
        .await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body["code"], "FILE_TOO_LARGE");
    assert_eq!(
        record_status(&server, 1, key).await,
        Some(IdempotencyStatus::Failed)
    );
    assert_eq!(server.object_count(), 0);

    // The same key may be retried with a smaller file.
    let retry = server
        .send(UploadForm::new(1, key, b"small").into_request())
        .await;
    assert_eq!(retry.status, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_file_is_accepted() {
    let server = TestServer::new().await;
    let response = server
        .send(
            UploadForm::new(1, Uuid::new_v4(), b"")
                .with_data(Bytes::new())
                .into_request(),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["file_size"], 0);
}

#[tokio::test]
async fn test_file_endpoints_are_scoped_to_owner() {
    let server = TestServer::new().await;
    let upload = server
        .send(UploadForm::new(1, Uuid::new_v4(), b"hello").into_request())
        .await;
    let file_id = upload.body["file_id"].as_i64().unwrap();

    let info = server
        .request("GET", &format!("/files/{file_id}"), Some(1))
        .await;
    assert_eq!(info.status, StatusCode::OK);
    assert_eq!(info.body["file_size"], 5);
    assert!(info.body.get("download_url").is_none());

    let download = server
        .request("GET", &format!("/files/{file_id}/download"), Some(1))
        .await;
    assert_eq!(download.status, StatusCode::OK);
    assert!(download.body["download_url"].as_str().unwrap().contains("expires="));

    for (method, uri) in [
        ("GET", format!("/files/{file_id}")),
        ("GET", format!("/files/{file_id}/download")),
        ("DELETE", format!("/files/{file_id}")),
    ] {
        let other = server.request(method, &uri, Some(2)).await;
        assert_eq!(other.status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(other.body["code"], "RESOURCE_NOT_FOUND");
    }

    let missing_user = server
        .request("GET", &format!("/files/{file_id}"), None)
        .await;
    assert_eq!(missing_user.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_removes_object_and_record() {
    let server = TestServer::new().await;
    let upload = server
        .send(UploadForm::new(1, Uuid::new_v4(), b"hello").into_request())
        .await;
    let file_id = upload.body["file_id"].as_i64().unwrap();
    assert_eq!(server.object_count(), 1);

    let deleted = server
        .request("DELETE", &format!("/files/{file_id}"), Some(1))
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(server.object_count(), 0);

    let gone = server
        .request("GET", &format!("/files/{file_id}"), Some(1))
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_files_paginates_and_validates() {
    let server = TestServer::new().await;
    for _ in 0..3 {
        let response = server
            .send(UploadForm::new(1, Uuid::new_v4(), b"hello").into_request())
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let page0 = server.request("GET", "/files?page=0&size=2", Some(1)).await;
    let page1 = server.request("GET", "/files?page=1&size=2", Some(1)).await;
    assert_eq!(page0.body.as_array().unwrap().len(), 2);
    assert_eq!(page1.body.as_array().unwrap().len(), 1);

    let ids: Vec<i64> = page0
        .body
        .as_array()
        .unwrap()
        .iter()
        .chain(page1.body.as_array().unwrap())
        .map(|f| f["file_id"].as_i64().unwrap())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(ids, sorted, "files should be newest first");

    for query in ["page=-1", "size=0", "size=101", "size=-5"] {
        let response = server
            .request("GET", &format!("/files?{query}"), Some(1))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(response.body["code"], "INVALID_ARGUMENT");
    }
}

#[tokio::test]
async fn test_health_reports_backends() {
    let server = TestServer::new().await;
    let response = server.request("GET", "/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["storage"], "filesystem");
    assert_eq!(response.body["metadata"], "sqlite");
}

#[tokio::test]
async fn test_metrics_endpoint_follows_config() {
    stowage_server::metrics::register_metrics();

    let enabled = TestServer::new().await;
    enabled
        .send(UploadForm::new(1, Uuid::new_v4(), b"hello").into_request())
        .await;
    let response = enabled.request("GET", "/metrics", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let text = String::from_utf8(response.raw).unwrap();
    assert!(text.contains("stowage_uploads_total"));

    let disabled = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    let response = disabled.request("GET", "/metrics", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
