//! REST client and repository tests against a mock Firestore.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use safestream_models::{SensitivityStatus, VideoId, VideoPatch, VideoQuery, VideoStatus};

use crate::client::{FirestoreClient, FirestoreConfig};
use crate::error::FirestoreError;
use crate::repos::FirestoreVideoStore;
use crate::retry::RetryConfig;
use crate::store::VideoStore;

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

async fn client(server: &MockServer) -> FirestoreClient {
    FirestoreClient::new(FirestoreConfig::emulator(server.uri(), "test-project").with_retry(fast_retry()))
        .await
        .unwrap()
}

fn video_doc(id: &str, status: &str) -> serde_json::Value {
    json!({
        "name": format!("projects/test-project/databases/(default)/documents/videos/{}", id),
        "fields": {
            "title": {"stringValue": "Clip"},
            "filename": {"stringValue": "video-1.mp4"},
            "originalName": {"stringValue": "clip.mp4"},
            "size": {"integerValue": "1024"},
            "uploader": {"stringValue": "u1"},
            "status": {"stringValue": status},
            "sensitivityStatus": {"stringValue": "pending"},
            "createdAt": {"timestampValue": "2024-05-01T10:00:00.000000Z"},
            "updatedAt": {"timestampValue": "2024-05-01T10:00:00.000000Z"}
        }
    })
}

#[tokio::test]
async fn test_get_document_found_and_missing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .and(header("authorization", "Bearer owner"))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("v1", "pending")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/videos/missing", DOCS)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);

    let video = store.find_by_id(&VideoId::from("v1")).await.unwrap().unwrap();
    assert_eq!(video.id.as_str(), "v1");
    assert_eq!(video.size, 1024);
    assert_eq!(video.status, VideoStatus::Pending);

    assert!(store
        .find_by_id(&VideoId::from("missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_update_sends_mask_and_existence_precondition() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .and(query_param("currentDocument.exists", "true"))
        .and(body_partial_json(json!({
            "fields": {
                "status": {"stringValue": "completed"},
                "sensitivityStatus": {"stringValue": "safe"}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("v1", "completed")))
        .expect(1)
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    store
        .update(&VideoId::from("v1"), &VideoPatch::completed(SensitivityStatus::Safe))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/videos/gone", DOCS)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "status": "NOT_FOUND"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    let err = store
        .update(&VideoId::from("gone"), &VideoPatch::status(VideoStatus::Failed))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "status": "UNAUTHENTICATED", "message": "ACCESS_TOKEN_EXPIRED"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("v1", "processing")))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let doc = client.get_document("videos", "v1").await.unwrap();
    assert!(doc.is_some());
}

#[tokio::test]
async fn test_other_401_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .get_document("videos", "v1")
        .await
        .unwrap_err();
    assert!(matches!(err, FirestoreError::AuthError(_)));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("v1", "pending")))
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    assert!(store.find_by_id(&VideoId::from("v1")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .get_document("videos", "v1")
        .await
        .unwrap_err();
    assert_eq!(err.retry_after_ms(), Some(7000));
}

#[tokio::test]
async fn test_find_runs_structured_query() {
    let server = MockServer::start().await;

    let mut small = video_doc("small", "completed");
    small["fields"]["size"] = json!({"integerValue": "10"});

    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCS)))
        .and(body_partial_json(json!({
            "structuredQuery": {"from": [{"collectionId": "videos"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"document": video_doc("big", "completed"), "readTime": "2024-05-01T10:00:00Z"},
            {"document": small, "readTime": "2024-05-01T10:00:00Z"},
            {"readTime": "2024-05-01T10:00:00Z"}
        ])))
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    let query = VideoQuery {
        status: Some(VideoStatus::Completed),
        min_size: Some(100),
        ..Default::default()
    };

    let videos = store.find(&query).await.unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].id.as_str(), "big");
}

#[tokio::test]
async fn test_delete_missing_document_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    store.delete(&VideoId::from("v1")).await.unwrap();
}

fn video_doc_at(id: &str, status: &str, update_time: &str) -> serde_json::Value {
    let mut doc = video_doc(id, status);
    doc["updateTime"] = json!(update_time);
    doc
}

#[tokio::test]
async fn test_fail_unfinished_writes_with_update_time_precondition() {
    let server = MockServer::start().await;
    let stamp = "2024-05-01T10:00:00.123456Z";

    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc_at("v1", "processing", stamp)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .and(query_param("currentDocument.updateTime", stamp))
        .and(body_partial_json(json!({
            "fields": {"status": {"stringValue": "failed"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("v1", "failed")))
        .expect(1)
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    assert!(store.fail_unfinished(&VideoId::from("v1")).await.unwrap());
}

#[tokio::test]
async fn test_fail_unfinished_skips_completed_record() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc_at(
            "v1",
            "completed",
            "2024-05-01T10:00:00Z",
        )))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    assert!(!store.fail_unfinished(&VideoId::from("v1")).await.unwrap());
}

#[tokio::test]
async fn test_fail_unfinished_rereads_after_lost_race() {
    let server = MockServer::start().await;

    // First read sees the run in flight, the second sees it completed
    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc_at(
            "v1",
            "processing",
            "2024-05-01T10:00:00Z",
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc_at(
            "v1",
            "completed",
            "2024-05-01T10:00:01Z",
        )))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{}/videos/v1", DOCS)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "status": "FAILED_PRECONDITION"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = FirestoreVideoStore::new(client(&server).await);
    assert!(!store.fail_unfinished(&VideoId::from("v1")).await.unwrap());
}
