//! Route-level tests against in-memory backends.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pixq_api::{create_router, ApiConfig, AppState};
use pixq_firestore::{JobStore, MemoryJobStore};
use pixq_models::{Image, ImageId, JobId};
use pixq_queue::{MemoryQueue, QueueJob, QueueMessage, WorkQueue};
use pixq_storage::MemoryObjectStore;

const BOUNDARY: &str = "pixq-test-boundary";

struct Harness {
    objects: Arc<MemoryObjectStore>,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ApiConfig::default())
    }

    fn with_config(config: ApiConfig) -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(5));
        let state = AppState::from_parts(config, objects.clone(), store.clone(), queue.clone());
        Self {
            objects,
            store,
            queue,
            app: create_router(state, None),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    async fn seed_image(&self, name: &str) -> Image {
        let image = Image::new(name, "image/png");
        self.objects.insert(&image.storage_key, b"png-bytes".to_vec(), "image/png");
        self.store.insert_image(&image).await.unwrap();
        image
    }

    fn published(&self) -> Vec<QueueMessage> {
        self.queue
            .published()
            .iter()
            .map(|p| QueueMessage::from_payload(p).unwrap())
            .collect()
    }
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    let body = multipart_body(field, file_name, data);
    Request::post("/images")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = h.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ready_with_reachable_backends() {
    let h = Harness::new();
    let (status, body) = h.send(get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["queueDepth"], 0);
    assert_eq!(body["deadLetterDepth"], 0);
    assert!(body.get("unavailable").is_none());
}

#[tokio::test]
async fn test_ready_reports_backlog_and_dead_letters() {
    let h = Harness::new();
    h.queue.push_raw("{not json");
    h.queue.publish(&QueueMessage::encode("a.png")).await.unwrap();
    let poison = h.queue.receive("c1").await.unwrap().unwrap();
    h.queue.discard(&poison, "malformed").await.unwrap();

    let (status, body) = h.send(get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queueDepth"], 1);
    assert_eq!(body["deadLetterDepth"], 1);
}

#[tokio::test]
async fn test_upload_stores_object_and_record() {
    let h = Harness::new();
    let (status, body) = h.send(upload_request("imageUpload", "cat.png", b"png-bytes")).await;
    assert_eq!(status, StatusCode::CREATED);

    let image_id = body["image"]["id"].as_str().unwrap().to_string();
    let storage_key = body["image"]["storageKey"].as_str().unwrap();
    assert_eq!(storage_key, format!("images/{}.png", image_id));
    assert_eq!(body["image"]["originalFileName"], "cat.png");
    assert!(h.objects.keys().contains(&storage_key.to_string()));

    let stored = h.store.get_image(&ImageId::from_string(image_id)).await.unwrap();
    assert!(stored.is_some());
    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn test_upload_requires_image_field() {
    let h = Harness::new();
    let (status, body) = h.send(upload_request("file", "cat.png", b"png-bytes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert!(h.objects.keys().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_non_image() {
    let h = Harness::new();
    let (status, _) = h.send(upload_request("imageUpload", "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.objects.keys().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_empty_file() {
    let h = Harness::new();
    let (status, _) = h.send(upload_request("imageUpload", "cat.png", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_body_limit() {
    let h = Harness::with_config(ApiConfig {
        max_body_size: 64,
        ..ApiConfig::default()
    });
    let (status, _) = h.send(upload_request("imageUpload", "cat.png", &[7u8; 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.objects.keys().is_empty());
}

#[tokio::test]
async fn test_transformations_persist_chain_and_publish_head() {
    let h = Harness::new();
    let image = h.seed_image("cat.png").await;

    let (status, body) = h
        .send(json_request(
            &format!("/images/{}/transformations", image.id),
            json!({"transformations": [
                {"jobType": "resizeToWidthPx", "width": 100},
                {"jobType": "resizeByPercentage", "percentage": 50}
            ]}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(body["invalid"].as_array().unwrap().is_empty());
    assert_eq!(jobs[0]["nextJobId"], jobs[1]["id"]);
    assert!(jobs[1].get("nextJobId").is_none());
    assert_eq!(jobs[0]["sourceKey"], image.storage_key.as_str());
    assert_eq!(jobs[1]["sourceKey"], jobs[0]["outputKey"]);

    assert_eq!(h.store.jobs_for_image(&image.id).len(), 2);

    let published = h.published();
    assert_eq!(published.len(), 1);
    let head_id = jobs[0]["id"].as_str().unwrap();
    assert_eq!(published[0].job_id(), Some(&JobId::from_string(head_id)));
}

#[tokio::test]
async fn test_partial_acceptance() {
    let h = Harness::new();
    let image = h.seed_image("cat.png").await;

    let (status, body) = h
        .send(json_request(
            &format!("/images/{}/transformations", image.id),
            json!({"transformations": [
                {"jobType": "resizeToWidthPx", "width": 100},
                {"jobType": "unknownType", "foo": 1}
            ]}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

    let invalid = body["invalid"].as_array().unwrap();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0]["index"], 1);
    assert_eq!(invalid[0]["descriptor"]["jobType"], "unknownType");

    assert_eq!(h.store.job_count(), 1);
    assert_eq!(h.published().len(), 1);
}

#[tokio::test]
async fn test_all_invalid_is_rejected_without_side_effects() {
    let h = Harness::new();
    let image = h.seed_image("cat.png").await;

    let (status, body) = h
        .send(json_request(
            &format!("/images/{}/transformations", image.id),
            json!({"transformations": [
                {"jobType": "resizeToWidthPx", "width": -3},
                {"jobType": "cropByPercentage", "percentage": 150}
            ]}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["jobs"].as_array().unwrap().is_empty());
    assert_eq!(body["invalid"].as_array().unwrap().len(), 2);
    assert_eq!(h.store.job_count(), 0);
    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn test_transformations_for_unknown_image() {
    let h = Harness::new();
    let (status, _) = h
        .send(json_request(
            "/images/missing/transformations",
            json!({"transformations": [{"jobType": "resizeToWidthPx", "width": 100}]}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.store.job_count(), 0);
}

#[tokio::test]
async fn test_transformations_reject_empty_and_malformed_bodies() {
    let h = Harness::new();
    let image = h.seed_image("cat.png").await;
    let uri = format!("/images/{}/transformations", image.id);

    let (status, _) = h.send(json_request(&uri, json!({"transformations": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let malformed = Request::post(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = h.send(malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_get_image_and_job() {
    let h = Harness::new();
    let image = h.seed_image("cat.png").await;

    let (status, body) = h.send(get(&format!("/images/{}", image.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], image.id.as_str());

    let (_, created) = h
        .send(json_request(
            &format!("/images/{}/transformations", image.id),
            json!({"transformations": [{"jobType": "resizeToHeightPx", "height": 40}]}),
        ))
        .await;
    let job_id = created["jobs"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = h.send(get(&format!("/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["params"]["jobType"], "resizeToHeightPx");

    let (status, _) = h.send(get("/jobs/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.send(get("/images/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_encode_publishes_single_stage_message() {
    let h = Harness::new();
    h.objects.insert("videos/clip.mov", b"mov".to_vec(), "video/quicktime");

    let (status, body) = h.send(json_request("/encode", json!({"name": "videos/clip.mov"}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["name"], "videos/clip.mov");

    let published = h.published();
    assert_eq!(published.len(), 1);
    assert!(matches!(&published[0].job, QueueJob::Encode { name } if name == "videos/clip.mov"));
}

#[tokio::test]
async fn test_encode_validation() {
    let h = Harness::new();

    let (status, _) = h.send(json_request("/encode", json!({"name": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.send(json_request("/encode", json!({"name": "docs/readme.txt"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.send(json_request("/encode", json!({"name": "videos/absent.mp4"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.send(json_request("/encode", json!({"name": "../escape.png"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = Harness::new();
    let request = Request::get("/health")
        .header("X-Request-ID", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = h.app.clone().oneshot(get("/health")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
