//! HTTP routing integration tests
//!
//! Requests go through the full router with `oneshot`; the classification
//! service is replaced by the scripted fake.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use declarant_ai::build_router;
use helpers::{csv_upload, multipart_body, multipart_content_type, numbered_csv, test_app_state, Behavior, FakeClassifier};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> Router {
    let client = Arc::new(FakeClassifier::new().with(1, Behavior::Fail("service unavailable")));
    build_router(test_app_state(client).await)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload(uri: &str, filename: &str, file: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(multipart_body(filename, file, fields)))
        .unwrap()
}

/// Poll progress until the batch leaves `processing`
async fn wait_for_batch(app: &Router, session_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/batches/{}/progress", session_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("batch {} did not finish", session_id);
}

#[tokio::test]
async fn test_health_reports_service_identity() {
    let app = test_app().await;
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["module"], "declarant-ai");
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["active_batches"], 0);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_upload_classify_review_export_delete() {
    let app = test_app().await;

    let file = b"description,quantity,unit\nGreen tea,1,kg\n,2,kg\nSteel bolts,3,pcs\n";
    let (status, body) = send(&app, upload("/batches", "goods.csv", file, &[])).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["total_rows"], 3);
    assert_eq!(body["classifiable"], 2);
    assert_eq!(body["excluded"], 1);
    assert_eq!(body["row_errors"][0]["row_index"], 1);
    assert_eq!(body["row_errors"][0]["kind"], "MISSING_FIELD");

    let session_id = body["session_id"].as_str().unwrap().to_string();
    let progress = wait_for_batch(&app, &session_id).await;
    assert_eq!(progress["state"], "completed");
    assert_eq!(progress["completed"], 2);
    // Row 1 is the excluded one, so the scripted failure never runs
    assert_eq!(progress["failed"], 0);

    let (status, session) = send(&app, get(&format!("/sessions/{}", session_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["rows"].as_array().unwrap().len(), 3);
    assert_eq!(session["rows"][1]["status"], "excluded");

    let (status, view) = send(&app, get(&format!("/sessions/{}/view?tier=high", session_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["total_matching"], 2);

    let (status, row) = send(
        &app,
        json_request(
            "PUT",
            &format!("/sessions/{}/rows/0/note", session_id),
            json!({"note": "origin certificate attached", "review_status": "confirmed"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["note"], "origin certificate attached");
    assert_eq!(row["review_status"], "confirmed");

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            &format!("/sessions/{}/rows/0/note", session_id),
            json!({"review_status": "maybe"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let response = app
        .clone()
        .oneshot(get(&format!("/sessions/{}/export?format=csv", session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("goods_classified_"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("origin certificate attached"));

    let (status, _) = send(&app, get(&format!("/sessions/{}/export?format=pdf", session_id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, list) = send(&app, get("/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["sessions"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/statistics")).await;
    assert_eq!(status, StatusCode::OK);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/sessions/{}", session_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get(&format!("/sessions/{}", session_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_classification_failure_recorded_per_row() {
    let app = test_app().await;

    let (status, body) = send(&app, upload("/batches", "goods.csv", &numbered_csv(3), &[])).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let progress = wait_for_batch(&app, &session_id).await;
    assert_eq!(progress["state"], "completed");
    assert_eq!(progress["failed"], 1);

    let (_, session) = send(&app, get(&format!("/sessions/{}", session_id))).await;
    assert_eq!(session["rows"][1]["status"], "failed");
    assert_eq!(session["rows"][1]["result"]["confidence"], 0.0);
    assert_eq!(session["errors"][0]["kind"], "CLASSIFICATION");
}

#[tokio::test]
async fn test_oversized_upload_rejected_with_413() {
    let app = test_app().await;

    let (status, body) = send(&app, upload("/batches", "big.csv", &numbered_csv(1001), &[])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "BATCH_TOO_LARGE");

    let (_, list) = send(&app, get("/sessions")).await;
    assert!(list["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_over_file_size_cap_rejected_with_file_too_large() {
    let app = test_app().await;

    let (status, _) = send(&app, json_request("PUT", "/settings", json!({"max_file_size_mb": 1}))).await;
    assert_eq!(status, StatusCode::OK);

    let mut file = b"description,notes\nGreen tea,".to_vec();
    file.extend(std::iter::repeat(b'x').take(1024 * 1024));
    file.extend_from_slice(b"\n");

    let (status, body) = send(&app, upload("/batches", "big.csv", &file, &[])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "FILE_TOO_LARGE");

    let (_, list) = send(&app, get("/sessions")).await;
    assert!(list["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_size_follows_configured_cap() {
    let app = test_app().await;

    // Larger than the default request body limit, well under max_file_size_mb
    let mut file = b"description,notes\n".to_vec();
    for name in ["Green tea", "Steel bolts", "Cotton shirt"] {
        file.extend_from_slice(name.as_bytes());
        file.push(b',');
        file.extend(std::iter::repeat(b'x').take(1024 * 1024));
        file.push(b'\n');
    }
    assert!(file.len() > 3 * 1024 * 1024);

    let (status, body) = send(&app, upload("/batches/preview", "wide.csv", &file, &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_rows"], 3);
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let app = test_app().await;

    let (status, _) = send(&app, upload("/batches", "goods.pdf", b"%PDF", &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        upload("/batches", "goods.csv", &csv_upload(&["Tea"]), &[("agent_type", "poetry")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        upload("/batches", "goods.csv", &csv_upload(&["Tea"]), &[("mapping", r#"{"description": "Nope"}"#)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preview_creates_no_session() {
    let app = test_app().await;

    let file = "Наименование товара;Кол-во;Ед.\nЧай зелёный;2;кг\nБолты;10;шт\n".as_bytes();
    let (status, body) = send(&app, upload("/batches/preview", "goods.csv", file, &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_rows"], 2);
    assert_eq!(body["inferred_mapping"]["description"], "Наименование товара");
    assert_eq!(body["rows"][0]["Наименование товара"], "Чай зелёный");

    let (_, list) = send(&app, get("/sessions")).await;
    assert!(list["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_and_finished_batches() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/batches/{}/cancel", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, upload("/batches", "goods.csv", &csv_upload(&["Tea"]), &[])).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();
    wait_for_batch(&app, &session_id).await;

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/batches/{}/cancel", session_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_settings_update_and_validation() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openai_api_key_configured"], false);
    assert_eq!(body["classifier"]["max_batch_size"], 1000);

    let (status, _) = send(&app, json_request("PUT", "/settings", json!({"concurrency_limit": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, json_request("PUT", "/settings", json!({"colour": "blue"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, json_request("PUT", "/settings", json!({"openai_api_key": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            "/settings",
            json!({"results_per_page": 25, "max_batch_size": 2, "openai_api_key": "sk-test"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["classifier"]["results_per_page"], 25);
    assert_eq!(body["openai_api_key_configured"], true);

    // New cap applies to the next upload
    let (status, _) = send(&app, upload("/batches", "goods.csv", &numbered_csv(3), &[])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["status"], "ok");
}
