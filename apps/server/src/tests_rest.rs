use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::test_support::{multipart_file, Harness};

const BOUNDARY: &str = "docqa-test-boundary";

async fn response_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&body).expect("response should be json")
}

fn upload_request(filename: &str, content_type: &str, body: &[u8]) -> Request<Body> {
    Request::builder()
        .uri("/upload")
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_file(
            BOUNDARY,
            filename,
            content_type,
            body,
        )))
        .expect("failed to build upload request")
}

fn query_request(payload: Value) -> Request<Body> {
    Request::builder()
        .uri("/query")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("failed to build query request")
}

#[tokio::test]
async fn health_reports_backends_and_index_state() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = response_json(response).await;
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["emb_url"], harness.emb_server.uri());
    assert_eq!(payload["llm_url"], harness.llm_server.uri());
    assert_eq!(payload["storage"], ":memory:");
    assert_eq!(payload["enable_table_index"], true);
}

#[tokio::test]
async fn upload_then_query_answers_from_the_document() {
    let harness = Harness::new("RAG는 검색 증강 생성 기법입니다.").await;

    let response = harness
        .app()
        .oneshot(upload_request(
            "a.txt",
            "text/plain",
            "RAG는 검색 증강 생성 기법이다.".as_bytes(),
        ))
        .await
        .expect("upload should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = response_json(response).await;
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["chunks"], 1);
    assert_eq!(payload["tables"], 0);
    assert_eq!(payload["pages"], 0);

    let response = harness
        .app()
        .oneshot(query_request(json!({ "question": "RAG가 뭐야?" })))
        .await
        .expect("query should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = response_json(response).await;
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["mode"], "json");
    let rag_mode = payload["rag_mode"].as_str().expect("rag_mode should exist");
    assert!(
        rag_mode == "rag-plain" || rag_mode == "rag-table",
        "expected a document mode, got {rag_mode}"
    );

    let sources = payload["sources"].as_array().expect("sources should exist");
    assert!(sources
        .iter()
        .any(|source| source["filename"] == "a.txt"));
}

#[tokio::test]
async fn missing_question_is_a_bad_request() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(query_request(json!({})))
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "MISSING_QUESTION");
}

#[tokio::test]
async fn oversized_question_is_rejected_with_413() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(query_request(json!({ "question": "가".repeat(8_001) })))
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "QUESTION_TOO_LONG");
}

#[tokio::test]
async fn get_query_with_empty_index_falls_back_to_general_mode() {
    let harness = Harness::new("일반 지식으로 답합니다.").await;

    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/query/%EC%9A%B0%EB%A6%AC%20%ED%9A%8C%EC%82%AC%20%EC%97%B0%EC%B0%A8%20%EA%B7%9C%EC%A0%95%EC%9D%80%3F")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = response_json(response).await;
    assert_eq!(payload["rag_mode"], "general");
    assert_eq!(payload["sources"], json!([]));
}

#[tokio::test]
async fn smalltalk_query_returns_no_sources_even_with_indexed_documents() {
    let harness = Harness::new("안녕하세요!").await;

    harness
        .app()
        .oneshot(upload_request(
            "a.txt",
            "text/plain",
            "RAG는 검색 증강 생성 기법이다.".as_bytes(),
        ))
        .await
        .expect("upload should succeed");

    let response = harness
        .app()
        .oneshot(query_request(json!({ "question": "안녕" })))
        .await
        .expect("query should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = response_json(response).await;
    assert_eq!(payload["rag_mode"], "smalltalk");
    assert_eq!(payload["sources"], json!([]));
}

#[tokio::test]
async fn unsupported_upload_type_is_a_bad_request() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(upload_request(
            "tool.exe",
            "application/octet-stream",
            b"MZ",
        ))
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "UNSUPPORTED_TYPE");
}

#[tokio::test]
async fn empty_upload_is_a_bad_request() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(upload_request("a.txt", "text/plain", b""))
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "EMPTY_FILE");
}

#[tokio::test]
async fn upload_without_file_field_is_a_bad_request() {
    let harness = Harness::new("무관").await;

    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{BOUNDARY}--\r\n"
    );
    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/upload")
                .method("POST")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "MISSING_FILE");
}

#[tokio::test]
async fn hwp_upload_without_converter_is_unsupported_media_type() {
    let harness = Harness::new("무관").await;

    let response = harness
        .app()
        .oneshot(upload_request(
            "보고서.hwp",
            "application/x-hwp",
            b"HWP Document File",
        ))
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let payload = response_json(response).await;
    assert_eq!(payload["error"]["code"], "HWP_CONVERTER_MISSING");
}
