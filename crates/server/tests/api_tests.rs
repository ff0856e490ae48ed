//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use common::{TestServer, clinic_metadata, pdf_bytes};
use serde_json::Value;
use tower::ServiceExt;

const OCTET: &str = "application/offset+octet-stream";

/// Send a request and collect status, headers and the JSON body (if any).
async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, String)],
    body: Body,
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, headers, json)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .unwrap_or_else(|| panic!("missing {name} header"))
        .to_str()
        .unwrap()
}

/// POST /v1/files with the given length and metadata header.
async fn create(
    router: &axum::Router,
    length: u64,
    metadata: &str,
    key: Option<&str>,
) -> (StatusCode, HeaderMap, Value) {
    let mut headers = vec![
        ("Tus-Resumable", "1.0.0".to_string()),
        ("Upload-Length", length.to_string()),
        ("Upload-Metadata", metadata.to_string()),
    ];
    if let Some(key) = key {
        headers.push(("Upload-Key", key.to_string()));
    }
    send(router, "POST", "/v1/files", &headers, Body::empty()).await
}

async fn patch(
    router: &axum::Router,
    key: &str,
    offset: u64,
    data: &[u8],
) -> (StatusCode, HeaderMap, Value) {
    send(
        router,
        "PATCH",
        &format!("/v1/files/{key}"),
        &[
            ("Tus-Resumable", "1.0.0".to_string()),
            ("Content-Type", OCTET.to_string()),
            ("Upload-Offset", offset.to_string()),
        ],
        Body::from(data.to_vec()),
    )
    .await
}

#[tokio::test]
async fn test_options_advertises_capabilities() {
    let server = TestServer::new().await;

    let (status, headers, _) = send(&server.router, "OPTIONS", "/v1/files", &[], Body::empty()).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(header(&headers, "tus-resumable"), "1.0.0");
    assert_eq!(header(&headers, "tus-version"), "1.0.0");
    assert_eq!(header(&headers, "tus-extension"), "creation");
    assert_eq!(
        header(&headers, "tus-max-size"),
        server.state.config.server.max_upload_size.to_string()
    );
}

#[tokio::test]
async fn test_full_upload_flow() {
    let server = TestServer::new().await;
    let router = &server.router;
    let data = pdf_bytes(21, 2048);
    let metadata = clinic_metadata(Some("Lab Results.pdf"), "application/pdf").encode();

    let (status, headers, _) = create(router, data.len() as u64, &metadata, Some("flow1")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(header(&headers, "location"), "/v1/files/flow1");
    assert_eq!(header(&headers, "upload-key"), "flow1");
    assert_eq!(header(&headers, "upload-offset"), "0");
    assert_eq!(header(&headers, "tus-resumable"), "1.0.0");

    let (status, _, _) = patch(router, "flow1", 0, &data[..1024]).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, headers, _) =
        send(router, "HEAD", "/v1/files/flow1", &[], Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "upload-offset"), "1024");
    assert_eq!(header(&headers, "upload-length"), "2048");
    assert_eq!(header(&headers, "cache-control"), "no-store");

    let (status, headers, body) = patch(router, "flow1", 0, &data[..1024]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "offset_mismatch");
    assert_eq!(header(&headers, "tus-resumable"), "1.0.0");

    let (status, headers, _) = patch(router, "flow1", 1024, &data[1024..]).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(header(&headers, "upload-offset"), "2048");

    let (status, _, result) =
        send(router, "GET", "/v1/uploads/flow1", &[], Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["url"], "public://2024-03/flow1/Lab Results.pdf");
    assert_eq!(result["mime_type"], "application/pdf");
    assert_eq!(result["filename"], "Lab Results.pdf");

    // The session is gone once committed.
    let (status, _, _) = send(router, "HEAD", "/v1/files/flow1", &[], Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, outcome) = send(
        router,
        "POST",
        "/v1/uploads/flow1/complete",
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["disposition"], "reused");
    assert_eq!(outcome["object_id"], result["object_id"]);
}

#[tokio::test]
async fn test_generated_key_is_returned() {
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("a.pdf"), "application/pdf").encode();

    let (status, headers, _) = create(&server.router, 10, &metadata, None).await;

    assert_eq!(status, StatusCode::CREATED);
    let key = header(&headers, "upload-key");
    assert!(!key.is_empty());
    assert_eq!(header(&headers, "location"), format!("/v1/files/{key}"));
}

#[tokio::test]
async fn test_incomplete_metadata_is_unprocessable() {
    let server = TestServer::new().await;
    let mut metadata = clinic_metadata(Some("a.pdf"), "application/pdf");
    metadata.filetype = None;

    let (status, headers, body) = create(&server.router, 10, &metadata.encode(), None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "incomplete_metadata");
    assert_eq!(header(&headers, "tus-resumable"), "1.0.0");
}

#[tokio::test]
async fn test_missing_metadata_header_is_unprocessable() {
    let server = TestServer::new().await;

    let (status, _, body) = send(
        &server.router,
        "POST",
        "/v1/files",
        &[
            ("Tus-Resumable", "1.0.0".to_string()),
            ("Upload-Length", "10".to_string()),
        ],
        Body::empty(),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "incomplete_metadata");
}

#[tokio::test]
async fn test_unsupported_type_is_refused_at_start() {
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("setup.exe"), "application/exe").encode();

    let (status, _, body) = create(&server.router, 10, &metadata, None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "unsupported_file_type");
}

#[tokio::test]
async fn test_malformed_metadata_is_bad_request() {
    let server = TestServer::new().await;

    let (status, _, body) = create(&server.router, 10, "filename !!!notbase64", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_metadata");
}

#[tokio::test]
async fn test_missing_upload_length_is_bad_request() {
    let server = TestServer::new().await;

    let (status, _, body) = send(
        &server.router,
        "POST",
        "/v1/files",
        &[("Tus-Resumable", "1.0.0".to_string())],
        Body::empty(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_wrong_protocol_version_is_refused() {
    let server = TestServer::new().await;

    let (status, _, body) = send(
        &server.router,
        "POST",
        "/v1/files",
        &[
            ("Tus-Resumable", "0.2.2".to_string()),
            ("Upload-Length", "10".to_string()),
        ],
        Body::empty(),
    )
    .await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "unsupported_version");
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("big.pdf"), "application/pdf").encode();

    let (status, _, body) = create(&server.router, 20 * 1024 * 1024, &metadata, None).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "file_too_large");
}

#[tokio::test]
async fn test_patch_requires_offset_content_type() {
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("a.pdf"), "application/pdf").encode();
    create(&server.router, 4, &metadata, Some("ctype")).await;

    let (status, _, body) = send(
        &server.router,
        "PATCH",
        "/v1/files/ctype",
        &[
            ("Content-Type", "application/json".to_string()),
            ("Upload-Offset", "0".to_string()),
        ],
        Body::from("abcd"),
    )
    .await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "unsupported_media_type");
}

#[tokio::test]
async fn test_zero_length_upload_completes_at_creation() {
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("empty.txt"), "text/txt").encode();

    let (status, _, body) = create(&server.router, 0, &metadata, Some("empty1")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["disposition"], "created");
    assert_eq!(body["url"], "public://2024-03/empty1/empty.txt");

    let placed = server.scheme_root("public").join("2024-03/empty1/empty.txt");
    assert_eq!(tokio::fs::metadata(placed).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_upload_is_not_found() {
    let server = TestServer::new().await;

    let (status, _, body) =
        send(&server.router, "GET", "/v1/uploads/missing", &[], Body::empty()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "upload_not_found");
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, _, body) = send(&server.router, "GET", "/v1/health", &[], Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    berth_server::metrics::register_metrics();
    let server = TestServer::new().await;
    let metadata = clinic_metadata(Some("m.pdf"), "application/pdf").encode();
    create(&server.router, 10, &metadata, None).await;

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("berth_upload_sessions_created_total"));
}
