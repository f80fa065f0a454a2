mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use doco::adapters::session::USER_ID_KEY;
use tower::ServiceExt; // for oneshot

async fn send(router: axum::Router, req: Request<Body>) -> Response {
    router.oneshot(req).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_png_blob_is_downloaded() {
    let (gateway, _) = common::gateway(false).await;

    let response = send(gateway.router(), get("/api/blobs/a.png")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment;filename=a.png"
    );
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        "Wed, 01 May 2024 08:30:00 GMT"
    );
    assert!(response.headers().contains_key("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], common::PNG_BYTES);
}

#[tokio::test]
async fn test_unknown_mime_type_falls_back_to_file_extension() {
    let (gateway, _) = common::gateway(false).await;

    let response = send(gateway.router(), get("/api/blobs/photo.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let response = send(gateway.router(), get("/api/blobs/notes.bin")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
}

#[tokio::test]
async fn test_missing_blob_is_400_envelope() {
    let (gateway, _) = common::gateway(false).await;

    let response = send(gateway.router(), get("/api/blobs/nonexistent.png")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let json = json_body(response).await;
    assert!(json["err"].as_str().unwrap().contains("nonexistent.png"));
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_range_and_conditional_requests() {
    let (gateway, _) = common::gateway(false).await;

    let ranged = Request::builder()
        .uri("/api/blobs/notes.bin")
        .header(header::RANGE, "bytes=-3")
        .body(Body::empty())
        .unwrap();
    let response = send(gateway.router(), ranged).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 7-9/10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"789");

    let conditional = Request::builder()
        .uri("/api/blobs/a.png")
        .header(header::IF_MODIFIED_SINCE, "Wed, 01 May 2024 08:30:00 GMT")
        .body(Body::empty())
        .unwrap();
    let response = send(gateway.router(), conditional).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_head_request_has_headers_only() {
    let (gateway, _) = common::gateway(false).await;

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/api/blobs/a.png")
        .body(Body::empty())
        .unwrap();
    let response = send(gateway.router(), head).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let (gateway, _) = common::gateway(false).await;

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/blobs/a.png")
        .header(header::ORIGIN, "https://app.example.org")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-csrf-token")
        .body(Body::empty())
        .unwrap();
    let response = send(gateway.router(), preflight).await;

    assert!(response.status().is_success());
    let headers = response.headers();
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.org"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "300");
    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    for method in ["GET", "POST", "PUT", "DELETE", "OPTIONS"] {
        assert!(methods.contains(method), "missing {method} in {methods}");
    }
    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("x-csrf-token"));
}

#[tokio::test]
async fn test_check_answers_empty_object() {
    let (gateway, _) = common::gateway(false).await;

    let response = send(gateway.router(), get("/api/check")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({}));
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (gateway, _) = common::gateway(false).await;
    doco::metrics::record_blob_delivery("full");

    let response = send(gateway.router(), get("/api/metrics")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("doco_blob_deliveries_total"));
}

#[tokio::test]
async fn test_signed_in_user_required_when_configured() {
    let (gateway, sessions) = common::gateway(true).await;

    let response = send(gateway.router(), get("/api/blobs/a.png")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["err"], "unauthenticated");

    let mut record = doco::ports::SessionRecord::new();
    record.insert(USER_ID_KEY.to_string(), serde_json::json!(42));
    let token = sessions.issue(record).await.unwrap();

    let signed_in = Request::builder()
        .uri("/api/blobs/a.png")
        .header(
            header::COOKIE,
            format!("{}={token}", sessions.cookie_name()),
        )
        .body(Body::empty())
        .unwrap();
    let response = send(gateway.router(), signed_in).await;
    assert_eq!(response.status(), StatusCode::OK);
}
