//! Route handlers of the API gateway.
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    core::{Blob, ByteRange},
    error::{ErrorResponse, Reply},
    metrics,
    ports::content_store::ContentStore,
};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Shared state of the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<dyn ContentStore>,
}

/// `GET /api/blobs/{blob_id}`: download a stored blob.
pub async fn get_blob(
    State(state): State<GatewayState>,
    Path(blob_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match state.store.find_blob(&blob_id).await {
        Ok(blob) => serve_blob(&blob, &method, &headers, Utc::now()),
        Err(e) => {
            tracing::warn!(blob = %blob_id, error = %e, "blob lookup failed");
            metrics::record_blob_delivery("error");
            ErrorResponse::new(e).into_response_with(StatusCode::BAD_REQUEST)
        }
    }
}

/// Recorded MIME type, else a guess from the file extension.
fn content_type(blob: &Blob) -> String {
    blob.content_type().map_or_else(
        || {
            mime_guess::from_path(&blob.file_name)
                .first_or_octet_stream()
                .to_string()
        },
        str::to_string,
    )
}

/// Build the download response for `blob`, honouring conditional and range
/// requests. `now` stands in for blobs without a timestamp.
pub fn serve_blob(blob: &Blob, method: &Method, headers: &HeaderMap, now: DateTime<Utc>) -> Response {
    let modified_at = blob.modified_at.unwrap_or(now);
    let last_modified = modified_at.format(HTTP_DATE_FORMAT).to_string();
    let len = blob.len();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type(blob))
        .header(header::CONTENT_DISPOSITION, blob.content_disposition())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::LAST_MODIFIED, &last_modified);

    let conditional = *method == Method::GET || *method == Method::HEAD;

    if conditional && not_modified_since(headers, modified_at) {
        metrics::record_blob_delivery("not_modified");
        return finish(builder.status(StatusCode::NOT_MODIFIED), Body::empty());
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .filter(|_| conditional && if_range_matches(headers, modified_at))
        .map_or(ByteRange::Full, |value| ByteRange::parse(value, len));

    match range {
        ByteRange::Full => {
            metrics::record_blob_delivery("full");
            finish(
                builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, len),
                Body::from(blob.content.clone()),
            )
        }
        ByteRange::Partial { start, end } => {
            metrics::record_blob_delivery("partial");
            let body = blob.content.slice(start as usize..=end as usize);
            finish(
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))
                    .header(header::CONTENT_LENGTH, end - start + 1),
                Body::from(body),
            )
        }
        ByteRange::Unsatisfiable => {
            metrics::record_blob_delivery("unsatisfiable");
            finish(
                builder
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{len}")),
                Body::empty(),
            )
        }
    }
}

fn finish(builder: axum::http::response::Builder, body: Body) -> Response {
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build blob response");
        ErrorResponse::new(e).into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn parse_http_date(value: &HeaderValue) -> Option<DateTime<Utc>> {
    let value = value.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// HTTP dates carry whole seconds only.
fn not_modified_since(headers: &HeaderMap, modified_at: DateTime<Utc>) -> bool {
    if headers.contains_key(header::IF_NONE_MATCH) {
        return false;
    }
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(parse_http_date)
        .is_some_and(|since| modified_at.timestamp() <= since.timestamp())
}

fn if_range_matches(headers: &HeaderMap, modified_at: DateTime<Utc>) -> bool {
    match headers.get(header::IF_RANGE) {
        None => true,
        Some(value) => {
            parse_http_date(value).is_some_and(|date| date.timestamp() == modified_at.timestamp())
        }
    }
}

/// `GET /api/metrics`: Prometheus text exposition.
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics::TEXT_CONTENT_TYPE)],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            ErrorResponse::new(e).into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {}

/// `GET /api/check`: liveness probe answering `{}`.
pub async fn check() -> Reply<CheckResponse> {
    Reply::ok(CheckResponse {})
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use chrono::TimeZone;

    use super::*;

    fn blob() -> Blob {
        Blob::new("notes.txt", "0123456789")
            .with_mime_type("text/plain")
            .with_modified_at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    fn request_headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    async fn body_of(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_full_download_headers() {
        let response = serve_blob(&blob(), &Method::GET, &HeaderMap::new(), Utc::now());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment;filename=notes.txt"
        );
        assert_eq!(
            response.headers()[header::LAST_MODIFIED],
            "Fri, 01 Mar 2024 12:00:00 GMT"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        assert_eq!(body_of(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_missing_timestamp_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let blob = Blob::new("a.bin", "x");
        let response = serve_blob(&blob, &Method::GET, &HeaderMap::new(), now);
        assert_eq!(
            response.headers()[header::LAST_MODIFIED],
            "Thu, 02 Jan 2025 03:04:05 GMT"
        );
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }

    #[test]
    fn test_unknown_mime_type_is_guessed_from_file_name() {
        let photo = Blob::new("photo.png", "x").with_mime_type("unknown");
        assert_eq!(content_type(&photo), "image/png");

        let untyped = Blob::new("README", "x");
        assert_eq!(content_type(&untyped), "application/octet-stream");

        let recorded = Blob::new("photo.png", "x").with_mime_type("image/webp");
        assert_eq!(content_type(&recorded), "image/webp");
    }

    #[tokio::test]
    async fn test_if_modified_since_yields_304() {
        let headers = request_headers(&[(
            header::IF_MODIFIED_SINCE,
            "Fri, 01 Mar 2024 12:00:00 GMT",
        )]);
        let response = serve_blob(&blob(), &Method::GET, &headers, Utc::now());
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(body_of(response).await.is_empty());

        let stale = request_headers(&[(
            header::IF_MODIFIED_SINCE,
            "Thu, 29 Feb 2024 12:00:00 GMT",
        )]);
        let response = serve_blob(&blob(), &Method::GET, &stale, Utc::now());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_single_range_yields_206() {
        let headers = request_headers(&[(header::RANGE, "bytes=2-5")]);
        let response = serve_blob(&blob(), &Method::GET, &headers, Utc::now());
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(body_of(response).await, b"2345");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_yields_416() {
        let headers = request_headers(&[(header::RANGE, "bytes=20-")]);
        let response = serve_blob(&blob(), &Method::GET, &headers, Utc::now());
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_if_range_mismatch_serves_full_body() {
        let headers = request_headers(&[
            (header::RANGE, "bytes=0-1"),
            (header::IF_RANGE, "Mon, 01 Jan 2024 00:00:00 GMT"),
        ]);
        let response = serve_blob(&blob(), &Method::GET, &headers, Utc::now());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, b"0123456789");

        let matching = request_headers(&[
            (header::RANGE, "bytes=0-1"),
            (header::IF_RANGE, "Fri, 01 Mar 2024 12:00:00 GMT"),
        ]);
        let response = serve_blob(&blob(), &Method::GET, &matching, Utc::now());
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    }
}
