mod common;

use std::{net::SocketAddr, time::Duration};

use axum::{Json, Router, http::HeaderMap, routing::get};
use doco::ports::HttpServer;
use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn static_site() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "<div id=\"app\"></div>").unwrap();
    std::fs::create_dir(dir.path().join("assets")).unwrap();
    std::fs::write(dir.path().join("assets/main.css"), "body{}").unwrap();
    dir
}

/// Gateway plus proxy in front of it. Returns the proxy address.
async fn full_stack(root: &TempDir, token: &CancellationToken) -> SocketAddr {
    let (gateway, _) = common::gateway(false).await;
    let gateway_addr = common::spawn_server(gateway, token.clone()).await;
    common::spawn_server(common::proxy(gateway_addr, root.path()), token.clone()).await
}

/// Upstream answering every `/api/*` request with the headers it received.
async fn echo_headers_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().route(
        "/api/echo",
        get(|headers: HeaderMap| async move {
            let pairs: serde_json::Map<String, serde_json::Value> = headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                    )
                })
                .collect();
            Json(serde_json::Value::Object(pairs))
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// WebSocket server echoing text and binary frames.
async fn websocket_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        ws.send(message).await.unwrap();
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_api_requests_reach_gateway() {
    let root = static_site();
    let token = CancellationToken::new();
    let proxy = full_stack(&root, &token).await;
    let client = common::http_client();

    let response = client
        .get(format!("http://{proxy}/api/check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        serde_json::json!({})
    );

    let response = client
        .get(format!("http://{proxy}/api/blobs/a.png"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(&response.bytes().await.unwrap()[..], common::PNG_BYTES);

    let response = client
        .get(format!("http://{proxy}/api/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    token.cancel();
}

#[tokio::test]
async fn test_static_side_with_spa_fallback() {
    let root = static_site();
    let token = CancellationToken::new();
    let proxy = full_stack(&root, &token).await;
    let client = common::http_client();

    let page = client
        .get(format!("http://{proxy}/app/page"))
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), 200);
    assert_eq!(page.text().await.unwrap(), "<div id=\"app\"></div>");

    let asset = client
        .get(format!("http://{proxy}/assets/main.css"))
        .send()
        .await
        .unwrap();
    assert_eq!(asset.status(), 200);
    assert_eq!(asset.text().await.unwrap(), "body{}");

    let traversal = client
        .get(format!("http://{proxy}/assets/%2e%2e/%2e%2e/secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(traversal.status(), 400);

    token.cancel();
}

#[tokio::test]
async fn test_forwarding_is_transparent() {
    let root = static_site();
    let token = CancellationToken::new();
    let upstream = echo_headers_upstream().await;
    let proxy = common::spawn_server(common::proxy(upstream, root.path()), token.clone()).await;

    let seen: serde_json::Value = common::http_client()
        .get(format!("http://{proxy}/api/echo"))
        .header("host", "docs.example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(seen["host"], "docs.example.com");
    assert_eq!(seen["x-real-ip"], "127.0.0.1");
    assert_eq!(seen["x-forwarded-for"], "127.0.0.1");
    assert_eq!(seen["x-forwarded-proto"], "http");

    token.cancel();
}

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let root = static_site();
    let token = CancellationToken::new();

    // Reserve a port and close it again so nothing listens there
    let closed = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let proxy = common::spawn_server(common::proxy(closed, root.path()), token.clone()).await;

    let response = common::http_client()
        .get(format!("http://{proxy}/api/check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    token.cancel();
}

#[tokio::test]
async fn test_websocket_is_tunnelled() {
    let root = static_site();
    let token = CancellationToken::new();
    let upstream = websocket_echo_upstream().await;
    let proxy = common::spawn_server(common::proxy(upstream, root.path()), token.clone()).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{proxy}/api/live"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::text("hello through the proxy"))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "hello through the proxy");

    ws.close(None).await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn test_cancel_stops_accepting() {
    let root = static_site();
    let token = CancellationToken::new();
    let listener = doco::utils::bind_listener("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = common::proxy(addr, root.path());

    let server = tokio::spawn({
        let token = token.clone();
        async move { proxy.serve(listener, token).await }
    });
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
