#![allow(dead_code)]

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use doco::{
    adapters::{
        ApiGateway, FileSystemAdapter, HttpClientAdapter, MemoryContentStore, MemorySessionStore,
        ReverseProxy, SessionManager,
    },
    config::{GatewayConfig, SessionConfig},
    core::{Blob, RoutingRuleSet},
    ports::HttpServer,
    utils::bind_listener,
};
use tokio_util::sync::CancellationToken;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

/// Store holding `a.png` (image/png), plus `photo.png` and `notes.bin` with
/// mime "unknown".
pub async fn fixture_store() -> Arc<MemoryContentStore> {
    let store = MemoryContentStore::new();
    store
        .insert(
            Blob::new("a.png", PNG_BYTES)
                .with_mime_type("image/png")
                .with_modified_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()),
        )
        .await;
    store
        .insert(Blob::new("photo.png", PNG_BYTES).with_mime_type("unknown"))
        .await;
    store
        .insert(Blob::new("notes.bin", "0123456789").with_mime_type("unknown"))
        .await;
    Arc::new(store)
}

pub fn session_manager() -> SessionManager {
    SessionManager::new(Arc::new(MemorySessionStore::new()), &SessionConfig::default()).unwrap()
}

pub async fn gateway(require_user: bool) -> (ApiGateway, SessionManager) {
    let sessions = session_manager();
    let config = GatewayConfig {
        require_user,
        ..GatewayConfig::default()
    };
    let gateway = ApiGateway::new(config, fixture_store().await, sessions.clone());
    (gateway, sessions)
}

/// Serve `server` on an ephemeral port until `token` is cancelled.
pub async fn spawn_server<S: HttpServer>(server: S, token: CancellationToken) -> SocketAddr {
    let listener = bind_listener("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve(listener, token).await.unwrap();
    });
    addr
}

pub fn proxy(upstream: SocketAddr, root: &Path) -> ReverseProxy {
    let rules = RoutingRuleSet::generate(
        "127.0.0.1:0",
        &upstream.to_string(),
        root.to_str().unwrap(),
    )
    .unwrap()
    .with_idle_timeout(Duration::from_secs(5));
    ReverseProxy::new(
        Arc::new(rules),
        Arc::new(HttpClientAdapter::new(Duration::from_secs(5))),
        Arc::new(FileSystemAdapter::new()),
        Duration::from_secs(1),
    )
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
