//! Public front door of the stack.
//!
//! Paths under the API prefix are relayed to the gateway with the caller's
//! `Host` intact and forwarding headers added; WebSocket upgrades are tunnelled
//! byte for byte. Every other path is served from the static root, falling
//! back to `/` for paths that do not exist so a single-page app can route them.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use eyre::Result;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    adapters::file_system::FileSystemAdapter,
    config::bind_address,
    core::{RouteTarget, RoutingRuleSet},
    metrics::{self, TunnelGuard},
    ports::{
        file_system::{FileSystem, FileSystemError},
        http_client::{HttpClient, HttpClientError},
        http_server::HttpServer,
    },
    utils::{bind_listener, serve_until_cancelled, tunnel},
};

/// Headers scoped to a single connection, never relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reverse proxy serving the public listen address.
#[derive(Clone)]
pub struct ReverseProxy {
    rules: Arc<RoutingRuleSet>,
    http_client: Arc<dyn HttpClient>,
    file_system: Arc<FileSystemAdapter>,
    shutdown_grace: Duration,
}

impl ReverseProxy {
    pub fn new(
        rules: Arc<RoutingRuleSet>,
        http_client: Arc<dyn HttpClient>,
        file_system: Arc<FileSystemAdapter>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            rules,
            http_client,
            file_system,
            shutdown_grace,
        }
    }

    pub fn rules(&self) -> &RoutingRuleSet {
        &self.rules
    }

    /// Bind the rule set's listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        bind_listener(&bind_address(self.rules.listen_addr())).await
    }

    /// Router sending every request through [`ReverseProxy::handle`].
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(proxy_fallback)
            .with_state(self.clone())
    }

    /// Dispatch one request according to the routing rules.
    pub async fn handle(&self, req: Request, client_addr: Option<SocketAddr>) -> Response {
        let (label, response) = match self.rules.route(req.uri().path()) {
            RouteTarget::Upstream => ("upstream", self.forward(req, client_addr).await),
            RouteTarget::Static => ("static", self.serve_static(req).await),
        };
        metrics::record_proxy_request(label, response.status().as_u16());
        response
    }

    async fn forward(&self, mut req: Request, client_addr: Option<SocketAddr>) -> Response {
        let upgrade = requested_upgrade(req.headers());
        let client_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut req));

        let path_and_query = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
        let upstream_uri = format!(
            "http://{authority}{path_and_query}",
            authority = self.rules.upstream_authority()
        );
        match upstream_uri.parse::<Uri>() {
            Ok(uri) => *req.uri_mut() = uri,
            Err(e) => {
                tracing::warn!(uri = %upstream_uri, error = %e, "cannot build upstream URI");
                return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
            }
        }

        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        if let Some(protocol) = &upgrade {
            headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
            headers.insert(header::UPGRADE, protocol.clone());
        }
        if let Some(addr) = client_addr {
            add_forwarded_headers(headers, addr);
        }

        let mut response = match self.http_client.send_request(req).await {
            Ok(response) => response,
            Err(HttpClientError::Timeout(after)) => {
                tracing::warn!(after = ?after, "upstream timed out");
                metrics::record_upstream_error("timeout");
                return (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout").into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, "upstream request failed");
                metrics::record_upstream_error("connection");
                return (StatusCode::BAD_GATEWAY, "Bad gateway").into_response();
            }
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                let idle_timeout = self.rules.idle_timeout();
                tokio::spawn(
                    async move {
                        match tokio::try_join!(client_upgrade, upstream_upgrade) {
                            Ok((client, upstream)) => {
                                let _guard = TunnelGuard::open();
                                match tunnel::relay(
                                    TokioIo::new(client),
                                    TokioIo::new(upstream),
                                    idle_timeout,
                                )
                                .await
                                {
                                    Ok(stats) => tracing::debug!(
                                        bytes_up = stats.bytes_up,
                                        bytes_down = stats.bytes_down,
                                        idle_timed_out = stats.idle_timed_out,
                                        "tunnel closed"
                                    ),
                                    Err(e) => tracing::debug!(error = %e, "tunnel closed with error"),
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "protocol upgrade failed"),
                        }
                    }
                    .instrument(tracing::info_span!("tunnel")),
                );
            }
            return response;
        }

        strip_hop_by_hop(response.headers_mut());
        response
    }

    async fn serve_static(&self, req: Request) -> Response {
        let path = req.uri().path().to_string();
        let Ok(decoded) = urlencoding::decode(&path) else {
            return (StatusCode::BAD_REQUEST, "Invalid file path").into_response();
        };
        if decoded.split(['/', '\\']).any(|segment| segment == "..") {
            return (StatusCode::BAD_REQUEST, "Invalid file path").into_response();
        }

        let root = self.rules.static_root();
        let target = match self.file_system.entry_exists(root, &decoded).await {
            Ok(true) => path.as_str(),
            Ok(false) => "/",
            Err(FileSystemError::InvalidPath(reason)) => {
                tracing::warn!(path = %path, reason = %reason, "rejected static path");
                return (StatusCode::BAD_REQUEST, "Invalid file path").into_response();
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "cannot inspect static root");
                "/"
            }
        };

        match self.file_system.serve_file(root, target, req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path = %target, error = %e, "failed to serve static file");
                (StatusCode::NOT_FOUND, "File not found").into_response()
            }
        }
    }
}

impl HttpServer for ReverseProxy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            upstream = %self.rules.upstream_authority(),
            root = %self.rules.static_root(),
            "reverse proxy listening"
        );
        serve_until_cancelled(listener, self.router(), shutdown, self.shutdown_grace).await
    }
}

async fn proxy_fallback(State(proxy): State<ReverseProxy>, req: Request) -> Response {
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    proxy.handle(req, client_addr).await
}

/// The `Upgrade` value of a request asking to switch protocols.
fn requested_upgrade(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !wants_upgrade {
        return None;
    }
    headers.get(header::UPGRADE).cloned()
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let client_ip = client_addr.ip().to_string();

    let forwarded_for = match headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip.clone(),
    };

    if let Ok(value) = HeaderValue::from_str(&client_ip) {
        headers.insert("x-real-ip", value);
    }
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
}
