//! The API server behind the reverse proxy.
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use eyre::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    adapters::{
        handlers::{GatewayState, check, get_blob, metrics_handler},
        middleware::{
            cors_layer, panic_response, real_ip_middleware, request_id_middleware,
            request_logging_middleware,
        },
        session::{SessionManager, load_and_save, require_user},
    },
    config::{GatewayConfig, bind_address},
    ports::{content_store::ContentStore, http_server::HttpServer},
    utils::{bind_listener, serve_until_cancelled},
};

/// HTTP API mounted under the configured prefix.
///
/// Routes:
/// * `GET {prefix}/blobs/{blob_id}` (signed-in users only when `require_user`)
/// * `GET {prefix}/metrics`
/// * `GET {prefix}/check`
#[derive(Clone)]
pub struct ApiGateway {
    config: GatewayConfig,
    store: Arc<dyn ContentStore>,
    sessions: SessionManager,
}

impl ApiGateway {
    pub fn new(config: GatewayConfig, store: Arc<dyn ContentStore>, sessions: SessionManager) -> Self {
        Self {
            config,
            store,
            sessions,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        let state = GatewayState {
            store: self.store.clone(),
        };

        let mut authenticated = Router::new().route("/blobs/{blob_id}", get(get_blob));
        if self.config.require_user {
            authenticated = authenticated.route_layer(middleware::from_fn(require_user));
        }

        let public = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/check", get(check));

        let api = authenticated.merge(public).with_state(state);
        self.apply_middleware(Router::new().nest(&self.config.api_prefix, api))
    }

    /// Outermost first: sessions, CORS, request id, client address,
    /// logging, panic recovery.
    fn apply_middleware(&self, router: Router) -> Router {
        router.layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    self.sessions.clone(),
                    load_and_save,
                ))
                .layer(cors_layer())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(middleware::from_fn(real_ip_middleware))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(CatchPanicLayer::custom(panic_response)),
        )
    }
}

impl HttpServer for ApiGateway {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = bind_listener(&bind_address(&self.config.listen_addr)).await?;
        self.serve(listener, shutdown).await
    }

    async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            prefix = %self.config.api_prefix,
            "API gateway listening"
        );
        serve_until_cancelled(listener, self.router(), shutdown, self.config.shutdown_grace).await
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::memory_store::{MemoryContentStore, MemorySessionStore},
        config::SessionConfig,
    };

    fn gateway(require_user: bool) -> ApiGateway {
        let config = GatewayConfig {
            require_user,
            ..GatewayConfig::default()
        };
        let sessions =
            SessionManager::new(Arc::new(MemorySessionStore::new()), &SessionConfig::default())
                .unwrap();
        ApiGateway::new(config, Arc::new(MemoryContentStore::new()), sessions)
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = gateway(false)
            .router()
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500_envelope() {
        let gateway = gateway(false);
        let router = gateway.apply_middleware(Router::new().route(
            "/api/boom",
            get(|| async {
                if true {
                    panic!("handler exploded");
                }
                "unreachable"
            }),
        ));

        let response = router
            .oneshot(Request::builder().uri("/api/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["err"], "internal server error");
    }

    #[tokio::test]
    async fn test_check_is_public_when_users_required() {
        let response = gateway(true)
            .router()
            .oneshot(Request::builder().uri("/api/check").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
