use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup::upstream_span,
};

/// HTTP client adapter forwarding proxy traffic to the gateway over plain
/// HTTP/1.1.
///
/// Responsibilities:
/// * Keeps the caller's `Host` header, filling it from the URI only when absent
/// * Bounds the wait for response headers by the configured timeout
/// * Converts between Hyper body and Axum body types, keeping response
///   extensions so upgrades can be taken from the response
pub struct HttpClientAdapter {
    client: Client<HttpConnector, AxumBody>,
    response_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a client whose upstream responses must start within
    /// `response_timeout`. Idle pooled connections are dropped after the same
    /// period.
    pub fn new(response_timeout: Duration) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(response_timeout)
            .build::<_, AxumBody>(http_connector);

        tracing::debug!(timeout = ?response_timeout, "created upstream HTTP client");
        Self {
            client,
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };

        if !req.headers().contains_key(header::HOST) {
            let host = HeaderValue::from_str(&authority)
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
            req.headers_mut().insert(header::HOST, host);
        }
        *req.version_mut() = Version::HTTP_11;

        let span = upstream_span(req.method().as_str(), &req.uri().to_string());
        let method = req.method().clone();
        let uri = req.uri().clone();
        let client = self.client.clone();

        async move {
            tracing::debug!("Outgoing request headers: {:?}", req.headers());

            match timeout(self.response_timeout, client.request(req)).await {
                Ok(Ok(response)) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    // Convert Hyper response body back to AxumBody
                    let (mut parts, hyper_body) = response.into_parts();

                    // Remove Transfer-Encoding header since the body is being decoded/streamed
                    // and the downstream server (Axum) will handle framing.
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error forwarding {} {} upstream: {}", method, uri, e);
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {uri} failed: {e}"
                    )))
                }
                Err(_) => {
                    tracing::warn!(
                        "Upstream did not answer {} {} within {:?}",
                        method,
                        uri,
                        self.response_timeout
                    );
                    Err(HttpClientError::Timeout(self.response_timeout))
                }
            }
        }
        .instrument(span)
        .await
    }
}
