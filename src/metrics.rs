//! Prometheus metrics for doco.
//!
//! Provided metrics (labels vary by family):
//! * `doco_http_requests_total` (counter: method, route, status)
//! * `doco_http_request_duration_seconds` (histogram: method, route)
//! * `doco_blob_deliveries_total` (counter: outcome)
//! * `doco_proxy_requests_total` (counter: target, status)
//! * `doco_proxy_upstream_errors_total` (counter: kind)
//! * `doco_websocket_tunnels_active` (gauge)
//! * process metrics on Linux
//!
//! [`RequestTimer`] leverages `Drop` so a request is counted even when its
//! future is dropped before a response is produced.
use std::{
    sync::{LazyLock, Once},
    time::{Duration, Instant},
};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Content type of the Prometheus text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doco_http_requests_total",
            "Total number of API requests handled by the gateway",
        ),
        &["method", "route", "status"],
    )
    .expect("metric creation failed")
});

pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "doco_http_request_duration_seconds",
            "Latency of API requests handled by the gateway",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "route"],
    )
    .expect("metric creation failed")
});

pub static BLOB_DELIVERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doco_blob_deliveries_total",
            "Blob requests by outcome (full, partial, not_modified, unsatisfiable, error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static PROXY_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doco_proxy_requests_total",
            "Requests handled by the reverse proxy by target (upstream, static)",
        ),
        &["target", "status"],
    )
    .expect("metric creation failed")
});

pub static PROXY_UPSTREAM_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doco_proxy_upstream_errors_total",
            "Upstream failures seen by the reverse proxy by kind (connect, timeout, upgrade)",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static WEBSOCKET_TUNNELS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "doco_websocket_tunnels_active",
        "Number of WebSocket tunnels currently relayed by the proxy",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register every doco metric with [`REGISTRY`]. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(HTTP_REQUESTS.clone()),
            Box::new(HTTP_REQUEST_DURATION.clone()),
            Box::new(BLOB_DELIVERIES.clone()),
            Box::new(PROXY_REQUESTS.clone()),
            Box::new(PROXY_UPSTREAM_ERRORS.clone()),
            Box::new(WEBSOCKET_TUNNELS_ACTIVE.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "metric registration failed");
            }
        }

        #[cfg(target_os = "linux")]
        if let Err(e) = REGISTRY.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        )) {
            tracing::error!(error = %e, "process collector registration failed");
        }
    });
}

/// Encode all registered metrics in the text exposition format.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    register_metrics();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// Record a blob request outcome.
pub fn record_blob_delivery(outcome: &str) {
    BLOB_DELIVERIES.with_label_values(&[outcome]).inc();
}

/// Record a request dispatched by the reverse proxy.
pub fn record_proxy_request(target: &str, status: u16) {
    let status = status.to_string();
    PROXY_REQUESTS
        .with_label_values(&[target, status.as_str()])
        .inc();
}

pub fn record_upstream_error(kind: &str) {
    PROXY_UPSTREAM_ERRORS.with_label_values(&[kind]).inc();
}

/// RAII timer for a gateway request.
///
/// Records the request counter and latency histogram on drop. A request
/// whose status was never set is counted with status `dropped`.
pub struct RequestTimer {
    start: Instant,
    method: String,
    route: String,
    status: Option<u16>,
}

impl RequestTimer {
    pub fn new(method: &str, route: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
            route: route.to_string(),
            status: None,
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let status = self
            .status
            .map_or_else(|| "dropped".to_string(), |status| status.to_string());
        HTTP_REQUESTS
            .with_label_values(&[self.method.as_str(), self.route.as_str(), status.as_str()])
            .inc();
        HTTP_REQUEST_DURATION
            .with_label_values(&[self.method.as_str(), self.route.as_str()])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Tracks one live WebSocket tunnel in [`WEBSOCKET_TUNNELS_ACTIVE`].
pub struct TunnelGuard(());

impl TunnelGuard {
    pub fn open() -> Self {
        WEBSOCKET_TUNNELS_ACTIVE.inc();
        Self(())
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        WEBSOCKET_TUNNELS_ACTIVE.dec();
    }
}
