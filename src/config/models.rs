//! Configuration data structures for doco.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `DOCO_*` environment variables. Every field has a default so that an
//! empty configuration starts a working stack.
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the whole stack.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Address of the API gateway (the proxy's upstream)
    pub server_addr: String,
    /// Public address of the reverse proxy
    pub load_balancer_addr: String,
    /// Static root served by the proxy for non-API paths
    pub root_path: String,
    /// Directory whose files seed the in-memory content store
    pub blob_dir: Option<String>,
    pub proxy: ProxyConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8081".to_string(),
            load_balancer_addr: "0.0.0.0:8080".to_string(),
            root_path: "./web/dist".to_string(),
            blob_dir: None,
            proxy: ProxyConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Settings consumed by the API gateway.
    pub fn gateway(&self) -> Result<GatewayConfig> {
        Ok(GatewayConfig {
            listen_addr: self.server_addr.clone(),
            api_prefix: self.proxy.api_prefix.trim_end_matches('/').to_string(),
            require_user: self.session.require_user,
            shutdown_grace: self.proxy.shutdown_grace()?,
        })
    }
}

/// Reverse-proxy tuning.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Path prefix forwarded to the gateway
    pub api_prefix: String,
    /// Idle timeout for upstream responses and tunnels (humantime, e.g. "10m")
    pub idle_timeout: String,
    /// Time in-flight requests get to finish after shutdown starts
    pub shutdown_grace: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            idle_timeout: "10m".to_string(),
            shutdown_grace: "10s".to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn idle_timeout(&self) -> Result<Duration> {
        parse_duration("proxy.idle_timeout", &self.idle_timeout)
    }

    pub fn shutdown_grace(&self) -> Result<Duration> {
        parse_duration("proxy.shutdown_grace", &self.shutdown_grace)
    }
}

/// Cookie-backed session settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Session lifetime (humantime, e.g. "24h")
    pub lifetime: String,
    /// Reject blob requests whose session carries no user
    pub require_user: bool,
    /// Mark the session cookie `Secure`
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "doco_session".to_string(),
            lifetime: "24h".to_string(),
            require_user: false,
            secure: false,
        }
    }
}

impl SessionConfig {
    pub fn lifetime(&self) -> Result<Duration> {
        parse_duration("session.lifetime", &self.lifetime)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// Gateway settings derived from [`AppConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub api_prefix: String,
    pub require_user: bool,
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8081".to_string(),
            api_prefix: "/api".to_string(),
            require_user: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("Invalid duration for {field}: '{value}'"))
}

/// Normalize a listen address so it can be bound.
///
/// Go-style addresses such as `:8080` bind on all interfaces.
pub fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
