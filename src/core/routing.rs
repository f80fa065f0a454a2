//! Routing rules for the reverse-proxy tier.
//!
//! A [`RoutingRuleSet`] captures the fixed shape of the front door:
//! requests under the API prefix are forwarded transparently (WebSocket
//! upgrades included) to the API server, and everything else is served from
//! the static root with a single-page-application fallback to `/`.
//!
//! The rule set can also be rendered as a Caddyfile. The text is produced
//! deterministically from the rule set's fields, so two rule sets built from
//! the same inputs always render identically.
use std::time::Duration;

use thiserror::Error;

/// Path prefix that is forwarded to the API server by default.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Idle timeout applied to upstream connections and tunnels by default.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

const CADDYFILE_TEMPLATE: &str = r#"{{listen_addr}} {
    tls off
    proxy {{api_prefix}}/ {{upstream}} {
        transparent
        websocket
        timeout {{idle_timeout}}
    }
    root {{static_root}}
    rewrite {
        if {path} not_match ^{{api_prefix}}
        to {path} /
    }
}
"#;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} cannot be rendered into routing rules: {value:?}")]
    Unrenderable { field: &'static str, value: String },

    #[error("invalid upstream address '{0}': expected host:port or :port")]
    InvalidUpstream(String),

    #[error("invalid api prefix '{0}': must start with '/' and name a path segment")]
    InvalidApiPrefix(String),

    #[error("unresolved placeholder in routing template: {0}")]
    UnresolvedPlaceholder(String),
}

/// Where a request path is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Forward to the API server.
    Upstream,
    /// Serve from the static root.
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRuleSet {
    listen_addr: String,
    upstream_addr: String,
    upstream_authority: String,
    static_root: String,
    api_prefix: String,
    idle_timeout: Duration,
    transparent: bool,
    websocket: bool,
    tls: bool,
}

impl RoutingRuleSet {
    /// Build the rule set for a proxy listening on `listen_addr` that
    /// forwards API traffic to `upstream_addr` and serves `static_root`.
    pub fn generate(
        listen_addr: &str,
        upstream_addr: &str,
        static_root: &str,
    ) -> Result<Self, RoutingError> {
        let listen_addr = renderable("listen address", listen_addr)?;
        let upstream_addr = renderable("upstream address", upstream_addr)?;
        let static_root = renderable("static root", static_root)?;
        let upstream_authority = resolve_upstream(&upstream_addr)?;

        Ok(Self {
            listen_addr,
            upstream_addr,
            upstream_authority,
            static_root,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            transparent: true,
            websocket: true,
            tls: false,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_api_prefix(mut self, prefix: &str) -> Result<Self, RoutingError> {
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.starts_with('/') || trimmed.len() < 2 {
            return Err(RoutingError::InvalidApiPrefix(prefix.to_string()));
        }
        self.api_prefix = renderable("api prefix", trimmed)?;
        Ok(self)
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn upstream_addr(&self) -> &str {
        &self.upstream_addr
    }

    /// `host:port` used to reach the API server. Wildcard or empty hosts in
    /// the configured address resolve to `localhost`.
    pub fn upstream_authority(&self) -> &str {
        &self.upstream_authority
    }

    pub fn static_root(&self) -> &str {
        &self.static_root
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Forward the original `Host` and add client address headers.
    pub fn transparent(&self) -> bool {
        self.transparent
    }

    /// Pass WebSocket upgrades through to the upstream.
    pub fn websocket(&self) -> bool {
        self.websocket
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    /// Decide where a request path goes.
    ///
    /// Matching works on whole path segments. `/api` itself goes upstream and
    /// `/apiary` is static content with the SPA fallback, while the rendered
    /// Caddyfile keeps the plain `/api/` and `^/api` prefix rules.
    pub fn route(&self, path: &str) -> RouteTarget {
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some("") => RouteTarget::Upstream,
            Some(rest) if rest.starts_with('/') => RouteTarget::Upstream,
            _ => RouteTarget::Static,
        }
    }

    /// Render the rule set as Caddyfile text.
    pub fn render(&self) -> Result<String, RoutingError> {
        let idle_timeout = humantime::format_duration(self.idle_timeout).to_string();
        let rendered = CADDYFILE_TEMPLATE
            .replace("{{listen_addr}}", &self.listen_addr)
            .replace("{{api_prefix}}", &self.api_prefix)
            .replace("{{upstream}}", &self.upstream_authority)
            .replace("{{idle_timeout}}", &idle_timeout)
            .replace("{{static_root}}", &self.static_root);

        if let Some(start) = rendered.find("{{") {
            let end = rendered[start..]
                .find("}}")
                .map_or(rendered.len(), |offset| start + offset + 2);
            return Err(RoutingError::UnresolvedPlaceholder(
                rendered[start..end].to_string(),
            ));
        }

        Ok(rendered)
    }
}

fn renderable(field: &'static str, value: &str) -> Result<String, RoutingError> {
    if value.is_empty() {
        return Err(RoutingError::Empty { field });
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '{' || c == '}')
    {
        return Err(RoutingError::Unrenderable {
            field,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn resolve_upstream(addr: &str) -> Result<String, RoutingError> {
    let invalid = || RoutingError::InvalidUpstream(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    let host = match host {
        "" | "0.0.0.0" | "[::]" => "localhost",
        other if other.contains(':') && !other.starts_with('[') => return Err(invalid()),
        other => other,
    };
    Ok(format!("{host}:{port}"))
}
