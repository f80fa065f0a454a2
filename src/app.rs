//! Wiring of the full stack: API gateway, reverse proxy and the OS-signal
//! watcher, run as one actor group.
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    adapters::{
        api_gateway::ApiGateway, file_system::FileSystemAdapter, http_client::HttpClientAdapter,
        reverse_proxy::ReverseProxy, session::SessionManager,
    },
    config::AppConfig,
    core::{Actor, ActorGroup, RoutingRuleSet},
    ports::{content_store::ContentStore, http_server::HttpServer},
    tracing_setup::component_span,
    utils::wait_for_signal,
};

/// The two servers of a doco deployment, ready to run.
pub struct Stack {
    pub gateway: Arc<ApiGateway>,
    pub proxy: Arc<ReverseProxy>,
}

impl Stack {
    /// Build both servers from `config`.
    ///
    /// The routing rules are generated and rendered up front so a bad
    /// address or prefix fails before anything binds.
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn ContentStore>,
        sessions: SessionManager,
    ) -> Result<Self> {
        let idle_timeout = config.proxy.idle_timeout()?;
        let rules = RoutingRuleSet::generate(
            &config.load_balancer_addr,
            &config.server_addr,
            &config.root_path,
        )
        .and_then(|rules| rules.with_api_prefix(&config.proxy.api_prefix))
        .wrap_err("Failed to generate routing rules")?
        .with_idle_timeout(idle_timeout);

        let rendered = rules.render().wrap_err("Failed to render routing rules")?;
        tracing::debug!(caddyfile = %rendered, "generated routing rules");

        let proxy = ReverseProxy::new(
            Arc::new(rules),
            Arc::new(HttpClientAdapter::new(idle_timeout)),
            Arc::new(FileSystemAdapter::new()),
            config.proxy.shutdown_grace()?,
        );
        let gateway = ApiGateway::new(config.gateway()?, store, sessions);

        Ok(Self {
            gateway: Arc::new(gateway),
            proxy: Arc::new(proxy),
        })
    }

    /// Actor group running the gateway, the proxy and the signal watcher
    /// under `token`.
    pub fn into_group(self, token: &CancellationToken) -> ActorGroup {
        let mut group = ActorGroup::new();
        group
            .add(server_actor(self.gateway, token.child_token()))
            .add(server_actor(self.proxy, token.child_token()))
            .add(signal_actor(token.clone()));
        group
    }
}

/// Actor serving `server` until its token is cancelled.
pub fn server_actor<S: HttpServer>(server: Arc<S>, token: CancellationToken) -> Actor {
    let name = server.name();
    let run_token = token.clone();
    Actor::with_token(
        name,
        token,
        async move { server.run(run_token).await }.instrument(component_span(name)),
    )
}

/// Actor that returns on SIGINT/SIGTERM, or when interrupted.
pub fn signal_actor(token: CancellationToken) -> Actor {
    let run_token = token.clone();
    Actor::with_token("signals", token, async move {
        tokio::select! {
            reason = wait_for_signal() => {
                tracing::info!(reason = ?reason, "shutdown requested");
            }
            _ = run_token.cancelled() => {}
        }
        Ok(())
    })
}

/// Run the stack until a signal arrives or either server fails.
pub async fn run(config: &AppConfig, store: Arc<dyn ContentStore>, sessions: SessionManager) -> Result<()> {
    let stack = Stack::build(config, store, sessions)?;
    let token = CancellationToken::new();

    stack
        .into_group(&token)
        .run()
        .await
        .wrap_err("doco stack terminated")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::memory_store::{MemoryContentStore, MemorySessionStore},
        config::SessionConfig,
    };

    fn sessions() -> SessionManager {
        SessionManager::new(Arc::new(MemorySessionStore::new()), &SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_build_rejects_bad_prefix() {
        let mut config = AppConfig::default();
        config.proxy.api_prefix = "api".to_string();

        let result = Stack::build(&config, Arc::new(MemoryContentStore::new()), sessions());
        assert!(result.is_err());
    }

    #[test]
    fn test_build_uses_configured_addresses() {
        let config = AppConfig {
            server_addr: ":9081".to_string(),
            load_balancer_addr: "127.0.0.1:9080".to_string(),
            ..AppConfig::default()
        };

        let stack = Stack::build(&config, Arc::new(MemoryContentStore::new()), sessions()).unwrap();
        assert_eq!(stack.proxy.rules().upstream_authority(), "localhost:9081");
        assert_eq!(stack.proxy.rules().listen_addr(), "127.0.0.1:9080");
        assert_eq!(stack.gateway.config().listen_addr, ":9081");
    }
}
