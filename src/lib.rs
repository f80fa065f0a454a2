//! doco - service lifecycle orchestrator and reverse-proxy gateway.
//!
//! doco boots a two-tier HTTP stack under one cancellation domain:
//!
//! - an **API gateway** serving blobs, metrics and a liveness check under
//!   `/api`, behind a fixed middleware chain (sessions, CORS, request ids,
//!   client address resolution, logging, panic recovery);
//! - a **reverse proxy** that forwards `/api/*` to the gateway (WebSocket
//!   upgrades included) and serves a static web bundle with a single-page-app
//!   fallback for everything else.
//!
//! Both servers run as actors of a [`core::ActorGroup`]: when either one
//! returns, the other is interrupted and the group drains before returning.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the domain logic (orchestration, routing rules, blob range
//! handling) inside `core`.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use doco::{
//!     adapters::{MemoryContentStore, MemorySessionStore, SessionManager},
//!     config::AppConfig,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = AppConfig::default();
//! let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()), &config.session)?;
//! doco::app::run(&config, Arc::new(MemoryContentStore::new()), sessions).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library errors are typed with `thiserror`; wiring code returns
//! `eyre::Result<T>` with context attached through `WrapErr`. Every API error
//! crosses the HTTP boundary as an [`error::ErrorResponse`] envelope.
//!
//! # Concurrency & Data Structures
//! Shared maps use `scc::HashMap`, so no lock is held across an await point.
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod app;
pub mod core;

pub use crate::{
    adapters::{ApiGateway, FileSystemAdapter, HttpClientAdapter, ReverseProxy},
    core::{Actor, ActorError, ActorGroup, RoutingRuleSet},
    error::{ErrorResponse, Reply},
    ports::http_client::HttpClient,
};
