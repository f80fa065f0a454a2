use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Values held by one session, keyed by name.
pub type SessionRecord = HashMap<String, serde_json::Value>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(String),

    #[error("session value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session state lock poisoned")]
    Poisoned,

    #[error("invalid session cookie: {0}")]
    InvalidCookie(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// SessionStore defines the port (interface) for persisting sessions
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Load a live session. Expired or unknown tokens yield `None`.
    async fn load(&self, token: &str) -> SessionResult<Option<SessionRecord>>;

    /// Persist a session until `expires_at`, replacing any previous record.
    async fn save(
        &self,
        token: &str,
        record: SessionRecord,
        expires_at: DateTime<Utc>,
    ) -> SessionResult<()>;

    async fn delete(&self, token: &str) -> SessionResult<()>;
}
