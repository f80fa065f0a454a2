//! Cookie-backed sessions.
//!
//! [`load_and_save`] wraps the whole API router: it loads the session named by
//! the request cookie, exposes it to handlers as a [`Session`] extension, and
//! after the response is built persists any change and sets the cookie.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::SessionConfig,
    error::ErrorResponse,
    ports::session_store::{SessionError, SessionRecord, SessionResult, SessionStore},
};

/// Session key holding the authenticated user's id.
pub const USER_ID_KEY: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unchanged,
    Modified,
    Destroyed,
}

#[derive(Debug)]
struct SessionState {
    token: Option<String>,
    record: SessionRecord,
    status: Status,
}

/// Pending write produced by a request.
enum Change {
    None,
    Save {
        token: Option<String>,
        record: SessionRecord,
    },
    Destroy {
        token: Option<String>,
    },
}

/// Per-request session handle. Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(token: Option<String>, record: SessionRecord) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                token,
                record,
                status: Status::Unchanged,
            })),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.state.lock().ok()?;
        let value = state.record.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.record.contains_key(key))
            .unwrap_or(false)
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state.lock().map_err(|_| SessionError::Poisoned)?;
        state.record.insert(key.to_string(), value);
        state.status = Status::Modified;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        let mut state = self.state.lock().ok()?;
        let removed = state.record.remove(key);
        if removed.is_some() {
            state.status = Status::Modified;
        }
        removed
    }

    /// Drop the session; its cookie is expired on the response.
    pub fn destroy(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.record.clear();
            state.status = Status::Destroyed;
        }
    }

    fn take_change(&self) -> SessionResult<Change> {
        let mut state = self.state.lock().map_err(|_| SessionError::Poisoned)?;
        let change = match state.status {
            Status::Unchanged => Change::None,
            Status::Modified => Change::Save {
                token: state.token.clone(),
                record: state.record.clone(),
            },
            Status::Destroyed => Change::Destroy {
                token: state.token.take(),
            },
        };
        state.status = Status::Unchanged;
        Ok(change)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| {
            tracing::error!("session extractor used without the session layer");
            ErrorResponse::from_parts("session unavailable", "session layer is not installed")
                .into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

/// Loads and commits sessions through a [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: Arc<str>,
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> eyre::Result<Self> {
        Ok(Self {
            store,
            cookie_name: Arc::from(config.cookie_name.as_str()),
            lifetime: config.lifetime()?,
            secure: config.secure,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Session token carried by the request's cookies, if any.
    pub fn token_from(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == &*self.cookie_name)
            .map(|(_, token)| token.trim_matches('"').to_string())
            .filter(|token| !token.is_empty())
    }

    /// Load the session for `token`. Unknown, expired or unreadable sessions
    /// start fresh.
    pub async fn load(&self, token: Option<String>) -> Session {
        let Some(token) = token else {
            return Session::new(None, SessionRecord::new());
        };
        match self.store.load(&token).await {
            Ok(Some(record)) => Session::new(Some(token), record),
            Ok(None) => Session::new(None, SessionRecord::new()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load session, starting a new one");
                Session::new(None, SessionRecord::new())
            }
        }
    }

    /// Persist a new session holding `record` and return its token.
    pub async fn issue(&self, record: SessionRecord) -> SessionResult<String> {
        let token = new_token();
        self.store.save(&token, record, self.expires_at()).await?;
        Ok(token)
    }

    /// Persist pending changes. Returns the `Set-Cookie` value to send, if any.
    pub async fn commit(&self, session: &Session) -> SessionResult<Option<HeaderValue>> {
        match session.take_change()? {
            Change::None => Ok(None),
            Change::Save { token, record } => {
                let token = token.unwrap_or_else(new_token);
                self.store.save(&token, record, self.expires_at()).await?;
                if let Ok(mut state) = session.state.lock() {
                    state.token = Some(token.clone());
                }
                self.cookie(&token, self.lifetime.as_secs()).map(Some)
            }
            Change::Destroy { token } => {
                if let Some(token) = token {
                    self.store.delete(&token).await?;
                }
                self.cookie("", 0).map(Some)
            }
        }
    }

    fn expires_at(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn cookie(&self, token: &str, max_age: u64) -> SessionResult<HeaderValue> {
        let secure = if self.secure { "; Secure" } else { "" };
        let cookie = format!(
            "{name}={token}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax{secure}",
            name = self.cookie_name
        );
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::InvalidCookie(e.to_string()))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.cookie_name)
            .field("lifetime", &self.lifetime)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

fn new_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Middleware loading the session before the request and committing it after.
pub async fn load_and_save(
    State(manager): State<SessionManager>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = manager.token_from(req.headers());
    let session = manager.load(token).await;
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    match manager.commit(&session).await {
        Ok(Some(cookie)) => {
            response.headers_mut().append(header::SET_COOKIE, cookie);
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static(r#"no-cache="Set-Cookie""#));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "failed to commit session");
            return ErrorResponse::new(e).into_response_with(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Cookie"));
    response
}

/// Middleware rejecting requests whose session carries no user.
pub async fn require_user(session: Session, req: Request, next: Next) -> Response {
    if !session.contains(USER_ID_KEY) {
        return ErrorResponse::from_parts("unauthenticated", "a signed-in session is required")
            .into_response_with(StatusCode::UNAUTHORIZED);
    }
    next.run(req).await
}
