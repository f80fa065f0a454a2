//! Uniform JSON envelope for API errors and handler results.
//!
//! Every failed API request answers with an [`ErrorResponse`] body of the
//! form `{"err": "...", "message": "..."}`. Handlers that want a status
//! and body decided in one place return a [`Reply`].
use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Message used when a handler produced neither a body nor an error.
pub const NO_RESPONSE: &str = "no response";

/// JSON error body returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Text of the underlying error.
    pub err: String,
    /// Human-readable message; the error text unless overridden.
    pub message: String,
    #[serde(skip)]
    source: Option<Arc<eyre::Report>>,
}

impl ErrorResponse {
    /// Wrap an error. The message defaults to the error text.
    pub fn new(error: impl Into<eyre::Report>) -> Self {
        let report = error.into();
        let text = report.to_string();
        Self {
            err: text.clone(),
            message: text,
            source: Some(Arc::new(report)),
        }
    }

    /// Build an envelope that carries no underlying error value.
    pub fn from_parts(err: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The wrapped error, kept for logging and never serialized.
    pub fn report(&self) -> Option<&eyre::Report> {
        self.source.as_deref()
    }

    /// Render the envelope with the given status.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        response
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorResponse {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let report = self.source.as_deref()?;
        let inner: &(dyn std::error::Error + Send + Sync + 'static) = report.as_ref();
        Some(inner)
    }
}

/// Result of an API handler.
#[derive(Debug)]
pub enum Reply<T> {
    /// Serialize `body` as JSON with `status`.
    Ok { status: StatusCode, body: T },
    /// Render the error envelope with `status`.
    Err { status: StatusCode, error: ErrorResponse },
    /// Neither body nor error. Rendered as a "no response" envelope; the
    /// status is kept only when it already denotes an error, otherwise 500.
    Empty { status: StatusCode },
}

impl<T> Reply<T> {
    pub fn ok(body: T) -> Self {
        Self::Ok {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn error(status: StatusCode, error: impl Into<eyre::Report>) -> Self {
        Self::Err {
            status,
            error: ErrorResponse::new(error),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ok { status, .. } | Self::Err { status, .. } | Self::Empty { status } => *status,
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        match self {
            Self::Ok { status, body } => match serde_json::to_vec(&body) {
                Ok(bytes) => (
                    status,
                    [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                    bytes,
                )
                    .into_response(),
                Err(error) => {
                    tracing::error!(error = %error, "failed to encode response body");
                    ErrorResponse::new(error).into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
                }
            },
            Self::Err { status, error } => {
                tracing::debug!(status = %status, err = %error.err, "request failed");
                error.into_response_with(status)
            }
            Self::Empty { status } => {
                let status = if status.is_client_error() || status.is_server_error() {
                    status
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                ErrorResponse::from_parts(NO_RESPONSE, NO_RESPONSE).into_response_with(status)
            }
        }
    }
}
