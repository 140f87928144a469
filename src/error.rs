//! Error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Failure of a single provider call.
///
/// Provider failures are data: they are recorded next to the provider that
/// produced them and never abort a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The call did not finish before its deadline.
    #[error("request timed out")]
    Timeout,
    /// The upstream rejected the call because of quota or rate limits.
    #[error("rate limited")]
    RateLimited,
    /// Credentials were rejected.
    #[error("unauthorized")]
    Unauthorized,
    /// Connection failure or 5xx from the upstream.
    #[error("upstream unavailable")]
    UpstreamUnavailable,
    /// The upstream answered with something we could not interpret.
    #[error("malformed response")]
    MalformedResponse,
}

impl ErrorKind {
    /// Whether the orchestrator may try the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::UpstreamUnavailable)
    }

    /// Classify an HTTP status. Returns `None` for success statuses.
    pub fn from_status(status: reqwest::StatusCode) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        Some(match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                ErrorKind::Unauthorized
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::GATEWAY_TIMEOUT => {
                ErrorKind::Timeout
            }
            s if s.is_server_error() => ErrorKind::UpstreamUnavailable,
            _ => ErrorKind::MalformedResponse,
        })
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_decode() || e.is_body() {
            ErrorKind::MalformedResponse
        } else if let Some(status) = e.status() {
            ErrorKind::from_status(status).unwrap_or(ErrorKind::MalformedResponse)
        } else {
            ErrorKind::UpstreamUnavailable
        }
    }
}

/// The caller supplied something that is not an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid IP address: {0:?}")]
    Invalid(String),
}

/// Client-facing failure of an HTTP request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("invalid AS number: {0:?}")]
    InvalidAsn(String),

    #[error("could not determine the client address")]
    UnknownClient,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidAddress(_) | ApiError::UnknownClient => "invalid_address",
            ApiError::InvalidAsn(_) => "invalid_asn",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}
