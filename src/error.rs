//! Proxy failure values.
//!
//! # Design Decisions
//! - `ProxyError` is plain data (`Clone`), so it can be handed to a
//!   pipeline continuation, stored, or returned across an await point
//! - Status is optional; the Error Responder falls back to 500
//! - `detail` carries diagnostics that only development mode discloses

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::security::rate_limit::{X_RATE_LIMIT_LIMIT, X_RATE_LIMIT_REMAINING};

/// Failure taxonomy for the HTTP path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client address is not in the allow-set.
    AccessDenied,
    /// Sliding-window quota exhausted.
    RateLimitExceeded,
    /// Upstream could not be reached or the exchange failed before headers.
    UpstreamUnreachable,
    /// Upstream body failed after headers went out.
    UpstreamStream,
    /// Counter store read/write failed.
    StoreFailure,
    /// Request carries no routable target.
    BadRequest,
    /// Method is served by another listener.
    MethodNotAllowed,
    /// Every stage proceeded and none produced a response.
    NoHandler,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UpstreamStream => "upstream_stream",
            ErrorKind::StoreFailure => "store_failure",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::NoHandler => "no_handler",
        }
    }
}

/// An HTTP-path failure: status, message and response headers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProxyError {
    kind: ErrorKind,
    status: Option<StatusCode>,
    message: String,
    headers: HeaderMap,
    detail: Option<String>,
}

impl ProxyError {
    /// A bare error with no status; it is reported as 500.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            headers: HeaderMap::new(),
            detail: None,
        }
    }

    /// Set the response status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a header to the error response.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a diagnostic that is only shown outside production.
    pub fn with_detail(mut self, detail: impl std::fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// 403 for a client outside the allow-set.
    pub fn access_denied() -> Self {
        Self::new(ErrorKind::AccessDenied, "Unknown or unauthorized IP address.")
            .with_status(StatusCode::FORBIDDEN)
    }

    /// 429 with the quota headers.
    pub fn rate_limited(limit: u64, window_hours: u64, remaining: u64) -> Self {
        Self::new(
            ErrorKind::RateLimitExceeded,
            format!("You have exceeded the {limit} requests in {window_hours} hrs limit!"),
        )
        .with_status(StatusCode::TOO_MANY_REQUESTS)
        .with_header(X_RATE_LIMIT_LIMIT, HeaderValue::from(limit))
        .with_header(X_RATE_LIMIT_REMAINING, HeaderValue::from(remaining))
    }

    /// 502 when the upstream cannot be reached.
    pub fn upstream_unreachable(source: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::UpstreamUnreachable, "Unable to reach upstream server")
            .with_status(StatusCode::BAD_GATEWAY)
            .with_detail(source)
    }

    /// 504 when the upstream sends no response headers in time.
    pub fn upstream_timeout(after: std::time::Duration) -> Self {
        Self::new(ErrorKind::UpstreamUnreachable, "Upstream server did not respond in time")
            .with_status(StatusCode::GATEWAY_TIMEOUT)
            .with_detail(format!("no response headers after {}s", after.as_secs()))
    }

    /// Store internals never reach the client; they travel in `detail` only.
    pub fn store_failure(source: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::StoreFailure, "Unable to process request!").with_detail(source)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message).with_status(StatusCode::BAD_REQUEST)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotAllowed, message).with_status(StatusCode::METHOD_NOT_ALLOWED)
    }

    /// Every stage proceeded and none answered.
    pub fn no_handler() -> Self {
        Self::new(ErrorKind::NoHandler, "No handler produced a response")
    }

    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Effective status code, 500 when none was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Client-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}
