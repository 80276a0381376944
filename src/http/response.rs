//! Error responses.
//!
//! # Responsibilities
//! - Map a `ProxyError` to a status, headers and a JSON body
//! - Disclose diagnostics only outside production
//!
//! # Design Decisions
//! - Errors become `Response` values before anything is written, so the
//!   status line and headers are always still open when this runs
//! - Failures after response headers left (upstream body errors) never reach
//!   this module; they abort the body stream instead (see `forward.rs`)

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use serde::Serialize;

use crate::config::DeploymentMode;
use crate::error::ProxyError;
use crate::observability::metrics;

/// Wire shape of every error body.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}

/// Turns failures into client-facing responses.
#[derive(Debug, Clone, Copy)]
pub struct ErrorResponder {
    mode: DeploymentMode,
}

impl ErrorResponder {
    pub fn new(mode: DeploymentMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn respond(&self, err: &ProxyError) -> Response<Body> {
        let status = err.status();

        if !self.mode.is_production() {
            tracing::debug!(
                kind = ?err.kind(),
                status = %status,
                message = %err.message(),
                detail = err.detail().unwrap_or_default(),
                "Responding with error"
            );
        }
        metrics::record_error_response(err.kind(), status.as_u16());

        let message = if err.message().is_empty() {
            "Server Error"
        } else {
            err.message()
        };
        let stack = if self.mode.is_production() {
            None
        } else {
            err.detail()
        };
        let body = serde_json::to_vec(&ErrorBody {
            success: false,
            error: message,
            stack,
        })
        .unwrap_or_else(|_| br#"{"success":false,"error":"Server Error"}"#.to_vec());

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in err.headers() {
            headers.insert(name.clone(), value.clone());
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
