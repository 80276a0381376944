//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, addresses parse)
//! - Validate route prefixes and upstream URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::{Scheme, Uri};

use crate::config::schema::{ProxyConfig, StoreConfig};

/// Smallest preamble buffer that still fits a CONNECT line and a Host header.
pub const MIN_PREAMBLE_BYTES: usize = 64;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }

    let tunnel = &config.tunnel;
    if tunnel.enabled {
        if tunnel.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "tunnel.bind_address",
                format!("`{}` is not a socket address", tunnel.bind_address),
            ));
        }
        if tunnel.max_connections == 0 {
            errors.push(ValidationError::new("tunnel.max_connections", "must be greater than 0"));
        }
        if tunnel.preamble_max_bytes < MIN_PREAMBLE_BYTES {
            errors.push(ValidationError::new(
                "tunnel.preamble_max_bytes",
                format!("must be at least {MIN_PREAMBLE_BYTES}"),
            ));
        }
        if tunnel.preamble_timeout_secs == 0 {
            errors.push(ValidationError::new("tunnel.preamble_timeout_secs", "must be greater than 0"));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let limits = &config.rate_limit;
    if limits.enabled {
        if limits.max_window_request_count == 0 {
            errors.push(ValidationError::new(
                "rate_limit.max_window_request_count",
                "must be greater than 0",
            ));
        }
        if limits.window_size_hours == 0 {
            errors.push(ValidationError::new("rate_limit.window_size_hours", "must be greater than 0"));
        }
        if limits.window_log_interval_hours == 0 {
            errors.push(ValidationError::new(
                "rate_limit.window_log_interval_hours",
                "must be greater than 0",
            ));
        } else if limits.window_log_interval_hours > limits.window_size_hours {
            errors.push(ValidationError::new(
                "rate_limit.window_log_interval_hours",
                "must not exceed window_size_hours",
            ));
        }
        if let StoreConfig::Redis { url } = &limits.store {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                errors.push(ValidationError::new(
                    "rate_limit.store.url",
                    format!("`{url}` is not a redis:// or rediss:// URL"),
                ));
            }
        }
    }

    for route in &config.routes {
        if !route.prefix.starts_with('/') {
            errors.push(ValidationError::new(
                "routes.prefix",
                format!("`{}` must start with `/`", route.prefix),
            ));
        }
        let upstream = route.upstream.parse::<Uri>().ok();
        let usable = upstream
            .as_ref()
            .is_some_and(|uri| uri.scheme() == Some(&Scheme::HTTP) && uri.authority().is_some());
        if !usable {
            errors.push(ValidationError::new(
                "routes.upstream",
                format!("`{}` is not an http:// URL", route.upstream),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
