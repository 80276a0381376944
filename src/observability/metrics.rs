//! Metrics collection.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): HTTP requests by method, status
//! - `proxy_request_duration_seconds` (histogram): HTTP latency
//! - `proxy_error_responses_total` (counter): error bodies by kind, status
//! - `proxy_access_denied_total` (counter)
//! - `proxy_rate_limited_total` (counter)
//! - `proxy_store_errors_total` (counter)
//! - `proxy_upstream_errors_total` (counter): by phase (connect, timeout, stream)
//! - `proxy_tunnels_total` (counter): by kind (connect, relay) and outcome
//! - `proxy_tunnel_bytes_total` (counter): by direction
//! - `proxy_active_tunnels` (gauge)
//!
//! # Design Decisions
//! - Only the `metrics` facade is used; exposition is left to the host process

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::error::ErrorKind;

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    counter!("proxy_requests_total", "method" => method.clone(), "status" => status.clone())
        .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_error_response(kind: ErrorKind, status: u16) {
    counter!(
        "proxy_error_responses_total",
        "kind" => kind.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_access_denied() {
    counter!("proxy_access_denied_total").increment(1);
}

pub fn record_rate_limited() {
    counter!("proxy_rate_limited_total").increment(1);
}

pub fn record_store_error() {
    counter!("proxy_store_errors_total").increment(1);
}

/// `phase` is `connect`, `timeout` or `stream`.
pub fn record_upstream_error(phase: &'static str) {
    counter!("proxy_upstream_errors_total", "phase" => phase).increment(1);
}

pub fn record_tunnel_opened(kind: &'static str) {
    counter!("proxy_tunnels_total", "kind" => kind, "outcome" => "opened").increment(1);
    gauge!("proxy_active_tunnels").increment(1.0);
}

pub fn record_tunnel_rejected(kind: &'static str) {
    counter!("proxy_tunnels_total", "kind" => kind, "outcome" => "rejected").increment(1);
}

pub fn record_tunnel_closed(to_upstream: u64, to_client: u64) {
    gauge!("proxy_active_tunnels").decrement(1.0);
    counter!("proxy_tunnel_bytes_total", "direction" => "upstream").increment(to_upstream);
    counter!("proxy_tunnel_bytes_total", "direction" => "client").increment(to_client);
}
