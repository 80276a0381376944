//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Deployment mode; toggles the access gate and error disclosure.
    pub mode: DeploymentMode,

    /// HTTP pipeline listener.
    pub listener: ListenerConfig,

    /// Raw CONNECT/Host relay listener.
    pub tunnel: TunnelConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Client address allow-set.
    pub access: AccessConfig,

    /// Sliding-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Path-prefix routes to fixed upstreams, for origin-form requests.
    pub routes: Vec<RouteConfig>,
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Production,
    #[default]
    Development,
}

impl DeploymentMode {
    pub fn is_production(self) -> bool {
        self == DeploymentMode::Production
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(DeploymentMode::Production),
            "development" | "dev" => Ok(DeploymentMode::Development),
            other => Err(format!("unknown deployment mode `{other}`")),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Tunnel listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Run the tunnel listener at all.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8124").
    pub bind_address: String,

    /// Maximum concurrent tunnels (backpressure).
    pub max_connections: usize,

    /// Largest preamble accepted before the header block must end.
    pub preamble_max_bytes: usize,

    /// How long a client may take to deliver its preamble.
    pub preamble_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8124".to_string(),
            max_connections: 10_000,
            preamble_max_bytes: 8192,
            preamble_timeout_secs: 10,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed until response headers are produced, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// A fixed upstream for requests under a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Path prefix to match, on segment boundaries (e.g., "/books").
    pub prefix: String,

    /// Upstream base URL (e.g., "http://127.0.0.1:8001").
    pub upstream: String,

    /// Remove the prefix before forwarding.
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: bool,
}

fn default_strip_prefix() -> bool {
    true
}

/// Access gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Addresses admitted in production mode.
    pub allowed_ips: Vec<IpAddr>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_ips: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests admitted per client within one window.
    pub max_window_request_count: u64,

    /// Trailing window length in hours.
    pub window_size_hours: u64,

    /// Granularity of stored log entries in hours.
    pub window_log_interval_hours: u64,

    /// Drop entries that fell out of the window when the record is written.
    pub prune_stale_entries: bool,

    /// Backing store for per-client records.
    pub store: StoreConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_window_request_count: 100,
            window_size_hours: 24,
            window_log_interval_hours: 1,
            prune_stale_entries: false,
            store: StoreConfig::default(),
        }
    }
}

/// Counter store backend selection.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map; state is lost on restart.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis { url: String },
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
