//! HTTP reverse-proxy and CONNECT tunnel engine.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod store;
pub mod tunnel;

pub use config::schema::ProxyConfig;
pub use error::{ErrorKind, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use tunnel::TunnelServer;
