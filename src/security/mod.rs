//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (allow-set check on the peer address)
//!     → rate_limit.rs (sliding-window quota per peer address)
//!     → Pass to the stream forwarder
//! ```
//!
//! # Design Decisions
//! - Fail closed: a store failure rejects the request with a generic 500
//! - Client identity is the connecting peer, never a forwarded header

pub mod access_control;
pub mod rate_limit;

pub use access_control::AccessGate;
pub use rate_limit::{Decision, RateLimitRecord, RateLimiter, RequestLog, WindowPolicy};
