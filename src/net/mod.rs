//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (tunnel listener)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, drain tracking)
//!     → Hand off to the tunnel establisher
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
