//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP server stops accepting, drains in-flight requests
//!             → tunnel server stops accepting, drains live tunnels (bounded)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
