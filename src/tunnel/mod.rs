//! Raw tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection (tunnel listener)
//!     → preamble.rs (buffer until the header block ends, classify)
//!         CONNECT host:port  → connect upstream → "HTTP/1.1 200 OK" → relay
//!         Host: header only  → connect upstream → replay preamble → relay
//!         anything else      → close
//!     → server.rs (accept loop, connect, relay, drain)
//! ```
//!
//! # Design Decisions
//! - No HTTP response channel exists here; failures before the tunnel is
//!   up get at most a bare status line, failures after it just close
//! - Relayed bytes are never inspected

pub mod preamble;
pub mod server;

pub use preamble::{classify, Preamble, TunnelTarget};
pub use server::{TunnelServer, TunnelSettings};

/// Failures on the raw tunnel path.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("client closed before sending a complete preamble")]
    ClosedBeforePreamble,

    #[error("preamble exceeds {0} bytes")]
    PreambleTooLarge(usize),

    #[error("preamble not received in time")]
    PreambleTimeout,

    #[error("malformed preamble: {0}")]
    MalformedPreamble(String),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
