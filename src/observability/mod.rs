//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and histograms via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (JSON in production, human-readable in development)
//!     → whatever `metrics` recorder the embedding process installs
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the HTTP path; tunnels carry a connection ID
//! - No recorder installed means metric updates are no-ops

pub mod logging;
pub mod metrics;
