//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (HTTP listener)
//!     → server.rs (Axum setup, tower layers, one fallback handler)
//!     → context.rs (request + peer address)
//!     → pipeline.rs (ordered stages: access gate → rate limiter → forwarder)
//!     → forward.rs (stream to upstream and back, routing.rs picks fixed upstreams)
//!     → response.rs (error bodies for any stage that fails)
//!     → Send to client
//! ```

pub mod context;
pub mod forward;
pub mod pipeline;
pub mod response;
pub mod routing;
pub mod server;

pub use context::RequestContext;
pub use forward::StreamForwarder;
pub use pipeline::{Middleware, Next, Pipeline, PipelineBuilder};
pub use response::ErrorResponder;
pub use routing::{Route, RouteTable};
pub use server::HttpServer;
