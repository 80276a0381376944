//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the request pipeline once at startup
//! - Create the Axum router; every request lands in one fallback handler
//! - Wire up tower middleware (tracing, request ID)
//! - Serve until the shutdown signal fires, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::context::RequestContext;
use crate::http::forward::StreamForwarder;
use crate::http::pipeline::Pipeline;
use crate::http::response::ErrorResponder;
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::security::access_control::AccessGate;
use crate::security::rate_limit::{RateLimiter, WindowPolicy};
use crate::store::CounterStore;

/// Application state injected into the handler.
#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// HTTP front end for the proxy pipeline.
pub struct HttpServer {
    router: Router,
    pipeline: Pipeline,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server running the standard pipeline.
    pub fn new(config: ProxyConfig, store: Arc<dyn CounterStore>) -> Self {
        let pipeline = Self::build_pipeline(&config, store);
        Self::with_pipeline(config, pipeline)
    }

    /// Access gate, then rate limiter (when enabled), then stream forwarder.
    pub fn build_pipeline(config: &ProxyConfig, store: Arc<dyn CounterStore>) -> Pipeline {
        let mut builder = Pipeline::builder(ErrorResponder::new(config.mode))
            .stage(AccessGate::from_config(&config.access, config.mode));

        if config.rate_limit.enabled {
            builder = builder.stage(RateLimiter::new(
                store,
                WindowPolicy::from_config(&config.rate_limit),
            ));
        }

        builder
            .stage(StreamForwarder::from_config(config))
            .build()
    }

    /// Create a server around a caller-assembled pipeline.
    pub fn with_pipeline(config: ProxyConfig, pipeline: Pipeline) -> Self {
        let state = AppState {
            pipeline: pipeline.clone(),
        };
        let router = Self::build_router(state);
        Self {
            router,
            pipeline,
            config,
        }
    }

    /// Build the Axum router with all middleware layers. The upstream wait is
    /// bounded inside the forwarder, not by a layer here.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve connections from `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            mode = ?self.config.mode,
            stages = ?self.pipeline.stage_names(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::recv(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Runs every request through the pipeline.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let ctx = RequestContext::new(request, peer);

    let responder = *state.pipeline.responder();
    let response = state
        .pipeline
        .run(ctx, move |ctx| {
            tracing::error!(
                request_id = %ctx.request_id(),
                uri = %ctx.uri(),
                "No pipeline stage produced a response"
            );
            responder.respond(&ProxyError::no_handler())
        })
        .await;

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
