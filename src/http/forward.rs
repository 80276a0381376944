//! Stream forwarding to the upstream named by the request.
//!
//! # Responsibilities
//! - Send origin-form requests under a configured prefix to that route's upstream
//! - Otherwise derive the target from the absolute-form URI or the `Host` header
//! - Relay the request body to the upstream frame by frame
//! - Hand the upstream status and headers back before any body byte
//! - Relay the upstream body as it arrives
//!
//! # Design Decisions
//! - Bodies are never buffered; both directions are streaming `Body` values
//! - Dropping the returned future (client went away) drops the upstream call
//! - A failure before upstream headers becomes a 502 (504 when the upstream
//!   is too slow) through the pipeline; a failure after them aborts the body
//!   stream and the connection with it
//! - At-most-once: no retries

use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, Scheme};
use axum::http::{header, HeaderValue, Method, Request, Response, Uri};
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::ProxyConfig;
use crate::error::{ErrorKind, ProxyError};
use crate::http::context::RequestContext;
use crate::http::pipeline::{Middleware, Next};
use crate::http::routing::RouteTable;
use crate::observability::metrics;

const DEFAULT_HTTP_PORT: u16 = 80;

/// Terminal pipeline stage that relays the request upstream.
#[derive(Clone)]
pub struct StreamForwarder {
    client: Client<HttpConnector, Body>,
    routes: RouteTable,
    request_timeout: Duration,
}

impl StreamForwarder {
    /// `request_timeout` bounds the wait for upstream response headers.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            routes: RouteTable::default(),
            request_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeouts.connect_secs),
            Duration::from_secs(config.timeouts.request_secs),
        )
        .with_routes(RouteTable::from_config(&config.routes))
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Upstream URI for `request`, plus the `Host` to send when a route
    /// chose the upstream.
    pub fn resolve(
        &self,
        request: &Request<Body>,
    ) -> Result<(Uri, Option<HeaderValue>), ProxyError> {
        let origin_form = request.uri().authority().is_none();
        if origin_form && request.method() != Method::CONNECT {
            if let Some(route) = self.routes.resolve(request.uri().path()) {
                let uri = route.rewrite(request.uri())?;
                let host = HeaderValue::from_str(route.authority().as_str()).ok();
                return Ok((uri, host));
            }
        }
        Ok((Self::upstream_uri(request)?, None))
    }

    /// Upstream URI for `request`: `http` scheme, explicit port (80 when
    /// absent), path and query unchanged.
    pub fn upstream_uri(request: &Request<Body>) -> Result<Uri, ProxyError> {
        if request.method() == Method::CONNECT {
            return Err(ProxyError::method_not_allowed(
                "CONNECT is served by the tunnel listener",
            ));
        }

        let authority = match request.uri().authority() {
            Some(authority) => authority.clone(),
            None => request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|host| host.parse::<Authority>().ok())
                .ok_or_else(|| ProxyError::bad_request("Request names no upstream host"))?,
        };

        let port = authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT);
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(format!("{}:{}", authority.host(), port))
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::bad_request("Request names no valid upstream").with_detail(e))
    }

    /// Send the request upstream and return the upstream response with a
    /// streaming body.
    pub async fn forward(&self, ctx: RequestContext) -> Result<Response<Body>, ProxyError> {
        let (uri, host) = self.resolve(ctx.request())?;
        let request_id = ctx.request_id().to_string();

        let (mut parts, body) = ctx.into_request().into_parts();
        tracing::debug!(
            request_id = %request_id,
            method = %parts.method,
            upstream = %uri,
            "Forwarding request"
        );
        parts.uri = uri;
        if let Some(host) = host {
            parts.headers.insert(header::HOST, host);
        }
        let outbound = Request::from_parts(parts, body);

        let exchange = tokio::time::timeout(self.request_timeout, self.client.request(outbound));
        let response = match exchange.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Upstream request failed");
                metrics::record_upstream_error("connect");
                return Err(ProxyError::upstream_unreachable(e));
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Upstream sent no response headers in time"
                );
                metrics::record_upstream_error("timeout");
                return Err(ProxyError::upstream_timeout(self.request_timeout));
            }
        };

        // Past this point a body failure can only end the stream.
        let (parts, body) = response.into_parts();
        let body = body.map_err(move |e| {
            tracing::warn!(
                request_id = %request_id,
                kind = ErrorKind::UpstreamStream.as_str(),
                error = %e,
                "Upstream body failed mid-stream"
            );
            metrics::record_upstream_error("stream");
            e
        });
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Middleware for StreamForwarder {
    fn name(&self) -> &'static str {
        "stream_forwarder"
    }

    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        Box::pin(async move {
            match self.forward(ctx).await {
                Ok(response) => response,
                Err(err) => next.fail(err),
            }
        })
    }
}
