//! Per-request state handed through the pipeline.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, Uri};

/// The inbound request together with who sent it.
///
/// A context is owned by exactly one pipeline traversal and moves from stage
/// to stage; the response side is the value each stage returns.
#[derive(Debug)]
pub struct RequestContext {
    request: Request<Body>,
    peer: SocketAddr,
    received_at: Instant,
}

impl RequestContext {
    pub fn new(request: Request<Body>, peer: SocketAddr) -> Self {
        Self {
            request,
            peer,
            received_at: Instant::now(),
        }
    }

    /// Client identity: the peer IP with IPv4-mapped IPv6 folded to IPv4.
    pub fn client_ip(&self) -> IpAddr {
        self.peer.ip().to_canonical()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Request id assigned by the front end, if any.
    pub fn request_id(&self) -> &str {
        self.request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }

    pub fn into_request(self) -> Request<Body> {
        self.request
    }
}
