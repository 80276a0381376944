//! Access gate.
//! Admits clients by address against a fixed allow-set.

use std::collections::HashSet;
use std::net::IpAddr;

use axum::body::Body;
use axum::http::Response;
use futures_util::future::BoxFuture;

use crate::config::{AccessConfig, DeploymentMode};
use crate::error::ProxyError;
use crate::http::context::RequestContext;
use crate::http::pipeline::{Middleware, Next};
use crate::observability::metrics;

/// Static allow/deny check on the client address.
#[derive(Debug, Clone)]
pub struct AccessGate {
    allowed: HashSet<IpAddr>,
    restricted: bool,
}

impl AccessGate {
    /// `restricted == false` admits everyone (development operation).
    pub fn new(allowed: impl IntoIterator<Item = IpAddr>, restricted: bool) -> Self {
        Self {
            allowed: allowed.into_iter().map(|ip| ip.to_canonical()).collect(),
            restricted,
        }
    }

    /// The gate is only enforced in production.
    pub fn from_config(config: &AccessConfig, mode: DeploymentMode) -> Self {
        Self::new(config.allowed_ips.iter().copied(), mode.is_production())
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn admits(&self, ip: IpAddr) -> bool {
        !self.restricted || self.allowed.contains(&ip.to_canonical())
    }
}

impl Middleware for AccessGate {
    fn name(&self) -> &'static str {
        "access_gate"
    }

    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        Box::pin(async move {
            let client = ctx.client_ip();
            if self.admits(client) {
                next.run(ctx).await
            } else {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    client = %client,
                    "Rejected request from address outside the allow-set"
                );
                metrics::record_access_denied();
                next.fail(ProxyError::access_denied())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::pipeline::Pipeline;
    use crate::http::response::ErrorResponder;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ctx(peer: &str) -> RequestContext {
        let request = Request::builder().uri("/books").body(Body::empty()).unwrap();
        RequestContext::new(request, peer.parse().unwrap())
    }

    fn localhost_only(mode: DeploymentMode) -> AccessGate {
        AccessGate::from_config(&AccessConfig::default(), mode)
    }

    #[test]
    fn restricted_gate_checks_membership() {
        let gate = localhost_only(DeploymentMode::Production);
        assert!(gate.is_restricted());
        assert!(gate.admits("127.0.0.1".parse().unwrap()));
        assert!(gate.admits("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!gate.admits("192.168.1.20".parse().unwrap()));
    }

    #[test]
    fn unrestricted_gate_admits_anyone() {
        let gate = localhost_only(DeploymentMode::Development);
        assert!(gate.admits("203.0.113.9".parse().unwrap()));
        assert!(gate.admits("2001:db8::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejection_is_403_and_pipeline_stops() {
        let pipeline = Pipeline::builder(ErrorResponder::new(DeploymentMode::Production))
            .stage(localhost_only(DeploymentMode::Production))
            .build();
        let reached_end = AtomicBool::new(false);

        let response = pipeline
            .run(ctx("192.168.1.20:40000"), |_| {
                reached_end.store(true, Ordering::SeqCst);
                Response::new(Body::empty())
            })
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!reached_end.load(Ordering::SeqCst));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unknown or unauthorized IP address.");
    }

    #[tokio::test]
    async fn admitted_request_proceeds() {
        let pipeline = Pipeline::builder(ErrorResponder::new(DeploymentMode::Development))
            .stage(localhost_only(DeploymentMode::Development))
            .build();

        let response = pipeline
            .run(ctx("198.51.100.4:40000"), |_| Response::new(Body::from("through")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
