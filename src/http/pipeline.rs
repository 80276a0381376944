//! Ordered middleware execution.
//!
//! # How a request moves through the pipeline
//!
//! ```text
//! Pipeline::run(ctx, done)
//!     → stage[0].call(ctx, next₀)
//!         next₀.run(ctx)      → stage[1].call(ctx, next₁) → ...
//!         next₀.fail(err)     → ErrorResponder (remaining stages skipped)
//!     → past the last stage: done(ctx)
//! ```
//!
//! `Next` is consumed by both `run` and `fail`, so a stage can advance at
//! most once; a second call does not compile. Every stage must return a
//! `Response`, so a stage that neither advances nor answers cannot exist.
//!
//! The cursor is the slice held by each `Next`. `Pipeline` itself carries no
//! per-request state and is shared read-only across concurrent requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;
use futures_util::future::BoxFuture;

use crate::error::ProxyError;
use crate::http::context::RequestContext;
use crate::http::response::ErrorResponder;

/// One handler in the chain.
///
/// A stage either calls `next.run(ctx)` to proceed, `next.fail(err)` to
/// abort, or builds a response itself.
pub trait Middleware: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response<Body>>;
}

type Done<'a> = Box<dyn FnOnce(RequestContext) -> Response<Body> + Send + 'a>;

/// The continuation bound to one position of one traversal.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    responder: &'a ErrorResponder,
    done: Done<'a>,
}

impl<'a> Next<'a> {
    /// Proceed to the following stage, or to the terminal callback.
    pub async fn run(self, ctx: RequestContext) -> Response<Body> {
        let Next {
            remaining,
            responder,
            done,
        } = self;

        match remaining.split_first() {
            Some((stage, rest)) => {
                tracing::trace!(stage = stage.name(), "Entering pipeline stage");
                let next = Next {
                    remaining: rest,
                    responder,
                    done,
                };
                stage.call(ctx, next).await
            }
            None => done(ctx),
        }
    }

    /// Abort the traversal and answer with `err`.
    pub fn fail(self, err: ProxyError) -> Response<Body> {
        self.responder.respond(&err)
    }

    /// Number of stages after the current one.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

/// An immutable, ordered sequence of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Middleware>]>,
    responder: ErrorResponder,
}

impl Pipeline {
    pub fn builder(responder: ErrorResponder) -> PipelineBuilder {
        PipelineBuilder {
            stages: Vec::new(),
            responder,
        }
    }

    pub fn responder(&self) -> &ErrorResponder {
        &self.responder
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `ctx` through every stage; `done` fires only if all of them proceed.
    pub async fn run<'a, F>(&'a self, ctx: RequestContext, done: F) -> Response<Body>
    where
        F: FnOnce(RequestContext) -> Response<Body> + Send + 'a,
    {
        let next = Next {
            remaining: &self.stages[..],
            responder: &self.responder,
            done: Box::new(done),
        };
        next.run(ctx).await
    }
}

/// Collects stages; insertion order is execution order.
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Middleware>>,
    responder: ErrorResponder,
}

impl PipelineBuilder {
    pub fn stage<M: Middleware + 'static>(self, stage: M) -> Self {
        self.shared_stage(Arc::new(stage))
    }

    pub fn shared_stage(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
            responder: self.responder,
        }
    }
}
