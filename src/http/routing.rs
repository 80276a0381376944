//! Path-prefix routing to fixed upstreams.
//!
//! # Responsibilities
//! - Match an origin-form request path against configured prefixes
//! - Rewrite the matched request onto the route's upstream
//!
//! # Design Decisions
//! - Prefixes match whole path segments: `/books` matches `/books` and
//!   `/books/7`, never `/bookshelf`
//! - Path matching is case-sensitive
//! - The longest matching prefix wins
//! - The query string travels unchanged

use axum::http::uri::{Authority, Scheme, Uri};

use crate::config::RouteConfig;
use crate::error::ProxyError;

/// One prefix bound to one upstream.
#[derive(Debug, Clone)]
pub struct Route {
    prefix: String,
    authority: Authority,
    base_path: String,
    strip_prefix: bool,
}

impl Route {
    /// Build a route. Returns `None` unless `upstream` is an `http://` URL
    /// with an authority.
    pub fn new(prefix: &str, upstream: &str, strip_prefix: bool) -> Option<Self> {
        let upstream: Uri = upstream.parse().ok()?;
        if upstream.scheme() != Some(&Scheme::HTTP) {
            return None;
        }

        Some(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            authority: upstream.authority()?.clone(),
            base_path: upstream.path().trim_end_matches('/').to_string(),
            strip_prefix,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// The part of `path` after the prefix, when the prefix matches.
    fn remainder<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Target URI for a request to `uri`, which must match this route.
    pub fn rewrite(&self, uri: &Uri) -> Result<Uri, ProxyError> {
        let path = uri.path();
        let forwarded = match self.remainder(path) {
            Some(rest) if self.strip_prefix => rest,
            _ => path,
        };

        let mut target = format!("{}{}", self.base_path, forwarded);
        if !target.starts_with('/') {
            target.insert(0, '/');
        }
        if let Some(query) = uri.query() {
            target.push('?');
            target.push_str(query);
        }

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(target)
            .build()
            .map_err(|e| ProxyError::bad_request("Request path cannot be routed").with_detail(e))
    }
}

/// Configured routes, longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        let mut table = Vec::with_capacity(routes.len());
        for route in routes {
            match Route::new(&route.prefix, &route.upstream, route.strip_prefix) {
                Some(built) => table.push(built),
                None => tracing::warn!(
                    prefix = %route.prefix,
                    upstream = %route.upstream,
                    "Skipping route with an unusable upstream"
                ),
            }
        }
        table.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes: table }
    }

    /// Route for `path`, if any prefix matches.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.remainder(path).is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
