//! Sliding-window rate limiting backed by a counter store.
//!
//! Each client key maps to a log of `(timestamp, count)` entries. Entries are
//! coarsened to one per log interval, so a record holds at most
//! `window / interval` live entries. Admission sums the counts of entries
//! newer than `now - window`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::error::ProxyError;
use crate::http::context::RequestContext;
use crate::http::pipeline::{Middleware, Next};
use crate::observability::metrics;
use crate::store::{CounterStore, StoreError};

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");

const SECS_PER_HOUR: i64 = 3600;

/// One coarsened log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    #[serde(rename = "requestTimeStamp")]
    pub timestamp: i64,
    #[serde(rename = "requestCount")]
    pub count: u64,
}

/// Per-client request log, ordered by non-decreasing timestamp.
///
/// Stored as a bare JSON array of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitRecord {
    entries: Vec<RequestLog>,
}

impl RateLimitRecord {
    /// Record for a client seen for the first time at `now`.
    pub fn first(now: i64) -> Self {
        Self {
            entries: vec![RequestLog { timestamp: now, count: 1 }],
        }
    }

    pub fn from_entries(entries: Vec<RequestLog>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RequestLog] {
        &self.entries
    }

    /// Requests logged strictly after `window_start`. Older entries stay in
    /// the record; they are only left out of the sum.
    pub fn count_since(&self, window_start: i64) -> u64 {
        self.entries
            .iter()
            .filter(|entry| entry.timestamp > window_start)
            .map(|entry| entry.count)
            .sum()
    }

    /// Count one request at `now`: bump the latest entry while it is younger
    /// than `interval_secs`, otherwise open a new one.
    pub fn log(&mut self, now: i64, interval_secs: i64) {
        match self.entries.last_mut() {
            Some(last) if now - last.timestamp < interval_secs => last.count += 1,
            _ => self.entries.push(RequestLog { timestamp: now, count: 1 }),
        }
    }

    /// Drop entries at or before `window_start`.
    pub fn prune(&mut self, window_start: i64) {
        self.entries.retain(|entry| entry.timestamp > window_start);
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Window parameters, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub max_requests: u64,
    pub window_hours: u64,
    pub log_interval_hours: u64,
    pub prune_stale_entries: bool,
}

impl WindowPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_window_request_count,
            window_hours: config.window_size_hours,
            log_interval_hours: config.window_log_interval_hours,
            prune_stale_entries: config.prune_stale_entries,
        }
    }

    fn window_secs(&self) -> i64 {
        hours_to_secs(self.window_hours)
    }

    fn log_interval_secs(&self) -> i64 {
        hours_to_secs(self.log_interval_hours)
    }
}

/// Saturates instead of overflowing for absurdly long windows.
fn hours_to_secs(hours: u64) -> i64 {
    i64::try_from(hours)
        .unwrap_or(i64::MAX)
        .saturating_mul(SECS_PER_HOUR)
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Outcome of one admission check. `remaining` is the capacity before this
/// request was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted { limit: u64, remaining: u64 },
    Rejected { limit: u64, remaining: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt rate-limit record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Admission control stage.
///
/// Checks for one client key are serialised by a per-key async mutex, so
/// concurrent requests from the same client never read the same count.
/// Different clients never contend. A key's mutex lives only while some
/// check for that key is in flight.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: WindowPolicy,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: WindowPolicy) -> Self {
        Self {
            store,
            policy,
            in_flight: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub async fn check(&self, key: &str) -> Result<Decision, RateLimitError> {
        self.check_at(key, unix_now()).await
    }

    /// Admission check against an explicit clock reading (unix seconds).
    pub async fn check_at(&self, key: &str, now: i64) -> Result<Decision, RateLimitError> {
        let lock = self.in_flight.entry(key.to_owned()).or_default().clone();
        let guard = lock.lock().await;
        let decision = self.check_locked(key, now).await;
        drop(guard);
        drop(lock);

        // The map's own handle is the last one unless another check for this
        // key cloned it in the meantime.
        self.in_flight.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        decision
    }

    /// Number of keys with a check in flight.
    pub fn in_flight_keys(&self) -> usize {
        self.in_flight.len()
    }

    async fn check_locked(&self, key: &str, now: i64) -> Result<Decision, RateLimitError> {
        let limit = self.policy.max_requests;

        let Some(raw) = self.store.get(key).await? else {
            let record = RateLimitRecord::first(now);
            self.store.set(key, record.encode()?).await?;
            return Ok(Decision::Admitted {
                limit,
                remaining: limit,
            });
        };

        let mut record = RateLimitRecord::decode(&raw)?;
        let window_start = now.saturating_sub(self.policy.window_secs());
        let total = record.count_since(window_start);
        let remaining = limit.saturating_sub(total);

        if total >= limit {
            return Ok(Decision::Rejected { limit, remaining });
        }

        record.log(now, self.policy.log_interval_secs());
        if self.policy.prune_stale_entries {
            record.prune(window_start);
        }
        self.store.set(key, record.encode()?).await?;

        Ok(Decision::Admitted { limit, remaining })
    }
}

impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        Box::pin(async move {
            let client = ctx.client_ip().to_string();

            match self.check(&client).await {
                Ok(Decision::Admitted { limit, remaining }) => {
                    tracing::debug!(client = %client, limit, remaining, "Rate limit admitted");
                    let mut response = next.run(ctx).await;
                    let headers = response.headers_mut();
                    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(limit));
                    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
                    response
                }
                Ok(Decision::Rejected { limit, remaining }) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        client = %client,
                        limit,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited();
                    next.fail(ProxyError::rate_limited(limit, self.policy.window_hours, remaining))
                }
                Err(e) => {
                    tracing::error!(client = %client, error = %e, "Rate limit store failure");
                    metrics::record_store_error();
                    next.fail(ProxyError::store_failure(e))
                }
            }
        })
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentMode;
    use crate::http::pipeline::Pipeline;
    use crate::http::response::ErrorResponder;
    use crate::store::MemoryStore;
    use axum::http::{Request, StatusCode};
    use futures_util::future::{self, FutureExt};

    const HOUR: i64 = 3600;
    const CLIENT: &str = "10.0.0.1";

    fn limiter(max_requests: u64, prune: bool) -> (RateLimiter, MemoryStore) {
        let store = MemoryStore::new();
        let policy = WindowPolicy {
            max_requests,
            prune_stale_entries: prune,
            ..WindowPolicy::default()
        };
        (RateLimiter::new(Arc::new(store.clone()), policy), store)
    }

    async fn stored(store: &MemoryStore) -> RateLimitRecord {
        let raw = store.get(CLIENT).await.unwrap().expect("record persisted");
        RateLimitRecord::decode(&raw).unwrap()
    }

    #[test]
    fn record_serialises_as_json_log() {
        let record = RateLimitRecord::first(1_700_000_000);
        let json = String::from_utf8(record.encode().unwrap()).unwrap();
        assert_eq!(json, r#"[{"requestTimeStamp":1700000000,"requestCount":1}]"#);
    }

    #[tokio::test]
    async fn first_request_creates_record_and_is_admitted() {
        let (limiter, store) = limiter(100, false);
        let decision = limiter.check_at(CLIENT, 1_000_000).await.unwrap();
        assert_eq!(decision, Decision::Admitted { limit: 100, remaining: 100 });
        assert_eq!(stored(&store).await, RateLimitRecord::first(1_000_000));
    }

    #[tokio::test]
    async fn hundred_admitted_then_rejected() {
        let (limiter, _store) = limiter(100, false);
        let now = 5_000_000;

        for i in 0..100u64 {
            let decision = limiter.check_at(CLIENT, now + i as i64).await.unwrap();
            assert_eq!(decision, Decision::Admitted { limit: 100, remaining: 100 - i });
        }

        let decision = limiter.check_at(CLIENT, now + 100).await.unwrap();
        assert_eq!(decision, Decision::Rejected { limit: 100, remaining: 0 });
    }

    #[tokio::test]
    async fn rejection_does_not_touch_the_record() {
        let (limiter, store) = limiter(2, false);
        let now = 5_000_000;
        limiter.check_at(CLIENT, now).await.unwrap();
        limiter.check_at(CLIENT, now + 1).await.unwrap();
        let before = stored(&store).await;

        let decision = limiter.check_at(CLIENT, now + 2).await.unwrap();
        assert!(matches!(decision, Decision::Rejected { .. }));
        assert_eq!(stored(&store).await, before);
    }

    #[tokio::test]
    async fn stale_entries_are_ignored_but_kept() {
        let (limiter, store) = limiter(100, false);
        let now = 9_000_000;
        let stale = RateLimitRecord::from_entries(vec![RequestLog {
            timestamp: now - 25 * HOUR,
            count: 100,
        }]);
        store.set(CLIENT, stale.encode().unwrap()).await.unwrap();

        let decision = limiter.check_at(CLIENT, now).await.unwrap();
        assert_eq!(decision, Decision::Admitted { limit: 100, remaining: 100 });

        let record = stored(&store).await;
        assert_eq!(record.entries().len(), 2);
        assert_eq!(record.entries()[0].count, 100);
        assert_eq!(record.entries()[1], RequestLog { timestamp: now, count: 1 });
    }

    #[tokio::test]
    async fn stale_entries_are_pruned_when_enabled() {
        let (limiter, store) = limiter(100, true);
        let now = 9_000_000;
        let stale = RateLimitRecord::from_entries(vec![RequestLog {
            timestamp: now - 25 * HOUR,
            count: 100,
        }]);
        store.set(CLIENT, stale.encode().unwrap()).await.unwrap();

        limiter.check_at(CLIENT, now).await.unwrap();
        assert_eq!(stored(&store).await.entries(), &[RequestLog { timestamp: now, count: 1 }]);
    }

    #[tokio::test]
    async fn requests_within_interval_share_an_entry() {
        let (limiter, store) = limiter(100, false);
        let start = 2_000_000;

        limiter.check_at(CLIENT, start).await.unwrap();
        limiter.check_at(CLIENT, start + 60).await.unwrap();
        assert_eq!(stored(&store).await.entries(), &[RequestLog { timestamp: start, count: 2 }]);

        let decision = limiter.check_at(CLIENT, start + HOUR).await.unwrap();
        assert_eq!(decision, Decision::Admitted { limit: 100, remaining: 98 });
        assert_eq!(
            stored(&store).await.entries(),
            &[
                RequestLog { timestamp: start, count: 2 },
                RequestLog { timestamp: start + HOUR, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn window_slides_past_old_entries() {
        let (limiter, _store) = limiter(3, false);
        let start = 2_000_000;
        for offset in 0..3 {
            limiter.check_at(CLIENT, start + offset).await.unwrap();
        }
        assert!(matches!(
            limiter.check_at(CLIENT, start + 10).await.unwrap(),
            Decision::Rejected { .. }
        ));

        let later = start + 24 * HOUR + 1;
        assert_eq!(
            limiter.check_at(CLIENT, later).await.unwrap(),
            Decision::Admitted { limit: 3, remaining: 3 }
        );
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let (limiter, store) = limiter(100, false);
        store.set(CLIENT, b"not json".to_vec()).await.unwrap();
        assert!(matches!(
            limiter.check_at(CLIENT, 1).await,
            Err(RateLimitError::Codec(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_from_one_client_never_overshoot() {
        let (limiter, store) = limiter(100, false);
        let limiter = Arc::new(limiter);
        let now = unix_now();

        let mut handles = Vec::new();
        for _ in 0..150 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.check_at(CLIENT, now).await.unwrap() }));
        }

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Decision::Admitted { .. }) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 100);
        assert_eq!(stored(&store).await.count_since(now - 1), 100);
    }

    #[tokio::test]
    async fn finished_checks_leave_no_locks_behind() {
        let (limiter, _store) = limiter(100, false);
        for i in 0..1_000u32 {
            let key = format!("10.{}.{}.{}", i >> 16, (i >> 8) & 0xff, i & 0xff);
            limiter.check_at(&key, 1_000_000).await.unwrap();
        }
        assert_eq!(limiter.in_flight_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_key_lock_is_released_after_the_last_check() {
        let (limiter, _store) = limiter(1_000, false);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check_at(CLIENT, 1_000_000).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(limiter.in_flight_keys(), 0);
    }

    #[tokio::test]
    async fn enormous_window_does_not_overflow() {
        let store = MemoryStore::new();
        let policy = WindowPolicy {
            max_requests: 2,
            window_hours: u64::MAX,
            log_interval_hours: u64::MAX,
            prune_stale_entries: true,
        };
        let limiter = RateLimiter::new(Arc::new(store), policy);

        for _ in 0..2 {
            assert!(matches!(
                limiter.check_at(CLIENT, 1_000_000).await.unwrap(),
                Decision::Admitted { .. }
            ));
        }
        assert!(matches!(
            limiter.check_at(CLIENT, 1_000_001).await.unwrap(),
            Decision::Rejected { .. }
        ));
    }

    struct FailingStore;

    impl CounterStore for FailingStore {
        fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
            future::ready(Err(StoreError::Unavailable("connection refused".into()))).boxed()
        }

        fn set<'a>(&'a self, _key: &'a str, _value: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
            future::ready(Err(StoreError::Unavailable("connection refused".into()))).boxed()
        }
    }

    fn ctx() -> RequestContext {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        RequestContext::new(request, format!("{CLIENT}:3000").parse().unwrap())
    }

    fn pipeline(limiter: RateLimiter, mode: DeploymentMode) -> Pipeline {
        Pipeline::builder(ErrorResponder::new(mode)).stage(limiter).build()
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admitted_responses_carry_quota_headers() {
        let (limiter, _store) = limiter(5, false);
        let pipeline = pipeline(limiter, DeploymentMode::Development);

        for expected_remaining in ["5", "4", "3"] {
            let response = pipeline.run(ctx(), |_| Response::new(Body::empty())).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[&X_RATE_LIMIT_LIMIT], "5");
            assert_eq!(response.headers()[&X_RATE_LIMIT_REMAINING], expected_remaining);
        }
    }

    #[tokio::test]
    async fn exhausted_quota_yields_429() {
        let (limiter, _store) = limiter(1, false);
        let pipeline = pipeline(limiter, DeploymentMode::Production);

        let first = pipeline.run(ctx(), |_| Response::new(Body::empty())).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = pipeline.run(ctx(), |_| Response::new(Body::empty())).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[&X_RATE_LIMIT_LIMIT], "1");
        assert_eq!(second.headers()[&X_RATE_LIMIT_REMAINING], "0");
        let json = body_json(second).await;
        assert_eq!(json["error"], "You have exceeded the 1 requests in 24 hrs limit!");
    }

    #[tokio::test]
    async fn store_failure_becomes_generic_500() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), WindowPolicy::default());
        let pipeline = pipeline(limiter, DeploymentMode::Production);

        let response = pipeline.run(ctx(), |_| Response::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Unable to process request!");
        assert!(json.get("stack").is_none());
    }
}
