//! Rate-limiter variants and the per-API-family registry.
//!
//! Limiters gate requests before they are issued (`acquire`) and learn the
//! remote's real quota from response headers (`update_from_headers`). Both
//! operate under the limiter's internal lock; callers never mutate limit
//! state directly.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Last quota observation from response headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitState {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Parse the conventional `x-ratelimit-*` trio. Reset is epoch seconds.
    ///
    /// Returns `None` when the headers carry no quota information at all.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        fn get(headers: &HashMap<String, String>, name: &str) -> Option<u64> {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| v.trim().parse().ok())
        }

        let remaining = get(headers, "x-ratelimit-remaining");
        let limit = get(headers, "x-ratelimit-limit");
        if remaining.is_none() && limit.is_none() {
            return None;
        }

        let reset_at = get(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

        Some(Self {
            remaining: remaining.unwrap_or(0),
            limit: limit.unwrap_or(0),
            reset_at,
        })
    }

    /// Whether the quota is spent and a reset time is known.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.remaining == 0
    }
}

/// Pre-request gate plus header observer.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Suspend the caller until capacity exists for one request.
    async fn acquire(&self);

    /// Record quota headers from a response.
    async fn update_from_headers(&self, headers: &HashMap<String, String>);

    /// Snapshot of the last observed remote state.
    async fn state(&self) -> RateLimitState;
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    observed: RateLimitState,
}

/// Fixed-interval token bucket.
///
/// Tokens refill at a constant rate up to `capacity`. Once the remote's
/// observed `remaining` falls under `low_threshold`, the bucket re-seeds
/// itself from that observation so local optimism cannot outrun the real
/// quota.
pub struct TokenBucketLimiter {
    capacity: u64,
    refill_per_sec: f64,
    low_threshold: u64,
    inner: Mutex<BucketInner>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u64, refill_per_sec: f64) -> Self {
        // A non-finite or non-positive rate would stall an exhausted
        // bucket forever and overflow the sleep computation in `acquire`.
        let refill_per_sec = if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            warn!(rate = refill_per_sec, "Invalid refill rate, using 1 token/sec");
            1.0
        };
        Self {
            capacity,
            refill_per_sec,
            low_threshold: capacity / 10,
            inner: Mutex::new(BucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                observed: RateLimitState::default(),
            }),
        }
    }

    pub fn with_low_threshold(mut self, threshold: u64) -> Self {
        self.low_threshold = threshold;
        self
    }

    fn refill(&self, inner: &mut BucketInner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        inner.last_refill = now;
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                self.refill(&mut inner);
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    return;
                }
                // Time until one whole token refills.
                Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    async fn update_from_headers(&self, headers: &HashMap<String, String>) {
        if let Some(state) = RateLimitState::from_headers(headers) {
            let mut inner = self.inner.lock().await;
            let low = state.remaining < self.low_threshold;
            if low {
                debug!(
                    remaining = state.remaining,
                    threshold = self.low_threshold,
                    "Remote quota low, re-seeding bucket from observed state"
                );
                inner.tokens = inner.tokens.min(state.remaining as f64);
            }
            inner.observed = state;
        }
    }

    async fn state(&self) -> RateLimitState {
        self.inner.lock().await.observed.clone()
    }
}

/// Header-adaptive limiter.
///
/// Carries no local refill model at all: capacity is whatever the remote
/// last reported. When the observed quota is spent, `acquire` sleeps until
/// the reported reset time.
pub struct AdaptiveLimiter {
    inner: Mutex<RateLimitState>,
}

impl AdaptiveLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RateLimitState::default()),
        }
    }
}

impl Default for AdaptiveLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for AdaptiveLimiter {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.inner.lock().await;
                // No observation yet: let the request through and learn
                // from its response.
                if state.limit == 0 {
                    return;
                }
                if let Some(reset_at) = state.reset_at {
                    if reset_at <= Utc::now() {
                        state.remaining = state.limit;
                        state.reset_at = None;
                    }
                }
                if state.remaining > 0 {
                    state.remaining -= 1;
                    return;
                }
                match state.reset_at {
                    Some(reset_at) => {
                        let delta = reset_at - Utc::now();
                        Duration::from_secs(delta.num_seconds().max(1) as u64)
                    }
                    // Exhausted with no reset reported: brief pause, retry.
                    None => Duration::from_secs(1),
                }
            };
            debug!(wait_secs = wait.as_secs(), "Quota exhausted, waiting for reset");
            tokio::time::sleep(wait).await;
        }
    }

    async fn update_from_headers(&self, headers: &HashMap<String, String>) {
        if let Some(state) = RateLimitState::from_headers(headers) {
            *self.inner.lock().await = state;
        }
    }

    async fn state(&self) -> RateLimitState {
        self.inner.lock().await.clone()
    }
}

/// API families with independent quotas on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    Rest,
    GraphQl,
    Search,
}

/// Per-run registry of limiters keyed by `(host, api family)`.
///
/// GraphQL, REST, and search quotas are tracked by separate limiters so one
/// exhausted family never blocks the others. Created per run and passed by
/// reference; there is no process-global registry.
pub struct LimiterRegistry {
    limiters: Mutex<HashMap<(String, ApiFamily), Arc<dyn RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the limiter for `(host, family)`, creating it with `make` on
    /// first use.
    pub async fn get_or_create<F>(
        &self,
        host: &str,
        family: ApiFamily,
        make: F,
    ) -> Arc<dyn RateLimiter>
    where
        F: FnOnce() -> Arc<dyn RateLimiter>,
    {
        let mut limiters = self.limiters.lock().await;
        Arc::clone(
            limiters
                .entry((host.to_string(), family))
                .or_insert_with(make),
        )
    }

    pub async fn len(&self) -> usize {
        self.limiters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.limiters.lock().await.is_empty()
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
