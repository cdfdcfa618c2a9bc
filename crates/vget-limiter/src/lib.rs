//! Fixed-window rate limiting per caller identity and endpoint class.
//!
//! Counters are keyed by `(identity, class, window_index)` where
//! `window_index = elapsed / window`. A rollover simply lands requests in a
//! fresh bucket; dead buckets are purged by a background sweep rather than
//! on the request path. Increment-and-compare happens under one write-lock
//! acquisition, so concurrent requests for the same identity can never push
//! a bucket past its limit.

pub mod policy;

pub use policy::{ClassPolicy, EndpointClass};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};
use vget_models::Tier;

/// Bound on tracked buckets; protects against identity-spraying abuse.
const MAX_BUCKETS: usize = 50_000;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Time until the current window rolls over, set on denial.
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    identity: String,
    class: EndpointClass,
    window_index: u64,
}

/// Fixed-window limiter shared across request handlers.
pub struct RateLimiter {
    epoch: Instant,
    buckets: Arc<RwLock<HashMap<BucketKey, u32>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn window_position(&self, window: Duration) -> (u64, Duration) {
        let elapsed = self.epoch.elapsed();
        let index = (elapsed.as_nanos() / window.as_nanos()) as u64;
        let into_window =
            Duration::from_nanos((elapsed.as_nanos() % window.as_nanos()) as u64);
        (index, window - into_window)
    }

    /// Check and account one request for `identity` against `class`.
    pub async fn check(&self, identity: &str, tier: Tier, class: EndpointClass) -> Decision {
        let policy = ClassPolicy::for_class(class);
        let limit = policy.effective_limit(tier);
        let (window_index, remaining_in_window) = self.window_position(policy.window);

        let key = BucketKey {
            identity: identity.to_string(),
            class,
            window_index,
        };

        let mut buckets = self.buckets.write().await;

        if buckets.len() >= MAX_BUCKETS && !buckets.contains_key(&key) {
            // Over capacity: shed elapsed windows before admitting new keys.
            shed_elapsed(self.epoch, &mut buckets);
            if buckets.len() >= MAX_BUCKETS {
                warn!(identity, class = %class, "Rate limiter at capacity, denying");
                return Decision::deny(remaining_in_window);
            }
        }

        let count = buckets.entry(key).or_insert(0);
        if *count >= limit {
            metrics::counter!(
                "vget_rate_limit_hits_total",
                &[("class", class.as_str().to_string())]
            )
            .increment(1);
            debug!(identity, class = %class, limit, "Rate limit exceeded");
            return Decision::deny(remaining_in_window);
        }

        *count += 1;
        Decision::allow()
    }

    /// Purge buckets whose window has fully elapsed. Returns the number removed.
    pub async fn purge_stale(&self) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        shed_elapsed(self.epoch, &mut buckets);
        before - buckets.len()
    }

    /// Number of live buckets (stale ones included until swept).
    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}

/// Drop every bucket whose window has fully elapsed. Window indexes are only
/// comparable within a class, so each bucket is judged against its own
/// class's current index.
fn shed_elapsed(epoch: Instant, buckets: &mut HashMap<BucketKey, u32>) {
    let elapsed = epoch.elapsed();
    buckets.retain(|k, _| {
        let window = ClassPolicy::for_class(k.class).window;
        let current = (elapsed.as_nanos() / window.as_nanos()) as u64;
        k.window_index >= current
    });
}

/// Background sweep over a shared limiter.
///
/// Owns the bucket lifecycle end to end: started at startup, stopped at
/// shutdown, restartable in tests.
pub struct LimiterSweeper {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl LimiterSweeper {
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.purge_stale().await;
                        if removed > 0 {
                            debug!(removed, "Rate limiter sweep removed stale buckets");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
