//! In-process TTL key/value cache.
//!
//! A generic cache with per-entry TTLs, constructed explicitly and passed to
//! collaborators; there is no global instance. Expiry is enforced lazily on
//! `get` (an expired entry is never returned) with physical cleanup left to
//! `purge_expired`, typically driven by [`CacheSweeper`].
//!
//! Key derivation is the caller's concern; this crate knows nothing about
//! domain semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound on entries, guarding against unbounded key cardinality.
const MAX_ENTRIES: usize = 100_000;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Generic TTL cache. Cheap to clone; clones share storage.
pub struct TtlCache<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Look up a live entry. Expired entries behave as misses even before
    /// they are physically swept.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert or atomically overwrite an entry.
    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        // Oldest-first eviction when full, so a hot key set keeps working.
        if entries.len() >= MAX_ENTRIES {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.into(),
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every key containing `pattern` as a substring.
    ///
    /// Administrative cache busting; not used on the request hot path.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.contains(pattern));
        let removed = before - entries.len();
        if removed > 0 {
            info!(pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Physically remove expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Number of entries, including expired-but-unswept ones.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Background sweep task handle.
///
/// Started explicitly, stopped via [`CacheSweeper::shutdown`], so tests can
/// drive time deterministically instead of waiting on wall-clock timers.
pub struct CacheSweeper {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl CacheSweeper {
    /// Spawn a sweep loop over `cache` with the given interval.
    pub fn spawn<V: Clone + Send + Sync + 'static>(
        cache: TtlCache<V>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired().await;
                        if removed > 0 {
                            debug!(removed, "Cache sweep removed expired entries");
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

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
