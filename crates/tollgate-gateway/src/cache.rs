//! Bounded TTL cache for read-only capability results, with request
//! coalescing.
//!
//! Entries are keyed by [`Fingerprint`]. When the cache is full, expired
//! entries are purged first; if none expired, the entry with the fewest hits
//! is evicted, oldest first on ties.
//!
//! [`ResultCache::get_or_execute`] additionally guarantees that concurrent
//! identical requests run the supplier once: the first caller becomes the
//! leader and later callers wait for its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tollgate_config::CacheSection;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use crate::sweeper::{AbortOnDrop, spawn_periodic};
use crate::types::ExecutionOutcome;

/// One cached result.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
    hit_count: u64,
    /// Insertion order, breaking `created_at` ties.
    sequence: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Live entries removed to make room.
    pub evictions: u64,
    /// Expired entries removed.
    pub expirations: u64,
    /// Entries currently stored.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    next_sequence: u64,
    stats: CacheStats,
}

impl CacheState {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.stats.expirations = self
            .stats
            .expirations
            .saturating_add(u64::try_from(removed).unwrap_or(u64::MAX));
        removed
    }

    fn evict_least_used(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.hit_count, e.created_at, e.sequence))
            .map(|(fp, _)| *fp);
        if let Some(fp) = victim {
            self.entries.remove(&fp);
            self.stats.evictions = self.stats.evictions.saturating_add(1);
            debug!(fingerprint = %fp.short(), "Evicted cache entry");
        }
    }
}

/// Where a [`ResultCache::get_or_execute`] outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Served from the cache.
    Cache,
    /// This caller ran the supplier.
    Executed,
    /// Another caller ran the supplier and shared its outcome.
    Coalesced,
}

type Waiters = Vec<oneshot::Sender<ExecutionOutcome>>;

/// Bounded TTL cache with in-flight request coalescing.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    default_ttl: Duration,
    state: Mutex<CacheState>,
    in_flight: Mutex<HashMap<Fingerprint, Waiters>>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            state: Mutex::new(CacheState::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the `[cache]` config section.
    #[must_use]
    pub fn from_section(section: &CacheSection) -> Self {
        Self::new(
            section.capacity,
            Duration::from_secs(section.default_ttl_secs),
        )
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Result cache lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Fingerprint, Waiters>> {
        self.in_flight.lock().unwrap_or_else(|e| {
            warn!("In-flight map lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL used when a capability does not set its own.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, counting a hit or a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Value> {
        self.lookup(fingerprint, true)
    }

    fn lookup(&self, fingerprint: &Fingerprint, count_miss: bool) -> Option<Value> {
        let now = Instant::now();
        let mut guard = self.state();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(fingerprint) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count = entry.hit_count.saturating_add(1);
                let value = entry.value.clone();
                state.stats.hits = state.stats.hits.saturating_add(1);
                return Some(value);
            },
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(fingerprint);
            state.stats.expirations = state.stats.expirations.saturating_add(1);
        }
        if count_miss {
            state.stats.misses = state.stats.misses.saturating_add(1);
        }
        None
    }

    /// Store `value` for `ttl`. Re-putting a key replaces its value and
    /// timestamps and keeps its hit count.
    pub fn put(&self, fingerprint: Fingerprint, value: Value, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        let mut guard = self.state();
        let state = &mut *guard;

        let sequence = state.next_sequence;
        state.next_sequence = sequence.wrapping_add(1);

        if let Some(entry) = state.entries.get_mut(&fingerprint) {
            entry.value = value;
            entry.created_at = now;
            entry.expires_at = expires_at;
            entry.sequence = sequence;
            return;
        }

        if state.entries.len() >= self.capacity {
            state.purge_expired(now);
        }
        if state.entries.len() >= self.capacity {
            state.evict_least_used();
        }

        state.entries.insert(
            fingerprint,
            CacheEntry {
                value,
                created_at: now,
                expires_at,
                hit_count: 0,
                sequence,
            },
        );
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.state().purge_expired(Instant::now())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// guard drops.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> AbortOnDrop {
        let cache = Arc::clone(self);
        spawn_periodic("cache", interval, move || cache.sweep_expired())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            size: state.entries.len(),
            capacity: self.capacity,
            ..state.stats
        }
    }

    /// Entries currently stored (including not yet swept expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `fingerprint`, without touching counters.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        let now = Instant::now();
        self.state()
            .entries
            .get(fingerprint)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.state().entries.clear();
    }

    /// Fingerprints currently being executed by a leader.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Return the cached value, join an in-flight execution, or run
    /// `supplier` as the leader.
    ///
    /// A successful leader outcome is cached for `ttl` before waiters are
    /// released; failures are shared with waiters but never cached. Waiters
    /// are notified in the order they subscribed. If the leader is dropped
    /// before completing, its waiters receive an internal error.
    pub async fn get_or_execute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ttl: Duration,
        supplier: F,
    ) -> (ExecutionOutcome, ResultSource)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExecutionOutcome>,
    {
        if let Some(value) = self.get(&fingerprint) {
            return (ExecutionOutcome::success(value).from_cache(), ResultSource::Cache);
        }

        let receiver = {
            let mut in_flight = self.in_flight();
            if let Some(waiters) = in_flight.get_mut(&fingerprint) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            } else {
                in_flight.insert(fingerprint, Vec::new());
                None
            }
        };

        if let Some(rx) = receiver {
            debug!(fingerprint = %fingerprint.short(), "Joined in-flight execution");
            let outcome = rx.await.unwrap_or_else(|_| {
                warn!(
                    fingerprint = %fingerprint.short(),
                    "In-flight execution was abandoned before completing"
                );
                ExecutionOutcome::internal()
            });
            return (outcome, ResultSource::Coalesced);
        }

        let mut leader = LeaderGuard {
            cache: self,
            fingerprint,
            completed: false,
        };

        // A previous leader may have finished between the lookup above and
        // our registration.
        if let Some(value) = self.lookup(&fingerprint, false) {
            let outcome = ExecutionOutcome::success(value).from_cache();
            leader.complete(&outcome);
            return (outcome, ResultSource::Cache);
        }

        let outcome = supplier().await;
        if outcome.is_success()
            && let Some(payload) = &outcome.payload
        {
            self.put(fingerprint, payload.clone(), ttl);
        }
        leader.complete(&outcome);
        (outcome, ResultSource::Executed)
    }
}

/// Clears the in-flight entry for a leader, releasing waiters.
struct LeaderGuard<'a> {
    cache: &'a ResultCache,
    fingerprint: Fingerprint,
    completed: bool,
}

impl LeaderGuard<'_> {
    fn complete(&mut self, outcome: &ExecutionOutcome) {
        self.completed = true;
        let waiters = self.cache.in_flight().remove(&self.fingerprint);
        for waiter in waiters.into_iter().flatten() {
            // A waiter that went away does not affect the others.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Dropping the senders wakes every waiter with an error.
            self.cache.in_flight().remove(&self.fingerprint);
        }
    }
}
