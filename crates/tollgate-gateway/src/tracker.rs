//! Per-capability request metrics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::types::{ExecutionOutcome, OutcomeStatus};

/// Recent durations kept per capability for the median.
pub const DEFAULT_SAMPLE_WINDOW: usize = 1024;

/// Bucket for requests naming no registered capability.
pub const UNKNOWN_CAPABILITY: &str = "<unknown>";

/// An in-progress measurement returned by [`Tracker::begin`].
#[derive(Debug)]
pub struct TrackingHandle {
    request_id: String,
    capability: String,
    started: Instant,
}

impl TrackingHandle {
    /// Request being measured.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Capability being measured.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Time since [`Tracker::begin`].
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Aggregated metrics for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMetrics {
    /// Completed requests.
    pub count: u64,
    /// Completed requests per outcome status.
    pub status_counts: BTreeMap<OutcomeStatus, u64>,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Mean duration over all requests.
    pub avg_ms: f64,
    /// Median over the most recent samples.
    pub median_ms: f64,
    /// Fastest request.
    pub min_ms: f64,
    /// Slowest request.
    pub max_ms: f64,
    /// Completion time of the latest request.
    pub last_seen: Option<DateTime<Utc>>,
}

impl CapabilityMetrics {
    /// Requests that completed with `status`.
    #[must_use]
    pub fn status_count(&self, status: OutcomeStatus) -> u64 {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    status_counts: BTreeMap<OutcomeStatus, u64>,
    cache_hits: u64,
    total_micros: u128,
    min_micros: Option<u64>,
    max_micros: u64,
    samples: VecDeque<u64>,
    last_seen: Option<DateTime<Utc>>,
}

impl Accumulator {
    fn record(&mut self, micros: u64, outcome: &ExecutionOutcome, window: usize) {
        self.count = self.count.saturating_add(1);
        let bucket = self.status_counts.entry(outcome.status).or_insert(0);
        *bucket = bucket.saturating_add(1);
        if outcome.cached {
            self.cache_hits = self.cache_hits.saturating_add(1);
        }
        self.total_micros = self.total_micros.saturating_add(u128::from(micros));
        self.min_micros = Some(self.min_micros.map_or(micros, |m| m.min(micros)));
        self.max_micros = self.max_micros.max(micros);

        if self.samples.len() >= window {
            self.samples.pop_front();
        }
        self.samples.push_back(micros);
        self.last_seen = Some(Utc::now());
    }

    #[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
    fn snapshot(&self) -> CapabilityMetrics {
        let to_ms = |micros: f64| micros / 1000.0;
        let avg = if self.count == 0 {
            0.0
        } else {
            to_ms(self.total_micros as f64 / self.count as f64)
        };
        CapabilityMetrics {
            count: self.count,
            status_counts: self.status_counts.clone(),
            cache_hits: self.cache_hits,
            avg_ms: avg,
            median_ms: to_ms(median(&self.samples)),
            min_ms: to_ms(self.min_micros.unwrap_or(0) as f64),
            max_ms: to_ms(self.max_micros as f64),
            last_seen: self.last_seen,
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
fn median(samples: &VecDeque<u64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

/// Records the outcome and duration of every request.
///
/// Recording never fails a request: a poisoned lock is recovered and the
/// update applied anyway.
#[derive(Debug)]
pub struct Tracker {
    metrics: Mutex<HashMap<String, Accumulator>>,
    sample_window: usize,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl Tracker {
    /// Tracker keeping `sample_window` recent durations per capability.
    #[must_use]
    pub fn new(sample_window: usize) -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
            sample_window: sample_window.max(1),
        }
    }

    fn metrics(&self) -> MutexGuard<'_, HashMap<String, Accumulator>> {
        self.metrics.lock().unwrap_or_else(|e| {
            warn!("Tracker lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Start measuring a request.
    #[must_use]
    pub fn begin(&self, request_id: impl Into<String>, capability: impl Into<String>) -> TrackingHandle {
        TrackingHandle {
            request_id: request_id.into(),
            capability: capability.into(),
            started: Instant::now(),
        }
    }

    /// Finish measuring a request. Returns the measured duration.
    pub fn end(&self, handle: TrackingHandle, outcome: &ExecutionOutcome) -> Duration {
        let elapsed = handle.elapsed();
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.metrics()
            .entry(handle.capability)
            .or_default()
            .record(micros, outcome, self.sample_window);
        elapsed
    }

    /// Metrics for one capability.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<CapabilityMetrics> {
        self.metrics().get(name).map(Accumulator::snapshot)
    }

    /// Metrics for every capability seen so far, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, CapabilityMetrics> {
        self.metrics()
            .iter()
            .map(|(name, acc)| (name.clone(), acc.snapshot()))
            .collect()
    }

    /// Total requests recorded.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.metrics()
            .values()
            .fold(0u64, |sum, acc| sum.saturating_add(acc.count))
    }
}
