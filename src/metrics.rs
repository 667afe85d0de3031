//! In-memory per-route request metrics.
//!
//! The store keeps one record per [`RouteKey`]: how many requests started,
//! and a duration summary (mean, max and a fixed-bucket histogram for
//! percentiles) of the ones that finished. Records are created lazily on the
//! first request and are never removed; a reset zeroes them in place so a
//! route that was ever hit stays listed.
//!
//! ```text
//! GET /__metric
//! [
//!   { "key": "/match/:id_GET", "count": 3, "average_ms": 0.21, … },
//!   { "key": "/_GET",          "count": 9, "average_ms": 0.04, … }
//! ]
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::Method;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ResetSchedule;

// ── RouteKey ──────────────────────────────────────────────────────────────────

/// Identifies one `(path, method)` pair in the metric store, e.g.
/// `/match/:id_GET`.
///
/// Registered routes are keyed by the pattern as written; unmatched requests
/// by the path that was actually requested.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RouteKey(Arc<str>);

impl RouteKey {
    pub fn new(method: &Method, path: &str) -> Self {
        Self(format!("{path}_{method}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Histogram ─────────────────────────────────────────────────────────────────

// Upper bounds in microseconds: 100µs … 10s. Samples above the last bound
// land in the overflow slot.
const BUCKETS_MICROS: [u64; 12] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 5_000_000,
    10_000_000,
];

#[derive(Clone, Debug, Default)]
struct RouteStats {
    count: u64,
    samples: u64,
    total: Duration,
    max: Duration,
    buckets: [u64; BUCKETS_MICROS.len() + 1],
}

impl RouteStats {
    fn observe(&mut self, elapsed: Duration) {
        self.samples += 1;
        self.total = self.total.saturating_add(elapsed);
        self.max = self.max.max(elapsed);

        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let slot = BUCKETS_MICROS
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(BUCKETS_MICROS.len());
        if let Some(bucket) = self.buckets.get_mut(slot) {
            *bucket += 1;
        }
    }

    /// Upper bound of the bucket holding the `q`-th quantile, capped at the
    /// observed max.
    fn quantile(&self, q: f64) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        let rank = ((self.samples as f64) * q).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (slot, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                return match BUCKETS_MICROS.get(slot) {
                    Some(&bound) => Duration::from_micros(bound).min(self.max),
                    None => self.max,
                };
            }
        }
        self.max
    }

    fn average(&self) -> Duration {
        match u32::try_from(self.samples) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total / n,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.samples as f64),
        }
    }

    fn record(&self, key: &RouteKey) -> RouteMetric {
        RouteMetric {
            key: key.to_string(),
            count: self.count,
            average_ms: millis(self.average()),
            p50_ms: millis(self.quantile(0.50)),
            p90_ms: millis(self.quantile(0.90)),
            p99_ms: millis(self.quantile(0.99)),
            max_ms: millis(self.max),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

// ── RouteMetric ───────────────────────────────────────────────────────────────

/// One row of a metrics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouteMetric {
    pub key: String,
    /// Requests started since the last reset.
    pub count: u64,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Reporting order: slowest average first, then busiest, then by key.
fn ranking(a: &RouteMetric, b: &RouteMetric) -> Ordering {
    b.average_ms
        .total_cmp(&a.average_ms)
        .then_with(|| b.count.cmp(&a.count))
        .then_with(|| a.key.cmp(&b.key))
}

// ── MetricStore ───────────────────────────────────────────────────────────────

/// Concurrent per-route counters and timers.
///
/// Every operation holds the internal lock only for a map lookup and a few
/// integer updates. [`snapshot`](Self::snapshot) copies the raw stats under
/// the lock and does the percentile maths, sorting and any serialisation
/// after releasing it, so a slow `/__metric` reader never stalls requests.
#[derive(Debug, Default)]
pub struct MetricStore {
    routes: Mutex<HashMap<RouteKey, RouteStats>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one started request for `key`.
    pub fn count(&self, key: &RouteKey) {
        self.lock().entry(key.clone()).or_default().count += 1;
    }

    /// Records one finished request for `key`.
    ///
    /// `Duration` cannot be negative; callers measuring with
    /// `Instant::elapsed` already get zero when the clock misbehaves.
    pub fn duration(&self, key: &RouteKey, elapsed: Duration) {
        self.lock().entry(key.clone()).or_default().observe(elapsed);
    }

    /// Point-in-time copy of every record, sorted for reporting.
    pub fn snapshot(&self) -> Vec<RouteMetric> {
        let copied: Vec<(RouteKey, RouteStats)> = self
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();

        let mut records: Vec<RouteMetric> = copied.iter().map(|(k, s)| s.record(k)).collect();
        records.sort_by(ranking);
        records
    }

    /// Zeroes every record. Keys stay, so a reset route still shows up with
    /// a count of 0 rather than disappearing.
    pub fn reset(&self) {
        for stats in self.lock().values_mut() {
            *stats = RouteStats::default();
        }
    }

    // A panic while holding the lock can only come from the integer updates
    // above, which leave the map consistent, so a poisoned lock is still safe
    // to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<RouteKey, RouteStats>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Periodic reset ────────────────────────────────────────────────────────────

/// Spawns a task that calls [`MetricStore::reset`] on `schedule` for as long
/// as the runtime lives. Must be called from inside a tokio runtime.
pub fn spawn_periodic_reset(store: Arc<MetricStore>, schedule: ResetSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let first = tokio::time::Instant::now() + first_delay(since_epoch, schedule);
        let mut ticks = tokio::time::interval_at(first, schedule.interval);

        info!(
            interval_secs = schedule.interval.as_secs(),
            offset_secs = schedule.offset.as_secs(),
            "metric reset scheduled"
        );

        loop {
            ticks.tick().await;
            store.reset();
            info!("metrics reset");
        }
    })
}

/// Time until the next multiple of `interval` past `offset`, measured from
/// the epoch. Never zero, so a reset does not fire right at startup.
fn first_delay(since_epoch: Duration, schedule: ResetSchedule) -> Duration {
    let interval = schedule.interval.as_nanos();
    if interval == 0 {
        return schedule.interval;
    }
    let shifted = since_epoch.as_nanos() + interval - schedule.offset.as_nanos() % interval;
    let remaining = interval - shifted % interval;
    Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
}
