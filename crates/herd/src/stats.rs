//! Process-wide download statistics.
//!
//! One registry is built at startup, shared by every session and read by
//! the status endpoint. All mutation is atomic per field; cross-field
//! consistency is only guaranteed after quiescence.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::Relaxed};

use serde::Serialize;

/// Upper bounds of the latency buckets, in milliseconds. Samples above the
/// last bound land in the overflow bucket.
const BUCKET_BOUNDS_MS: [u64; 8] = [50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000];

/// Outcome class a download latency sample is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Timeout,
    ConnLimit,
    ConnClosed,
    HttpStatus,
    Unknown,
}

impl OutcomeClass {
    const ALL: [OutcomeClass; 6] = [
        OutcomeClass::Success,
        OutcomeClass::Timeout,
        OutcomeClass::ConnLimit,
        OutcomeClass::ConnClosed,
        OutcomeClass::HttpStatus,
        OutcomeClass::Unknown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::Timeout => "timeout",
            OutcomeClass::ConnLimit => "conn_limit",
            OutcomeClass::ConnClosed => "conn_close",
            OutcomeClass::HttpStatus => "http_status",
            OutcomeClass::Unknown => "unknown",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-bucket latency histogram, all-atomic.
#[derive(Debug)]
struct Histogram {
    /// bucket[i] counts samples <= BUCKET_BOUNDS_MS[i]; the last slot is
    /// the overflow bucket.
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed_ms: u64) {
        let slot = BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| elapsed_ms <= bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[slot].fetch_add(1, Relaxed);
        self.count.fetch_add(1, Relaxed);
        self.sum_ms.fetch_add(elapsed_ms, Relaxed);
    }
}

/// Counters shared by every session.
#[derive(Debug)]
pub struct StatsRegistry {
    online_sessions: AtomicI64,
    downloads_total: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    latency: [Histogram; OutcomeClass::ALL.len()],
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            online_sessions: AtomicI64::new(0),
            downloads_total: AtomicU64::new(0),
            downloads_succeeded: AtomicU64::new(0),
            downloads_failed: AtomicU64::new(0),
            latency: std::array::from_fn(|_| Histogram::new()),
        }
    }

    /// One download attempt is starting or has just finished; counted
    /// whether or not it succeeds.
    pub fn record_attempt(&self) {
        self.downloads_total.fetch_add(1, Relaxed);
    }

    pub fn record_success(&self, elapsed_ms: u64) {
        self.downloads_succeeded.fetch_add(1, Relaxed);
        self.latency[OutcomeClass::Success.index()].observe(elapsed_ms);
    }

    pub fn record_failure(&self, class: OutcomeClass, elapsed_ms: u64) {
        debug_assert!(class != OutcomeClass::Success);
        self.downloads_failed.fetch_add(1, Relaxed);
        self.latency[class.index()].observe(elapsed_ms);
    }

    /// Adjust the number of sessions actively streaming a media playlist.
    pub fn adjust_online(&self, delta: i64) {
        self.online_sessions.fetch_add(delta, Relaxed);
    }

    pub fn online_sessions(&self) -> i64 {
        self.online_sessions.load(Relaxed)
    }

    pub fn downloads_total(&self) -> u64 {
        self.downloads_total.load(Relaxed)
    }

    pub fn downloads_succeeded(&self) -> u64 {
        self.downloads_succeeded.load(Relaxed)
    }

    pub fn downloads_failed(&self) -> u64 {
        self.downloads_failed.load(Relaxed)
    }

    /// Point-in-time view for the status endpoint.
    pub fn snapshot(&self) -> StatsSnapshot {
        let latency = OutcomeClass::ALL
            .iter()
            .map(|&class| {
                let histogram = &self.latency[class.index()];
                LatencySnapshot {
                    class: class.label(),
                    count: histogram.count.load(Relaxed),
                    sum_ms: histogram.sum_ms.load(Relaxed),
                    buckets: histogram
                        .buckets
                        .iter()
                        .enumerate()
                        .map(|(i, bucket)| BucketSnapshot {
                            le_ms: BUCKET_BOUNDS_MS.get(i).map(|&b| b.to_string()).unwrap_or_else(|| "inf".to_owned()),
                            count: bucket.load(Relaxed),
                        })
                        .collect(),
                }
            })
            .collect();

        StatsSnapshot {
            online_sessions: self.online_sessions(),
            downloads_total: self.downloads_total(),
            downloads_succeeded: self.downloads_succeeded(),
            downloads_failed: self.downloads_failed(),
            latency,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub online_sessions: i64,
    pub downloads_total: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub latency: Vec<LatencySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub class: &'static str,
    pub count: u64,
    pub sum_ms: u64,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub le_ms: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_add_up_after_quiescence() {
        let stats = StatsRegistry::new();
        for _ in 0..5 {
            stats.record_attempt();
        }
        stats.record_success(30);
        stats.record_success(120);
        stats.record_success(700);
        stats.record_failure(OutcomeClass::Timeout, 10_500);
        stats.record_failure(OutcomeClass::HttpStatus, 42);

        assert_eq!(stats.downloads_total(), 5);
        assert_eq!(stats.downloads_succeeded(), 3);
        assert_eq!(stats.downloads_failed(), 2);
        assert_eq!(
            stats.downloads_total(),
            stats.downloads_succeeded() + stats.downloads_failed()
        );
    }

    #[test]
    fn latency_samples_land_in_their_class_and_bucket() {
        let stats = StatsRegistry::new();
        stats.record_success(30);
        stats.record_success(15_000);
        stats.record_failure(OutcomeClass::Timeout, 10_001);

        let snapshot = stats.snapshot();
        let success = snapshot
            .latency
            .iter()
            .find(|l| l.class == "success")
            .unwrap();
        assert_eq!(success.count, 2);
        assert_eq!(success.sum_ms, 15_030);
        assert_eq!(success.buckets[0].count, 1); // <= 50ms
        assert_eq!(success.buckets.last().unwrap().count, 1); // overflow

        let timeout = snapshot
            .latency
            .iter()
            .find(|l| l.class == "timeout")
            .unwrap();
        assert_eq!(timeout.count, 1);
        assert_eq!(timeout.buckets.last().unwrap().count, 1);
    }

    #[test]
    fn online_counter_tracks_deltas() {
        let stats = StatsRegistry::new();
        stats.adjust_online(1);
        stats.adjust_online(1);
        assert_eq!(stats.online_sessions(), 2);
        stats.adjust_online(-1);
        stats.adjust_online(-1);
        assert_eq!(stats.online_sessions(), 0);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = StatsRegistry::new();
        stats.record_attempt();
        stats.record_success(80);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["downloads_total"], 1);
        assert_eq!(json["downloads_succeeded"], 1);
    }
}
