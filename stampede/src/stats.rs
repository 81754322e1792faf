//! Per-phase statistics counters.
//!
//! Sessions record counters through [`SessionCore::statistics`]; the registry
//! is shared by every phase of a resource group and its snapshots end up in
//! the run report. Aggregation beyond plain counters is left to consumers.
//!
//! [`SessionCore::statistics`]: crate::session::SessionCore::statistics

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Lock-free counters for one metric of one phase.
#[derive(Debug)]
pub struct Statistics {
    requests: AtomicU64,
    responses: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
        }
    }
}

impl Statistics {
    /// Count a request being sent.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a response and its latency.
    pub fn record_response(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        self.min_latency_ns.fetch_min(nanos, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Count an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let responses = self.responses.load(Ordering::Relaxed);
        let total = self.total_latency_ns.load(Ordering::Relaxed);
        StatisticsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses,
            errors: self.errors.load(Ordering::Relaxed),
            min_latency_ns: (responses > 0).then(|| self.min_latency_ns.load(Ordering::Relaxed)),
            max_latency_ns: (responses > 0).then(|| self.max_latency_ns.load(Ordering::Relaxed)),
            mean_latency_ns: (responses > 0).then(|| total / responses),
        }
    }
}

/// Serializable copy of [`Statistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    /// Requests sent.
    pub requests: u64,
    /// Responses received.
    pub responses: u64,
    /// Errors recorded.
    pub errors: u64,
    /// Fastest response.
    pub min_latency_ns: Option<u64>,
    /// Slowest response.
    pub max_latency_ns: Option<u64>,
    /// Mean response latency.
    pub mean_latency_ns: Option<u64>,
}

/// A named metric snapshot of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStatistics {
    /// Phase name.
    pub phase: String,
    /// Metric name.
    pub metric: String,
    /// Counter values.
    #[serde(flatten)]
    pub snapshot: StatisticsSnapshot,
}

/// Registry of counters keyed by `(phase, metric)`.
#[derive(Debug, Default)]
pub struct StatisticsRegistry {
    entries: Mutex<HashMap<(String, String), Arc<Statistics>>>,
}

impl StatisticsRegistry {
    /// Counters for `metric` in `phase`, created on first use.
    pub fn get(&self, phase: &str, metric: &str) -> Arc<Statistics> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&(phase.to_string(), metric.to_string())) {
            return existing.clone();
        }
        let stats = Arc::new(Statistics::default());
        entries.insert((phase.to_string(), metric.to_string()), stats.clone());
        stats
    }

    /// Snapshot of every metric, sorted by phase then metric.
    pub fn snapshot(&self) -> Vec<PhaseStatistics> {
        let mut all: Vec<PhaseStatistics> = self
            .entries
            .lock()
            .iter()
            .map(|((phase, metric), stats)| PhaseStatistics {
                phase: phase.clone(),
                metric: metric.clone(),
                snapshot: stats.snapshot(),
            })
            .collect();
        all.sort_by(|a, b| (&a.phase, &a.metric).cmp(&(&b.phase, &b.metric)));
        all
    }
}
