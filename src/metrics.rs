//! Per-request event counters
//!
//! Thread-safe counters using atomic operations. The proxy records one event
//! per finished request; how the numbers are exported is up to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for dispatch outcomes
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total_requests: AtomicU64,
    mirror_live: AtomicU64,
    mirror_cache: AtomicU64,
    reroute_fallbacks: AtomicU64,
    passthrough_requests: AtomicU64,
}

/// Snapshot of the counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    /// Classified requests served live from the mirror
    pub mirror_live: u64,
    /// Classified requests served from the response cache
    pub mirror_cache: u64,
    /// Classified requests that fell back to upstream
    pub reroute_fallbacks: u64,
    /// Unclassified requests forwarded untouched
    pub passthrough_requests: u64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_mirror_live(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.mirror_live.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mirror_cache(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.mirror_cache.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reroute_fallback(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.reroute_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.passthrough_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            mirror_live: self.mirror_live.load(Ordering::Relaxed),
            mirror_cache: self.mirror_cache.load(Ordering::Relaxed),
            reroute_fallbacks: self.reroute_fallbacks.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
        }
    }
}
