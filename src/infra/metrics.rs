//! Lock-free counters for the sharing client and the location store
//!
//! All atomics use Relaxed ordering: these are statistics only and must
//! not be used to coordinate behaviour.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for one client process (accumulated across sessions)
pub struct SessionMetrics {
    samples_received: AtomicU64,
    samples_suppressed: AtomicU64,
    samples_invalid: AtomicU64,
    pushes: AtomicU64,
    store_failures: AtomicU64,
    counterpart_live: AtomicU64,
    counterpart_synthesized: AtomicU64,
    counterpart_suppressed: AtomicU64,
    analyses_remote: AtomicU64,
    analyses_fallback: AtomicU64,
    analyses_throttled: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMetricsSummary {
    pub samples_received: u64,
    pub samples_suppressed: u64,
    pub samples_invalid: u64,
    pub pushes: u64,
    pub store_failures: u64,
    pub counterpart_live: u64,
    pub counterpart_synthesized: u64,
    pub counterpart_suppressed: u64,
    pub analyses_remote: u64,
    pub analyses_fallback: u64,
    pub analyses_throttled: u64,
    pub uptime_secs: u64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_suppressed: AtomicU64::new(0),
            samples_invalid: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            counterpart_live: AtomicU64::new(0),
            counterpart_synthesized: AtomicU64::new(0),
            counterpart_suppressed: AtomicU64::new(0),
            analyses_remote: AtomicU64::new(0),
            analyses_fallback: AtomicU64::new(0),
            analyses_throttled: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_suppressed(&self) {
        self.samples_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_invalid(&self) {
        self.samples_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_counterpart_live(&self) {
        self.counterpart_live.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_counterpart_synthesized(&self) {
        self.counterpart_synthesized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_counterpart_suppressed(&self) {
        self.counterpart_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analysis_remote(&self) {
        self.analyses_remote.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analysis_fallback(&self) {
        self.analyses_fallback.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analysis_throttled(&self) {
        self.analyses_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> SessionMetricsSummary {
        SessionMetricsSummary {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_suppressed: self.samples_suppressed.load(Ordering::Relaxed),
            samples_invalid: self.samples_invalid.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            counterpart_live: self.counterpart_live.load(Ordering::Relaxed),
            counterpart_synthesized: self.counterpart_synthesized.load(Ordering::Relaxed),
            counterpart_suppressed: self.counterpart_suppressed.load(Ordering::Relaxed),
            analyses_remote: self.analyses_remote.load(Ordering::Relaxed),
            analyses_fallback: self.analyses_fallback.load(Ordering::Relaxed),
            analyses_throttled: self.analyses_throttled.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl SessionMetricsSummary {
    pub fn log(&self) {
        info!(
            samples = %self.samples_received,
            suppressed = %self.samples_suppressed,
            invalid = %self.samples_invalid,
            pushes = %self.pushes,
            store_failures = %self.store_failures,
            counterpart_live = %self.counterpart_live,
            counterpart_synth = %self.counterpart_synthesized,
            counterpart_suppressed = %self.counterpart_suppressed,
            analyses_remote = %self.analyses_remote,
            analyses_fallback = %self.analyses_fallback,
            analyses_throttled = %self.analyses_throttled,
            uptime_secs = %self.uptime_secs,
            "session_metrics"
        );
    }
}

/// Counters for the location store service
pub struct StoreMetrics {
    location_updates: AtomicU64,
    location_queries: AtomicU64,
    location_listings: AtomicU64,
    bad_requests: AtomicU64,
    proxy_requests: AtomicU64,
    proxy_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMetricsSummary {
    pub location_updates: u64,
    pub location_queries: u64,
    pub location_listings: u64,
    pub bad_requests: u64,
    pub proxy_requests: u64,
    pub proxy_failures: u64,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            location_updates: AtomicU64::new(0),
            location_queries: AtomicU64::new(0),
            location_listings: AtomicU64::new(0),
            bad_requests: AtomicU64::new(0),
            proxy_requests: AtomicU64::new(0),
            proxy_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_location_update(&self) {
        self.location_updates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_query(&self) {
        self.location_queries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_listing(&self) {
        self.location_listings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_proxy_request(&self) {
        self.proxy_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_proxy_failure(&self) {
        self.proxy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> StoreMetricsSummary {
        StoreMetricsSummary {
            location_updates: self.location_updates.load(Ordering::Relaxed),
            location_queries: self.location_queries.load(Ordering::Relaxed),
            location_listings: self.location_listings.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            proxy_requests: self.proxy_requests.load(Ordering::Relaxed),
            proxy_failures: self.proxy_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let metrics = SessionMetrics::new();
        metrics.record_sample();
        metrics.record_sample();
        metrics.record_sample_suppressed();
        metrics.record_push();
        metrics.record_counterpart_synthesized();
        metrics.record_analysis_fallback();

        let summary = metrics.report();
        assert_eq!(summary.samples_received, 2);
        assert_eq!(summary.samples_suppressed, 1);
        assert_eq!(summary.pushes, 1);
        assert_eq!(summary.counterpart_synthesized, 1);
        assert_eq!(summary.analyses_fallback, 1);
        assert_eq!(summary.analyses_remote, 0);
    }

    #[test]
    fn test_report_does_not_reset() {
        let metrics = StoreMetrics::new();
        metrics.record_location_update();
        assert_eq!(metrics.report().location_updates, 1);
        assert_eq!(metrics.report().location_updates, 1);
    }
}
