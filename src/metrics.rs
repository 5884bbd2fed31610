//! Process-local counters for the behaviors called out as observable
//! (cache hit rate, rehydration/demotion frequency, replication lag).
//! Out-of-scope per §1 is a metrics *endpoint*; this only keeps the
//! numbers so whatever embeds this crate can expose them however it likes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub rehydrations: AtomicU64,
    pub demotions: AtomicU64,
    pub writes_committed: AtomicU64,
    pub replication_events_published: AtomicU64,
    pub replication_events_applied: AtomicU64,
    /// Sum of observed replication lag in milliseconds, divided by
    /// `replication_events_applied` for a running mean.
    replication_lag_ms_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rehydration(&self) {
        self.rehydrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_committed(&self) {
        self.writes_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_published(&self) {
        self.replication_events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_applied(&self, lag: Duration) {
        self.replication_events_applied.fetch_add(1, Ordering::Relaxed);
        self.replication_lag_ms_total
            .fetch_add(lag.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f64;
        let misses = self.cache_misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    pub fn mean_replication_lag(&self) -> Duration {
        let applied = self.replication_events_applied.load(Ordering::Relaxed);
        if applied == 0 {
            return Duration::ZERO;
        }
        let total_ms = self.replication_lag_ms_total.load(Ordering::Relaxed);
        Duration::from_millis(total_ms / applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_ratio_tracks_hits_and_misses() {
        let m = Metrics::new();
        m.record_cache_hit();
        m.record_cache_hit();
        m.record_cache_miss();
        assert!((m.cache_hit_ratio() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn mean_replication_lag_is_zero_with_no_samples() {
        let m = Metrics::new();
        assert_eq!(m.mean_replication_lag(), Duration::ZERO);
    }

    #[test]
    fn mean_replication_lag_averages_samples() {
        let m = Metrics::new();
        m.record_replication_applied(Duration::from_millis(100));
        m.record_replication_applied(Duration::from_millis(300));
        assert_eq!(m.mean_replication_lag(), Duration::from_millis(200));
    }
}
