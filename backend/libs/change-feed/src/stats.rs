//! Delivery statistics for change feed subscriptions

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    pub subscriptions_opened: u64,
    pub events_received: u64,
    pub events_delivered: u64,
    pub events_filtered: u64,
    pub decode_errors: u64,
    pub events_lagged: u64,
}

/// Thread-safe statistics collector
#[derive(Clone, Default)]
pub struct StatsCollector {
    subscriptions_opened: Arc<AtomicU64>,
    events_received: Arc<AtomicU64>,
    events_delivered: Arc<AtomicU64>,
    events_filtered: Arc<AtomicU64>,
    decode_errors: Arc<AtomicU64>,
    events_lagged: Arc<AtomicU64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_subscription(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record events skipped because a slow subscriber fell behind
    pub fn record_lagged(&self, count: u64) {
        self.events_lagged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStats {
        FeedStats {
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.subscriptions_opened.store(0, Ordering::Relaxed);
        self.events_received.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.events_filtered.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.events_lagged.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_collector() {
        let collector = StatsCollector::new();

        collector.record_subscription();
        collector.record_receive();
        collector.record_receive();
        collector.record_delivery();
        collector.record_filtered();
        collector.record_lagged(3);

        let stats = collector.snapshot();
        assert_eq!(stats.subscriptions_opened, 1);
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_delivered, 1);
        assert_eq!(stats.events_filtered, 1);
        assert_eq!(stats.events_lagged, 3);
        assert_eq!(stats.decode_errors, 0);
    }

    #[test]
    fn test_stats_reset() {
        let collector = StatsCollector::new();
        collector.record_decode_error();
        collector.reset();

        assert_eq!(collector.snapshot(), FeedStats::default());
    }
}
