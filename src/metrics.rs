// ═══════════════════════════════════════════════════════════════
// METRICS - counters for every loop the manager runs
// ═══════════════════════════════════════════════════════════════
//
// Plain atomics, bumped from the scheduling loops and read back as a
// serializable snapshot. There is no endpoint; whoever owns the manager
// decides what to do with the numbers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub scrapes_started: u64,
    pub reports_emitted: u64,
    pub transactions_accepted: u64,
    pub rows_filtered: u64,
    pub parse_issues: u64,
    pub fetch_failures: u64,
    pub retries: u64,
    pub breaker_cooldowns: u64,
    pub loops_failed: u64,
    pub loops_cancelled: u64,
    pub uptime_seconds: u64,
}

pub struct ScrapeMetrics {
    scrapes_started: AtomicU64,
    reports_emitted: AtomicU64,
    transactions_accepted: AtomicU64,
    rows_filtered: AtomicU64,
    parse_issues: AtomicU64,
    fetch_failures: AtomicU64,
    retries: AtomicU64,
    breaker_cooldowns: AtomicU64,
    loops_failed: AtomicU64,
    loops_cancelled: AtomicU64,
    start_time: Instant,
}

impl ScrapeMetrics {
    pub fn new() -> Self {
        Self {
            scrapes_started: AtomicU64::new(0),
            reports_emitted: AtomicU64::new(0),
            transactions_accepted: AtomicU64::new(0),
            rows_filtered: AtomicU64::new(0),
            parse_issues: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            breaker_cooldowns: AtomicU64::new(0),
            loops_failed: AtomicU64::new(0),
            loops_cancelled: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_scrapes(&self) {
        self.scrapes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a report handed to the output stream.
    pub fn record_report(&self, transactions: usize, rows_filtered: usize, issues: usize) {
        self.reports_emitted.fetch_add(1, Ordering::Relaxed);
        self.transactions_accepted
            .fetch_add(transactions as u64, Ordering::Relaxed);
        self.rows_filtered
            .fetch_add(rows_filtered as u64, Ordering::Relaxed);
        self.parse_issues.fetch_add(issues as u64, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A retry had to wait for an open breaker to cool down.
    pub fn increment_breaker_cooldowns(&self) {
        self.breaker_cooldowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_loops_failed(&self) {
        self.loops_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_loops_cancelled(&self) {
        self.loops_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scrapes_started: self.scrapes_started.load(Ordering::Relaxed),
            reports_emitted: self.reports_emitted.load(Ordering::Relaxed),
            transactions_accepted: self.transactions_accepted.load(Ordering::Relaxed),
            rows_filtered: self.rows_filtered.load(Ordering::Relaxed),
            parse_issues: self.parse_issues.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            breaker_cooldowns: self.breaker_cooldowns.load(Ordering::Relaxed),
            loops_failed: self.loops_failed.load(Ordering::Relaxed),
            loops_cancelled: self.loops_cancelled.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for ScrapeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accounting() {
        let metrics = ScrapeMetrics::new();
        metrics.increment_scrapes();
        metrics.record_report(3, 2, 1);
        metrics.record_report(1, 0, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scrapes_started, 1);
        assert_eq!(snapshot.reports_emitted, 2);
        assert_eq!(snapshot.transactions_accepted, 4);
        assert_eq!(snapshot.rows_filtered, 2);
        assert_eq!(snapshot.parse_issues, 1);
        assert_eq!(snapshot.breaker_cooldowns, 0);
    }
}
