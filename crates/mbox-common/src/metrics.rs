//! Control-loop bookkeeping for periodic status reports.
//!
//! Tracks iteration times, how many command batches were consumed and how
//! late each scheduled apply landed relative to its due-time.

use serde::Serialize;
use std::time::Duration;

/// Running statistics of a control loop.
#[derive(Debug, Clone)]
pub struct LoopMetrics {
    /// Configured period in nanoseconds.
    period_ns: u64,
    /// Total iterations executed.
    iterations: u64,
    /// Iterations whose body took longer than one period.
    overrun_count: u64,
    /// Longest iteration body in nanoseconds.
    max_iteration_ns: u64,
    /// Iterations that found dirty command fields.
    batches: u64,
    /// Committed applies.
    applies: u64,
    /// Apply lateness (now - due) statistics in nanoseconds.
    min_late_ns: u64,
    max_late_ns: u64,
    sum_late_ns: u64,
}

impl LoopMetrics {
    /// Create a metrics collector for a loop with the given period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period_ns: saturating_nanos(period),
            iterations: 0,
            overrun_count: 0,
            max_iteration_ns: 0,
            batches: 0,
            applies: 0,
            min_late_ns: u64::MAX,
            max_late_ns: 0,
            sum_late_ns: 0,
        }
    }

    /// Record one iteration and whether it consumed a command batch.
    pub fn record_iteration(&mut self, elapsed: Duration, consumed_batch: bool) {
        let ns = saturating_nanos(elapsed);
        self.iterations += 1;
        self.max_iteration_ns = self.max_iteration_ns.max(ns);
        if ns > self.period_ns {
            self.overrun_count += 1;
        }
        if consumed_batch {
            self.batches += 1;
        }
    }

    /// Record a committed apply that landed `late_by` after its due-time.
    pub fn record_apply(&mut self, late_by: Duration) {
        let ns = saturating_nanos(late_by);
        self.applies += 1;
        self.min_late_ns = self.min_late_ns.min(ns);
        self.max_late_ns = self.max_late_ns.max(ns);
        self.sum_late_ns = self.sum_late_ns.saturating_add(ns);
    }

    /// Total iterations executed.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Committed applies.
    #[must_use]
    pub fn applies(&self) -> u64 {
        self.applies
    }

    /// Iterations that overran the period.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Mean apply lateness, if anything was applied.
    #[must_use]
    pub fn mean_lateness(&self) -> Option<Duration> {
        (self.applies > 0).then(|| Duration::from_nanos(self.sum_late_ns / self.applies))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> LoopSnapshot {
        let applied = self.applies > 0;
        LoopSnapshot {
            iterations: self.iterations,
            overrun_count: self.overrun_count,
            max_iteration_ns: self.max_iteration_ns,
            batches: self.batches,
            applies: self.applies,
            min_late_ns: applied.then_some(self.min_late_ns),
            max_late_ns: applied.then_some(self.max_late_ns),
            mean_late_ns: applied.then(|| self.sum_late_ns / self.applies),
        }
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of loop metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopSnapshot {
    /// Total iterations executed.
    pub iterations: u64,
    /// Iterations that overran the period.
    pub overrun_count: u64,
    /// Longest iteration body in nanoseconds.
    pub max_iteration_ns: u64,
    /// Iterations that consumed dirty command fields.
    pub batches: u64,
    /// Committed applies.
    pub applies: u64,
    /// Smallest apply lateness in nanoseconds.
    pub min_late_ns: Option<u64>,
    /// Largest apply lateness in nanoseconds.
    pub max_late_ns: Option<u64>,
    /// Mean apply lateness in nanoseconds.
    pub mean_late_ns: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_counting() {
        let mut metrics = LoopMetrics::new(Duration::from_millis(10));

        metrics.record_iteration(Duration::from_millis(2), false);
        metrics.record_iteration(Duration::from_millis(12), true); // Overrun
        metrics.record_iteration(Duration::from_millis(3), true);

        let snap = metrics.snapshot();
        assert_eq!(snap.iterations, 3);
        assert_eq!(snap.overrun_count, 1);
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.max_iteration_ns, 12_000_000);
    }

    #[test]
    fn test_apply_lateness() {
        let mut metrics = LoopMetrics::new(Duration::from_millis(10));
        assert!(metrics.mean_lateness().is_none());
        assert_eq!(metrics.snapshot().min_late_ns, None);

        metrics.record_apply(Duration::from_millis(100));
        metrics.record_apply(Duration::from_millis(300));

        let snap = metrics.snapshot();
        assert_eq!(snap.applies, 2);
        assert_eq!(snap.min_late_ns, Some(100_000_000));
        assert_eq!(snap.max_late_ns, Some(300_000_000));
        assert_eq!(metrics.mean_lateness(), Some(Duration::from_millis(200)));
    }
}
