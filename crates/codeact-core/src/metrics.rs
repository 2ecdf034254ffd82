//! Global atomic counters for evaluation observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a host shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters.
pub struct Metrics {
    evaluations: AtomicU64,
    failures: AtomicU64,
    policy_violations: AtomicU64,
    tool_calls: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
        }
    }

    /// Increment the evaluations counter by one.
    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    /// Increment the failures counter by one. Any evaluation that ended in
    /// an error counts, policy violations included.
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", "counter incremented");
    }

    /// Increment the policy-violations counter by one.
    pub fn inc_policy_violations(&self) {
        self.policy_violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_violations", "counter incremented");
    }

    /// Increment the tool-calls counter by one.
    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tool_calls", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (host shutdown, a periodic report)
    /// rather than after every evaluation.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            failures = self.failures(),
            policy_violations = self.policy_violations(),
            tool_calls = self.tool_calls(),
        );
    }

    /// Read the current evaluations count.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Read the current failures count.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Read the current policy-violations count.
    pub fn policy_violations(&self) -> u64 {
        self.policy_violations.load(Ordering::Relaxed)
    }

    /// Read the current tool-calls count.
    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.policy_violations.store(0, Ordering::Relaxed);
        self.tool_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.evaluations(), 0);
        m.inc_evaluations();
        m.inc_evaluations();
        assert_eq!(m.evaluations(), 2);

        m.inc_failures();
        m.inc_policy_violations();
        assert_eq!(m.failures(), 1);
        assert_eq!(m.policy_violations(), 1);

        m.inc_tool_calls();
        m.inc_tool_calls();
        m.inc_tool_calls();
        assert_eq!(m.tool_calls(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_failures();
        m.inc_policy_violations();
        m.inc_tool_calls();
        m.reset();
        assert_eq!(m.evaluations(), 0);
        assert_eq!(m.failures(), 0);
        assert_eq!(m.policy_violations(), 0);
        assert_eq!(m.tool_calls(), 0);
    }

    #[traced_test]
    #[test]
    fn flush_reports_every_counter() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_tool_calls();
        m.inc_tool_calls();
        m.flush();
        assert!(logs_contain("evaluations=1"));
        assert!(logs_contain("failures=0"));
        assert!(logs_contain("policy_violations=0"));
        assert!(logs_contain("tool_calls=2"));
    }
}
