//! Support Metrics System
//!
//! Provides counters for the two entry supports using BTreeMap-based metrics
//! reporting. Each support tracks the core counters below plus its own
//! specific ones, and exposes them through the common [`SupportMetrics`]
//! trait.
//!
//! # Why BTreeMap over HashMap?
//!
//! - **Deterministic ordering**: Metrics always appear in consistent order
//! - **Reproducible output**: Test assertions and benchmark reports compare cleanly
//! - **Better debugging**: Consistent output makes logs more readable
//!
//! # Why Atomics?
//!
//! Supports are shared between threads and counters are bumped from read
//! paths that only hold shared access, so every counter is an `AtomicU64`
//! updated with relaxed ordering. A report is a best-effort view, not a
//! consistent snapshot.

use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

pub mod eager;
pub mod lazy;

pub use eager::EagerSupportMetrics;
pub use lazy::LazySupportMetrics;

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

#[inline]
pub(crate) fn read(counter: &AtomicU64) -> f64 {
    counter.load(Ordering::Relaxed) as f64
}

/// Counters shared by both supports.
#[derive(Debug, Default)]
pub struct CoreSupportMetrics {
    /// Number of key-set changes applied
    pub set_entries_calls: AtomicU64,

    /// Nodes successfully produced by the factory
    pub nodes_materialized: AtomicU64,

    /// Factory calls that failed or panicked
    pub materialize_failures: AtomicU64,

    /// Factory calls that produced no node
    pub dummy_results: AtomicU64,

    /// Indices reported in "added" events
    pub added_notifications: AtomicU64,

    /// Indices reported in "removed" events
    pub removed_notifications: AtomicU64,

    /// Reorder events fired
    pub reordered_notifications: AtomicU64,

    /// Single-entry refreshes processed
    pub refreshes: AtomicU64,

    /// Completed initializations
    pub initializations: AtomicU64,

    /// Teardowns back to the uninitialized state
    pub teardowns: AtomicU64,
}

impl CoreSupportMetrics {
    /// Records one factory call with its outcome.
    pub fn record_materialization(&self, produced: Option<usize>) {
        match produced {
            None => bump(&self.materialize_failures),
            Some(0) => bump(&self.dummy_results),
            Some(n) => add(&self.nodes_materialized, n),
        }
    }

    /// Records an "added" event carrying `count` indices.
    pub fn record_added(&self, count: usize) {
        add(&self.added_notifications, count);
    }

    /// Records a "removed" event carrying `count` indices.
    pub fn record_removed(&self, count: usize) {
        add(&self.removed_notifications, count);
    }

    /// Records a reorder event.
    pub fn record_reordered(&self) {
        bump(&self.reordered_notifications);
    }

    /// Share of factory calls that produced at least one node.
    pub fn materialize_success_rate(&self) -> f64 {
        let ok = read(&self.nodes_materialized);
        let total = ok + read(&self.materialize_failures) + read(&self.dummy_results);
        if total > 0.0 {
            ok / total
        } else {
            0.0
        }
    }

    /// Convert core metrics to BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert(
            "added_notifications".to_string(),
            read(&self.added_notifications),
        );
        metrics.insert("dummy_results".to_string(), read(&self.dummy_results));
        metrics.insert("initializations".to_string(), read(&self.initializations));
        metrics.insert(
            "materialize_failures".to_string(),
            read(&self.materialize_failures),
        );
        metrics.insert(
            "nodes_materialized".to_string(),
            read(&self.nodes_materialized),
        );
        metrics.insert("refreshes".to_string(), read(&self.refreshes));
        metrics.insert(
            "removed_notifications".to_string(),
            read(&self.removed_notifications),
        );
        metrics.insert(
            "reordered_notifications".to_string(),
            read(&self.reordered_notifications),
        );
        metrics.insert(
            "set_entries_calls".to_string(),
            read(&self.set_entries_calls),
        );
        metrics.insert("teardowns".to_string(), read(&self.teardowns));

        metrics.insert(
            "materialize_success_rate".to_string(),
            self.materialize_success_rate(),
        );

        metrics
    }
}

/// Trait that both supports implement for metrics reporting
///
/// The trait uses BTreeMap to ensure deterministic ordering of metrics, which
/// is essential for reproducible benchmarks and consistent test results.
pub trait SupportMetrics {
    /// Returns all metrics as key-value pairs in deterministic order
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Support name for identification ("eager" or "lazy")
    fn support_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_materialization_outcomes() {
        let metrics = CoreSupportMetrics::default();
        metrics.record_materialization(Some(1));
        metrics.record_materialization(Some(2));
        metrics.record_materialization(Some(0));
        metrics.record_materialization(None);

        let map = metrics.to_btreemap();
        assert_eq!(map["nodes_materialized"], 3.0);
        assert_eq!(map["dummy_results"], 1.0);
        assert_eq!(map["materialize_failures"], 1.0);
        assert_eq!(map["materialize_success_rate"], 0.6);
    }

    #[test]
    fn test_empty_metrics_have_zero_rate() {
        let metrics = CoreSupportMetrics::default();
        assert_eq!(metrics.materialize_success_rate(), 0.0);
        assert_eq!(metrics.to_btreemap()["teardowns"], 0.0);
    }

    #[test]
    fn test_notification_counters() {
        let metrics = CoreSupportMetrics::default();
        metrics.record_added(3);
        metrics.record_removed(1);
        metrics.record_reordered();
        let map = metrics.to_btreemap();
        assert_eq!(map["added_notifications"], 3.0);
        assert_eq!(map["removed_notifications"], 1.0);
        assert_eq!(map["reordered_notifications"], 1.0);
    }
}
