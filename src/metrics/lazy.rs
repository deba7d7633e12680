//! Lazy Support Metrics
//!
//! Metrics specific to the lazy support. Most of them describe how often the
//! optimistic snapshot publication and the per-entry construction guard had
//! to step in.
//!
//! | Metric | Meaning |
//! |--------|---------|
//! | `cas_retries` | snapshot publications that lost a race and restarted |
//! | `prefetch_probes` | new entries materialized eagerly during a key-set change |
//! | `reentrant_dummies` | dummies returned to a thread re-entering its own construction |
//! | `construction_waits` | reads that waited for another thread's construction |
//! | `hidden_entries` | entries hidden because they produced no node |

use core::sync::atomic::AtomicU64;
use std::collections::BTreeMap;

use super::{read, CoreSupportMetrics, SupportMetrics};

/// Lazy-specific metrics (extends CoreSupportMetrics)
#[derive(Debug, Default)]
pub struct LazySupportMetrics {
    /// Core metrics common to both supports
    pub core: CoreSupportMetrics,

    /// Compare-and-swap failures that forced a retry
    pub cas_retries: AtomicU64,

    /// Entries probed eagerly when they were introduced
    pub prefetch_probes: AtomicU64,

    /// Dummies handed out to break self re-entrant construction
    pub reentrant_dummies: AtomicU64,

    /// Reads that blocked on another thread's construction
    pub construction_waits: AtomicU64,

    /// Entries hidden after producing no node
    pub hidden_entries: AtomicU64,
}

impl LazySupportMetrics {
    /// Converts lazy metrics to a BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();
        metrics.insert("cas_retries".to_string(), read(&self.cas_retries));
        metrics.insert(
            "construction_waits".to_string(),
            read(&self.construction_waits),
        );
        metrics.insert("hidden_entries".to_string(), read(&self.hidden_entries));
        metrics.insert("prefetch_probes".to_string(), read(&self.prefetch_probes));
        metrics.insert(
            "reentrant_dummies".to_string(),
            read(&self.reentrant_dummies),
        );
        metrics
    }
}

impl SupportMetrics for LazySupportMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn support_name(&self) -> &'static str {
        "lazy"
    }
}
