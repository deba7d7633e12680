//! Eager Support Metrics
//!
//! Metrics specific to the eager support.

use core::sync::atomic::AtomicU64;
use std::collections::BTreeMap;

use super::{read, CoreSupportMetrics, SupportMetrics};

/// Eager-specific metrics (extends CoreSupportMetrics)
#[derive(Debug, Default)]
pub struct EagerSupportMetrics {
    /// Core metrics common to both supports
    pub core: CoreSupportMetrics,

    /// Reads that blocked while another thread initialized the array
    pub init_waits: AtomicU64,

    /// Reads answered with the uninitialized (empty) array because waiting
    /// was not possible
    pub stale_reads: AtomicU64,

    /// Times the flattened node array was rebuilt from the per-entry infos
    pub array_rebuilds: AtomicU64,
}

impl EagerSupportMetrics {
    /// Converts eager metrics to a BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();
        metrics.insert("array_rebuilds".to_string(), read(&self.array_rebuilds));
        metrics.insert("init_waits".to_string(), read(&self.init_waits));
        metrics.insert("stale_reads".to_string(), read(&self.stale_reads));
        metrics
    }
}

impl SupportMetrics for EagerSupportMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn support_name(&self) -> &'static str {
        "eager"
    }
}
