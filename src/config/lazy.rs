//! Configuration for the lazy support.
//!
//! The lazy support materializes a node only when its position is read and
//! holds it weakly afterwards. Two knobs shape its behavior:
//!
//! - **`prefetch_limit`**: when a key-set change introduces at most this many
//!   new entries, each of them is materialized right away. Entries that turn
//!   out to have no node are hidden before any event is fired, so listeners
//!   never see an add immediately followed by a remove. Larger batches skip
//!   the probe and are discovered lazily. `0` disables probing.
//! - **`retain_state`**: keep the initialized state alive while the children
//!   exist. When `false` the state is torn down once every snapshot and every
//!   materialized node has been dropped.
//!
//! Retention is on by default. Nodes are still cached weakly and rebuilt
//! after their last user drops them, but the entry state and the
//! initialization survive, so `remove_notify` never runs on its own. Set
//! `retain_state` to `false` (or call `KeyedChildren::set_retained(false)`)
//! for the fully weak behavior.
//!
//! # Examples
//!
//! ```
//! use keyed_children::config::LazySupportConfig;
//!
//! // probe single-key inserts only, tear down when unused
//! let config = LazySupportConfig {
//!     prefetch_limit: 1,
//!     retain_state: false,
//! };
//! assert_eq!(config.prefetch_limit, 1);
//! ```

use core::fmt;

/// Default number of new entries probed eagerly per key-set change.
pub const DEFAULT_PREFETCH_LIMIT: usize = 4;

/// Configuration for the lazy support.
#[derive(Clone, Copy)]
pub struct LazySupportConfig {
    /// Largest number of new entries that are materialized eagerly to detect
    /// entries without nodes.
    pub prefetch_limit: usize,
    /// Whether the support keeps its initialized state alive by itself.
    ///
    /// Defaults to `true`; weakly cached nodes are unaffected.
    pub retain_state: bool,
}

impl Default for LazySupportConfig {
    fn default() -> Self {
        LazySupportConfig {
            prefetch_limit: DEFAULT_PREFETCH_LIMIT,
            retain_state: true,
        }
    }
}

impl fmt::Debug for LazySupportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySupportConfig")
            .field("prefetch_limit", &self.prefetch_limit)
            .field("retain_state", &self.retain_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_config_defaults() {
        let config = LazySupportConfig::default();
        assert_eq!(config.prefetch_limit, DEFAULT_PREFETCH_LIMIT);
        assert!(config.retain_state);
    }

    #[test]
    fn test_lazy_config_disable_probing() {
        let config = LazySupportConfig {
            prefetch_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.prefetch_limit, 0);
        assert!(config.retain_state);
    }
}
