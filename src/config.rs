//! Children Configuration Module
//!
//! This module provides the configuration structures for keyed children and
//! their two supports. All configuration structs have public fields and a
//! `Default` implementation, so the usual way to build one is struct update
//! syntax.
//!
//! # Design Philosophy
//!
//! - **Simple**: Just create the struct with the fields you care about
//! - **Explicit**: The support strategy is chosen once, at construction
//! - **No boilerplate**: No builders
//!
//! # Choosing a Support
//!
//! | `lazy` | Support | Materializes | Caches nodes | Best for |
//! |--------|---------|--------------|--------------|----------|
//! | `false` | eager | every entry on first read | strongly | small key sets, cheap nodes |
//! | `true` | lazy | one entry per read position | weakly | large key sets, expensive nodes |
//!
//! A lazy children object falls back to the eager support the first time
//! fixed nodes are added to it.
//!
//! # Fixed Node Placement
//!
//! ```text
//!   before = false:   [ keyed nodes ... ][ fixed nodes ... ]
//!   before = true:    [ fixed nodes ... ][ keyed nodes ... ]
//! ```
//!
//! # Examples
//!
//! ```
//! use keyed_children::config::{ChildrenConfig, LazySupportConfig};
//!
//! let config = ChildrenConfig {
//!     lazy: true,
//!     lazy_support: LazySupportConfig {
//!         prefetch_limit: 2,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.lazy);
//! assert!(!config.before);
//! ```

use core::fmt;

pub mod eager;
pub mod lazy;

pub use eager::EagerSupportConfig;
pub use lazy::LazySupportConfig;

/// Configuration for a [`KeyedChildren`](crate::KeyedChildren).
///
/// # Fields
///
/// - `lazy`: use the lazy support instead of the eager one.
/// - `before`: place fixed nodes before the keyed nodes instead of after.
/// - `eager`: settings used whenever the eager support is active.
/// - `lazy_support`: settings used whenever the lazy support is active.
#[derive(Clone, Copy, Default)]
pub struct ChildrenConfig {
    /// Selects the lazy support.
    pub lazy: bool,
    /// Places fixed nodes before the keyed ones.
    pub before: bool,
    /// Eager support settings.
    pub eager: EagerSupportConfig,
    /// Lazy support settings.
    pub lazy_support: LazySupportConfig,
}

impl ChildrenConfig {
    /// Default configuration with the lazy support selected.
    pub fn lazy() -> Self {
        ChildrenConfig {
            lazy: true,
            ..Default::default()
        }
    }
}

impl fmt::Debug for ChildrenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildrenConfig")
            .field("lazy", &self.lazy)
            .field("before", &self.before)
            .field("eager", &self.eager)
            .field("lazy_support", &self.lazy_support)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_eager() {
        let config = ChildrenConfig::default();
        assert!(!config.lazy);
        assert!(!config.before);
        assert!(config.eager.retain_array);
        assert!(config.lazy_support.retain_state);
    }

    #[test]
    fn test_lazy_shortcut() {
        let config = ChildrenConfig::lazy();
        assert!(config.lazy);
        assert_eq!(
            config.lazy_support.prefetch_limit,
            lazy::DEFAULT_PREFETCH_LIMIT
        );
    }

    #[test]
    fn test_debug_lists_nested_configs() {
        let text = format!("{:?}", ChildrenConfig::default());
        assert!(text.contains("EagerSupportConfig"));
        assert!(text.contains("LazySupportConfig"));
    }
}
