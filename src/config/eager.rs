//! Configuration for the eager support.
//!
//! The eager support materializes every entry the first time any node is
//! read and keeps the resulting array in memory. The only knob is whether the
//! support itself keeps that array alive.
//!
//! # Retention
//!
//! ```text
//!   retain_array = true    support ──token──▶ array       (lives until switched off)
//!   retain_array = false   snapshot ──token──▶ array      (torn down with the last snapshot)
//! ```
//!
//! Retention can be changed later with
//! [`KeyedChildren::set_retained`](crate::KeyedChildren::set_retained).
//!
//! # Examples
//!
//! ```
//! use keyed_children::config::EagerSupportConfig;
//!
//! let config = EagerSupportConfig { retain_array: false };
//! assert!(!config.retain_array);
//! ```

use core::fmt;

/// Configuration for the eager support.
///
/// # Fields
///
/// - `retain_array`: keep the materialized array alive while the children
///   exist. When `false` the array is torn down (and `remove_notify` called)
///   once the last snapshot handed out is dropped.
#[derive(Clone, Copy)]
pub struct EagerSupportConfig {
    /// Whether the support keeps its materialized array alive by itself.
    pub retain_array: bool,
}

impl Default for EagerSupportConfig {
    fn default() -> Self {
        EagerSupportConfig { retain_array: true }
    }
}

impl fmt::Debug for EagerSupportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerSupportConfig")
            .field("retain_array", &self.retain_array)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eager_config_defaults_to_retaining() {
        assert!(EagerSupportConfig::default().retain_array);
    }

    #[test]
    fn test_eager_config_debug() {
        let config = EagerSupportConfig { retain_array: false };
        assert_eq!(
            format!("{config:?}"),
            "EagerSupportConfig { retain_array: false }"
        );
    }
}
