//! Error types for the children engine.
//!
//! Errors are reserved for broken invariants: orderings that are not
//! permutations of each other, entry lists that disagree with their info maps,
//! keys whose `Eq` and `Hash` implementations contradict each other, and lock
//! ordering violations caught by the gate. Failures inside a
//! [`ChildFactory`](crate::ChildFactory) are never surfaced here; they degrade
//! to "no nodes" and are logged.

use std::error::Error as StdError;

use thiserror::Error;

/// Error type returned by a [`ChildFactory`](crate::ChildFactory) when it
/// cannot produce nodes for a key.
pub type NodeError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by the children engine.
#[derive(Debug, Error)]
pub enum ChildrenError {
    /// Two orderings that should contain the same elements do not.
    ///
    /// Usually the symptom of a key type with inconsistent `Eq`/`Hash`.
    #[error("orderings are not permutations of each other ({old_len} vs {new_len} elements):\n{listing}")]
    PermutationMismatch {
        /// Length of the previous ordering.
        old_len: usize,
        /// Length of the new ordering.
        new_len: usize,
        /// Both orderings printed index by index.
        listing: String,
    },

    /// The entry list and the entry-to-info map went out of sync.
    #[error("inconsistent entries: {entries} entries but {infos} infos{}\nentries: {entry_dump}\ninfos: {info_dump}", trigger.as_ref().map(|k| format!(" (while processing {k})")).unwrap_or_default())]
    InconsistentEntries {
        /// Number of entries in the list.
        entries: usize,
        /// Number of infos in the map.
        infos: usize,
        /// The entry being processed when the mismatch was detected.
        trigger: Option<String>,
        /// Debug dump of the entry list.
        entry_dump: String,
        /// Debug dump of the info map.
        info_dump: String,
    },

    /// Two keys compare equal but hash differently.
    #[error("bad Eq/Hash contract: {first} equals {second} but their hashes differ")]
    BrokenKeyContract {
        /// Debug form of the first key.
        first: String,
        /// Debug form of the second key.
        second: String,
    },

    /// Write access was requested while the current thread holds a lock
    /// that must never be held when entering the gate.
    #[error("must not acquire the children gate while holding {lock}")]
    ForeignLockHeld {
        /// Name of the offending lock.
        lock: &'static str,
    },

    /// Synchronous write access was requested from inside read access.
    #[error("cannot enter write access while holding read access on the same thread")]
    WriteInsideRead,

    /// Changing a filter node's original would make it delegate to itself.
    #[error("node {node} cannot delegate to {original}: the delegate chain would loop")]
    DelegationCycle {
        /// Name of the filter node.
        node: String,
        /// Name of the rejected original.
        original: String,
    },

    /// Keys or a key order were given to leaf children.
    #[error("leaf children cannot hold keys")]
    Leaf,
}

impl ChildrenError {
    /// Builds a [`ChildrenError::PermutationMismatch`] listing both orderings
    /// side by side.
    pub(crate) fn permutation_mismatch<T: core::fmt::Debug>(old: &[T], new: &[T]) -> Self {
        let mut listing = String::new();
        let rows = old.len().max(new.len());
        for i in 0..rows {
            let left = old.get(i).map(|v| format!("{v:?}")).unwrap_or_default();
            let right = new.get(i).map(|v| format!("{v:?}")).unwrap_or_default();
            listing.push_str(&format!("{i:>4}: {left:<40} | {right}\n"));
        }
        ChildrenError::PermutationMismatch {
            old_len: old.len(),
            new_len: new.len(),
            listing,
        }
    }
}
