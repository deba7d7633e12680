#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! This section provides quick code examples and API references for the
//! children object and its two supports.
//!
//! ## Support Selection Guide
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     Which Support Should I Use?                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                              │
//! │  ┌─────────────────┐                                                         │
//! │  │ Are nodes cheap │──Yes──▶ Do you add nodes by hand (fixed nodes)?        │
//! │  │  to create?     │              │                                          │
//! │  └────────┬────────┘         Yes  │  No                                      │
//! │           │                   │   │                                          │
//! │          No                   ▼   ▼                                          │
//! │           │               ┌──────────┐  ┌──────────┐                         │
//! │           │               │  Eager   │  │  Either  │                         │
//! │           ▼               └──────────┘  └──────────┘                         │
//! │  ┌─────────────────┐                                                         │
//! │  │ Is only a part  │──Yes──▶ ┌──────────┐                                   │
//! │  │ ever looked at? │         │   Lazy   │                                    │
//! │  └────────┬────────┘         └──────────┘                                    │
//! │          No                                                                  │
//! │           ▼                                                                  │
//! │      ┌──────────┐                                                            │
//! │      │  Eager   │                                                            │
//! │      └──────────┘                                                            │
//! │                                                                              │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Description |
//! |------|-------------|
//! | [`KeyedChildren`] | Owner of keys, factory, listeners and the active support |
//! | [`KeyComparator`] | Key order of sorted children |
//! | [`Gate`] | Shared read/write access with a FIFO write queue |
//! | [`Node`] | Identity-compared node handle |
//! | [`NodeSnapshot`] | Immutable view of the nodes at one point in time |
//! | [`ChildrenEvent`] | Added / removed / reordered notification |
//! | [`Dupl`] | Counted wrapper that tells equal keys apart |
//!
//! ## Cost Characteristics
//!
//! | Operation | Eager | Lazy |
//! |-----------|-------|------|
//! | first read | factory call per entry | none until a position is read |
//! | `get_nodes_count(false)` | O(1) after init | O(1), no factory calls |
//! | `set_keys` diff | O(entries) | O(entries), one compare-and-swap |
//! | memory per entry | nodes held strongly | one weak cell |
//!
//! ## Code Examples
//!
//! ### Eager Children
//!
//! ```rust
//! use std::sync::Arc;
//! use keyed_children::{ChildrenEvent, Gate, KeyedChildren, Node, NodeError};
//! use parking_lot::Mutex;
//!
//! let children = KeyedChildren::new(
//!     |key: &&str| -> Result<Vec<Node>, NodeError> { Ok(vec![Node::new(*key)]) },
//!     Arc::new(Gate::new()),
//! );
//! children.set_keys(vec!["a", "b"]).unwrap();
//! assert_eq!(children.get_nodes_count(false), 2);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! children.add_listener(move |event: &ChildrenEvent| {
//!     sink.lock().push((event.kind(), event.indices().to_vec()));
//! });
//!
//! children.set_keys(vec!["a", "x", "b"]).unwrap();
//! assert_eq!(*seen.lock(), vec![("added", vec![1])]);
//! ```
//!
//! ### Lazy Children
//!
//! Entries that produce no node are hidden from the visible ordering.
//!
//! ```rust
//! use std::sync::Arc;
//! use keyed_children::{Gate, KeyedChildren, Node, NodeError};
//!
//! let children = KeyedChildren::new_lazy(
//!     |key: &&str| -> Result<Vec<Node>, NodeError> {
//!         if key.is_empty() {
//!             Ok(Vec::new())
//!         } else {
//!             Ok(vec![Node::new(*key)])
//!         }
//!     },
//!     Arc::new(Gate::new()),
//! );
//! children.set_keys(vec!["a", "", "c"]).unwrap();
//!
//! let names: Vec<String> = children.get_nodes(false).iter().map(|n| n.name()).collect();
//! assert_eq!(names, ["a", "c"]);
//! ```
//!
//! ### Duplicate Keys
//!
//! ```rust
//! use keyed_children::Dupl;
//!
//! let wrapped = Dupl::disambiguate(vec!["a", "b", "a"]);
//! assert_eq!(wrapped[2].count(), 1);
//! assert_ne!(wrapped[0], wrapped[2]);
//! assert_eq!(wrapped[2].clone().unwrap(), "a");
//! ```

/// Error types.
///
/// A single `ChildrenError` enum covers every invariant violation the engine
/// can report; node factories fail with the boxed `NodeError`.
pub mod error;

/// Duplicate key wrapping and the key contract check.
pub mod key;

/// Node handles.
///
/// Provides the identity-compared `Node`, its weak counterpart and the tie
/// between a node and the children it belongs to.
pub mod node;

/// Permutation computation and application.
pub mod permutation;

/// Read/write gate.
///
/// Reentrant shared read access and exclusive write access executed through
/// a FIFO task queue.
pub mod gate;

/// Keep-alive tokens driving teardown of unused state.
pub mod lifecycle;

/// Change notifications and node snapshots.
pub mod event;

/// Entries and the node factory contract.
pub mod entry;

/// Configuration structures.
///
/// Provides configuration structures for children objects and both supports.
pub mod config;

/// Support metrics.
///
/// Counters collected by both supports, reported through a common interface.
pub mod metrics;

/// Eager and lazy entry supports.
///
/// **Note**: This module is internal infrastructure. Use [`KeyedChildren`]
/// instead.
pub(crate) mod support;

/// The keyed children object.
pub mod children;

#[cfg(feature = "hashbrown")]
pub(crate) use hashbrown::DefaultHashBuilder;
#[cfg(feature = "hashbrown")]
pub(crate) use hashbrown::{HashMap, HashSet};

#[cfg(not(feature = "hashbrown"))]
pub(crate) use std::collections::hash_map::RandomState as DefaultHashBuilder;
#[cfg(not(feature = "hashbrown"))]
pub(crate) use std::collections::{HashMap, HashSet};

// Re-export the children object
pub use children::{KeyComparator, KeyedChildren};

// Re-export building blocks
pub use entry::{ChildFactory, ChildKey, Entry};
pub use error::{ChildrenError, NodeError};
pub use event::{ChildrenEvent, ChildrenListener, NodeSnapshot};
pub use gate::{ForeignLock, Gate, WriteTask};
pub use key::Dupl;
pub use lifecycle::LiveToken;
pub use node::{ChildrenId, Node, ParentTie, WeakNode};

// Re-export configuration and metrics
pub use config::{ChildrenConfig, EagerSupportConfig, LazySupportConfig};
pub use metrics::SupportMetrics;
