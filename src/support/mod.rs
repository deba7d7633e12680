//! Entry Supports
//!
//! A support turns the ordered entry list of one children object into nodes
//! and keeps both in sync as the entry list changes. Two strategies exist:
//!
//! | | [`EagerSupport`] | [`LazySupport`] |
//! |-|------------------|-----------------|
//! | Materializes | all entries on first read | one entry per position read |
//! | Node cache | strong, in one mutable array | weak, one cell per entry |
//! | State | `Mutex` guarded, mutated in place | immutable snapshot behind `ArcSwap` |
//! | Entries without nodes | contribute zero positions | hidden from the visible ordering |
//!
//! Both talk back to their owner only through [`SupportHost`], which they hold
//! weakly: factory calls, lifecycle hooks and event delivery.
//!
//! ```text
//!   KeyedChildren ──Arc──▶ ChildrenInner ──Arc──▶ dyn EntrySupport
//!                               ▲                        │
//!                               └───── Weak<dyn SupportHost> ◀┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::entry::{ChildKey, Entry};
use crate::error::ChildrenError;
use crate::event::{ChildrenEvent, NodeSnapshot};
use crate::metrics::CoreSupportMetrics;
use crate::node::{ChildrenId, Node};

pub(crate) mod children_array;
pub(crate) mod eager;
pub(crate) mod lazy;
pub(crate) mod lazy_state;

pub(crate) use eager::EagerSupport;
pub(crate) use lazy::LazySupport;

/// What a support needs from the children object that owns it.
pub(crate) trait SupportHost<K>: Send + Sync {
    fn children_id(&self) -> ChildrenId;

    /// Materializes `entry`. `None` means the factory failed; the failure
    /// has already been logged.
    fn create_nodes(&self, entry: &Entry<K>) -> Option<Vec<Node>>;

    /// Hands the nodes of a removed entry back to the factory.
    fn destroy_nodes(&self, entry: &Entry<K>, nodes: &[Node]);

    fn add_notify(&self);

    fn remove_notify(&self);

    fn fire(&self, event: ChildrenEvent);
}

/// Operations every support provides to its owner.
pub(crate) trait EntrySupport<K>: Send + Sync {
    fn is_lazy(&self) -> bool;

    fn is_initialized(&self) -> bool;

    /// Current entry list, hidden entries included.
    fn entries(&self) -> Vec<Entry<K>>;

    /// Replaces the entry list. Must run under write access.
    fn set_entries(&self, entries: Vec<Entry<K>>) -> Result<(), ChildrenError>;

    /// Recomputes one entry. Must run under write access.
    fn refresh_entry(&self, entry: &Entry<K>) -> Result<(), ChildrenError>;

    fn get_nodes(&self, optimal: bool) -> Vec<Node>;

    fn get_node_at(&self, index: usize) -> Option<Node>;

    fn get_nodes_count(&self, optimal: bool) -> usize;

    fn snapshot(&self) -> NodeSnapshot;

    /// Enters the initialized state without calling `add_notify`, used when
    /// the owner was already initialized by a previous support.
    fn mark_initialized(&self);

    fn set_retained(&self, retained: bool);

    /// Detaches a replaced support: it keeps answering reads but never tears
    /// down or notifies its owner again.
    fn retire(&self);

    fn metrics(&self) -> BTreeMap<String, f64>;

    fn support_name(&self) -> &'static str;
}

/// Calls the factory for `entry` and ties the produced nodes to the owner.
pub(crate) fn materialize<K: ChildKey>(
    host: &dyn SupportHost<K>,
    entry: &Entry<K>,
    index: Option<usize>,
    metrics: &CoreSupportMetrics,
) -> Vec<Node> {
    let produced = host.create_nodes(entry);
    metrics.record_materialization(produced.as_ref().map(Vec::len));
    let nodes = produced.unwrap_or_default();
    let owner = host.children_id();
    for node in &nodes {
        if !node.assign_to(owner, index) {
            warn!(
                ?entry,
                ?node,
                parent = ?node.parent(),
                "node already belongs to other children"
            );
        }
    }
    nodes
}

/// Fires an "added" event if `indices` is not empty.
pub(crate) fn fire_added<K>(
    host: &dyn SupportHost<K>,
    metrics: &CoreSupportMetrics,
    indices: Vec<usize>,
    before: Option<NodeSnapshot>,
    after: NodeSnapshot,
) {
    if indices.is_empty() {
        return;
    }
    metrics.record_added(indices.len());
    host.fire(ChildrenEvent::Added {
        indices,
        before,
        after,
    });
}

/// Fires a "removed" event if `indices` is not empty.
pub(crate) fn fire_removed<K>(
    host: &dyn SupportHost<K>,
    metrics: &CoreSupportMetrics,
    indices: Vec<usize>,
    before: NodeSnapshot,
    after: NodeSnapshot,
) {
    if indices.is_empty() {
        return;
    }
    metrics.record_removed(indices.len());
    host.fire(ChildrenEvent::Removed {
        indices,
        before: Some(before),
        after,
    });
}

/// Fires a reorder event.
pub(crate) fn fire_reordered<K>(
    host: &dyn SupportHost<K>,
    metrics: &CoreSupportMetrics,
    permutation: Vec<usize>,
    after: NodeSnapshot,
) {
    metrics.record_reordered();
    host.fire(ChildrenEvent::Reordered { permutation, after });
}

/// Destroys and unties the nodes of a removed entry.
pub(crate) fn release_nodes<K>(host: &dyn SupportHost<K>, entry: &Entry<K>, nodes: &[Node]) {
    if nodes.is_empty() {
        return;
    }
    host.destroy_nodes(entry, nodes);
    let owner = host.children_id();
    for node in nodes {
        node.deassign_from(owner);
    }
}

pub(crate) type SharedSupport<K> = Arc<dyn EntrySupport<K>>;
