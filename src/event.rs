//! Change Notifications
//!
//! Every structural change of a children object is reported to its
//! [`ChildrenListener`]s as one [`ChildrenEvent`] per step of the diff:
//!
//! | Event | Indices refer to | `before` | `after` |
//! |-------|------------------|----------|---------|
//! | `Removed` | positions in `before` | state prior to the removal | state after it |
//! | `Reordered` | `permutation[i]` is the new index of old index `i` | n/a | reordered state |
//! | `Added` | positions in `after` | usually `None` | state including the new nodes |
//!
//! Indices always describe the *visible* ordering, so entries that produce no
//! node never show up in an event.
//!
//! Listeners run synchronously inside the write task that made the change.
//! They may read the children freely; writes they request are queued and run
//! after the current task.

use core::fmt;
use std::sync::Arc;

use crate::lifecycle::LiveToken;
use crate::node::Node;

/// Source of nodes for a snapshot that materializes on access.
pub(crate) trait SnapshotView: Send + Sync {
    fn len(&self) -> usize;
    fn node_at(&self, index: usize) -> Option<Node>;
}

#[derive(Clone)]
enum Nodes {
    Fixed(Arc<[Node]>),
    Lazy(Arc<dyn SnapshotView>),
}

/// Immutable view of the visible nodes at one point in time.
///
/// Snapshots of a lazy children object materialize nodes on access; a
/// position whose entry turned out to have no node yields a dummy node.
/// Snapshots obtained from [`KeyedChildren::snapshot`](crate::KeyedChildren::snapshot)
/// keep the children initialized while they are alive.
#[derive(Clone)]
pub struct NodeSnapshot {
    nodes: Nodes,
    _token: Option<Arc<LiveToken>>,
}

impl NodeSnapshot {
    /// A snapshot with no nodes.
    pub fn empty() -> Self {
        Self::from_nodes(Vec::new())
    }

    /// A snapshot over already materialized nodes.
    pub fn from_nodes(nodes: impl Into<Arc<[Node]>>) -> Self {
        NodeSnapshot {
            nodes: Nodes::Fixed(nodes.into()),
            _token: None,
        }
    }

    pub(crate) fn lazy(view: Arc<dyn SnapshotView>) -> Self {
        NodeSnapshot {
            nodes: Nodes::Lazy(view),
            _token: None,
        }
    }

    pub(crate) fn keeping_alive(mut self, token: LiveToken) -> Self {
        self._token = Some(Arc::new(token));
        self
    }

    /// Number of visible positions.
    pub fn len(&self) -> usize {
        match &self.nodes {
            Nodes::Fixed(nodes) => nodes.len(),
            Nodes::Lazy(view) => view.len(),
        }
    }

    /// Whether the snapshot has no positions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the node at `index`, materializing it if necessary.
    pub fn get(&self, index: usize) -> Option<Node> {
        match &self.nodes {
            Nodes::Fixed(nodes) => nodes.get(index).cloned(),
            Nodes::Lazy(view) => view.node_at(index),
        }
    }

    /// Iterates over all positions in order.
    pub fn iter(&self) -> impl Iterator<Item = Node> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Materializes every position.
    pub fn to_vec(&self) -> Vec<Node> {
        self.iter().collect()
    }

    /// Names of all nodes in order.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|n| n.name()).collect()
    }
}

impl fmt::Debug for NodeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.nodes {
            Nodes::Fixed(_) => "fixed",
            Nodes::Lazy(_) => "lazy",
        };
        f.debug_struct("NodeSnapshot")
            .field("kind", &kind)
            .field("len", &self.len())
            .field("keeps_alive", &self._token.is_some())
            .finish()
    }
}

/// A structural change of a children object.
#[derive(Debug, Clone)]
pub enum ChildrenEvent {
    /// Nodes were inserted at `indices` of `after`.
    Added {
        /// Ascending positions of the new nodes in `after`.
        indices: Vec<usize>,
        /// State before the insertion, when known.
        before: Option<NodeSnapshot>,
        /// State including the new nodes.
        after: NodeSnapshot,
    },
    /// Nodes at `indices` of `before` were removed.
    Removed {
        /// Ascending positions of the removed nodes in `before`.
        indices: Vec<usize>,
        /// State before the removal.
        before: Option<NodeSnapshot>,
        /// State after the removal.
        after: NodeSnapshot,
    },
    /// Nodes changed their order.
    Reordered {
        /// `permutation[i]` is the new position of the node previously at `i`.
        permutation: Vec<usize>,
        /// State after the reorder.
        after: NodeSnapshot,
    },
}

impl ChildrenEvent {
    /// Indices carried by an add or remove event; empty for reorders.
    pub fn indices(&self) -> &[usize] {
        match self {
            ChildrenEvent::Added { indices, .. } | ChildrenEvent::Removed { indices, .. } => {
                indices
            }
            ChildrenEvent::Reordered { .. } => &[],
        }
    }

    /// Snapshot of the state after the change.
    pub fn after(&self) -> &NodeSnapshot {
        match self {
            ChildrenEvent::Added { after, .. }
            | ChildrenEvent::Removed { after, .. }
            | ChildrenEvent::Reordered { after, .. } => after,
        }
    }

    /// Short name of the event kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChildrenEvent::Added { .. } => "added",
            ChildrenEvent::Removed { .. } => "removed",
            ChildrenEvent::Reordered { .. } => "reordered",
        }
    }
}

/// Receives structural changes of a children object.
pub trait ChildrenListener: Send + Sync {
    /// Called once per change, in the order the changes were applied.
    fn children_changed(&self, event: &ChildrenEvent);
}

impl<F> ChildrenListener for F
where
    F: Fn(&ChildrenEvent) + Send + Sync,
{
    fn children_changed(&self, event: &ChildrenEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(usize);

    impl SnapshotView for Counting {
        fn len(&self) -> usize {
            self.0
        }

        fn node_at(&self, index: usize) -> Option<Node> {
            (index < self.0).then(|| Node::new(format!("n{index}")))
        }
    }

    #[test]
    fn test_fixed_snapshot_access() {
        let a = Node::new("a");
        let snapshot = NodeSnapshot::from_nodes(vec![a.clone(), Node::new("b")]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(0), Some(a));
        assert_eq!(snapshot.get(2), None);
        assert_eq!(snapshot.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_lazy_snapshot_materializes_on_access() {
        let snapshot = NodeSnapshot::lazy(Arc::new(Counting(3)));
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.names(), vec!["n0", "n1", "n2"]);
        assert!(NodeSnapshot::empty().is_empty());
    }

    #[test]
    fn test_event_accessors() {
        let event = ChildrenEvent::Added {
            indices: vec![0, 2],
            before: None,
            after: NodeSnapshot::empty(),
        };
        assert_eq!(event.indices(), &[0, 2]);
        assert_eq!(event.kind(), "added");

        let reorder = ChildrenEvent::Reordered {
            permutation: vec![1, 0],
            after: NodeSnapshot::empty(),
        };
        assert!(reorder.indices().is_empty());
        assert!(reorder.after().is_empty());
    }

    #[test]
    fn test_closure_listener() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let listener = |event: &ChildrenEvent| seen.lock().push(event.kind());
        listener.children_changed(&ChildrenEvent::Removed {
            indices: vec![1],
            before: None,
            after: NodeSnapshot::empty(),
        });
        assert_eq!(*seen.lock(), vec!["removed"]);
    }
}
