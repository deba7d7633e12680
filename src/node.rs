//! Node Handles
//!
//! A [`Node`] is the heavy object a key materializes into. The engine never
//! looks inside it: nodes are compared by identity, cached strongly by the
//! eager support and weakly by the lazy one, and handed to consumers as cheap
//! clones of one shared allocation.
//!
//! ```text
//!   consumer ──Node──┐
//!                    ▼
//!   eager cache ──▶ NodeInner ◀── WeakNode ── lazy EntryInfo
//!                    │
//!                    ├─ name / value
//!                    ├─ parent tie (children id, index)
//!                    ├─ original (filter nodes only)
//!                    └─ keep-alive tokens
//! ```
//!
//! # Dummy Nodes
//!
//! [`Node::dummy`] creates the sentinel standing for "this entry produced no
//! node". The lazy support caches it for entries that materialize to nothing
//! and hides those entries from the visible ordering.
//!
//! # Filter Nodes
//!
//! A node created with [`Node::filter`] delegates its name to an original
//! node. The original can be swapped later with [`Node::change_original`],
//! which walks the delegate chain and rejects a change that would make the
//! node delegate to itself.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::ChildrenError;
use crate::HashSet;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one children object as the owner of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildrenId(pub(crate) u64);

impl ChildrenId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChildrenId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a node currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentTie {
    /// Children object that owns the node.
    pub owner: ChildrenId,
    /// Position in the owner's node list, if known.
    pub index: Option<usize>,
}

struct NodeInner {
    id: u64,
    name: Option<String>,
    dummy: bool,
    value: Option<Arc<dyn Any + Send + Sync>>,
    parent: Mutex<Option<ParentTie>>,
    original: Mutex<Option<Node>>,
    destroyed: AtomicBool,
    keep_alive: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

/// Identity-compared handle to a materialized node.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

/// Non-owning reference to a [`Node`].
#[derive(Clone)]
pub struct WeakNode(Weak<NodeInner>);

impl Node {
    fn build(name: Option<String>, dummy: bool, value: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Node(Arc::new(NodeInner {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            dummy,
            value,
            parent: Mutex::new(None),
            original: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            keep_alive: Mutex::new(Vec::new()),
        }))
    }

    /// Creates a plain named node.
    pub fn new(name: impl Into<String>) -> Self {
        Node::build(Some(name.into()), false, None)
    }

    /// Creates a named node carrying an application value.
    pub fn with_value<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Node::build(Some(name.into()), false, Some(Arc::new(value)))
    }

    /// Creates the sentinel that stands for "no node for this entry".
    pub fn dummy() -> Self {
        Node::build(None, true, None)
    }

    /// Creates a node that delegates its name to `original`.
    pub fn filter(original: &Node) -> Self {
        let node = Node::build(None, false, None);
        *node.0.original.lock() = Some(original.clone());
        node
    }

    /// Process-unique identity of this node.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether this is a dummy sentinel.
    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.0.dummy
    }

    /// Returns the node's name, resolving filter nodes through their
    /// delegate chain.
    pub fn name(&self) -> String {
        if let Some(name) = &self.0.name {
            return name.clone();
        }
        if self.0.dummy {
            return String::from("<dummy>");
        }
        match self.original() {
            Some(original) => original.name(),
            None => String::new(),
        }
    }

    /// Returns the attached value if it has type `T`.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.value.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// The node this filter node delegates to.
    pub fn original(&self) -> Option<Node> {
        self.0.original.lock().clone()
    }

    /// Points this filter node at a new original.
    ///
    /// Fails if `original` already delegates, directly or transitively, to
    /// this node.
    pub fn change_original(&self, original: &Node) -> Result<(), ChildrenError> {
        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(self.id());
        let mut cursor = Some(original.clone());
        while let Some(current) = cursor {
            if !visited.insert(current.id()) {
                return Err(ChildrenError::DelegationCycle {
                    node: self.name(),
                    original: original.name(),
                });
            }
            cursor = current.original();
        }
        *self.0.original.lock() = Some(original.clone());
        Ok(())
    }

    /// Compares two handles by identity.
    #[inline]
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Creates a weak reference to this node.
    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.0))
    }

    /// Current parent tie, if the node is attached to a children object.
    pub fn parent(&self) -> Option<ParentTie> {
        *self.0.parent.lock()
    }

    /// Whether [`Node::fire_destroyed`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::Acquire)
    }

    /// Marks the node destroyed. Default action of
    /// [`ChildFactory::destroy_nodes`](crate::ChildFactory::destroy_nodes).
    pub fn fire_destroyed(&self) {
        self.0.destroyed.store(true, Ordering::Release);
    }

    /// Ties the node to `owner` at `index`.
    ///
    /// A node already tied to a different owner keeps its first owner and
    /// the call returns `false`.
    pub(crate) fn assign_to(&self, owner: ChildrenId, index: Option<usize>) -> bool {
        let mut parent = self.0.parent.lock();
        match *parent {
            Some(tie) if tie.owner != owner => false,
            _ => {
                *parent = Some(ParentTie { owner, index });
                true
            }
        }
    }

    /// Removes the tie to `owner`, leaving ties to other owners untouched.
    pub(crate) fn deassign_from(&self, owner: ChildrenId) {
        let mut parent = self.0.parent.lock();
        if matches!(*parent, Some(tie) if tie.owner == owner) {
            *parent = None;
        }
    }

    /// Attaches a value that lives exactly as long as the node allocation.
    pub(crate) fn keep_alive(&self, token: Box<dyn Any + Send + Sync>) {
        self.0.keep_alive.lock().push(token);
    }
}

impl WeakNode {
    /// Upgrades to a strong handle if the node is still alive.
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }

    /// Whether the node has been dropped everywhere.
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dummy() {
            write!(f, "Node(<dummy>#{})", self.0.id)
        } else {
            write!(f, "Node({}#{})", self.name(), self.0.id)
        }
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({node:?})"),
            None => f.write_str("WeakNode(<dead>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = Node::new("a");
        let b = Node::new("a");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_weak_node_dies_with_last_handle() {
        let node = Node::new("n");
        let weak = node.downgrade();
        assert!(weak.upgrade().is_some());
        drop(node);
        assert!(weak.is_dead());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_value_downcast() {
        let node = Node::with_value("n", 42u32);
        assert_eq!(node.value::<u32>(), Some(&42));
        assert_eq!(node.value::<String>(), None);
    }

    #[test]
    fn test_assign_keeps_first_owner() {
        let node = Node::new("n");
        let first = ChildrenId::next();
        let second = ChildrenId::next();
        assert!(node.assign_to(first, Some(0)));
        assert!(!node.assign_to(second, Some(1)));
        assert_eq!(node.parent().map(|t| t.owner), Some(first));
        node.deassign_from(second);
        assert!(node.parent().is_some());
        node.deassign_from(first);
        assert!(node.parent().is_none());
    }

    #[test]
    fn test_filter_name_follows_original() {
        let base = Node::new("base");
        let filter = Node::filter(&base);
        assert_eq!(filter.name(), "base");

        let other = Node::new("other");
        filter.change_original(&other).unwrap();
        assert_eq!(filter.name(), "other");
    }

    #[test]
    fn test_change_original_rejects_cycle() {
        let base = Node::new("base");
        let first = Node::filter(&base);
        let second = Node::filter(&first);
        let err = first.change_original(&second).unwrap_err();
        assert!(matches!(err, ChildrenError::DelegationCycle { .. }));
        assert_eq!(first.original(), Some(base));
    }

    #[test]
    fn test_change_original_rejects_self() {
        let base = Node::new("base");
        let filter = Node::filter(&base);
        assert!(filter.change_original(&filter).is_err());
    }

    #[test]
    fn test_keep_alive_dropped_with_node() {
        let marker = Arc::new(());
        let node = Node::new("n");
        node.keep_alive(Box::new(Arc::clone(&marker)));
        assert_eq!(Arc::strong_count(&marker), 2);
        drop(node);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
