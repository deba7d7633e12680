//! Entries and Node Factories
//!
//! An [`Entry`] is the unit the diff works on. Each occurrence of a key in the
//! current key set becomes one `Entry::Key`, and a children object that holds
//! externally added nodes carries one extra `Entry::Fixed` for them:
//!
//! ```text
//!   keys:      [ a, b, a ]              fixed nodes: [ x, y ]   before = false
//!   entries:   [ Key(a), Key(b), Key(a#1), Fixed ]
//!   nodes:     [ A,      B,      A',       x, y  ]
//! ```
//!
//! Entries are cheap to clone and compare; materializing one goes through the
//! owner's [`ChildFactory`].
//!
//! # Factory Contract
//!
//! | Method | Called | Default |
//! |--------|--------|---------|
//! | `create_nodes` | when an entry is first needed, or refreshed | required |
//! | `destroy_nodes` | after nodes of a removed entry were announced | marks nodes destroyed |
//! | `add_notify` | once before the first read of an uninitialized children | no-op |
//! | `remove_notify` | when the initialized state is torn down | no-op |
//!
//! An `Err` or a panic from `create_nodes` is logged and treated as "no nodes".

use core::fmt;
use core::hash::Hash;

use crate::children::KeyedChildren;
use crate::error::NodeError;
use crate::key::Dupl;
use crate::node::Node;

/// Bounds every key type must satisfy.
pub trait ChildKey: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {}

impl<T> ChildKey for T where T: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {}

/// One position in the ordered entry list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Entry<K> {
    /// One occurrence of a key.
    Key(Dupl<K>),
    /// The externally added nodes of the owner.
    Fixed,
}

impl<K> Entry<K> {
    /// The key behind this entry, if it is a keyed one.
    pub fn key(&self) -> Option<&K> {
        match self {
            Entry::Key(dupl) => Some(dupl.key()),
            Entry::Fixed => None,
        }
    }

    /// Whether this is the fixed-nodes entry.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Entry::Fixed)
    }
}

impl<K: fmt::Debug> fmt::Debug for Entry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Key(dupl) => write!(f, "{dupl:?}"),
            Entry::Fixed => f.write_str("<fixed>"),
        }
    }
}

/// Turns keys into nodes for a [`KeyedChildren`].
pub trait ChildFactory<K>: Send + Sync + 'static {
    /// Creates the nodes representing `key`. Usually one, possibly none.
    fn create_nodes(&self, key: &K) -> Result<Vec<Node>, NodeError>;

    /// Called with the nodes of an entry that left the children.
    fn destroy_nodes(&self, nodes: &[Node]) {
        for node in nodes {
            node.fire_destroyed();
        }
    }

    /// Called before the children are first read. Typically sets the keys.
    fn add_notify(&self, _children: &KeyedChildren<K>) {}

    /// Called when the initialized state is torn down.
    fn remove_notify(&self, _children: &KeyedChildren<K>) {}
}

impl<K, F> ChildFactory<K> for F
where
    F: Fn(&K) -> Result<Vec<Node>, NodeError> + Send + Sync + 'static,
{
    fn create_nodes(&self, key: &K) -> Result<Vec<Node>, NodeError> {
        self(key)
    }
}
