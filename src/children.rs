//! Keyed Children
//!
//! [`KeyedChildren`] is the object applications talk to. It owns the node
//! factory, the listeners, an optional list of externally added *fixed*
//! nodes and the active support, and turns key sets into entry lists:
//!
//! ```text
//!   set_keys([a, b, a])
//!        │  key contract check, duplicate wrapping
//!        ▼
//!   [Key(a), Key(b), Key(a#1)] + Fixed?      ── posted as one write task ──▶  support.set_entries
//!                                                                                  │
//!   listeners ◀───────────── added / removed / reordered ─────────────────────────┘
//! ```
//!
//! # Write Tasks
//!
//! Every mutation (`set_keys`, `refresh_key`, `set_before`, `add`, `remove`)
//! is posted to the shared [`Gate`]. Outside of gate access it runs before
//! the call returns; inside it runs as soon as the surrounding access ends.
//! Only the latest `set_keys` request is applied; superseded requests that
//! are still queued do nothing.
//!
//! # Fixed Nodes
//!
//! Nodes added with [`add`](KeyedChildren::add) live in a single `Fixed`
//! entry, placed before or after the keyed entries. The lazy support cannot
//! hold them, so adding nodes to a lazy children object switches it to the
//! eager support first.
//!
//! # Sorted and Leaf Children
//!
//! With a comparator installed ([`sorted`](KeyedChildren::sorted),
//! [`set_comparator`](KeyedChildren::set_comparator)) every key set is
//! stably sorted before it reaches the support. Installing a new comparator
//! re-sorts the current keys, which listeners see as one reorder:
//!
//! ```text
//!   keys [b a c]  ──by name──▶  [a b c]   ──reversed──▶  [c b a]
//!                               Reordered [1, 0, 2]      Reordered [2, 1, 0]
//! ```
//!
//! [`leaf`](KeyedChildren::leaf) children never have nodes and refuse keys.

use core::cmp::Ordering as KeyOrder;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::config::ChildrenConfig;
use crate::entry::{ChildFactory, ChildKey, Entry};
use crate::error::{ChildrenError, NodeError};
use crate::event::{ChildrenEvent, ChildrenListener, NodeSnapshot};
use crate::gate::Gate;
use crate::key::{check_key_contract, Dupl};
use crate::node::{ChildrenId, Node};
use crate::support::{EagerSupport, LazySupport, SharedSupport, SupportHost};
use crate::DefaultHashBuilder;

/// Ordered, keyed collection of child nodes.
///
/// Cloning is cheap and yields another handle to the same children.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use keyed_children::{Gate, KeyedChildren, Node, NodeError};
///
/// let children = KeyedChildren::new(
///     |key: &u32| -> Result<Vec<Node>, NodeError> { Ok(vec![Node::new(format!("n{key}"))]) },
///     Arc::new(Gate::new()),
/// );
/// children.set_keys(vec![1, 2, 3]).unwrap();
///
/// let names: Vec<String> = children.get_nodes(false).iter().map(|n| n.name()).collect();
/// assert_eq!(names, ["n1", "n2", "n3"]);
/// ```
pub struct KeyedChildren<K> {
    inner: Arc<ChildrenInner<K>>,
}

/// Order imposed on the keys of sorted children.
pub type KeyComparator<K> = Arc<dyn Fn(&K, &K) -> KeyOrder + Send + Sync>;

struct ChildrenInner<K> {
    id: ChildrenId,
    this: Weak<ChildrenInner<K>>,
    gate: Arc<Gate>,
    factory: Arc<dyn ChildFactory<K>>,
    config: ChildrenConfig,
    before: AtomicBool,
    fixed: Mutex<Vec<Node>>,
    listeners: Mutex<Vec<Arc<dyn ChildrenListener>>>,
    support: RwLock<SharedSupport<K>>,
    retain: Mutex<Option<bool>>,
    keys_seq: AtomicU64,
    hasher: DefaultHashBuilder,
    comparator: RwLock<Option<KeyComparator<K>>>,
    leaf: bool,
}

impl<K> Clone for KeyedChildren<K> {
    fn clone(&self) -> Self {
        KeyedChildren {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: ChildKey> KeyedChildren<K> {
    /// Creates eager children with default settings.
    pub fn new(factory: impl ChildFactory<K>, gate: Arc<Gate>) -> Self {
        Self::init(ChildrenConfig::default(), factory, gate)
    }

    /// Creates lazy children with default settings.
    pub fn new_lazy(factory: impl ChildFactory<K>, gate: Arc<Gate>) -> Self {
        Self::init(ChildrenConfig::lazy(), factory, gate)
    }

    /// Creates eager children whose keys are kept sorted by `compare`.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use keyed_children::{Gate, KeyedChildren, Node, NodeError};
    ///
    /// let children = KeyedChildren::sorted(
    ///     |key: &&str| -> Result<Vec<Node>, NodeError> { Ok(vec![Node::new(*key)]) },
    ///     Arc::new(Gate::new()),
    ///     |a: &&str, b: &&str| a.cmp(b),
    /// );
    /// children.set_keys(vec!["b", "c", "a"]).unwrap();
    /// let names: Vec<String> = children.get_nodes(false).iter().map(|n| n.name()).collect();
    /// assert_eq!(names, ["a", "b", "c"]);
    /// ```
    pub fn sorted(
        factory: impl ChildFactory<K>,
        gate: Arc<Gate>,
        compare: impl Fn(&K, &K) -> KeyOrder + Send + Sync + 'static,
    ) -> Self {
        let children = Self::new(factory, gate);
        *children.inner.comparator.write() = Some(Arc::new(compare));
        children
    }

    /// Creates children that never have nodes.
    ///
    /// Leaf children reject keys, comparators and fixed nodes.
    pub fn leaf() -> Self {
        Self::build(
            ChildrenConfig::default(),
            |_: &K| -> Result<Vec<Node>, NodeError> { Ok(Vec::new()) },
            Arc::new(Gate::new()),
            true,
        )
    }

    /// Creates children from an explicit configuration.
    pub fn init(config: ChildrenConfig, factory: impl ChildFactory<K>, gate: Arc<Gate>) -> Self {
        Self::build(config, factory, gate, false)
    }

    fn build(
        config: ChildrenConfig,
        factory: impl ChildFactory<K>,
        gate: Arc<Gate>,
        leaf: bool,
    ) -> Self {
        let factory: Arc<dyn ChildFactory<K>> = Arc::new(factory);
        let inner = Arc::new_cyclic(|this: &Weak<ChildrenInner<K>>| {
            let host: Weak<dyn SupportHost<K>> = this.clone();
            let support = new_support(host, Arc::clone(&gate), &config, config.lazy);
            ChildrenInner {
                id: ChildrenId::next(),
                this: this.clone(),
                gate,
                factory,
                config,
                before: AtomicBool::new(config.before),
                fixed: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                support: RwLock::new(support),
                retain: Mutex::new(None),
                keys_seq: AtomicU64::new(0),
                hasher: DefaultHashBuilder::default(),
                comparator: RwLock::new(None),
                leaf,
            }
        });
        trace!(children = ?inner.id, lazy = config.lazy, "children created");
        KeyedChildren { inner }
    }

    /// Replaces the key set.
    ///
    /// Small key sets are checked for keys that are equal but hash
    /// differently first. Equal keys are kept and told apart by occurrence.
    pub fn set_keys(&self, keys: Vec<K>) -> Result<(), ChildrenError> {
        if self.inner.leaf {
            return Err(ChildrenError::Leaf);
        }
        check_key_contract(&keys, &self.inner.hasher)?;
        let keyed: Vec<Entry<K>> = Dupl::disambiguate(keys).into_iter().map(Entry::Key).collect();
        let seq = self.inner.keys_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            if inner.keys_seq.load(Ordering::Acquire) != seq {
                trace!(children = ?inner.id, seq, "superseded key set skipped");
                return;
            }
            let entries = inner.assemble(inner.sort(keyed));
            if let Err(err) = inner.support().set_entries(entries) {
                error!(children = ?inner.id, error = %err, "applying key set failed");
            }
        }))
    }

    /// Sorts the keys with `compare` from now on and re-sorts the current
    /// ones.
    pub fn set_comparator(
        &self,
        compare: impl Fn(&K, &K) -> KeyOrder + Send + Sync + 'static,
    ) -> Result<(), ChildrenError> {
        if self.inner.leaf {
            return Err(ChildrenError::Leaf);
        }
        *self.inner.comparator.write() = Some(Arc::new(compare));
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            let entries = inner.assemble(inner.sort(inner.keyed_entries()));
            if let Err(err) = inner.support().set_entries(entries) {
                error!(children = ?inner.id, error = %err, "re-sorting keys failed");
            }
        }))
    }

    /// Whether these are [`leaf`](Self::leaf) children.
    pub fn is_leaf(&self) -> bool {
        self.inner.leaf
    }

    /// Recomputes the nodes of every occurrence of `key`.
    pub fn refresh_key(&self, key: &K) -> Result<(), ChildrenError> {
        let key = key.clone();
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            let support = inner.support();
            for entry in support.entries() {
                if entry.key() != Some(&key) {
                    continue;
                }
                if let Err(err) = support.refresh_entry(&entry) {
                    error!(children = ?inner.id, ?entry, error = %err, "refresh failed");
                }
            }
        }))
    }

    /// Current nodes, initializing the children if needed.
    ///
    /// With `optimal` pending write tasks are applied first.
    pub fn get_nodes(&self, optimal: bool) -> Vec<Node> {
        self.inner.support().get_nodes(optimal)
    }

    /// Node at `index`, if any.
    pub fn get_node_at(&self, index: usize) -> Option<Node> {
        self.inner.support().get_node_at(index)
    }

    /// Number of nodes. Without `optimal` the lazy support answers without
    /// materializing anything.
    pub fn get_nodes_count(&self, optimal: bool) -> usize {
        self.inner.support().get_nodes_count(optimal)
    }

    /// Immutable view of the current nodes that keeps the children state
    /// alive while it exists.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.inner.support().snapshot()
    }

    /// Whether the active support has run its initialization.
    pub fn is_initialized(&self) -> bool {
        self.inner.support().is_initialized()
    }

    /// First node called `name`, or the first node at all for `None`.
    pub fn find_child(&self, name: Option<&str>) -> Option<Node> {
        let nodes = self.get_nodes(false);
        match name {
            None => nodes.into_iter().next(),
            Some(name) => nodes.into_iter().find(|n| n.name() == name),
        }
    }

    /// Places fixed nodes before (`true`) or after the keyed nodes.
    pub fn set_before(&self, before: bool) -> Result<(), ChildrenError> {
        if self.inner.before.swap(before, Ordering::AcqRel) == before {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            let entries = inner.assemble(inner.keyed_entries());
            if let Err(err) = inner.support().set_entries(entries) {
                error!(children = ?inner.id, error = %err, "moving fixed nodes failed");
            }
        }))
    }

    /// Appends fixed nodes. Lazy children switch to the eager support.
    pub fn add(&self, nodes: Vec<Node>) -> Result<bool, ChildrenError> {
        if self.inner.leaf {
            return Ok(false);
        }
        if nodes.is_empty() {
            return Ok(true);
        }
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            if inner.support().is_lazy() {
                warn!(children = ?inner.id, "fixed nodes added to lazy children, switching to eager");
                if let Err(err) = inner.switch_support(false) {
                    error!(children = ?inner.id, error = %err, "switching support failed");
                    return;
                }
            }
            inner.fixed.lock().extend(nodes);
            inner.apply_fixed();
        }))?;
        Ok(true)
    }

    /// Removes fixed nodes. Refused by lazy children.
    pub fn remove(&self, nodes: &[Node]) -> Result<bool, ChildrenError> {
        if self.inner.leaf {
            return Ok(false);
        }
        if self.is_lazy() {
            warn!(children = ?self.inner.id, "cannot remove fixed nodes from lazy children");
            return Ok(false);
        }
        let nodes = nodes.to_vec();
        let inner = Arc::clone(&self.inner);
        self.inner.gate.post_write(Box::new(move || {
            {
                let mut fixed = inner.fixed.lock();
                let len = fixed.len();
                fixed.retain(|f| !nodes.iter().any(|n| n.ptr_eq(f)));
                if fixed.len() == len {
                    return;
                }
            }
            inner.apply_fixed();
        }))?;
        Ok(true)
    }

    /// Keeps (`true`) or releases the initialized state when no snapshot
    /// or node is in use.
    pub fn set_retained(&self, retained: bool) {
        *self.inner.retain.lock() = Some(retained);
        self.inner.support().set_retained(retained);
    }

    /// Registers a listener for added, removed and reordered notifications.
    pub fn add_listener(&self, listener: impl ChildrenListener + 'static) {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    /// Whether the lazy support is active.
    pub fn is_lazy(&self) -> bool {
        self.inner.support().is_lazy()
    }

    /// Gate shared with the other children of the same tree.
    pub fn gate(&self) -> &Arc<Gate> {
        &self.inner.gate
    }

    /// Identity of these children, used in node parent ties.
    pub fn id(&self) -> ChildrenId {
        self.inner.id
    }

    /// Counters of the active support.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.inner.support().metrics()
    }

    /// `"eager"` or `"lazy"`.
    pub fn support_name(&self) -> &'static str {
        self.inner.support().support_name()
    }
}

fn new_support<K: ChildKey>(
    host: Weak<dyn SupportHost<K>>,
    gate: Arc<Gate>,
    config: &ChildrenConfig,
    lazy: bool,
) -> SharedSupport<K> {
    if lazy {
        LazySupport::new(host, gate, config.lazy_support)
    } else {
        EagerSupport::new(host, gate, config.eager)
    }
}

impl<K: ChildKey> ChildrenInner<K> {
    fn support(&self) -> SharedSupport<K> {
        Arc::clone(&self.support.read())
    }

    fn handle(&self) -> Option<KeyedChildren<K>> {
        self.this.upgrade().map(|inner| KeyedChildren { inner })
    }

    fn keyed_entries(&self) -> Vec<Entry<K>> {
        self.support()
            .entries()
            .into_iter()
            .filter(|e| !e.is_fixed())
            .collect()
    }

    /// Stable sort by the installed comparator, if any.
    fn sort(&self, mut keyed: Vec<Entry<K>>) -> Vec<Entry<K>> {
        let Some(compare) = self.comparator.read().clone() else {
            return keyed;
        };
        keyed.sort_by(|a, b| match (a.key(), b.key()) {
            (Some(a), Some(b)) => compare(a, b),
            _ => KeyOrder::Equal,
        });
        keyed
    }

    /// Keyed entries plus the fixed entry, if there are fixed nodes.
    fn assemble(&self, mut keyed: Vec<Entry<K>>) -> Vec<Entry<K>> {
        if self.fixed.lock().is_empty() {
            return keyed;
        }
        if self.before.load(Ordering::Acquire) {
            keyed.insert(0, Entry::Fixed);
        } else {
            keyed.push(Entry::Fixed);
        }
        keyed
    }

    /// Brings the support in line with the fixed node list. Write task.
    fn apply_fixed(&self) {
        let support = self.support();
        let has_fixed = !self.fixed.lock().is_empty();
        let result = if has_fixed && support.entries().contains(&Entry::Fixed) {
            support.refresh_entry(&Entry::Fixed)
        } else {
            support.set_entries(self.assemble(self.keyed_entries()))
        };
        if let Err(err) = result {
            error!(children = ?self.id, error = %err, "updating fixed nodes failed");
        }
    }

    /// Replaces the active support. Write task.
    fn switch_support(&self, lazy: bool) -> Result<(), ChildrenError> {
        let old = self.support();
        if old.is_lazy() == lazy {
            return Ok(());
        }
        let entries = old.entries();
        let was_inited = old.is_initialized();
        debug!(children = ?self.id, lazy, was_inited, "switching support");
        if was_inited {
            let before = old.snapshot();
            let indices: Vec<usize> = (0..before.len()).collect();
            if !indices.is_empty() {
                self.fire(ChildrenEvent::Removed {
                    indices,
                    before: Some(before),
                    after: NodeSnapshot::empty(),
                });
            }
        }
        old.retire();

        let host: Weak<dyn SupportHost<K>> = self.this.clone();
        let next = new_support(host, Arc::clone(&self.gate), &self.config, lazy);
        if let Some(retained) = *self.retain.lock() {
            next.set_retained(retained);
        }
        *self.support.write() = Arc::clone(&next);
        if was_inited {
            next.mark_initialized();
        }
        next.set_entries(entries)
    }
}

impl<K: ChildKey> SupportHost<K> for ChildrenInner<K> {
    fn children_id(&self) -> ChildrenId {
        self.id
    }

    fn create_nodes(&self, entry: &Entry<K>) -> Option<Vec<Node>> {
        let key = match entry {
            Entry::Fixed => return Some(self.fixed.lock().clone()),
            Entry::Key(dupl) => dupl.key(),
        };
        match catch_unwind(AssertUnwindSafe(|| self.factory.create_nodes(key))) {
            Ok(Ok(nodes)) => Some(nodes),
            Ok(Err(err)) => {
                warn!(children = ?self.id, ?key, error = %err, "creating nodes failed");
                None
            }
            Err(_) => {
                warn!(children = ?self.id, ?key, "node factory panicked");
                None
            }
        }
    }

    fn destroy_nodes(&self, entry: &Entry<K>, nodes: &[Node]) {
        if entry.is_fixed() {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| self.factory.destroy_nodes(nodes))).is_err() {
            warn!(children = ?self.id, ?entry, "destroying nodes panicked");
        }
    }

    fn add_notify(&self) {
        let Some(handle) = self.handle() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| self.factory.add_notify(&handle))).is_err() {
            warn!(children = ?self.id, "add_notify panicked");
        }
    }

    fn remove_notify(&self) {
        let Some(handle) = self.handle() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| self.factory.remove_notify(&handle))).is_err() {
            warn!(children = ?self.id, "remove_notify panicked");
        }
    }

    fn fire(&self, event: ChildrenEvent) {
        let listeners = self.listeners.lock().clone();
        trace!(
            children = ?self.id,
            kind = event.kind(),
            indices = ?event.indices(),
            listeners = listeners.len(),
            "children changed"
        );
        for listener in listeners {
            listener.children_changed(&event);
        }
    }
}

impl<K> fmt::Debug for KeyedChildren<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedChildren")
            .field("id", &self.inner.id)
            .field("lazy", &self.inner.config.lazy)
            .field("before", &self.inner.before.load(Ordering::Relaxed))
            .field("fixed", &self.inner.fixed.lock().len())
            .field("sorted", &self.inner.comparator.read().is_some())
            .field("leaf", &self.inner.leaf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    fn named(key: &&'static str) -> Result<Vec<Node>, NodeError> {
        Ok(vec![Node::new(*key)])
    }

    fn names(children: &KeyedChildren<&'static str>) -> Vec<String> {
        children.get_nodes(false).iter().map(Node::name).collect()
    }

    #[test]
    fn test_set_keys_eager_and_lazy() {
        for config in [ChildrenConfig::default(), ChildrenConfig::lazy()] {
            let children = KeyedChildren::init(config, named, Arc::new(Gate::new()));
            children.set_keys(vec!["a", "b", "a"]).unwrap();
            assert_eq!(names(&children), vec!["a", "b", "a"]);
            assert_eq!(children.get_nodes_count(false), 3);
            assert_eq!(children.support_name(), if config.lazy { "lazy" } else { "eager" });
        }
    }

    #[test]
    fn test_factory_error_means_no_nodes() {
        let children = KeyedChildren::new(
            |key: &u8| -> Result<Vec<Node>, NodeError> {
                if *key == 0 {
                    Err("zero".into())
                } else {
                    Ok(vec![Node::new(key.to_string())])
                }
            },
            Arc::new(Gate::new()),
        );
        children.set_keys(vec![0, 1]).unwrap();
        let nodes = children.get_nodes(false);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "1");
    }

    #[test]
    fn test_factory_panic_means_no_nodes() {
        let children = KeyedChildren::new_lazy(
            |key: &u8| -> Result<Vec<Node>, NodeError> {
                if *key == 0 {
                    panic!("boom");
                }
                Ok(vec![Node::new(key.to_string())])
            },
            Arc::new(Gate::new()),
        );
        children.set_keys(vec![0, 1]).unwrap();
        assert_eq!(children.get_nodes(false).len(), 1);
    }

    #[test]
    fn test_find_child() {
        let children = KeyedChildren::new(named, Arc::new(Gate::new()));
        children.set_keys(vec!["x", "y"]).unwrap();
        assert_eq!(children.find_child(Some("y")).map(|n| n.name()), Some("y".to_string()));
        assert_eq!(children.find_child(None).map(|n| n.name()), Some("x".to_string()));
        assert!(children.find_child(Some("z")).is_none());
    }

    #[test]
    fn test_fixed_nodes_follow_before() {
        let children = KeyedChildren::new(named, Arc::new(Gate::new()));
        children.set_keys(vec!["a", "b"]).unwrap();
        children.add(vec![Node::new("x")]).unwrap();
        assert_eq!(names(&children), vec!["a", "b", "x"]);

        children.set_before(true).unwrap();
        assert_eq!(names(&children), vec!["x", "a", "b"]);

        children.set_keys(vec!["c"]).unwrap();
        assert_eq!(names(&children), vec!["x", "c"]);
    }

    #[test]
    fn test_remove_fixed_node() {
        let children = KeyedChildren::new(named, Arc::new(Gate::new()));
        let x = Node::new("x");
        children.add(vec![x.clone(), Node::new("y")]).unwrap();
        assert_eq!(names(&children), vec!["x", "y"]);
        assert!(children.remove(&[x.clone()]).unwrap());
        assert_eq!(names(&children), vec!["y"]);
        assert!(!x.is_destroyed());
    }

    #[test]
    fn test_add_switches_lazy_to_eager() {
        let children = KeyedChildren::new_lazy(named, Arc::new(Gate::new()));
        children.set_keys(vec!["a"]).unwrap();
        assert_eq!(names(&children), vec!["a"]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        children.add_listener(move |e: &ChildrenEvent| sink.lock().push(e.kind()));

        children.add(vec![Node::new("x")]).unwrap();
        assert!(!children.is_lazy());
        assert_eq!(names(&children), vec!["a", "x"]);
        assert_eq!(events.lock().first(), Some(&"removed"));
        assert!(events.lock().contains(&"added"));
    }

    #[test]
    fn test_lazy_refuses_remove() {
        let children = KeyedChildren::new_lazy(named, Arc::new(Gate::new()));
        assert!(!children.remove(&[Node::new("x")]).unwrap());
    }

    #[test]
    fn test_broken_key_contract_rejected() {
        #[derive(Debug, Clone)]
        struct Odd(u8);
        impl PartialEq for Odd {
            fn eq(&self, _other: &Self) -> bool {
                true
            }
        }
        impl Eq for Odd {}
        impl core::hash::Hash for Odd {
            fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                self.0.hash(state);
            }
        }
        let children = KeyedChildren::new(
            |_: &Odd| -> Result<Vec<Node>, NodeError> { Ok(Vec::new()) },
            Arc::new(Gate::new()),
        );
        let err = children.set_keys(vec![Odd(1), Odd(2)]).unwrap_err();
        assert!(matches!(err, ChildrenError::BrokenKeyContract { .. }));
    }

    #[test]
    fn test_only_latest_key_set_applied() {
        let gate = Arc::new(Gate::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let children = KeyedChildren::new(
            move |key: &u32| -> Result<Vec<Node>, NodeError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![Node::new(key.to_string())])
            },
            Arc::clone(&gate),
        );
        assert!(children.get_nodes(false).is_empty());
        gate.read_access(|| {
            children.set_keys(vec![1]).unwrap();
            children.set_keys(vec![2]).unwrap();
            children.set_keys(vec![3, 4]).unwrap();
        });
        let names: Vec<String> = children.get_nodes(false).iter().map(Node::name).collect();
        assert_eq!(names, vec!["3", "4"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_add_notify_sets_keys() {
        struct Folder;
        impl ChildFactory<u32> for Folder {
            fn create_nodes(&self, key: &u32) -> Result<Vec<Node>, NodeError> {
                Ok(vec![Node::new(format!("file{key}"))])
            }
            fn add_notify(&self, children: &KeyedChildren<u32>) {
                children.set_keys(vec![1, 2]).unwrap();
            }
        }
        for config in [ChildrenConfig::default(), ChildrenConfig::lazy()] {
            let children = KeyedChildren::init(config, Folder, Arc::new(Gate::new()));
            assert!(!children.is_initialized());
            let names: Vec<String> = children.get_nodes(true).iter().map(Node::name).collect();
            assert_eq!(names, vec!["file1", "file2"]);
            assert!(children.is_initialized());
        }
    }

    #[test]
    fn test_sorted_children_keep_keys_ordered() {
        for config in [ChildrenConfig::default(), ChildrenConfig::lazy()] {
            let children = KeyedChildren::init(config, named, Arc::new(Gate::new()));
            children.set_comparator(|a: &&str, b: &&str| a.cmp(b)).unwrap();
            children.set_keys(vec!["b", "c", "a"]).unwrap();
            assert_eq!(names(&children), vec!["a", "b", "c"]);
            assert_eq!(children.is_lazy(), config.lazy);
        }
    }

    #[test]
    fn test_new_comparator_fires_one_reorder() {
        let children = KeyedChildren::sorted(named, Arc::new(Gate::new()), |a: &&str, b: &&str| a.cmp(b));
        children.set_keys(vec!["b", "a", "c"]).unwrap();
        assert_eq!(names(&children), vec!["a", "b", "c"]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        children.add_listener(move |e: &ChildrenEvent| sink.lock().push(e.clone()));

        children.set_comparator(|a: &&str, b: &&str| b.cmp(a)).unwrap();
        assert_eq!(names(&children), vec!["c", "b", "a"]);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChildrenEvent::Reordered { permutation, .. } => assert_eq!(permutation, &vec![2, 1, 0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_equal_keys_keep_their_occurrence_order() {
        let children = KeyedChildren::sorted(
            |key: &(u8, &'static str)| -> Result<Vec<Node>, NodeError> { Ok(vec![Node::new(key.1)]) },
            Arc::new(Gate::new()),
            |a: &(u8, &'static str), b: &(u8, &'static str)| a.0.cmp(&b.0),
        );
        children.set_keys(vec![(2, "x"), (1, "p"), (2, "y"), (1, "q")]).unwrap();
        let names: Vec<String> = children.get_nodes(false).iter().map(Node::name).collect();
        assert_eq!(names, vec!["p", "q", "x", "y"]);
    }

    #[test]
    fn test_leaf_children_refuse_content() {
        let leaf: KeyedChildren<u32> = KeyedChildren::leaf();
        assert!(leaf.is_leaf());
        assert!(matches!(leaf.set_keys(vec![1]), Err(ChildrenError::Leaf)));
        assert!(matches!(leaf.set_comparator(|a: &u32, b: &u32| a.cmp(b)), Err(ChildrenError::Leaf)));
        assert!(!leaf.add(vec![Node::new("x")]).unwrap());
        assert!(!leaf.remove(&[]).unwrap());
        assert!(leaf.get_nodes(true).is_empty());
        assert_eq!(leaf.get_nodes_count(false), 0);
    }
}
