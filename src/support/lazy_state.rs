//! Immutable State of the Lazy Support
//!
//! The lazy support never mutates its state in place. Every change builds a
//! new [`LazyState`] from the current one and publishes it with a single
//! compare-and-swap, so readers always work on one consistent bundle:
//!
//! ```text
//!   LazyState
//!   ├─ inited / init_thread / init_in_progress / must_notify
//!   ├─ entries:  [ a      b      c      d      ]   every entry, insertion order
//!   ├─ visible:  [ a             c      d      ]   entries with a node
//!   └─ infos:    a → { index: Some(0), cell }
//!                b → { index: None,    cell }      hidden
//!                c → { index: Some(1), cell }
//!                d → { index: Some(2), cell }
//! ```
//!
//! Invariants: `entries.len() == infos.len()`, every visible entry is in
//! `entries`, and each visible entry's index is its position in `visible`.
//!
//! # Node Cells
//!
//! The [`NodeCell`] of an entry is shared by all states that contain the
//! entry, which is what lets a freshly published state keep the nodes
//! materialized under the previous one. A cell caches its node weakly; the
//! only strong references it ever holds are to dummy nodes and, until the
//! first read, to nodes materialized ahead of time by a probe.

use core::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::entry::{ChildKey, Entry};
use crate::error::ChildrenError;
use crate::node::{Node, WeakNode};
use crate::HashMap;

enum Slot {
    Empty,
    Constructing(ThreadId),
    Prefetched(Node),
    Live(WeakNode),
    Dummy(Node),
}

/// How a cell lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The cached node was still alive.
    Cached,
    /// This call ran the factory.
    Built,
    /// The calling thread is already constructing this entry.
    Reentrant,
}

/// Result of a cell lookup.
pub(crate) struct Resolved {
    pub(crate) node: Node,
    pub(crate) how: Resolution,
    pub(crate) waited: bool,
}

/// Per-entry node cache with a construction guard.
pub(crate) struct NodeCell {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl NodeCell {
    pub(crate) fn new() -> Self {
        NodeCell {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Returns the cached node or builds one with `build`.
    ///
    /// Another thread constructing the same entry is waited for. The
    /// constructing thread itself gets a fresh dummy. With `keep_strong` a
    /// built real node stays strongly cached until the next lookup.
    pub(crate) fn resolve(&self, keep_strong: bool, build: impl FnOnce() -> Node) -> Resolved {
        let me = thread::current().id();
        let mut waited = false;
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Live(weak) => match weak.upgrade() {
                    Some(node) => {
                        return Resolved {
                            node,
                            how: Resolution::Cached,
                            waited,
                        }
                    }
                    None => break,
                },
                Slot::Prefetched(node) => {
                    let node = node.clone();
                    *slot = Slot::Live(node.downgrade());
                    return Resolved {
                        node,
                        how: Resolution::Cached,
                        waited,
                    };
                }
                Slot::Dummy(node) => {
                    return Resolved {
                        node: node.clone(),
                        how: Resolution::Cached,
                        waited,
                    }
                }
                Slot::Constructing(owner) if *owner == me => {
                    return Resolved {
                        node: Node::dummy(),
                        how: Resolution::Reentrant,
                        waited,
                    }
                }
                Slot::Constructing(_) => {
                    waited = true;
                    self.ready.wait(&mut slot);
                }
                Slot::Empty => break,
            }
        }
        *slot = Slot::Constructing(me);
        drop(slot);

        let node = build();

        let mut slot = self.slot.lock();
        *slot = if node.is_dummy() {
            Slot::Dummy(node.clone())
        } else if keep_strong {
            Slot::Prefetched(node.clone())
        } else {
            Slot::Live(node.downgrade())
        };
        drop(slot);
        self.ready.notify_all();
        Resolved {
            node,
            how: Resolution::Built,
            waited,
        }
    }

    /// The node currently cached, without building one.
    pub(crate) fn current(&self) -> Option<Node> {
        match &*self.slot.lock() {
            Slot::Live(weak) => weak.upgrade(),
            Slot::Prefetched(node) | Slot::Dummy(node) => Some(node.clone()),
            Slot::Empty | Slot::Constructing(_) => None,
        }
    }

    /// Whether the cell settled on "no node".
    pub(crate) fn is_dummy(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Dummy(_))
    }

    /// Drops a strongly held prefetched node, keeping it cached weakly.
    pub(crate) fn release(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Prefetched(node) => {
                    let weak = node.downgrade();
                    Some(std::mem::replace(&mut *slot, Slot::Live(weak)))
                }
                _ => None,
            }
        };
        drop(previous);
    }
}

impl fmt::Debug for NodeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.lock() {
            Slot::Empty => f.write_str("empty"),
            Slot::Constructing(thread) => write!(f, "constructing on {thread:?}"),
            Slot::Prefetched(node) => write!(f, "prefetched {node:?}"),
            Slot::Live(weak) => write!(f, "{weak:?}"),
            Slot::Dummy(_) => f.write_str("dummy"),
        }
    }
}

/// Bookkeeping of one entry inside a [`LazyState`].
#[derive(Clone)]
pub(crate) struct EntryInfo {
    /// Position in the visible ordering; `None` while hidden.
    pub(crate) index: Option<usize>,
    pub(crate) cell: Arc<NodeCell>,
}

impl EntryInfo {
    pub(crate) fn new() -> Self {
        EntryInfo {
            index: Some(0),
            cell: Arc::new(NodeCell::new()),
        }
    }

    pub(crate) fn with_cell(cell: Arc<NodeCell>, hidden: bool) -> Self {
        EntryInfo {
            index: if hidden { None } else { Some(0) },
            cell,
        }
    }

    #[inline]
    pub(crate) fn is_hidden(&self) -> bool {
        self.index.is_none()
    }

    pub(crate) fn hidden(&self) -> Self {
        EntryInfo {
            index: None,
            cell: Arc::clone(&self.cell),
        }
    }
}

impl fmt::Debug for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "#{index} {:?}", self.cell),
            None => write!(f, "hidden {:?}", self.cell),
        }
    }
}

/// One consistent state of the lazy support.
#[derive(Clone)]
pub(crate) struct LazyState<K> {
    pub(crate) inited: bool,
    pub(crate) init_thread: Option<ThreadId>,
    pub(crate) init_in_progress: bool,
    pub(crate) must_notify: bool,
    pub(crate) entries: Vec<Entry<K>>,
    pub(crate) visible: Vec<Entry<K>>,
    pub(crate) infos: HashMap<Entry<K>, EntryInfo>,
}

impl<K: ChildKey> LazyState<K> {
    pub(crate) fn empty() -> Self {
        LazyState {
            inited: false,
            init_thread: None,
            init_in_progress: false,
            must_notify: false,
            entries: Vec::new(),
            visible: Vec::new(),
            infos: HashMap::new(),
        }
    }

    /// Copy of this state with different initialization flags.
    pub(crate) fn with_init(
        &self,
        inited: bool,
        init_thread: Option<ThreadId>,
        init_in_progress: bool,
        must_notify: bool,
    ) -> Self {
        LazyState {
            inited,
            init_thread,
            init_in_progress,
            must_notify,
            ..self.clone()
        }
    }

    /// Copy of this state with a new entry list and info map. Visible
    /// entries and indices are recomputed.
    pub(crate) fn with_entries(
        &self,
        entries: Vec<Entry<K>>,
        infos: HashMap<Entry<K>, EntryInfo>,
    ) -> Self {
        let mut next = LazyState {
            inited: self.inited,
            init_thread: self.init_thread,
            init_in_progress: self.init_in_progress,
            must_notify: self.must_notify,
            entries,
            visible: Vec::new(),
            infos,
        };
        next.reindex();
        next
    }

    /// Renumbers the visible entries in entry order.
    fn reindex(&mut self) {
        let mut visible = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if let Some(info) = self.infos.get_mut(entry) {
                if info.index.is_some() {
                    info.index = Some(visible.len());
                    visible.push(entry.clone());
                }
            }
        }
        self.visible = visible;
    }

    #[inline]
    pub(crate) fn visible_len(&self) -> usize {
        self.visible.len()
    }

    pub(crate) fn info(&self, entry: &Entry<K>) -> Option<&EntryInfo> {
        self.infos.get(entry)
    }

    /// The visible entry at `index` together with its info.
    pub(crate) fn visible_at(&self, index: usize) -> Option<(&Entry<K>, &EntryInfo)> {
        let entry = self.visible.get(index)?;
        self.infos.get(entry).map(|info| (entry, info))
    }

    /// Fails when the entry list and the info map disagree in size.
    pub(crate) fn check_consistency(&self, trigger: Option<&Entry<K>>) -> Result<(), ChildrenError> {
        if self.entries.len() == self.infos.len() {
            return Ok(());
        }
        let mut info_dump = String::new();
        for (entry, info) in &self.infos {
            info_dump.push_str(&format!("\n  {entry:?} => {info:?}"));
        }
        Err(ChildrenError::InconsistentEntries {
            entries: self.entries.len(),
            infos: self.infos.len(),
            trigger: trigger.map(|e| format!("{e:?}")),
            entry_dump: format!("{:?}", self.entries),
            info_dump,
        })
    }
}

impl<K: fmt::Debug> fmt::Debug for LazyState<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyState")
            .field("inited", &self.inited)
            .field("init_in_progress", &self.init_in_progress)
            .field("must_notify", &self.must_notify)
            .field("entries", &self.entries)
            .field("visible", &self.visible)
            .finish()
    }
}
