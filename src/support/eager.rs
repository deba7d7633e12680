//! Eager Support
//!
//! Materializes every entry the first time any node is read and keeps the
//! result in one [`ChildrenArray`]. A key-set change is applied as three
//! in-place steps, each followed by its own event:
//!
//! ```text
//!   old: [ a  b  c  d ]      new: [ d  b  e ]
//!
//!   1. remove   [ a  b  c  d ] ─▶ [ b  d ]        Removed  { indices: [0, 2] }
//!   2. reorder  [ b  d ]       ─▶ [ d  b ]        Reordered{ permutation: [1, 0] }
//!   3. add      [ d  b ]       ─▶ [ d  b  e ]     Added    { indices: [2] }
//! ```
//!
//! Before the first read the support only records the entry list; nothing is
//! materialized and no event fires.
//!
//! # Initialization
//!
//! The first read calls the owner's `add_notify` and then builds the array,
//! exactly once and on exactly one thread. Concurrent readers wait on a
//! condition variable unless they are inside gate access themselves, in which
//! case they get the uninitialized (empty) answer instead of risking a
//! deadlock. The initializing thread re-entering a read also gets the empty
//! answer.
//!
//! # Retention
//!
//! With `retain_array` set, the support holds a [`LiveToken`] on its own
//! state. Otherwise only snapshots keep it alive; when the last one is
//! dropped the array is torn down and `remove_notify` runs.

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::children_array::ChildrenArray;
use super::{
    fire_added, fire_removed, fire_reordered, materialize, release_nodes, EntrySupport,
    SupportHost,
};
use crate::config::EagerSupportConfig;
use crate::entry::{ChildKey, Entry};
use crate::error::ChildrenError;
use crate::event::NodeSnapshot;
use crate::gate::Gate;
use crate::lifecycle::{Lifecycle, LiveToken};
use crate::metrics::{bump, EagerSupportMetrics, SupportMetrics};
use crate::node::Node;
use crate::permutation::{compute_permutation, normalize_moves};
use crate::HashSet;

struct EagerState<K> {
    entries: Vec<Entry<K>>,
    array: Option<ChildrenArray<K>>,
}

pub(crate) struct EagerSupport<K> {
    host: Weak<dyn SupportHost<K>>,
    gate: Arc<Gate>,
    state: Mutex<EagerState<K>>,
    inited: AtomicBool,
    init_thread: Mutex<Option<ThreadId>>,
    init_done: Condvar,
    lifecycle: Lifecycle,
    retain: AtomicBool,
    retained: Mutex<Option<LiveToken>>,
    retired: AtomicBool,
    metrics: EagerSupportMetrics,
}

impl<K: ChildKey> EagerSupport<K> {
    pub(crate) fn new(
        host: Weak<dyn SupportHost<K>>,
        gate: Arc<Gate>,
        config: EagerSupportConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            EagerSupport {
                host,
                gate,
                state: Mutex::new(EagerState {
                    entries: Vec::new(),
                    array: None,
                }),
                inited: AtomicBool::new(false),
                init_thread: Mutex::new(None),
                init_done: Condvar::new(),
                lifecycle: Lifecycle::new(move |generation| {
                    if let Some(support) = this.upgrade() {
                        support.schedule_teardown(generation);
                    }
                }),
                retain: AtomicBool::new(config.retain_array),
                retained: Mutex::new(None),
                retired: AtomicBool::new(false),
                metrics: EagerSupportMetrics::default(),
            }
        })
    }

    /// Makes sure the array exists. Returns `false` when this thread has to
    /// make do with the uninitialized state.
    fn check_init(&self) -> bool {
        if self.inited.load(Ordering::Acquire) {
            return true;
        }
        let me = thread::current().id();
        {
            let mut init_thread = self.init_thread.lock();
            loop {
                if self.inited.load(Ordering::Acquire) {
                    return true;
                }
                match *init_thread {
                    None => {
                        *init_thread = Some(me);
                        break;
                    }
                    Some(owner) if owner == me => {
                        bump(&self.metrics.stale_reads);
                        return false;
                    }
                    Some(_) => {
                        if self.gate.is_read_access() {
                            bump(&self.metrics.stale_reads);
                            return false;
                        }
                        bump(&self.metrics.init_waits);
                        self.init_done.wait(&mut init_thread);
                    }
                }
            }
        }

        let Some(host) = self.host.upgrade() else {
            *self.init_thread.lock() = None;
            self.init_done.notify_all();
            return false;
        };
        debug!(children = ?host.children_id(), "initializing eager support");
        host.add_notify();

        // held before waiters can see the array, their dropped snapshots must not idle it
        self.hold_before_publish();
        self.gate.read_access(|| {
            let entries = self.state.lock().entries.clone();
            let mut array = ChildrenArray::from_entries(&entries);
            for entry in &entries {
                let nodes = materialize(&*host, entry, None, &self.metrics.core);
                array.set_nodes(entry, nodes);
            }
            {
                let mut state = self.state.lock();
                state.entries = entries;
                state.array = Some(array);
                // visible to write tasks drained when this read section ends
                self.inited.store(true, Ordering::Release);
            }
            *self.init_thread.lock() = None;
            self.init_done.notify_all();
        });

        bump(&self.metrics.core.initializations);
        true
    }

    fn hold_before_publish(&self) {
        if self.retain.load(Ordering::Acquire) {
            let mut retained = self.retained.lock();
            if retained.is_none() {
                *retained = Some(self.lifecycle.acquire());
            }
        }
    }

    fn hold_self(&self) {
        let mut retained = self.retained.lock();
        if retained.is_none() && self.inited.load(Ordering::Acquire) {
            *retained = Some(self.lifecycle.acquire());
        }
    }

    /// Current flattened array, empty before initialization.
    fn current_nodes(&self) -> Arc<[Node]> {
        let Some(host) = self.host.upgrade() else {
            return Arc::from(Vec::new());
        };
        let mut state = self.state.lock();
        let EagerState { entries, array } = &mut *state;
        match array.as_mut() {
            Some(array) => {
                let (nodes, rebuilt) = array.nodes(entries, host.children_id());
                if rebuilt {
                    bump(&self.metrics.array_rebuilds);
                }
                nodes
            }
            None => Arc::from(Vec::new()),
        }
    }

    fn update_remove(
        &self,
        host: &dyn SupportHost<K>,
        keep: &HashSet<Entry<K>>,
    ) -> Result<(), ChildrenError> {
        let owner = host.children_id();
        let (indices, removed, before, after) = {
            let mut state = self.state.lock();
            let EagerState { entries, array } = &mut *state;
            let Some(array) = array.as_mut() else {
                return Ok(());
            };
            let (before, _) = array.nodes(entries, owner);
            let mut indices = Vec::new();
            let mut removed = Vec::new();
            let mut offset = 0;
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                let len = array.len_of(&entry);
                if keep.contains(&entry) {
                    kept.push(entry);
                } else {
                    indices.extend(offset..offset + len);
                    if let Some(info) = array.remove(&entry) {
                        removed.push((entry, info.nodes.unwrap_or_default()));
                    }
                }
                offset += len;
            }
            *entries = kept;
            if removed.is_empty() {
                return Ok(());
            }
            array.check_consistency(entries, None)?;
            let (after, _) = array.nodes(entries, owner);
            (indices, removed, before, after)
        };

        trace!(children = ?owner, removed = removed.len(), "entries removed");
        fire_removed(
            host,
            &self.metrics.core,
            indices,
            NodeSnapshot::from_nodes(before),
            NodeSnapshot::from_nodes(after),
        );
        for (entry, nodes) in &removed {
            release_nodes(host, entry, nodes);
        }
        Ok(())
    }

    fn update_order(
        &self,
        host: &dyn SupportHost<K>,
        new_entries: &[Entry<K>],
    ) -> Result<(), ChildrenError> {
        let owner = host.children_id();
        let (permutation, after) = {
            let mut state = self.state.lock();
            let EagerState { entries, array } = &mut *state;
            let Some(array) = array.as_mut() else {
                return Ok(());
            };
            let reordered: Vec<Entry<K>> = new_entries
                .iter()
                .filter(|e| array.contains(e))
                .cloned()
                .collect();
            if reordered.len() != entries.len() {
                return Err(array.inconsistency(entries, None));
            }

            let old_offsets = array.offsets(entries);
            // 0 = unchanged, otherwise new position + 1
            let mut moves = vec![0usize; array.node_count(entries)];
            let mut offset = 0;
            for entry in &reordered {
                let len = array.len_of(entry);
                let previous = old_offsets.get(entry).copied().unwrap_or(offset);
                if previous != offset {
                    for i in 0..len {
                        moves[previous + i] = offset + i + 1;
                    }
                }
                offset += len;
            }
            *entries = reordered;

            match normalize_moves(moves) {
                None => return Ok(()),
                Some(permutation) => {
                    array.invalidate();
                    let (after, _) = array.nodes(entries, owner);
                    (permutation, after)
                }
            }
        };

        fire_reordered(
            host,
            &self.metrics.core,
            permutation,
            NodeSnapshot::from_nodes(after),
        );
        Ok(())
    }

    fn update_add(
        &self,
        host: &dyn SupportHost<K>,
        new_entries: Vec<Entry<K>>,
    ) -> Result<(), ChildrenError> {
        let owner = host.children_id();
        let (added, before) = {
            let mut state = self.state.lock();
            let EagerState { entries, array } = &mut *state;
            let Some(array) = array.as_mut() else {
                return Ok(());
            };
            let (before, _) = array.nodes(entries, owner);
            let added: Vec<Entry<K>> = new_entries
                .iter()
                .filter(|e| !array.contains(e))
                .cloned()
                .collect();
            for entry in &added {
                array.insert_pending(entry.clone());
            }
            *entries = new_entries;
            array.check_consistency(entries, added.first())?;
            (added, before)
        };
        if added.is_empty() {
            return Ok(());
        }

        let built: Vec<(Entry<K>, Vec<Node>)> = added
            .into_iter()
            .map(|entry| {
                let nodes = materialize(host, &entry, None, &self.metrics.core);
                (entry, nodes)
            })
            .collect();

        let (indices, after) = {
            let mut state = self.state.lock();
            let EagerState { entries, array } = &mut *state;
            let Some(array) = array.as_mut() else {
                return Ok(());
            };
            let fresh: HashSet<Entry<K>> = built.iter().map(|(e, _)| e.clone()).collect();
            for (entry, nodes) in built {
                array.set_nodes(&entry, nodes);
            }
            let indices = array.indices_of(entries, |e| fresh.contains(e));
            let (after, _) = array.nodes(entries, owner);
            (indices, after)
        };

        fire_added(
            host,
            &self.metrics.core,
            indices,
            Some(NodeSnapshot::from_nodes(before)),
            NodeSnapshot::from_nodes(after),
        );
        Ok(())
    }

    fn schedule_teardown(self: Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(&self);
        let posted = self.gate.post_write(Box::new(move || {
            if let Some(support) = weak.upgrade() {
                support.teardown(generation);
            }
        }));
        if let Err(err) = posted {
            warn!(error = %err, "cannot schedule teardown of eager support");
        }
    }

    fn teardown(&self, generation: u64) {
        if self.retired.load(Ordering::Acquire) || !self.lifecycle.is_idle(generation) {
            trace!(generation, "stale teardown ignored");
            return;
        }
        let array = {
            let mut state = self.state.lock();
            let array = state.array.take();
            self.inited.store(false, Ordering::Release);
            array
        };
        let Some(array) = array else {
            return;
        };
        self.lifecycle.advance();
        bump(&self.metrics.core.teardowns);

        let Some(host) = self.host.upgrade() else {
            return;
        };
        debug!(children = ?host.children_id(), generation, "tearing down eager support");
        let owner = host.children_id();
        for node in array.all_nodes() {
            node.deassign_from(owner);
        }
        host.remove_notify();
    }
}

impl<K: ChildKey> EntrySupport<K> for EagerSupport<K> {
    fn is_lazy(&self) -> bool {
        false
    }

    fn is_initialized(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    fn entries(&self) -> Vec<Entry<K>> {
        self.state.lock().entries.clone()
    }

    fn set_entries(&self, new_entries: Vec<Entry<K>>) -> Result<(), ChildrenError> {
        bump(&self.metrics.core.set_entries_calls);
        let Some(host) = self.host.upgrade() else {
            return Ok(());
        };
        {
            let mut state = self.state.lock();
            if state.array.is_none() {
                trace!(entries = new_entries.len(), "recording entries before initialization");
                state.entries = new_entries;
                return Ok(());
            }
        }

        let keep: HashSet<Entry<K>> = new_entries.iter().cloned().collect();
        self.update_remove(&*host, &keep)?;
        self.update_order(&*host, &new_entries)?;
        self.update_add(&*host, new_entries)
    }

    fn refresh_entry(&self, entry: &Entry<K>) -> Result<(), ChildrenError> {
        let Some(host) = self.host.upgrade() else {
            return Ok(());
        };
        let host = &*host;
        let owner = host.children_id();
        let old_nodes = {
            let state = self.state.lock();
            match &state.array {
                Some(array) if array.contains(entry) => array.nodes_of(entry),
                _ => return Ok(()),
            }
        };
        bump(&self.metrics.core.refreshes);
        let new_nodes = materialize(host, entry, None, &self.metrics.core);
        let fresh: HashSet<&Node> = new_nodes.iter().collect();

        // 1. nodes that are gone
        let (kept, gone): (Vec<(usize, &Node)>, Vec<(usize, &Node)>) = old_nodes
            .iter()
            .enumerate()
            .partition(|(_, n)| fresh.contains(n));
        let kept: Vec<Node> = kept.into_iter().map(|(_, n)| n.clone()).collect();
        if !gone.is_empty() {
            let (indices, before, after) = {
                let mut state = self.state.lock();
                let EagerState { entries, array } = &mut *state;
                let Some(array) = array.as_mut() else {
                    return Ok(());
                };
                let start = array.offset_of(entries, entry).unwrap_or(0);
                let (before, _) = array.nodes(entries, owner);
                array.set_nodes(entry, kept.clone());
                let (after, _) = array.nodes(entries, owner);
                let indices: Vec<usize> = gone.iter().map(|(i, _)| start + i).collect();
                (indices, before, after)
            };
            fire_removed(
                host,
                &self.metrics.core,
                indices,
                NodeSnapshot::from_nodes(before),
                NodeSnapshot::from_nodes(after),
            );
            let gone: Vec<Node> = gone.into_iter().map(|(_, n)| n.clone()).collect();
            release_nodes(host, entry, &gone);
        }

        // 2. surviving nodes in their new order
        let kept_set: HashSet<&Node> = kept.iter().collect();
        let kept_reordered: Vec<Node> = new_nodes
            .iter()
            .filter(|n| kept_set.contains(n))
            .cloned()
            .collect();
        if let Some(local) = compute_permutation(&kept, &kept_reordered)? {
            let (permutation, after) = {
                let mut state = self.state.lock();
                let EagerState { entries, array } = &mut *state;
                let Some(array) = array.as_mut() else {
                    return Ok(());
                };
                let start = array.offset_of(entries, entry).unwrap_or(0);
                let total = array.node_count(entries);
                let mut permutation: Vec<usize> = (0..total).collect();
                for (i, target) in local.iter().enumerate() {
                    permutation[start + i] = start + target;
                }
                array.set_nodes(entry, kept_reordered.clone());
                let (after, _) = array.nodes(entries, owner);
                (permutation, after)
            };
            fire_reordered(
                host,
                &self.metrics.core,
                permutation,
                NodeSnapshot::from_nodes(after),
            );
        }

        // 3. brand new nodes
        let known: HashSet<&Node> = old_nodes.iter().collect();
        let added: Vec<usize> = new_nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !known.contains(n))
            .map(|(i, _)| i)
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        let (indices, before, after) = {
            let mut state = self.state.lock();
            let EagerState { entries, array } = &mut *state;
            let Some(array) = array.as_mut() else {
                return Ok(());
            };
            let start = array.offset_of(entries, entry).unwrap_or(0);
            let (before, _) = array.nodes(entries, owner);
            array.set_nodes(entry, new_nodes.clone());
            let (after, _) = array.nodes(entries, owner);
            let indices: Vec<usize> = added.iter().map(|i| start + i).collect();
            (indices, before, after)
        };
        fire_added(
            host,
            &self.metrics.core,
            indices,
            Some(NodeSnapshot::from_nodes(before)),
            NodeSnapshot::from_nodes(after),
        );
        Ok(())
    }

    fn get_nodes(&self, optimal: bool) -> Vec<Node> {
        if !self.check_init() {
            return Vec::new();
        }
        if optimal && !self.gate.is_read_access() {
            self.gate.flush();
        }
        self.gate.read_access(|| self.current_nodes().to_vec())
    }

    fn get_node_at(&self, index: usize) -> Option<Node> {
        if !self.check_init() {
            return None;
        }
        self.gate
            .read_access(|| self.current_nodes().get(index).cloned())
    }

    fn get_nodes_count(&self, optimal: bool) -> usize {
        if !self.check_init() {
            return 0;
        }
        if optimal && !self.gate.is_read_access() {
            self.gate.flush();
        }
        self.gate.read_access(|| self.current_nodes().len())
    }

    fn snapshot(&self) -> NodeSnapshot {
        let token = self.lifecycle.acquire();
        if !self.check_init() {
            return NodeSnapshot::empty().keeping_alive(token);
        }
        let nodes = self.gate.read_access(|| self.current_nodes());
        NodeSnapshot::from_nodes(nodes).keeping_alive(token)
    }

    fn mark_initialized(&self) {
        {
            let mut state = self.state.lock();
            if state.array.is_some() {
                return;
            }
            state.entries.clear();
            state.array = Some(ChildrenArray::from_entries(&[]));
            self.hold_before_publish();
            self.inited.store(true, Ordering::Release);
        }
        bump(&self.metrics.core.initializations);
    }

    fn set_retained(&self, retained: bool) {
        self.retain.store(retained, Ordering::Release);
        if retained {
            self.hold_self();
        } else {
            let token = self.retained.lock().take();
            drop(token);
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        let token = self.retained.lock().take();
        drop(token);
    }

    fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.metrics()
    }

    fn support_name(&self) -> &'static str {
        self.metrics.support_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChildrenEvent;
    use crate::support::test_host::{entries, names, TestHost};

    fn eager(host: &Arc<TestHost>, retain: bool) -> Arc<EagerSupport<&'static str>> {
        let weak = Arc::downgrade(host);
        let weak: Weak<dyn SupportHost<&'static str>> = weak;
        EagerSupport::new(
            weak,
            Arc::new(Gate::new()),
            EagerSupportConfig {
                retain_array: retain,
            },
        )
    }

    fn apply(support: &Arc<EagerSupport<&'static str>>, keys: &[&'static str]) {
        let s = Arc::clone(support);
        let list = entries(keys);
        support
            .gate
            .write_access(move || s.set_entries(list))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_entries_recorded_before_init() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "b"]);
        assert!(!support.is_initialized());
        assert!(host.calls.lock().is_empty());
        assert!(host.take_events().is_empty());

        assert_eq!(names(&support.get_nodes(false)), vec!["a", "b"]);
        assert!(support.is_initialized());
        assert_eq!(host.add_notifies.load(Ordering::SeqCst), 1);
        assert!(host.take_events().is_empty());
    }

    #[test]
    fn test_remove_reorder_add_sequence() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "b", "c", "d"]);
        support.get_nodes(false);

        apply(&support, &["d", "b", "e"]);
        let events = host.take_events();
        assert_eq!(events.len(), 3);
        match &events[0] {
            ChildrenEvent::Removed { indices, before, after } => {
                assert_eq!(indices, &vec![0, 2]);
                assert_eq!(before.as_ref().map(|b| b.len()), Some(4));
                assert_eq!(after.names(), vec!["b", "d"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            ChildrenEvent::Reordered { permutation, after } => {
                assert_eq!(permutation, &vec![1, 0]);
                assert_eq!(after.names(), vec!["d", "b"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[2] {
            ChildrenEvent::Added { indices, after, .. } => {
                assert_eq!(indices, &vec![2]);
                assert_eq!(after.names(), vec!["d", "b", "e"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(names(&support.get_nodes(false)), vec!["d", "b", "e"]);
        assert_eq!(names(&host.destroyed.lock()), vec!["a", "c"]);
    }

    #[test]
    fn test_same_entries_fire_nothing() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "b"]);
        support.get_nodes(false);
        apply(&support, &["a", "b"]);
        assert!(host.take_events().is_empty());
        assert_eq!(host.calls_for("a"), 1);
    }

    #[test]
    fn test_entries_without_nodes_take_no_positions() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "-x", "b"]);
        assert_eq!(names(&support.get_nodes(false)), vec!["a", "b"]);

        apply(&support, &["b", "-x", "a"]);
        let events = host.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChildrenEvent::Reordered { permutation, .. } if permutation == &vec![1, 0]));
    }

    #[test]
    fn test_failed_factory_counts_as_no_nodes() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "!broken"]);
        assert_eq!(names(&support.get_nodes(false)), vec!["a"]);
        assert_eq!(support.metrics()["materialize_failures"], 1.0);
    }

    #[test]
    fn test_refresh_replaces_changed_nodes() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a", "b", "c"]);
        let first = support.get_nodes(false);
        host.take_events();

        host.set_produce(|key| Some(vec![Node::new(format!("{key}'"))]));
        let s = Arc::clone(&support);
        let entry = entries(&["b"]).remove(0);
        support
            .gate
            .write_access(move || s.refresh_entry(&entry))
            .unwrap()
            .unwrap();

        let events = host.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChildrenEvent::Removed { indices, .. } if indices == &vec![1]));
        assert!(matches!(&events[1], ChildrenEvent::Added { indices, .. } if indices == &vec![1]));
        let now = support.get_nodes(false);
        assert_eq!(names(&now), vec!["a", "b'", "c"]);
        assert_eq!(now[0], first[0]);
        assert!(host.destroyed.lock()[0].ptr_eq(&first[1]));
    }

    #[test]
    fn test_refresh_with_identical_nodes_is_silent() {
        let host = TestHost::new();
        let shared = Node::new("same");
        let produced = shared.clone();
        host.set_produce(move |_| Some(vec![produced.clone()]));
        let support = eager(&host, true);
        apply(&support, &["k"]);
        support.get_nodes(false);

        let s = Arc::clone(&support);
        let entry = entries(&["k"]).remove(0);
        support
            .gate
            .write_access(move || s.refresh_entry(&entry))
            .unwrap()
            .unwrap();
        assert!(host.take_events().is_empty());
        assert_eq!(support.get_nodes(false), vec![shared]);
    }

    #[test]
    fn test_released_array_torn_down_with_last_snapshot() {
        let host = TestHost::new();
        let support = eager(&host, false);
        apply(&support, &["a"]);
        let snapshot = support.snapshot();
        assert_eq!(snapshot.names(), vec!["a"]);
        assert!(support.is_initialized());

        drop(snapshot);
        assert!(!support.is_initialized());
        assert_eq!(host.remove_notifies.load(Ordering::SeqCst), 1);
        assert_eq!(support.entries().len(), 1);

        assert_eq!(names(&support.get_nodes(false)), vec!["a"]);
        assert_eq!(host.add_notifies.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retained_array_survives_snapshots() {
        let host = TestHost::new();
        let support = eager(&host, true);
        apply(&support, &["a"]);
        drop(support.snapshot());
        assert!(support.is_initialized());

        support.set_retained(false);
        assert!(!support.is_initialized());
        assert_eq!(host.remove_notifies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_entries_after_broken_contract_are_reported() {
        let host = TestHost::new();
        let support = eager(&host, true);
        support.get_nodes(false);
        let s = Arc::clone(&support);
        let dup = entries(&["a"]);
        let list = vec![dup[0].clone(), dup[0].clone()];
        let result = support.gate.write_access(move || s.set_entries(list)).unwrap();
        assert!(matches!(result, Err(ChildrenError::InconsistentEntries { .. })));
    }
}
