//! Lazy Support
//!
//! Materializes a node only when its position is read. All state lives in an
//! immutable [`LazyState`] published through an [`ArcSwap`]; every change is
//! computed from the currently published state and swapped in with a single
//! compare-and-swap, restarting from the fresh state if another change won
//! the race.
//!
//! ```text
//!            load_full()                      compare_and_swap(&current, next)
//!   ArcSwap ───────────▶ current ──build──▶ next ─────────────────────────────▶ ArcSwap
//!      ▲                                                  │ lost the race
//!      └──────────────────────── retry ◀──────────────────┘
//! ```
//!
//! # Entries Without Nodes
//!
//! An entry whose factory call produced nothing caches a dummy node and is
//! *hidden*: it stays in the entry list but leaves the visible ordering. New
//! entries are probed right away when a change introduces at most
//! `prefetch_limit` of them, so they are hidden before the "added" event is
//! built. Everything else is discovered on read; the reader then posts a
//! write task that hides the entry and fires a "removed" event for it.
//!
//! # Weak Caching
//!
//! Cells hold their nodes weakly. A node dropped by every consumer is simply
//! rebuilt on the next read. Each real node carries a [`LiveToken`]; together
//! with the tokens of snapshots and the support's own token (when retaining)
//! they decide when the whole state is torn down.

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::lazy_state::{EntryInfo, LazyState, NodeCell, Resolution};
use super::{
    fire_added, fire_removed, fire_reordered, materialize, release_nodes, EntrySupport,
    SupportHost,
};
use crate::config::LazySupportConfig;
use crate::entry::{ChildKey, Entry};
use crate::error::ChildrenError;
use crate::event::{NodeSnapshot, SnapshotView};
use crate::gate::Gate;
use crate::lifecycle::{Lifecycle, LiveToken};
use crate::metrics::{add, bump, LazySupportMetrics, SupportMetrics};
use crate::node::Node;
use crate::permutation::compute_permutation;
use crate::{HashMap, HashSet};

pub(crate) struct LazySupport<K> {
    this: Weak<LazySupport<K>>,
    host: Weak<dyn SupportHost<K>>,
    gate: Arc<Gate>,
    state: ArcSwap<LazyState<K>>,
    init_lock: Mutex<()>,
    init_done: Condvar,
    lifecycle: Lifecycle,
    prefetch_limit: usize,
    retain: AtomicBool,
    retained: Mutex<Option<LiveToken>>,
    retired: AtomicBool,
    metrics: LazySupportMetrics,
}

/// Outcome of diffing the published state against a new entry list.
struct Plan<K> {
    removed: Vec<usize>,
    dropped: Vec<(Entry<K>, Arc<NodeCell>)>,
    after_remove: LazyState<K>,
    permutation: Option<Vec<usize>>,
    after_reorder: LazyState<K>,
    added: Vec<usize>,
    next: LazyState<K>,
}

/// Snapshot over one published state.
struct LazyView<K> {
    state: Arc<LazyState<K>>,
    support: Weak<LazySupport<K>>,
}

impl<K: ChildKey> SnapshotView for LazyView<K> {
    fn len(&self) -> usize {
        self.state.visible_len()
    }

    fn node_at(&self, index: usize) -> Option<Node> {
        let support = self.support.upgrade()?;
        let (entry, info) = self.state.visible_at(index)?;
        Some(support.node_for(entry, info, false))
    }
}

impl<K: ChildKey> LazySupport<K> {
    pub(crate) fn new(
        host: Weak<dyn SupportHost<K>>,
        gate: Arc<Gate>,
        config: LazySupportConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let teardown = this.clone();
            LazySupport {
                this: this.clone(),
                host,
                gate,
                state: ArcSwap::from_pointee(LazyState::empty()),
                init_lock: Mutex::new(()),
                init_done: Condvar::new(),
                lifecycle: Lifecycle::new(move |generation| {
                    if let Some(support) = teardown.upgrade() {
                        support.schedule_teardown(generation);
                    }
                }),
                prefetch_limit: config.prefetch_limit,
                retain: AtomicBool::new(config.retain_state),
                retained: Mutex::new(None),
                retired: AtomicBool::new(false),
                metrics: LazySupportMetrics::default(),
            }
        })
    }

    /// Publishes `next` if `current` is still the published state.
    fn try_publish(
        &self,
        current: &Arc<LazyState<K>>,
        next: LazyState<K>,
    ) -> Option<Arc<LazyState<K>>> {
        let next = Arc::new(next);
        let previous = self.state.compare_and_swap(current, Arc::clone(&next));
        if Arc::ptr_eq(&previous, current) {
            Some(next)
        } else {
            bump(&self.metrics.cas_retries);
            None
        }
    }

    fn view(&self, state: Arc<LazyState<K>>) -> NodeSnapshot {
        NodeSnapshot::lazy(Arc::new(LazyView {
            state,
            support: self.this.clone(),
        }))
    }

    /// Runs the factory for `entry` and turns the result into one node.
    fn build(&self, entry: &Entry<K>, index: Option<usize>) -> Node {
        let Some(host) = self.host.upgrade() else {
            return Node::dummy();
        };
        let mut nodes = materialize(&*host, entry, index, &self.metrics.core);
        if nodes.len() > 1 {
            warn!(
                ?entry,
                count = nodes.len(),
                "lazy children show only the first node of an entry"
            );
            let owner = host.children_id();
            for extra in &nodes[1..] {
                extra.deassign_from(owner);
            }
            nodes.truncate(1);
        }
        match nodes.pop() {
            Some(node) => {
                node.keep_alive(Box::new(self.lifecycle.acquire()));
                node
            }
            None => Node::dummy(),
        }
    }

    /// Node of a visible or hidden entry, materializing it if needed.
    fn node_for(&self, entry: &Entry<K>, info: &EntryInfo, keep_strong: bool) -> Node {
        let resolved = info
            .cell
            .resolve(keep_strong, || self.build(entry, info.index));
        if resolved.waited {
            bump(&self.metrics.construction_waits);
        }
        if resolved.how == Resolution::Reentrant {
            bump(&self.metrics.reentrant_dummies);
            trace!(?entry, "re-entrant construction answered with a dummy");
        }
        resolved.node
    }

    /// Makes sure the state is initialized. Returns `false` when this thread
    /// has to make do with the uninitialized state.
    fn check_init(&self) -> bool {
        let me = thread::current().id();
        loop {
            let current = self.state.load_full();
            if current.inited {
                return true;
            }
            if current.init_in_progress {
                if current.init_thread == Some(me) || self.gate.is_read_access() {
                    return false;
                }
                let mut guard = self.init_lock.lock();
                let again = self.state.load();
                if again.init_in_progress && !again.inited {
                    bump(&self.metrics.construction_waits);
                    self.init_done.wait(&mut guard);
                }
                continue;
            }
            let claimed = current.with_init(false, Some(me), true, current.must_notify);
            if self.try_publish(&current, claimed).is_some() {
                break;
            }
        }

        if let Some(host) = self.host.upgrade() {
            debug!(children = ?host.children_id(), "initializing lazy support");
            host.add_notify();
        }

        // held before waiters can see the state, their dropped nodes must not idle it
        self.hold_before_publish();
        loop {
            let current = self.state.load_full();
            let done = current.with_init(true, None, false, false);
            if self.try_publish(&current, done).is_some() {
                break;
            }
        }
        {
            let _guard = self.init_lock.lock();
            self.init_done.notify_all();
        }
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
        if retained.is_none() && self.state.load().inited {
            *retained = Some(self.lifecycle.acquire());
        }
    }

    /// Queues hiding of entries found to have no node. Returns `true` when
    /// the task has run and the caller should read again.
    fn hide_empty(&self, entries: Vec<Entry<K>>) -> bool {
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        let in_access = self.gate.is_read_access();
        let posted = self
            .gate
            .post_write(Box::new(move || this.hide_dummies(&entries)));
        if let Err(err) = posted {
            warn!(error = %err, "cannot hide entries without nodes");
            return false;
        }
        if in_access {
            return false;
        }
        self.gate.flush();
        true
    }

    fn hide_dummies(&self, entries: &[Entry<K>]) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        loop {
            let current = self.state.load_full();
            let mut infos = current.infos.clone();
            let mut hidden = Vec::new();
            for entry in entries {
                let Some(info) = current.info(entry) else {
                    continue;
                };
                if let Some(index) = info.index {
                    if info.cell.is_dummy() {
                        hidden.push(index);
                        infos.insert(entry.clone(), info.hidden());
                    }
                }
            }
            if hidden.is_empty() {
                return;
            }
            hidden.sort_unstable();
            let next = current.with_entries(current.entries.clone(), infos);
            if let Some(published) = self.try_publish(&current, next) {
                add(&self.metrics.hidden_entries, hidden.len());
                trace!(count = hidden.len(), "hiding entries without nodes");
                fire_removed(
                    &*host,
                    &self.metrics.core,
                    hidden,
                    self.view(current),
                    self.view(published),
                );
                return;
            }
        }
    }

    /// Probes a new entry, reusing the cell of an earlier attempt.
    fn probe(
        &self,
        entry: &Entry<K>,
        probed: &mut HashMap<Entry<K>, (Arc<NodeCell>, bool)>,
    ) -> (Arc<NodeCell>, bool) {
        if let Some((cell, hidden)) = probed.get(entry) {
            return (Arc::clone(cell), *hidden);
        }
        bump(&self.metrics.prefetch_probes);
        let cell = Arc::new(NodeCell::new());
        let node = cell.resolve(true, || self.build(entry, None)).node;
        let hidden = node.is_dummy();
        probed.insert(entry.clone(), (Arc::clone(&cell), hidden));
        (cell, hidden)
    }

    fn diff(
        &self,
        current: &LazyState<K>,
        entries: &[Entry<K>],
        probed: &mut HashMap<Entry<K>, (Arc<NodeCell>, bool)>,
    ) -> Result<Option<Plan<K>>, ChildrenError> {
        let wanted: HashSet<&Entry<K>> = entries.iter().collect();

        // 1. entries that are gone
        let mut removed = Vec::new();
        for entry in &current.visible {
            if !wanted.contains(entry) {
                if let Some(index) = current.info(entry).and_then(|i| i.index) {
                    removed.push(index);
                }
            }
        }
        let mut dropped = Vec::new();
        let mut kept_entries = Vec::with_capacity(entries.len());
        let mut kept_infos = HashMap::with_capacity(entries.len());
        for entry in &current.entries {
            let Some(info) = current.info(entry) else {
                continue;
            };
            if wanted.contains(entry) {
                kept_entries.push(entry.clone());
                kept_infos.insert(entry.clone(), info.clone());
            } else {
                dropped.push((entry.clone(), Arc::clone(&info.cell)));
            }
        }
        let after_remove = current.with_entries(kept_entries, kept_infos);

        // 2. surviving visible entries in their new order
        let reordered_visible: Vec<Entry<K>> = entries
            .iter()
            .filter(|e| after_remove.info(e).is_some_and(|i| !i.is_hidden()))
            .cloned()
            .collect();
        let permutation = compute_permutation(&after_remove.visible, &reordered_visible)?;
        let reordered_entries: Vec<Entry<K>> = entries
            .iter()
            .filter(|e| after_remove.info(e).is_some())
            .cloned()
            .collect();
        let after_reorder =
            after_remove.with_entries(reordered_entries, after_remove.infos.clone());

        // 3. brand new entries
        let fresh: Vec<&Entry<K>> = entries
            .iter()
            .filter(|e| current.info(e).is_none())
            .collect();
        if removed.is_empty()
            && dropped.is_empty()
            && permutation.is_none()
            && fresh.is_empty()
            && current.entries.as_slice() == entries
        {
            return Ok(None);
        }
        let probe = !fresh.is_empty() && fresh.len() <= self.prefetch_limit;
        let mut infos = after_reorder.infos.clone();
        for entry in &fresh {
            let info = if probe {
                let (cell, hidden) = self.probe(entry, probed);
                EntryInfo::with_cell(cell, hidden)
            } else {
                EntryInfo::new()
            };
            infos.insert((*entry).clone(), info);
        }
        let next = after_reorder.with_entries(entries.to_vec(), infos);
        next.check_consistency(fresh.first().copied())?;

        let fresh: HashSet<&Entry<K>> = fresh.into_iter().collect();
        let added: Vec<usize> = next
            .visible
            .iter()
            .filter(|e| fresh.contains(e))
            .filter_map(|e| next.info(e).and_then(|i| i.index))
            .collect();

        Ok(Some(Plan {
            removed,
            dropped,
            after_remove,
            permutation,
            after_reorder,
            added,
            next,
        }))
    }

    fn announce(
        &self,
        host: &dyn SupportHost<K>,
        before: Arc<LazyState<K>>,
        plan: Plan<K>,
        published: Arc<LazyState<K>>,
    ) {
        let Plan {
            removed,
            dropped,
            after_remove,
            permutation,
            after_reorder,
            added,
            ..
        } = plan;

        fire_removed(
            host,
            &self.metrics.core,
            removed,
            self.view(before),
            self.view(Arc::new(after_remove)),
        );
        for (entry, cell) in &dropped {
            cell.release();
            if let Some(node) = cell.current().filter(|n| !n.is_dummy()) {
                release_nodes(host, entry, &[node]);
            }
        }

        let after_reorder = Arc::new(after_reorder);
        if let Some(permutation) = permutation {
            fire_reordered(
                host,
                &self.metrics.core,
                permutation,
                self.view(Arc::clone(&after_reorder)),
            );
        }
        fire_added(
            host,
            &self.metrics.core,
            added,
            Some(self.view(after_reorder)),
            self.view(published),
        );
    }

    /// Diffs and publishes `entries`, retrying until the compare-and-swap
    /// succeeds.
    fn apply_entries(
        &self,
        host: &dyn SupportHost<K>,
        entries: Vec<Entry<K>>,
        probed: &mut HashMap<Entry<K>, (Arc<NodeCell>, bool)>,
    ) -> Result<(), ChildrenError> {
        loop {
            let current = self.state.load_full();
            if !current.inited && !current.must_notify {
                let mut infos = HashMap::with_capacity(entries.len());
                for entry in &entries {
                    let info = current.info(entry).cloned().unwrap_or_else(EntryInfo::new);
                    infos.insert(entry.clone(), info);
                }
                let next = current.with_entries(entries.clone(), infos);
                next.check_consistency(None)?;
                if self.try_publish(&current, next).is_some() {
                    trace!(entries = entries.len(), "recording entries before initialization");
                    return Ok(());
                }
                continue;
            }

            let Some(plan) = self.diff(&current, &entries, probed)? else {
                return Ok(());
            };
            let next = plan.next.clone();
            if let Some(published) = self.try_publish(&current, next) {
                self.announce(host, current, plan, published);
                return Ok(());
            }
        }
    }

    fn schedule_teardown(self: Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(&self);
        let posted = self.gate.post_write(Box::new(move || {
            if let Some(support) = weak.upgrade() {
                support.teardown(generation);
            }
        }));
        if let Err(err) = posted {
            warn!(error = %err, "cannot schedule teardown of lazy support");
        }
    }

    fn teardown(&self, generation: u64) {
        if self.retired.load(Ordering::Acquire) || !self.lifecycle.is_idle(generation) {
            trace!(generation, "stale teardown ignored");
            return;
        }
        loop {
            let current = self.state.load_full();
            if !current.inited {
                return;
            }
            let infos = current
                .entries
                .iter()
                .map(|e| (e.clone(), EntryInfo::new()))
                .collect();
            let next = LazyState::empty().with_entries(current.entries.clone(), infos);
            if self.try_publish(&current, next).is_some() {
                break;
            }
        }
        self.lifecycle.advance();
        bump(&self.metrics.core.teardowns);
        if let Some(host) = self.host.upgrade() {
            debug!(children = ?host.children_id(), generation, "tearing down lazy support");
            host.remove_notify();
        }
    }
}

impl<K: ChildKey> EntrySupport<K> for LazySupport<K> {
    fn is_lazy(&self) -> bool {
        true
    }

    fn is_initialized(&self) -> bool {
        self.state.load().inited
    }

    fn entries(&self) -> Vec<Entry<K>> {
        self.state.load().entries.clone()
    }

    fn set_entries(&self, entries: Vec<Entry<K>>) -> Result<(), ChildrenError> {
        bump(&self.metrics.core.set_entries_calls);
        let Some(host) = self.host.upgrade() else {
            return Ok(());
        };
        let mut probed = HashMap::new();
        let result = self.apply_entries(&*host, entries, &mut probed);
        // probed nodes stay strong only until listeners had their chance to read them
        for (cell, _) in probed.values() {
            cell.release();
        }
        result
    }

    fn refresh_entry(&self, entry: &Entry<K>) -> Result<(), ChildrenError> {
        let Some(host) = self.host.upgrade() else {
            return Ok(());
        };
        let current = self.state.load_full();
        if !current.inited {
            return Ok(());
        }
        let Some(old) = current.info(entry).cloned() else {
            return Ok(());
        };
        bump(&self.metrics.core.refreshes);

        let cell = Arc::new(NodeCell::new());
        let node = cell.resolve(true, || self.build(entry, old.index)).node;
        let old_node = old.cell.current();
        if old_node.as_ref().is_some_and(|n| n.ptr_eq(&node)) {
            cell.release();
            return Ok(());
        }
        let now_dummy = node.is_dummy();
        if old.is_hidden() && now_dummy {
            return Ok(());
        }

        loop {
            let current = self.state.load_full();
            let Some(info) = current.info(entry).cloned() else {
                cell.release();
                return Ok(());
            };
            let mut infos = current.infos.clone();
            infos.insert(entry.clone(), EntryInfo::with_cell(Arc::clone(&cell), now_dummy));
            let next = current.with_entries(current.entries.clone(), infos);
            let Some(published) = self.try_publish(&current, next) else {
                continue;
            };
            let new_index = published.info(entry).and_then(|i| i.index);
            match (info.index, new_index) {
                (Some(old_index), None) => fire_removed(
                    &*host,
                    &self.metrics.core,
                    vec![old_index],
                    self.view(current),
                    self.view(published),
                ),
                (Some(old_index), Some(new_index)) => {
                    let mut hidden = current.infos.clone();
                    hidden.insert(entry.clone(), info.hidden());
                    let middle = Arc::new(current.with_entries(current.entries.clone(), hidden));
                    fire_removed(
                        &*host,
                        &self.metrics.core,
                        vec![old_index],
                        self.view(current),
                        self.view(Arc::clone(&middle)),
                    );
                    fire_added(
                        &*host,
                        &self.metrics.core,
                        vec![new_index],
                        Some(self.view(middle)),
                        self.view(published),
                    );
                }
                (None, Some(new_index)) => fire_added(
                    &*host,
                    &self.metrics.core,
                    vec![new_index],
                    Some(self.view(current)),
                    self.view(published),
                ),
                (None, None) => {}
            }
            cell.release();
            if let Some(old_node) = old_node.filter(|n| !n.is_dummy()) {
                release_nodes(&*host, entry, &[old_node]);
            }
            return Ok(());
        }
    }

    fn get_nodes(&self, optimal: bool) -> Vec<Node> {
        if !self.check_init() {
            return Vec::new();
        }
        if optimal && !self.gate.is_read_access() {
            self.gate.flush();
        }
        loop {
            let (nodes, empty) = self.gate.read_access(|| {
                let state = self.state.load_full();
                let mut nodes = Vec::with_capacity(state.visible_len());
                let mut empty = Vec::new();
                for entry in &state.visible {
                    let Some(info) = state.info(entry) else {
                        continue;
                    };
                    let node = self.node_for(entry, info, false);
                    if !node.is_dummy() {
                        nodes.push(node);
                    } else if info.cell.is_dummy() {
                        empty.push(entry.clone());
                    }
                }
                (nodes, empty)
            });
            if empty.is_empty() || !self.hide_empty(empty) {
                return nodes;
            }
        }
    }

    fn get_node_at(&self, index: usize) -> Option<Node> {
        if !self.check_init() {
            return None;
        }
        loop {
            let (node, empty) = self.gate.read_access(|| {
                let state = self.state.load_full();
                let Some((entry, info)) = state.visible_at(index) else {
                    return (None, None);
                };
                let node = self.node_for(entry, info, false);
                if !node.is_dummy() {
                    (Some(node), None)
                } else if info.cell.is_dummy() {
                    (None, Some(entry.clone()))
                } else {
                    (None, None)
                }
            });
            match (node, empty) {
                (Some(node), _) => return Some(node),
                (None, Some(entry)) => {
                    if !self.hide_empty(vec![entry]) {
                        return None;
                    }
                }
                (None, None) => return None,
            }
        }
    }

    fn get_nodes_count(&self, optimal: bool) -> usize {
        if optimal {
            return self.get_nodes(true).len();
        }
        if !self.check_init() {
            return 0;
        }
        self.gate.read_access(|| self.state.load().visible_len())
    }

    fn snapshot(&self) -> NodeSnapshot {
        let token = self.lifecycle.acquire();
        if self.check_init() {
            return self.view(self.state.load_full()).keeping_alive(token);
        }
        loop {
            let current = self.state.load_full();
            if current.inited || current.must_notify {
                return self.view(current).keeping_alive(token);
            }
            let marked = current.with_init(
                current.inited,
                current.init_thread,
                current.init_in_progress,
                true,
            );
            if let Some(published) = self.try_publish(&current, marked) {
                return self.view(published).keeping_alive(token);
            }
        }
    }

    fn mark_initialized(&self) {
        if self.state.load().inited {
            return;
        }
        self.hold_before_publish();
        loop {
            let current = self.state.load_full();
            if current.inited {
                return;
            }
            let done = current.with_init(true, None, false, false);
            if self.try_publish(&current, done).is_some() {
                break;
            }
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
