//! Materialized Array of the Eager Support
//!
//! The eager support keeps, per entry, the nodes that entry produced and a
//! flattened array of all nodes in entry order. The array is rebuilt lazily
//! whenever the per-entry lists change:
//!
//! ```text
//!   entries:  [ a        , b , c           ]
//!   infos:    a → [A1, A2]   b → []   c → [C]
//!   offsets:    0            2        2
//!   array:    [ A1, A2, C ]
//! ```
//!
//! An entry's *offset* is the sum of the node counts of all entries before it.
//! Offsets drive both the removed/added index lists and the reorder
//! permutation.

use core::fmt;
use std::sync::Arc;

use crate::entry::{ChildKey, Entry};
use crate::error::ChildrenError;
use crate::node::{ChildrenId, Node};
use crate::{HashMap, HashSet};

/// Per-entry bookkeeping: the nodes produced, or `None` while pending.
#[derive(Default, Clone)]
pub(crate) struct Info {
    pub(crate) nodes: Option<Vec<Node>>,
}

impl Info {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.as_ref().map_or(0, Vec::len)
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.nodes {
            Some(nodes) => write!(f, "{nodes:?}"),
            None => f.write_str("<pending>"),
        }
    }
}

/// Entry-to-nodes map plus the cached flattened array.
pub(crate) struct ChildrenArray<K> {
    infos: HashMap<Entry<K>, Info>,
    cached: Option<Arc<[Node]>>,
}

impl<K: ChildKey> ChildrenArray<K> {
    /// Creates pending infos for `entries`.
    pub(crate) fn from_entries(entries: &[Entry<K>]) -> Self {
        let infos = entries
            .iter()
            .map(|e| (e.clone(), Info::default()))
            .collect();
        ChildrenArray {
            infos,
            cached: None,
        }
    }

    #[inline]
    pub(crate) fn contains(&self, entry: &Entry<K>) -> bool {
        self.infos.contains_key(entry)
    }

    /// Node count of `entry`, zero when unknown or pending.
    pub(crate) fn len_of(&self, entry: &Entry<K>) -> usize {
        self.infos.get(entry).map_or(0, Info::len)
    }

    pub(crate) fn nodes_of(&self, entry: &Entry<K>) -> Vec<Node> {
        self.infos
            .get(entry)
            .and_then(|i| i.nodes.clone())
            .unwrap_or_default()
    }

    pub(crate) fn insert_pending(&mut self, entry: Entry<K>) {
        self.infos.entry(entry).or_default();
    }

    pub(crate) fn set_nodes(&mut self, entry: &Entry<K>, nodes: Vec<Node>) {
        if let Some(info) = self.infos.get_mut(entry) {
            info.nodes = Some(nodes);
            self.cached = None;
        }
    }

    pub(crate) fn remove(&mut self, entry: &Entry<K>) -> Option<Info> {
        let info = self.infos.remove(entry);
        if info.is_some() {
            self.cached = None;
        }
        info
    }

    #[inline]
    pub(crate) fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Start offset of every entry in `entries`.
    pub(crate) fn offsets(&self, entries: &[Entry<K>]) -> HashMap<Entry<K>, usize> {
        let mut offsets = HashMap::with_capacity(entries.len());
        let mut offset = 0;
        for entry in entries {
            offsets.insert(entry.clone(), offset);
            offset += self.len_of(entry);
        }
        offsets
    }

    /// Start offset of one entry.
    pub(crate) fn offset_of(&self, entries: &[Entry<K>], target: &Entry<K>) -> Option<usize> {
        let mut offset = 0;
        for entry in entries {
            if entry == target {
                return Some(offset);
            }
            offset += self.len_of(entry);
        }
        None
    }

    pub(crate) fn node_count(&self, entries: &[Entry<K>]) -> usize {
        entries.iter().map(|e| self.len_of(e)).sum()
    }

    /// Array positions of the nodes of every entry accepted by `select`.
    pub(crate) fn indices_of(
        &self,
        entries: &[Entry<K>],
        select: impl Fn(&Entry<K>) -> bool,
    ) -> Vec<usize> {
        let mut indices = Vec::new();
        let mut offset = 0;
        for entry in entries {
            let len = self.len_of(entry);
            if select(entry) {
                indices.extend(offset..offset + len);
            }
            offset += len;
        }
        indices
    }

    /// Returns the flattened array, rebuilding it if needed and tying every
    /// node to `owner` at its position.
    pub(crate) fn nodes(&mut self, entries: &[Entry<K>], owner: ChildrenId) -> (Arc<[Node]>, bool) {
        if let Some(cached) = &self.cached {
            return (Arc::clone(cached), false);
        }
        let mut all = Vec::with_capacity(self.node_count(entries));
        for entry in entries {
            if let Some(nodes) = self.infos.get(entry).and_then(|i| i.nodes.as_ref()) {
                all.extend(nodes.iter().cloned());
            }
        }
        for (index, node) in all.iter().enumerate() {
            node.assign_to(owner, Some(index));
        }
        let array: Arc<[Node]> = all.into();
        self.cached = Some(Arc::clone(&array));
        (array, true)
    }

    /// Every node currently held, in no particular order.
    pub(crate) fn all_nodes(&self) -> Vec<Node> {
        self.infos
            .values()
            .filter_map(|i| i.nodes.as_ref())
            .flatten()
            .cloned()
            .collect()
    }

    /// Fails when the entry list and the info map disagree in size.
    pub(crate) fn check_consistency(
        &self,
        entries: &[Entry<K>],
        trigger: Option<&Entry<K>>,
    ) -> Result<(), ChildrenError> {
        if entries.len() == self.infos.len() {
            return Ok(());
        }
        Err(self.inconsistency(entries, trigger))
    }

    pub(crate) fn inconsistency(&self, entries: &[Entry<K>], trigger: Option<&Entry<K>>) -> ChildrenError {
        let mut info_dump = String::new();
        for (entry, info) in &self.infos {
            info_dump.push_str(&format!("\n  {entry:?} => {info:?}"));
        }
        let distinct: HashSet<&Entry<K>> = entries.iter().collect();
        let mut entry_dump = format!("{entries:?}");
        if distinct.len() != entries.len() {
            entry_dump.push_str(" (contains equal entries)");
        }
        ChildrenError::InconsistentEntries {
            entries: entries.len(),
            infos: self.infos.len(),
            trigger: trigger.map(|e| format!("{e:?}")),
            entry_dump,
            info_dump,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Dupl;

    fn key(k: &'static str) -> Entry<&'static str> {
        Entry::Key(Dupl::new(k))
    }

    fn filled(layout: &[(&'static str, usize)]) -> (Vec<Entry<&'static str>>, ChildrenArray<&'static str>) {
        let entries: Vec<_> = layout.iter().map(|(k, _)| key(k)).collect();
        let mut array = ChildrenArray::from_entries(&entries);
        for (k, n) in layout {
            let nodes = (0..*n).map(|i| Node::new(format!("{k}{i}"))).collect();
            array.set_nodes(&key(k), nodes);
        }
        (entries, array)
    }

    #[test]
    fn test_offsets_follow_node_counts() {
        let (entries, array) = filled(&[("a", 2), ("b", 0), ("c", 1)]);
        let offsets = array.offsets(&entries);
        assert_eq!(offsets[&key("a")], 0);
        assert_eq!(offsets[&key("b")], 2);
        assert_eq!(offsets[&key("c")], 2);
        assert_eq!(array.offset_of(&entries, &key("c")), Some(2));
        assert_eq!(array.node_count(&entries), 3);
    }

    #[test]
    fn test_nodes_are_flattened_and_cached() {
        let (entries, mut array) = filled(&[("a", 2), ("b", 1)]);
        let owner = ChildrenId::next();
        let (first, rebuilt) = array.nodes(&entries, owner);
        assert!(rebuilt);
        let names: Vec<String> = first.iter().map(Node::name).collect();
        assert_eq!(names, vec!["a0", "a1", "b0"]);
        assert_eq!(first[2].parent().and_then(|t| t.index), Some(2));

        let (second, rebuilt) = array.nodes(&entries, owner);
        assert!(!rebuilt);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_indices_of_selected_entries() {
        let (entries, array) = filled(&[("a", 1), ("b", 2), ("c", 1)]);
        let indices = array.indices_of(&entries, |e| e == &key("b"));
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_pending_infos_contribute_nothing() {
        let entries = vec![key("a")];
        let mut array = ChildrenArray::from_entries(&entries);
        assert_eq!(array.len_of(&key("a")), 0);
        let (nodes, _) = array.nodes(&entries, ChildrenId::next());
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_consistency_check_dumps_state() {
        let (mut entries, array) = filled(&[("a", 1)]);
        entries.push(key("a"));
        let err = array.check_consistency(&entries, Some(&key("a"))).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("2 entries but 1 infos"));
        assert!(text.contains("contains equal entries"));
    }
}
