use std::collections::{HashMap, HashSet};

/// Fixed-size bit vector.
#[derive(Debug, Clone)]
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    fn full(len: usize) -> Self {
        let mut set = Self::new(len);
        for i in 0..len {
            set.insert(i);
        }
        set
    }

    fn contains(&self, i: usize) -> bool {
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    fn insert(&mut self, i: usize) {
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    fn remove(&mut self, i: usize) {
        self.words[i / 64] &= !(1u64 << (i % 64));
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }
}

/// Per-run record of node outcomes.
///
/// Each node id gets a dense index at construction, in the order given. Every
/// predicate is one bit; marking is idempotent. Unknown ids read as `false`
/// and are ignored by the mutators.
///
/// The active set starts with every node and only shrinks: nothing puts a
/// node back once it has been deactivated.
#[derive(Debug, Clone)]
pub struct StateTracker {
    index: HashMap<String, usize>,
    ids: Vec<String>,
    completed: BitSet,
    failed: BitSet,
    skipped: BitSet,
    pruned: BitSet,
    selected: BitSet,
    active: BitSet,
}

impl StateTracker {
    pub fn new<S: AsRef<str>>(node_ids: impl IntoIterator<Item = S>) -> Self {
        let ids: Vec<String> = node_ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        let index = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let n = ids.len();
        Self {
            index,
            ids,
            completed: BitSet::new(n),
            failed: BitSet::new(n),
            skipped: BitSet::new(n),
            pruned: BitSet::new(n),
            selected: BitSet::new(n),
            active: BitSet::full(n),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn idx(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.completed.contains(i))
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.failed.contains(i))
    }

    pub fn is_skipped(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.skipped.contains(i))
    }

    pub fn is_pruned(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.pruned.contains(i))
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.selected.contains(i))
    }

    /// Completed, failed, skipped or pruned.
    pub fn is_settled(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| {
            self.completed.contains(i)
                || self.failed.contains(i)
                || self.skipped.contains(i)
                || self.pruned.contains(i)
        })
    }

    /// Clears a previous failure mark. A pruned node is never completed.
    pub fn mark_completed(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            if self.pruned.contains(i) {
                return;
            }
            self.failed.remove(i);
            self.completed.insert(i);
        }
    }

    /// Clears a previous completion mark.
    pub fn mark_failed(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            self.completed.remove(i);
            self.failed.insert(i);
        }
    }

    pub fn mark_skipped(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            self.skipped.insert(i);
        }
    }

    pub fn mark_pruned(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            self.pruned.insert(i);
        }
    }

    pub fn mark_selected(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            self.selected.insert(i);
        }
    }

    fn collect(&self, bits: &BitSet) -> HashSet<String> {
        bits.iter().map(|i| self.ids[i].clone()).collect()
    }

    pub fn completed_nodes(&self) -> HashSet<String> {
        self.collect(&self.completed)
    }

    pub fn failed_nodes(&self) -> HashSet<String> {
        self.collect(&self.failed)
    }

    pub fn skipped_nodes(&self) -> HashSet<String> {
        self.collect(&self.skipped)
    }

    pub fn pruned_nodes(&self) -> HashSet<String> {
        self.collect(&self.pruned)
    }

    pub fn selected_nodes(&self) -> HashSet<String> {
        self.collect(&self.selected)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.count()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.idx(id).is_some_and(|i| self.active.contains(i))
    }

    /// Remove a node from the active set for good.
    pub fn deactivate(&mut self, id: &str) {
        if let Some(i) = self.idx(id) {
            self.active.remove(i);
        }
    }

    /// Active node ids in index order.
    pub fn active_nodes(&self) -> Vec<String> {
        self.active.iter().map(|i| self.ids[i].clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.count()
    }
}
