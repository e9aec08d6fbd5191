//! Per-signal edge lists and the growable per-object table holding them.
//!
//! Readers (emission) only ever load `first` and follow `next` links, all of
//! them atomic `ArcSwapOption`s, so they never take a lock. Writers append,
//! unlink and grow under the owning object's write lock.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwapOption;

use crate::edge::Edge;

/// The connections of one signal, oldest first.
#[derive(Default)]
pub(crate) struct EdgeList {
    first: ArcSwapOption<Edge>,
    last: ArcSwapOption<Edge>,
}

impl EdgeList {
    /// Copy the head and tail pointers into a fresh list. The edges
    /// themselves do not refer back to their list, so this is all a
    /// relocation needs.
    fn relocate(&self) -> Self {
        Self {
            first: ArcSwapOption::new(self.first.load_full()),
            last: ArcSwapOption::new(self.last.load_full()),
        }
    }

    /// The oldest edge, if any.
    pub(crate) fn head(&self) -> Option<Arc<Edge>> {
        self.first.load_full()
    }

    /// Append at the tail. Caller holds the owner's write lock.
    pub(crate) fn append(&self, edge: Arc<Edge>) {
        match self.last.load_full() {
            Some(tail) => {
                *edge.prev.lock() = Arc::downgrade(&tail);
                tail.next.store(Some(edge.clone()));
            }
            None => self.first.store(Some(edge.clone())),
        }
        edge.linked.store(true, Ordering::Release);
        self.last.store(Some(edge));
    }

    /// Unlink `edge` from this list in constant time. Caller holds the
    /// owner's write lock. The edge's own `next` link is left alone so a
    /// traversal standing on it can continue.
    ///
    /// Returns `false` if the edge was not linked.
    pub(crate) fn unlink(&self, edge: &Arc<Edge>) -> bool {
        if !edge.linked.swap(false, Ordering::AcqRel) {
            return false;
        }
        let prev = edge.prev.lock().clone();
        // A linked predecessor is owned by the chain ahead of it, so an empty
        // upgrade means `edge` is the head.
        let previous = prev.upgrade();
        let next = edge.next.load_full();

        match &previous {
            Some(previous) => previous.next.store(next.clone()),
            None => self.first.store(next.clone()),
        }
        match &next {
            Some(next) => *next.prev.lock() = prev,
            None => self.last.store(previous),
        }
        true
    }

    /// Snapshot of the edges currently linked, oldest first.
    pub(crate) fn edges(&self) -> Vec<Arc<Edge>> {
        let mut out = Vec::new();
        let mut cursor = self.first.load_full();
        while let Some(edge) = cursor {
            cursor = edge.next.load_full();
            out.push(edge);
        }
        out
    }
}

/// An object's fan-out table: one [`EdgeList`] per signal index.
///
/// Capacity only grows. Growth builds a replacement table; the old one is
/// retired to the owner's orphan chain because a concurrent emission may
/// still be reading it.
pub(crate) struct EdgeTable {
    lists: Box<[EdgeList]>,
}

impl EdgeTable {
    pub(crate) fn empty() -> Self {
        Self {
            lists: Box::default(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.lists.len()
    }

    pub(crate) fn list(&self, signal_index: usize) -> Option<&EdgeList> {
        self.lists.get(signal_index)
    }

    /// Build a larger table able to hold `signal_index`, rounded up to a
    /// multiple of `block` entries.
    pub(crate) fn grown(&self, signal_index: usize, block: usize) -> Self {
        let capacity = rounded_capacity(self.capacity().max(signal_index + 1), block);
        let lists = (0..capacity)
            .map(|index| match self.lists.get(index) {
                Some(list) => list.relocate(),
                None => EdgeList::default(),
            })
            .collect();
        Self { lists }
    }

    /// Every linked edge, by signal index then connection order.
    pub(crate) fn all_edges(&self) -> Vec<Arc<Edge>> {
        self.lists.iter().flat_map(EdgeList::edges).collect()
    }
}

/// Round `wanted` up to the next multiple of `block`.
pub(crate) fn rounded_capacity(wanted: usize, block: usize) -> usize {
    let block = block.max(1);
    wanted.div_ceil(block) * block
}
