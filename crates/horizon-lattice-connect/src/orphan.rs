//! Deferred reclamation of retired tables and edges.
//!
//! When an object's edge table grows, or one of its edges is unlinked while
//! an emission is walking its lists, the retired item may still be read by
//! that emission. It is pushed onto the object's [`OrphanChain`] and only
//! dealt with once the object is quiescent (no emission in flight).

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::edge::Edge;
use crate::table::EdgeTable;

/// A retired item awaiting a quiescent point.
#[derive(Clone)]
pub(crate) enum Orphan {
    /// A table replaced by growth.
    Table(Arc<EdgeTable>),
    /// An unlinked edge whose emitter-side credit is still held.
    Edge(Arc<Edge>),
}

struct OrphanNode {
    entry: Orphan,
    next: Option<Arc<OrphanNode>>,
}

/// Lock-free push-only stack of retired items, drained all at once.
#[derive(Default)]
pub(crate) struct OrphanChain {
    head: ArcSwapOption<OrphanNode>,
}

impl OrphanChain {
    /// Push an entry. Concurrent pushes resolve through compare-and-swap.
    pub(crate) fn push(&self, entry: Orphan) {
        self.head.rcu(|head| {
            Some(Arc::new(OrphanNode {
                entry: entry.clone(),
                next: head.clone(),
            }))
        });
    }

    /// Detach the whole chain, oldest entry first.
    pub(crate) fn drain(&self) -> Vec<Orphan> {
        let mut entries = Vec::new();
        let mut cursor = self.head.swap(None);
        while let Some(node) = cursor {
            cursor = match Arc::try_unwrap(node) {
                Ok(node) => {
                    entries.push(node.entry);
                    node.next
                }
                Err(shared) => {
                    entries.push(shared.entry.clone());
                    shared.next.clone()
                }
            };
        }
        entries.reverse();
        entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load().is_none()
    }

    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.clone();
        }
        count
    }
}

impl Drop for OrphanChain {
    fn drop(&mut self) {
        // Unwind iteratively so a long chain cannot overflow the stack.
        drop(self.drain());
    }
}
