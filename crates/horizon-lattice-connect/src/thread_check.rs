//! Thread identity for objects taking part in connections.
//!
//! Every object records the thread that owns it. The registry compares owning
//! threads to resolve [`ConnectionType::Auto`](crate::ConnectionType::Auto)
//! at connect time, and compares the emitting thread with the receiver's
//! owning thread to refuse a blocking queued delivery that could never
//! complete.
//!
//! ```
//! use horizon_lattice_connect::thread_check::ThreadAffinity;
//!
//! let here = ThreadAffinity::current();
//! assert!(here.is_same_thread());
//!
//! let there = std::thread::spawn(ThreadAffinity::current).join().unwrap();
//! assert!(!there.is_same_thread());
//! assert!(!here.same_thread_as(&there));
//! ```

use std::thread::ThreadId;

/// The thread an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Affinity for the calling thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Affinity for a specific thread.
    #[inline]
    pub fn for_thread(thread_id: ThreadId) -> Self {
        Self { thread_id }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the calling thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Check if two affinities name the same thread.
    #[inline]
    pub fn same_thread_as(&self, other: &ThreadAffinity) -> bool {
        self.thread_id == other.thread_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_thread_affinity_same_thread() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_same_thread());
        assert_eq!(affinity.thread_id(), std::thread::current().id());
    }

    #[test]
    fn test_thread_affinity_different_thread() {
        let affinity = ThreadAffinity::current();

        let result = Arc::new(AtomicBool::new(false));
        let result_clone = result.clone();

        let handle = std::thread::spawn(move || {
            result_clone.store(!affinity.is_same_thread(), Ordering::SeqCst);
        });

        handle.join().unwrap();
        assert!(
            result.load(Ordering::SeqCst),
            "is_same_thread() should return false from different thread"
        );
    }

    #[test]
    fn test_thread_affinity_for_thread() {
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();
        let affinity = ThreadAffinity::for_thread(other);
        assert!(!affinity.is_same_thread());
        assert!(affinity.same_thread_as(&ThreadAffinity::for_thread(other)));
        assert!(!affinity.same_thread_as(&ThreadAffinity::current()));
    }

    #[test]
    fn test_thread_affinity_default() {
        let affinity = ThreadAffinity::default();
        assert!(affinity.is_same_thread());
    }
}
