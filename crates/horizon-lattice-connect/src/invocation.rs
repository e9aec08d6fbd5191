//! Deferred slot invocations for queued delivery.
//!
//! A queued connection wraps the slot and an owned copy of the arguments into
//! a [`QueuedInvocation`] and posts it to the receiver thread's event queue.
//! Blocking connections attach a [`CompletionHandle`]; the emitting thread
//! waits on the matching [`CompletionWaiter`] until the invocation has run or
//! has been dropped unrun.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How a blocking invocation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Not finished yet.
    Pending,
    /// The slot ran.
    Delivered,
    /// The invocation was discarded without running, e.g. because its
    /// receiver was destroyed first.
    Dropped,
}

/// A type-erased queued invocation that can be executed later.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
    completion: Option<CompletionHandle>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: None,
        }
    }

    /// Create a new queued invocation with a completion handle for blocking.
    pub fn with_completion<F>(invoke: F, completion: CompletionHandle) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: Some(completion),
        }
    }

    /// Execute the invocation.
    pub fn execute(self) {
        let Self { invoke, completion } = self;
        invoke();
        if let Some(completion) = completion {
            completion.finish(Completion::Delivered);
        }
    }

    /// Discard the invocation without running it. A blocked emitter is woken
    /// with [`Completion::Dropped`].
    pub fn discard(self) {
        drop(self);
    }
}

/// The executing side of a blocking invocation.
///
/// Dropping the handle without finishing it reports [`Completion::Dropped`],
/// so a waiter can never be stranded by a discarded event.
pub struct CompletionHandle {
    inner: Option<Arc<CompletionState>>,
}

impl CompletionHandle {
    fn finish(mut self, outcome: Completion) {
        if let Some(inner) = self.inner.take() {
            inner.set(outcome);
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.set(Completion::Dropped);
        }
    }
}

/// A waiter for blocking on invocation completion.
pub struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Wait for the invocation to complete or be dropped.
    pub fn wait(self) -> Completion {
        let mut outcome = self.inner.outcome.lock();
        while *outcome == Completion::Pending {
            self.inner.condvar.wait(&mut outcome);
        }
        *outcome
    }

    /// Wait with a timeout. Returns [`Completion::Pending`] if the timeout
    /// elapsed first.
    pub fn wait_timeout(self, timeout: Duration) -> Completion {
        let mut outcome = self.inner.outcome.lock();
        if *outcome == Completion::Pending {
            let _ = self
                .inner
                .condvar
                .wait_while_for(&mut outcome, |o| *o == Completion::Pending, timeout);
        }
        *outcome
    }
}

struct CompletionState {
    outcome: Mutex<Completion>,
    condvar: Condvar,
}

impl CompletionState {
    fn set(&self, value: Completion) {
        let mut outcome = self.outcome.lock();
        *outcome = value;
        self.condvar.notify_all();
    }
}

/// Create a completion handle/waiter pair for blocking invocations.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        outcome: Mutex::new(Completion::Pending),
        condvar: Condvar::new(),
    });

    (
        CompletionHandle {
            inner: Some(state.clone()),
        },
        CompletionWaiter { inner: state },
    )
}

static_assertions::assert_impl_all!(QueuedInvocation: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_execute() {
        let executed = Arc::new(AtomicBool::new(false));

        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        invocation.execute();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_completion_pair() {
        let (handle, waiter) = completion_pair();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.finish(Completion::Delivered);
        });

        assert_eq!(waiter.wait(), Completion::Delivered);
        thread.join().unwrap();
    }

    #[test]
    fn test_completion_with_invocation() {
        let executed = Arc::new(AtomicBool::new(false));
        let (handle, waiter) = completion_pair();

        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::with_completion(
            move || {
                executed_clone.store(true, Ordering::SeqCst);
            },
            handle,
        );

        // Simulate the receiver thread processing the event.
        let thread = std::thread::spawn(move || invocation.execute());

        assert_eq!(waiter.wait(), Completion::Delivered);
        thread.join().unwrap();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_discard_wakes_waiter() {
        let (handle, waiter) = completion_pair();
        let invocation = QueuedInvocation::with_completion(|| panic!("must not run"), handle);

        let thread = std::thread::spawn(move || invocation.discard());

        assert_eq!(waiter.wait(), Completion::Dropped);
        thread.join().unwrap();
    }

    #[test]
    fn test_completion_timeout() {
        let (_handle, waiter) = completion_pair();

        // Times out since the handle is never finished.
        let outcome = waiter.wait_timeout(Duration::from_millis(10));
        assert_eq!(outcome, Completion::Pending);
    }
}
