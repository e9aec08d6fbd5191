//! Records of slot invocations currently running on a receiver.
//!
//! While a slot executes, a frame naming the emitter and signal is pushed on
//! the receiver's stack. Slot invocations can nest (a slot emits a signal that
//! lands back on the same receiver), and several threads can invoke the same
//! receiver at once, so each frame is tagged with the thread running it and
//! lookups only ever see the calling thread's frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::object::{ConnectionState, ObjectId};

/// "Which emitter is invoking a slot on this receiver right now."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivationFrame {
    /// The receiver whose slot is running.
    pub receiver: ObjectId,
    /// The emitter, or `None` if it was destroyed while the slot ran.
    pub emitter: Option<ObjectId>,
    /// The signal being delivered.
    pub signal_index: usize,
    thread: ThreadId,
    token: u64,
}

/// A receiver's stack of running invocations.
#[derive(Default)]
pub(crate) struct ActivationStack {
    frames: Mutex<Vec<ActivationFrame>>,
    next_token: AtomicU64,
}

impl ActivationStack {
    /// Innermost frame belonging to the calling thread.
    pub(crate) fn current(&self) -> Option<ActivationFrame> {
        let thread = std::thread::current().id();
        self.frames
            .lock()
            .iter()
            .rev()
            .find(|frame| frame.thread == thread)
            .copied()
    }

    /// Null out every frame naming `emitter`.
    pub(crate) fn forget_emitter(&self, emitter: ObjectId) {
        for frame in self.frames.lock().iter_mut() {
            if frame.emitter == Some(emitter) {
                frame.emitter = None;
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.frames.lock().clear();
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    fn pop(&self, token: u64) {
        let mut frames = self.frames.lock();
        if let Some(pos) = frames.iter().rposition(|frame| frame.token == token) {
            frames.remove(pos);
        }
    }
}

/// Pops its frame when dropped, including during unwinding.
pub(crate) struct FrameGuard {
    receiver: Arc<ConnectionState>,
    token: u64,
}

impl FrameGuard {
    pub(crate) fn enter(
        receiver: Arc<ConnectionState>,
        emitter: Option<ObjectId>,
        signal_index: usize,
    ) -> Self {
        let stack = &receiver.activations;
        let token = stack.next_token.fetch_add(1, Ordering::Relaxed);
        stack.frames.lock().push(ActivationFrame {
            receiver: receiver.id,
            emitter,
            signal_index,
            thread: std::thread::current().id(),
            token,
        });
        Self { receiver, token }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.receiver.activations.pop(self.token);
    }
}
