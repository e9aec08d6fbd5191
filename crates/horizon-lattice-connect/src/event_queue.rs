//! Per-thread event queues for queued delivery.
//!
//! Each thread that owns receivers has one queue, created the first time
//! something is posted to it or it processes events. The owning thread drains
//! its queue cooperatively with [`process_events`] or [`process_events_for`].
//!
//! Events whose receiver has been destroyed by the time they are processed
//! are dropped without running. When a thread that owns a queue exits,
//! whatever is still queued for it is dropped the same way, waking any emitter
//! blocked on it, and later posts to that thread are dropped on arrival.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_connect::{ConnectionRegistry, ConnectionType, Slot};
//! use horizon_lattice_connect::event_queue;
//! use horizon_lattice_connect::meta::MetaObject;
//!
//! let registry = ConnectionRegistry::new();
//! let meta = MetaObject::builder("Source").signal::<(u32,)>("tick").build();
//! let source = registry.create_object(meta.clone(), None);
//! let sink = registry.create_object(meta, None);
//!
//! registry
//!     .connect(
//!         source,
//!         0,
//!         Some(sink),
//!         Slot::new(|&(n,): &(u32,)| println!("tick {n}")),
//!         ConnectionType::Queued,
//!     )
//!     .unwrap();
//!
//! let report = registry.emit(source, 0, (1u32,)).unwrap();
//! assert_eq!(report.posted, 1);
//!
//! // The sink is owned by this thread, so this thread runs the slot.
//! assert_eq!(event_queue::process_events(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use crate::invocation::QueuedInvocation;
use crate::object::{ConnectionState, ObjectId};

/// A slot invocation posted to a receiver's thread.
pub(crate) struct QueuedEvent {
    pub(crate) receiver: ObjectId,
    pub(crate) target: Weak<ConnectionState>,
    pub(crate) invocation: QueuedInvocation,
}

impl QueuedEvent {
    fn receiver_alive(&self) -> bool {
        self.target
            .upgrade()
            .is_some_and(|state| !state.is_destroyed())
    }

    fn run(self) -> bool {
        if self.receiver_alive() {
            self.invocation.execute();
            true
        } else {
            tracing::debug!(
                target: "horizon_lattice_connect::event_queue",
                receiver = ?self.receiver,
                "receiver destroyed before queued event ran, dropping"
            );
            self.invocation.discard();
            false
        }
    }
}

struct ThreadQueue {
    sender: Sender<QueuedEvent>,
    receiver: Receiver<QueuedEvent>,
}

impl ThreadQueue {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

enum QueueEntry {
    Open(Arc<ThreadQueue>),
    /// The thread has exited. Thread ids are never reused, so this stays.
    Exited,
}

static QUEUES: OnceLock<Mutex<HashMap<ThreadId, QueueEntry>>> = OnceLock::new();

fn queues() -> &'static Mutex<HashMap<ThreadId, QueueEntry>> {
    QUEUES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The queue of `thread`, or `None` once the thread has exited.
fn queue_for(thread: ThreadId) -> Option<Arc<ThreadQueue>> {
    match queues()
        .lock()
        .entry(thread)
        .or_insert_with(|| QueueEntry::Open(Arc::new(ThreadQueue::new())))
    {
        QueueEntry::Open(queue) => Some(queue.clone()),
        QueueEntry::Exited => None,
    }
}

/// Marks the calling thread's queue exited when the thread exits.
struct QueueOwner {
    thread: ThreadId,
}

impl Drop for QueueOwner {
    fn drop(&mut self) {
        let previous = queues().lock().insert(self.thread, QueueEntry::Exited);
        if let Some(QueueEntry::Open(queue)) = previous {
            let mut dropped = 0usize;
            while let Ok(event) = queue.receiver.try_recv() {
                event.invocation.discard();
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(
                    target: "horizon_lattice_connect::event_queue",
                    dropped,
                    "thread exited with queued events, dropping"
                );
            }
        }
    }
}

thread_local! {
    static QUEUE_OWNER: QueueOwner = QueueOwner {
        thread: std::thread::current().id(),
    };
}

fn current_queue() -> Arc<ThreadQueue> {
    // Registering the owner is best effort: during thread teardown the
    // thread-local may already be gone, and the thread then only sees a
    // private empty queue.
    let _ = QUEUE_OWNER.try_with(|_| ());
    queue_for(std::thread::current().id()).unwrap_or_else(|| Arc::new(ThreadQueue::new()))
}

/// Give the calling thread its queue now, so that anything posted to it after
/// it exits is dropped instead of waiting forever.
pub(crate) fn attach_current_thread() {
    let _ = current_queue();
}

/// Post an event to `thread`'s queue.
///
/// Returns `false` if `thread` has exited; the event is dropped, which wakes
/// a blocked emitter.
pub(crate) fn post(thread: ThreadId, event: QueuedEvent) -> bool {
    let Some(queue) = queue_for(thread) else {
        tracing::debug!(
            target: "horizon_lattice_connect::event_queue",
            receiver = ?event.receiver,
            thread = ?thread,
            "receiver thread has exited, dropping queued event"
        );
        event.invocation.discard();
        return false;
    };
    // If the thread exits between the lookup and the send, the queue is no
    // longer in the map and the event is dropped together with it.
    if let Err(err) = queue.sender.send(event) {
        err.into_inner().invocation.discard();
        return false;
    }
    true
}

/// Run every event currently queued for the calling thread.
///
/// Returns the number of slot invocations that ran.
pub fn process_events() -> usize {
    let queue = current_queue();
    let mut ran = 0;
    while let Ok(event) = queue.receiver.try_recv() {
        if event.run() {
            ran += 1;
        }
    }
    ran
}

/// Run queued events as they arrive until `timeout` has elapsed.
///
/// Returns the number of slot invocations that ran.
pub fn process_events_for(timeout: Duration) -> usize {
    let queue = current_queue();
    let deadline = Instant::now() + timeout;
    let mut ran = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match queue.receiver.recv_timeout(remaining) {
            Ok(event) => {
                if event.run() {
                    ran += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    ran
}

/// Number of events waiting in the calling thread's queue.
pub fn pending_events() -> usize {
    current_queue().receiver.len()
}

/// Drop every event waiting in the calling thread's queue without running it.
///
/// Returns the number of events dropped.
pub fn discard_pending() -> usize {
    let queue = current_queue();
    let mut dropped = 0;
    while let Ok(event) = queue.receiver.try_recv() {
        event.invocation.discard();
        dropped += 1;
    }
    dropped
}
