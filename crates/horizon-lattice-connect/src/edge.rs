//! Connections between one emitter signal and one receiver slot.
//!
//! An [`Edge`] is owned jointly by two lists: the emitter's per-signal
//! [`EdgeList`](crate::table::EdgeList) and the receiver's inbound list. Each
//! membership is one credit; the edge starts with two and is freed when both
//! have been released. Unlinking an edge from a list never touches its `next`
//! link, so an emission that is standing on the edge can still move on.
//! The `prev` link is writer-only and weak, so it never keeps an edge alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use slotmap::new_key_type;

use crate::meta::{ArgType, MetaCall, Payload, SignalArgs};
use crate::object::{ConnectionState, ObjectId};

new_key_type! {
    /// Handle to one connection.
    ///
    /// Handles are generation-checked: once the connection has been fully
    /// released, the handle no longer resolves and disconnecting it again is
    /// a harmless no-op.
    ///
    /// # Related
    ///
    /// - [`ConnectionRegistry::connect`](crate::ConnectionRegistry::connect) - Returns a `ConnectionId`
    /// - [`ConnectionRegistry::disconnect`](crate::ConnectionRegistry::disconnect) - Removes a connection by ID
    /// - [`ConnectionGuard`](crate::ConnectionGuard) - RAII alternative that auto-disconnects
    pub struct ConnectionId;
}

/// Specifies how a connected slot is invoked when the signal is emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Direct if emitter and receiver are owned by the same thread when the
    /// connection is made, Queued otherwise.
    #[default]
    Auto,

    /// Invoke the slot immediately on the emitting thread, whichever thread
    /// owns the receiver.
    Direct,

    /// Copy the arguments and post the invocation to the receiver's thread.
    /// The emitter does not wait.
    Queued,

    /// Like Queued, but the emitting thread blocks until the receiver's
    /// thread has run the slot.
    ///
    /// Emitting from the receiver's own thread is refused with
    /// [`ConnectError::SameThreadBlockingDeadlock`](crate::ConnectError::SameThreadBlockingDeadlock).
    BlockingQueued,
}

impl ConnectionType {
    /// Resolve `Auto` against the emitter's and receiver's owning threads.
    pub(crate) fn resolve(self, emitter_thread: ThreadId, receiver_thread: ThreadId) -> Self {
        match self {
            Self::Auto if emitter_thread == receiver_thread => Self::Direct,
            Self::Auto => Self::Queued,
            other => other,
        }
    }

    /// Whether this mode posts to the receiver's thread.
    pub(crate) fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::BlockingQueued)
    }
}

/// Type-erased slot body.
pub type SlotFn = Arc<dyn Fn(&dyn Payload) + Send + Sync>;

/// What a connection invokes.
#[derive(Clone)]
pub enum Slot {
    /// An invokable method of the receiver, by absolute method index.
    Method(usize),
    /// A callable whose argument list is checked against the signal.
    Callable {
        /// The slot body.
        invoke: SlotFn,
        /// Arguments the callable expects.
        arg_types: Arc<[ArgType]>,
    },
    /// A pre-type-erased callable, connected without argument checks.
    Erased(SlotFn),
}

impl Slot {
    /// A method slot.
    pub fn method(index: usize) -> Self {
        Self::Method(index)
    }

    /// A typed callable taking the signal's full argument tuple.
    pub fn new<A, F>(slot: F) -> Self
    where
        A: SignalArgs,
        F: Fn(&A) + Send + Sync + 'static,
    {
        Self::Callable {
            invoke: Arc::new(move |args: &dyn Payload| {
                if let Some(args) = args.as_any().downcast_ref::<A>() {
                    slot(args);
                }
            }),
            arg_types: A::arg_types().into(),
        }
    }

    /// A callable that ignores the signal's arguments.
    pub fn notify<F>(slot: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::Callable {
            invoke: Arc::new(move |_: &dyn Payload| slot()),
            arg_types: Arc::from(Vec::new()),
        }
    }

    /// A pre-type-erased callable; the caller takes responsibility for
    /// interpreting the payload.
    pub fn erased<F>(slot: F) -> Self
    where
        F: Fn(&dyn Payload) + Send + Sync + 'static,
    {
        Self::Erased(Arc::new(slot))
    }

    /// Whether two slots invoke the same target.
    pub(crate) fn same_target(&self, other: &Slot) -> bool {
        match (self, other) {
            (Self::Method(a), Self::Method(b)) => a == b,
            (Self::Callable { invoke: a, .. }, Self::Callable { invoke: b, .. })
            | (Self::Erased(a), Self::Erased(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Run the slot body.
    pub(crate) fn invoke(&self, handler: Option<&Arc<dyn MetaCall>>, args: &dyn Payload) {
        match self {
            Self::Method(index) => {
                if let Some(handler) = handler {
                    handler.meta_call(*index, args);
                }
            }
            Self::Callable { invoke, .. } | Self::Erased(invoke) => invoke(args),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(index) => write!(f, "Method({index})"),
            Self::Callable { arg_types, .. } => {
                write!(f, "Callable{}", crate::meta::format_arg_types(arg_types))
            }
            Self::Erased(_) => f.write_str("Erased"),
        }
    }
}

/// Lifecycle of an edge. There is no way back to `Connected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EdgeState {
    /// Linked into both lists and deliverable.
    Connected = 0,
    /// Unlinked; at least one credit still outstanding.
    Disconnecting = 1,
    /// Both credits released.
    Freed = 2,
}

impl EdgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connected,
            1 => Self::Disconnecting,
            _ => Self::Freed,
        }
    }
}

/// Sentinel for an empty receiver field. Occupied slotmap keys always carry
/// an odd version, so no live key encodes to zero.
const NO_RECEIVER: u64 = 0;

/// One sender-signal to receiver-slot binding.
pub(crate) struct Edge {
    pub(crate) id: ConnectionId,
    pub(crate) emitter: ObjectId,
    pub(crate) emitter_state: Weak<ConnectionState>,
    receiver: AtomicU64,
    pub(crate) receiver_state: Weak<ConnectionState>,
    pub(crate) receiver_thread: ThreadId,
    pub(crate) slot: Slot,
    pub(crate) signal_index: usize,
    /// Delivery mode with `Auto` already resolved.
    pub(crate) mode: ConnectionType,
    pub(crate) single_shot: bool,
    /// Claimed by the one emission allowed to deliver a single-shot edge.
    fired: AtomicBool,
    credits: AtomicU8,
    state: AtomicU8,
    /// Next edge of the same signal. Left intact when this edge is unlinked.
    pub(crate) next: ArcSwapOption<Edge>,
    /// Previous edge of the same signal; empty at the head. Only touched
    /// under the emitter's write lock.
    pub(crate) prev: Mutex<Weak<Edge>>,
    /// Set while the edge sits in its emitter's list.
    pub(crate) linked: AtomicBool,
}

/// Everything needed to build an [`Edge`] apart from its handle.
pub(crate) struct EdgeSpec {
    pub(crate) emitter: Arc<ConnectionState>,
    pub(crate) receiver: Arc<ConnectionState>,
    pub(crate) slot: Slot,
    pub(crate) signal_index: usize,
    pub(crate) mode: ConnectionType,
    pub(crate) single_shot: bool,
}

impl Edge {
    pub(crate) fn new(id: ConnectionId, spec: &EdgeSpec) -> Self {
        Self {
            id,
            emitter: spec.emitter.id,
            emitter_state: Arc::downgrade(&spec.emitter),
            receiver: AtomicU64::new(spec.receiver.id.as_raw()),
            receiver_state: Arc::downgrade(&spec.receiver),
            receiver_thread: spec.receiver.affinity.thread_id(),
            slot: spec.slot.clone(),
            signal_index: spec.signal_index,
            mode: spec.mode,
            single_shot: spec.single_shot,
            fired: AtomicBool::new(false),
            credits: AtomicU8::new(2),
            state: AtomicU8::new(EdgeState::Connected as u8),
            next: ArcSwapOption::empty(),
            prev: Mutex::new(Weak::new()),
            linked: AtomicBool::new(false),
        }
    }

    /// The receiver, or `None` once it has been cleared.
    pub(crate) fn receiver(&self) -> Option<ObjectId> {
        match self.receiver.load(Ordering::Acquire) {
            NO_RECEIVER => None,
            raw => ObjectId::from_raw(raw),
        }
    }

    /// Clear the receiver field without unlinking the edge. Traversals that
    /// reach the edge afterwards skip it.
    pub(crate) fn mark_receiver_gone(&self) {
        self.receiver.store(NO_RECEIVER, Ordering::Release);
    }

    pub(crate) fn state(&self) -> EdgeState {
        EdgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == EdgeState::Connected
    }

    /// Move from `Connected` to `Disconnecting`. Only one caller wins.
    pub(crate) fn begin_disconnect(&self) -> bool {
        self.state
            .compare_exchange(
                EdgeState::Connected as u8,
                EdgeState::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Release one credit. Returns `true` when this released the last one.
    pub(crate) fn release(&self) -> bool {
        let previous = self.credits.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "edge credit released twice");
        if previous == 1 {
            self.state.store(EdgeState::Freed as u8, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Outstanding credits.
    pub(crate) fn credits(&self) -> u8 {
        self.credits.load(Ordering::Acquire)
    }

    /// Claim the single delivery of a single-shot edge.
    pub(crate) fn claim_shot(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    /// Give the shot back after a delivery that did not happen.
    pub(crate) fn unclaim_shot(&self) {
        self.fired.store(false, Ordering::Release);
    }
}

impl Drop for Edge {
    fn drop(&mut self) {
        // Unlinked edges keep their `next` link, so a retired table can be the
        // last owner of a long chain. Unwind it iteratively.
        let mut next = self.next.swap(None);
        while let Some(edge) = next {
            next = match Arc::try_unwrap(edge) {
                Ok(edge) => edge.next.swap(None),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("emitter", &self.emitter)
            .field("receiver", &self.receiver())
            .field("signal_index", &self.signal_index)
            .field("slot", &self.slot)
            .field("mode", &self.mode)
            .field("single_shot", &self.single_shot)
            .field("state", &self.state())
            .field("credits", &self.credits())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::meta::MetaObject;
    use slotmap::SlotMap;

    pub(crate) fn test_edge() -> (Arc<ConnectionState>, Arc<Edge>) {
        let meta = MetaObject::builder("Probe").signal::<(i32,)>("fired").build();
        let mut objects: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let object = objects.insert(());
        let state = Arc::new(ConnectionState::new(
            object,
            meta,
            None,
            crate::thread_check::ThreadAffinity::current(),
        ));
        let spec = EdgeSpec {
            emitter: state.clone(),
            receiver: state.clone(),
            slot: Slot::notify(|| {}),
            signal_index: 0,
            mode: ConnectionType::Direct,
            single_shot: false,
        };
        let mut edges: SlotMap<ConnectionId, ()> = SlotMap::with_key();
        let edge = Arc::new(Edge::new(edges.insert(()), &spec));
        (state, edge)
    }

    #[test]
    fn test_auto_resolution() {
        let here = std::thread::current().id();
        let there = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();

        assert_eq!(ConnectionType::Auto.resolve(here, here), ConnectionType::Direct);
        assert_eq!(ConnectionType::Auto.resolve(here, there), ConnectionType::Queued);
        assert_eq!(
            ConnectionType::BlockingQueued.resolve(here, here),
            ConnectionType::BlockingQueued
        );
        assert_eq!(ConnectionType::Direct.resolve(here, there), ConnectionType::Direct);
    }

    #[test]
    fn test_two_credit_lifecycle() {
        let (_state, edge) = test_edge();
        assert_eq!(edge.state(), EdgeState::Connected);
        assert_eq!(edge.credits(), 2);

        assert!(edge.begin_disconnect());
        assert!(!edge.begin_disconnect());
        assert_eq!(edge.state(), EdgeState::Disconnecting);

        assert!(!edge.release());
        assert_eq!(edge.state(), EdgeState::Disconnecting);
        assert!(edge.release());
        assert_eq!(edge.state(), EdgeState::Freed);
    }

    #[test]
    fn test_mark_receiver_gone() {
        let (state, edge) = test_edge();
        assert_eq!(edge.receiver(), Some(state.id));
        edge.mark_receiver_gone();
        assert_eq!(edge.receiver(), None);
        // Clearing the receiver does not unlink or disconnect.
        assert!(edge.is_connected());
    }

    #[test]
    fn test_dropping_long_chain_does_not_recurse() {
        let (state, template) = test_edge();
        let mut keys: SlotMap<ConnectionId, ()> = SlotMap::with_key();
        let spec = EdgeSpec {
            emitter: state.clone(),
            receiver: state,
            slot: template.slot.clone(),
            signal_index: 0,
            mode: ConnectionType::Direct,
            single_shot: false,
        };

        let head = Arc::new(Edge::new(keys.insert(()), &spec));
        let mut tail = head.clone();
        for _ in 0..200_000 {
            let edge = Arc::new(Edge::new(keys.insert(()), &spec));
            tail.next.store(Some(edge.clone()));
            tail = edge;
        }
        drop(tail);
        drop(head);
    }

    #[test]
    fn test_single_shot_claim() {
        let (_state, edge) = test_edge();
        assert!(edge.claim_shot());
        assert!(!edge.claim_shot());
        edge.unclaim_shot();
        assert!(edge.claim_shot());
    }

    #[test]
    fn test_typed_slot_downcasts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let slot = Slot::new(move |&(value,): &(i32,)| seen_clone.lock().push(value));

        slot.invoke(None, &(5,));
        // A payload of another type is ignored rather than misread.
        slot.invoke(None, &("five".to_string(),));

        assert_eq!(*seen.lock(), vec![5]);
    }

    #[test]
    fn test_same_target() {
        let a = Slot::notify(|| {});
        let b = a.clone();
        let c = Slot::notify(|| {});
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
        assert!(Slot::method(3).same_target(&Slot::method(3)));
        assert!(!Slot::method(3).same_target(&Slot::method(4)));
    }
}
