//! Delivery of one emission along one edge.
//!
//! The emit loop hands every live edge to [`dispatch`], which acts on the
//! edge's resolved [`ConnectionType`]:
//!
//! - `Direct` runs the slot on the emitting thread inside an activation frame.
//! - `Queued` copies the payload and posts it to the receiver's thread. If
//!   that thread has exited, the delivery is skipped.
//! - `BlockingQueued` posts like `Queued` and then waits for the receiver's
//!   thread to run it. Emitting from the receiver's own thread is refused
//!   before anything is posted.

use std::sync::Arc;

use crate::activation::FrameGuard;
use crate::config::RegistryConfig;
use crate::edge::{ConnectionType, Edge};
use crate::error::ConnectError;
use crate::event_queue::{self, QueuedEvent};
use crate::invocation::{Completion, CompletionHandle, QueuedInvocation, completion_pair};
use crate::meta::Payload;
use crate::object::ConnectionState;

/// Outcome of handing one edge to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The slot ran, on this thread or (blocking) on the receiver's.
    Invoked,
    /// The invocation was posted to the receiver's thread.
    Posted,
    /// The receiver went away before the slot could run.
    Skipped,
    /// The delivery was refused.
    Rejected(ConnectError),
}

impl Delivery {
    /// Whether this counts as a delivery for single-shot purposes.
    pub(crate) fn is_delivered(&self) -> bool {
        matches!(self, Self::Invoked | Self::Posted)
    }
}

pub(crate) fn dispatch(
    edge: &Edge,
    receiver: &Arc<ConnectionState>,
    args: &dyn Payload,
    config: &RegistryConfig,
) -> Delivery {
    debug_assert_ne!(edge.mode, ConnectionType::Auto, "Auto is resolved at connect time");
    match edge.mode {
        ConnectionType::Direct => invoke_direct(edge, receiver, args),
        ConnectionType::Auto | ConnectionType::Queued => {
            if post_queued(edge, receiver, args, None) {
                Delivery::Posted
            } else {
                Delivery::Skipped
            }
        }
        ConnectionType::BlockingQueued => post_blocking(edge, receiver, args, config),
    }
}

fn invoke_direct(edge: &Edge, receiver: &Arc<ConnectionState>, args: &dyn Payload) -> Delivery {
    tracing::trace!(
        target: "horizon_lattice_connect::dispatch",
        connection = ?edge.id,
        "direct invocation"
    );
    let _frame = FrameGuard::enter(receiver.clone(), Some(edge.emitter), edge.signal_index);
    edge.slot.invoke(receiver.handler.as_ref(), args);
    Delivery::Invoked
}

fn post_queued(
    edge: &Edge,
    receiver: &Arc<ConnectionState>,
    args: &dyn Payload,
    completion: Option<CompletionHandle>,
) -> bool {
    let slot = edge.slot.clone();
    let emitter = edge.emitter;
    let emitter_state = edge.emitter_state.clone();
    let target = edge.receiver_state.clone();
    let signal_index = edge.signal_index;
    let payload = args.clone_payload();

    let invoke = move || {
        let Some(receiver) = target.upgrade() else {
            return;
        };
        let emitter = emitter_state
            .upgrade()
            .filter(|state| !state.is_destroyed())
            .map(|_| emitter);
        let _frame = FrameGuard::enter(receiver.clone(), emitter, signal_index);
        slot.invoke(receiver.handler.as_ref(), &*payload);
    };

    let invocation = match completion {
        Some(handle) => QueuedInvocation::with_completion(invoke, handle),
        None => QueuedInvocation::new(invoke),
    };

    tracing::trace!(
        target: "horizon_lattice_connect::dispatch",
        connection = ?edge.id,
        thread = ?edge.receiver_thread,
        "posting queued invocation"
    );
    event_queue::post(
        edge.receiver_thread,
        QueuedEvent {
            receiver: receiver.id,
            target: Arc::downgrade(receiver),
            invocation,
        },
    )
}

fn post_blocking(
    edge: &Edge,
    receiver: &Arc<ConnectionState>,
    args: &dyn Payload,
    config: &RegistryConfig,
) -> Delivery {
    if std::thread::current().id() == edge.receiver_thread {
        tracing::warn!(
            target: "horizon_lattice_connect::dispatch",
            connection = ?edge.id,
            "blocking queued delivery to a receiver on the emitting thread, refusing"
        );
        return Delivery::Rejected(ConnectError::SameThreadBlockingDeadlock);
    }

    let (handle, waiter) = completion_pair();
    if !post_queued(edge, receiver, args, Some(handle)) {
        return Delivery::Skipped;
    }

    let outcome = match config.blocking_timeout {
        Some(timeout) => waiter.wait_timeout(timeout),
        None => waiter.wait(),
    };

    match outcome {
        Completion::Delivered => Delivery::Invoked,
        Completion::Dropped => Delivery::Skipped,
        Completion::Pending => {
            tracing::warn!(
                target: "horizon_lattice_connect::dispatch",
                connection = ?edge.id,
                "blocking queued delivery timed out"
            );
            Delivery::Rejected(ConnectError::BlockingTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::tests::test_edge;

    #[test]
    fn test_delivery_counts_for_single_shot() {
        assert!(Delivery::Invoked.is_delivered());
        assert!(Delivery::Posted.is_delivered());
        assert!(!Delivery::Skipped.is_delivered());
        assert!(!Delivery::Rejected(ConnectError::BlockingTimeout).is_delivered());
    }

    #[test]
    fn test_direct_pushes_frame() {
        let (state, edge) = test_edge();
        assert_eq!(edge.mode, ConnectionType::Direct);

        let delivery = dispatch(&edge, &state, &(1i32,), &RegistryConfig::default());
        assert_eq!(delivery, Delivery::Invoked);
        // The frame is gone once the slot has returned.
        assert_eq!(state.activations.depth(), 0);
    }

    #[test]
    fn test_blocking_same_thread_rejected() {
        let (state, edge) = test_edge();
        let blocking = Edge::new(
            edge.id,
            &crate::edge::EdgeSpec {
                emitter: state.clone(),
                receiver: state.clone(),
                slot: edge.slot.clone(),
                signal_index: 0,
                mode: ConnectionType::BlockingQueued,
                single_shot: false,
            },
        );

        let delivery = dispatch(&blocking, &state, &(1i32,), &RegistryConfig::default());
        assert_eq!(
            delivery,
            Delivery::Rejected(ConnectError::SameThreadBlockingDeadlock)
        );
        assert_eq!(event_queue::pending_events(), 0);
    }

    #[test]
    fn test_exited_receiver_thread_skips() {
        let (state, edge) = test_edge();
        let gone = std::thread::spawn(|| {
            event_queue::attach_current_thread();
            std::thread::current().id()
        })
        .join()
        .unwrap();
        let receiver = Arc::new(ConnectionState::new(
            state.id,
            state.meta.clone(),
            None,
            crate::thread_check::ThreadAffinity::for_thread(gone),
        ));

        for mode in [ConnectionType::Queued, ConnectionType::BlockingQueued] {
            let queued = Edge::new(
                edge.id,
                &crate::edge::EdgeSpec {
                    emitter: state.clone(),
                    receiver: receiver.clone(),
                    slot: edge.slot.clone(),
                    signal_index: 0,
                    mode,
                    single_shot: false,
                },
            );
            let delivery = dispatch(&queued, &receiver, &(1i32,), &RegistryConfig::default());
            assert_eq!(delivery, Delivery::Skipped);
        }
    }
}
