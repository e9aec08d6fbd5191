//! Signal/slot connection registry for Horizon Lattice.
//!
//! This crate provides the machinery that lets objects publish typed events
//! ("signals") to any number of dynamically connected endpoints ("slots"),
//! across threads, while objects on either end may be destroyed at any time:
//!
//! - **Connection Registry**: Connect, disconnect, emit and object teardown
//! - **Edge Tables**: Per-object, per-signal fan-out lists that emission walks
//!   without taking locks
//! - **Dispatch**: Direct, Queued, BlockingQueued and Auto delivery
//! - **Event Queues**: One cooperative queue per receiver-owning thread
//! - **Deferred Reclamation**: Retired tables and edges are reclaimed only
//!   once no emission can still be reading them
//! - **Meta Descriptions**: Class signals, invokable methods and argument
//!   type checking
//!
//! # Example
//!
//! ```
//! use horizon_lattice_connect::{ConnectionRegistry, ConnectOptions, ConnectionType, Slot};
//! use horizon_lattice_connect::meta::MetaObject;
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//!
//! let registry = ConnectionRegistry::new();
//! let meta = MetaObject::builder("Downloader")
//!     .signal::<(u64, u64)>("progress")
//!     .signal::<()>("finished")
//!     .build();
//! let downloader = registry.create_object(meta, None);
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let log_clone = log.clone();
//! registry
//!     .connect(
//!         downloader,
//!         0,
//!         None,
//!         Slot::new(move |&(done, total): &(u64, u64)| log_clone.lock().push(done * 100 / total)),
//!         ConnectionType::Direct,
//!     )
//!     .unwrap();
//!
//! // Fires once, then disconnects itself.
//! registry
//!     .connect(
//!         downloader,
//!         1,
//!         None,
//!         Slot::notify(|| println!("done")),
//!         ConnectOptions::new().mode(ConnectionType::Direct).single_shot(),
//!     )
//!     .unwrap();
//!
//! registry.emit(downloader, 0, (50u64, 200u64)).unwrap();
//! registry.emit(downloader, 1, ()).unwrap();
//! assert_eq!(*log.lock(), vec![25]);
//! assert!(!registry.is_signal_connected(downloader, 1));
//! ```
//!
//! # Cross-thread Delivery
//!
//! Queued connections post to the event queue of the receiver's owning
//! thread, which runs them from [`event_queue::process_events`] or
//! [`event_queue::process_events_for`]. See [`event_queue`] for an example.

mod activation;
mod config;
mod dispatch;
mod edge;
mod error;
pub mod event_queue;
mod invocation;
pub mod logging;
pub mod meta;
mod object;
mod orphan;
mod registry;
mod table;
pub mod thread_check;

pub use activation::ActivationFrame;
pub use config::{DEFAULT_TABLE_BLOCK, RegistryBuilder, RegistryConfig};
pub use edge::{ConnectionId, ConnectionType, Slot, SlotFn};
pub use error::{ConnectError, ConnectResult};
pub use event_queue::{pending_events, process_events, process_events_for};
pub use logging::{ConnectionDump, DumpOptions, DumpStyle};
pub use meta::{
    ArgType, MetaCall, MetaObject, MethodMeta, Payload, SignalArgs, SignalMeta, register_meta_type,
};
pub use object::{ObjectBase, ObjectId};
pub use registry::{
    ConnectOptions, ConnectionGuard, ConnectionRegistry, EmitReport, RegistryStats,
    global_registry,
};
pub use thread_check::ThreadAffinity;
