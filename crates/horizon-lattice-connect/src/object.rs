//! Per-object connection state.
//!
//! Every object taking part in connections is registered with a
//! [`ConnectionRegistry`] and identified by an [`ObjectId`]. The registry keeps
//! one `ConnectionState` per object: its outgoing edge table, the edges for
//! which it is the receiver, its orphan chain and its activation frames.
//!
//! [`ObjectBase`] ties that registration to a Rust value: dropping it runs the
//! registry's teardown hook before anything else of the owning struct is
//! dropped, provided it is declared as the struct's first field.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use slotmap::{SecondaryMap, new_key_type};

use crate::activation::ActivationStack;
use crate::edge::{ConnectionId, Edge};
use crate::error::ConnectResult;
use crate::meta::{MetaCall, MetaObject};
use crate::orphan::{Orphan, OrphanChain};
use crate::registry::ConnectionRegistry;
use crate::table::EdgeTable;
use crate::thread_check::ThreadAffinity;

new_key_type! {
    /// A unique identifier for an object in a [`ConnectionRegistry`].
    ///
    /// `ObjectId`s are generation-checked: once the object has been destroyed
    /// the ID no longer resolves, even if its slot is reused.
    pub struct ObjectId;
}

impl ObjectId {
    /// Convert the ObjectId to a raw u64 value.
    ///
    /// The raw value can be converted back using [`ObjectId::from_raw`].
    #[inline]
    pub fn as_raw(self) -> u64 {
        use slotmap::Key;
        self.data().as_ffi()
    }

    /// Create an ObjectId from a raw u64 value.
    ///
    /// This does not check that the object exists.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let key_data = slotmap::KeyData::from_ffi(raw);
        Some(Self::from(key_data))
    }
}

/// Everything the registry knows about one object.
pub(crate) struct ConnectionState {
    pub(crate) id: ObjectId,
    pub(crate) meta: Arc<MetaObject>,
    pub(crate) handler: Option<Arc<dyn MetaCall>>,
    pub(crate) affinity: ThreadAffinity,
    /// Outgoing edges, one list per signal index.
    table: ArcSwap<EdgeTable>,
    /// Serialises growth and list mutation of `table`.
    pub(crate) write_lock: Mutex<()>,
    /// Edges for which this object is the receiver, keyed for O(1) removal.
    pub(crate) inbound: Mutex<SecondaryMap<ConnectionId, Arc<Edge>>>,
    live_edges: AtomicUsize,
    pub(crate) orphans: OrphanChain,
    active_emissions: AtomicUsize,
    pub(crate) activations: ActivationStack,
    destroyed: AtomicBool,
    signals_blocked: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn new(
        id: ObjectId,
        meta: Arc<MetaObject>,
        handler: Option<Arc<dyn MetaCall>>,
        affinity: ThreadAffinity,
    ) -> Self {
        Self {
            id,
            meta,
            handler,
            affinity,
            table: ArcSwap::from_pointee(EdgeTable::empty()),
            write_lock: Mutex::new(()),
            inbound: Mutex::new(SecondaryMap::new()),
            live_edges: AtomicUsize::new(0),
            orphans: OrphanChain::default(),
            active_emissions: AtomicUsize::new(0),
            activations: ActivationStack::default(),
            destroyed: AtomicBool::new(false),
            signals_blocked: AtomicBool::new(false),
        }
    }

    /// The current table. Emission reads this once and walks it without
    /// further synchronisation.
    pub(crate) fn table(&self) -> Arc<EdgeTable> {
        self.table.load_full()
    }

    /// Make sure the table can hold `signal_index`, growing it if needed.
    ///
    /// Caller holds `write_lock`. The replaced table is retired to the orphan
    /// chain rather than dropped.
    pub(crate) fn ensure_capacity(&self, signal_index: usize, block: usize) -> Arc<EdgeTable> {
        let current = self.table.load_full();
        if signal_index < current.capacity() {
            return current;
        }

        let grown = Arc::new(current.grown(signal_index, block));
        self.table.store(grown.clone());
        tracing::debug!(
            target: "horizon_lattice_connect::registry",
            object = ?self.id,
            old_capacity = current.capacity(),
            new_capacity = grown.capacity(),
            "grew edge table"
        );
        if current.capacity() > 0 {
            self.orphans.push(Orphan::Table(current));
        }
        grown
    }

    pub(crate) fn live_edges(&self) -> usize {
        self.live_edges.load(Ordering::Acquire)
    }

    pub(crate) fn edge_linked(&self) {
        self.live_edges.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn edge_unlinked(&self) {
        self.live_edges.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn enter_emission(&self) {
        self.active_emissions.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of emissions still in flight.
    pub(crate) fn leave_emission(&self) -> usize {
        self.active_emissions.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn active_emissions(&self) -> usize {
        self.active_emissions.load(Ordering::SeqCst)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Flag the object as destroyed. Returns `false` if it already was.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn signals_blocked(&self) -> bool {
        self.signals_blocked.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub(crate) fn set_signals_blocked(&self, blocked: bool) -> bool {
        self.signals_blocked.swap(blocked, Ordering::AcqRel)
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("class", &self.meta.class_name())
            .field("thread", &self.affinity.thread_id())
            .field("live_edges", &self.live_edges())
            .field("active_frames", &self.activations.depth())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Owning registration of an object.
///
/// Creating an `ObjectBase` registers an object; dropping it runs the
/// registry's teardown hook, disconnecting every edge the object takes part
/// in. Declare it as the first field of the owning struct so teardown runs
/// before the rest of the struct is dropped.
///
/// # Example
///
/// ```
/// use horizon_lattice_connect::{ConnectionRegistry, ObjectBase};
/// use horizon_lattice_connect::meta::MetaObject;
/// use std::sync::Arc;
///
/// let registry = Arc::new(ConnectionRegistry::new());
/// let meta = MetaObject::builder("Thermometer")
///     .signal::<(f64,)>("reading")
///     .build();
///
/// let id = {
///     let thermometer = ObjectBase::new(&registry, meta);
///     assert!(registry.is_alive(thermometer.id()));
///     thermometer.id()
/// };
/// assert!(!registry.is_alive(id));
/// ```
pub struct ObjectBase {
    id: ObjectId,
    registry: Arc<ConnectionRegistry>,
}

impl ObjectBase {
    /// Register an object owned by the calling thread.
    pub fn new(registry: &Arc<ConnectionRegistry>, meta: Arc<MetaObject>) -> Self {
        Self {
            id: registry.create_object(meta, None),
            registry: registry.clone(),
        }
    }

    /// Register an object with a method handler for method slots.
    pub fn with_handler(
        registry: &Arc<ConnectionRegistry>,
        meta: Arc<MetaObject>,
        handler: Arc<dyn MetaCall>,
    ) -> Self {
        Self {
            id: registry.create_object(meta, Some(handler)),
            registry: registry.clone(),
        }
    }

    /// Get the object's ID.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The registry this object lives in.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Emit one of this object's signals.
    pub fn emit<A: crate::meta::SignalArgs>(
        &self,
        signal_index: usize,
        args: A,
    ) -> ConnectResult<crate::registry::EmitReport> {
        self.registry.emit(self.id, signal_index, args)
    }

    /// The emitter whose signal is being delivered to this object on the
    /// calling thread, if any.
    pub fn sender(&self) -> Option<ObjectId> {
        self.registry.sender(self.id)
    }
}

impl Drop for ObjectBase {
    fn drop(&mut self) {
        // Already destroyed explicitly is fine.
        let _ = self.registry.destroy(self.id);
    }
}

impl fmt::Debug for ObjectBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBase").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_object_id_raw_round_trip() {
        let mut objects: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let id = objects.insert(());
        assert_ne!(id.as_raw(), 0);
        assert_eq!(ObjectId::from_raw(id.as_raw()), Some(id));
    }

    #[test]
    fn test_ensure_capacity_retires_old_table() {
        let mut objects: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let meta = MetaObject::builder("Wide").build();
        let state = ConnectionState::new(objects.insert(()), meta, None, ThreadAffinity::current());

        let first = state.ensure_capacity(0, 8);
        assert_eq!(first.capacity(), 8);
        // The empty initial table is not worth retiring.
        assert!(state.orphans.is_empty());

        let same = state.ensure_capacity(7, 8);
        assert!(Arc::ptr_eq(&first, &same));

        let grown = state.ensure_capacity(8, 8);
        assert_eq!(grown.capacity(), 16);
        assert_eq!(state.orphans.len(), 1);
        assert!(Arc::ptr_eq(&state.table(), &grown));
    }

    #[test]
    fn test_emission_counter() {
        let mut objects: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let meta = MetaObject::builder("Counter").build();
        let state = ConnectionState::new(objects.insert(()), meta, None, ThreadAffinity::current());

        state.enter_emission();
        state.enter_emission();
        assert_eq!(state.active_emissions(), 2);
        assert_eq!(state.leave_emission(), 1);
        assert_eq!(state.leave_emission(), 0);
    }

    #[test]
    fn test_destroyed_flag() {
        let mut objects: SlotMap<ObjectId, ()> = SlotMap::with_key();
        let meta = MetaObject::builder("Once").build();
        let state = ConnectionState::new(objects.insert(()), meta, None, ThreadAffinity::current());

        assert!(!state.is_destroyed());
        assert!(state.mark_destroyed());
        assert!(!state.mark_destroyed());
        assert!(state.is_destroyed());
    }
}
