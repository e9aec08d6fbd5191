//! The connection registry.
//!
//! [`ConnectionRegistry`] owns every object's connection state and every edge.
//! It is the single entry point for connecting, disconnecting, emitting and
//! tearing down objects.
//!
//! # Locking
//!
//! Three kinds of lock exist, always taken in this order:
//!
//! 1. an emitter's write lock (serialises its table growth and list edits),
//! 2. a receiver's inbound lock,
//! 3. the edge arena lock.
//!
//! No inbound lock is held while a write lock is taken. Emission takes none of
//! them: it reads the current table through an atomic pointer and follows
//! atomic `next` links.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_connect::{ConnectionRegistry, ConnectionType, Slot};
//! use horizon_lattice_connect::meta::MetaObject;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//!
//! let registry = ConnectionRegistry::new();
//! let meta = MetaObject::builder("Slider")
//!     .signal::<(i32,)>("value_changed")
//!     .build();
//! let slider = registry.create_object(meta.clone(), None);
//! let label = registry.create_object(meta, None);
//!
//! let total = Arc::new(AtomicI32::new(0));
//! let total_clone = total.clone();
//! let id = registry
//!     .connect(
//!         slider,
//!         0,
//!         Some(label),
//!         Slot::new(move |&(v,): &(i32,)| {
//!             total_clone.fetch_add(v, Ordering::SeqCst);
//!         }),
//!         ConnectionType::Direct,
//!     )
//!     .unwrap();
//!
//! registry.emit(slider, 0, (5,)).unwrap();
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//!
//! assert_eq!(registry.disconnect(id), Ok(true));
//! registry.emit(slider, 0, (5,)).unwrap();
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```

use std::any::TypeId;
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use crate::activation::ActivationFrame;
use crate::config::{RegistryBuilder, RegistryConfig};
use crate::dispatch::{Delivery, dispatch};
use crate::edge::{ConnectionId, ConnectionType, Edge, EdgeSpec, Slot};
use crate::error::{ConnectError, ConnectResult};
use crate::event_queue;
use crate::meta::{
    MetaCall, MetaObject, Payload, SignalArgs, SignalMeta, arg_types_compatible, format_arg_types,
};
use crate::object::{ConnectionState, ObjectId};
use crate::orphan::Orphan;
use crate::table::EdgeList;
use crate::thread_check::ThreadAffinity;

/// How a connection should behave.
///
/// A bare [`ConnectionType`] converts into options with the other flags off,
/// so `connect(.., ConnectionType::Queued)` works directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Delivery mode.
    pub mode: ConnectionType,
    /// Disconnect after the first successful delivery.
    pub single_shot: bool,
    /// Refuse to create a second identical connection.
    pub unique: bool,
}

impl ConnectOptions {
    /// Options with the default (`Auto`) mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delivery mode.
    pub fn mode(mut self, mode: ConnectionType) -> Self {
        self.mode = mode;
        self
    }

    /// Make the connection single-shot.
    pub fn single_shot(mut self) -> Self {
        self.single_shot = true;
        self
    }

    /// Make the connection unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl From<ConnectionType> for ConnectOptions {
    fn from(mode: ConnectionType) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// What one `emit` call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Slots run to completion, directly or through a blocking queued wait.
    pub invoked: usize,
    /// Invocations posted to receiver threads.
    pub posted: usize,
    /// Edges skipped because the receiver was gone.
    pub skipped: usize,
    /// Edges whose delivery was refused, with the reason.
    pub rejected: Vec<(ConnectionId, ConnectError)>,
}

impl EmitReport {
    /// Number of edges that were delivered or posted.
    pub fn delivered(&self) -> usize {
        self.invoked + self.posted
    }

    fn record(&mut self, id: ConnectionId, delivery: Delivery) {
        match delivery {
            Delivery::Invoked => self.invoked += 1,
            Delivery::Posted => self.posted += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Rejected(err) => self.rejected.push((id, err)),
        }
    }
}

/// Snapshot of registry occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered objects that have not been destroyed.
    pub objects: usize,
    /// Connected edges.
    pub live_edges: usize,
    /// Retired tables and edges awaiting reclamation.
    pub orphaned: usize,
}

/// The signal/slot connection registry.
///
/// See the [module documentation](self) for the locking discipline.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    objects: RwLock<SlotMap<ObjectId, Arc<ConnectionState>>>,
    edges: Mutex<SlotMap<ConnectionId, Arc<Edge>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create a registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with a custom configuration.
    pub fn with_config(mut config: RegistryConfig) -> Self {
        config.table_block = config.block();
        Self {
            config,
            objects: RwLock::new(SlotMap::with_key()),
            edges: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The configuration this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Register an object owned by the calling thread.
    ///
    /// `handler` is required for the object to be the receiver of
    /// [`Slot::Method`] connections.
    pub fn create_object(
        &self,
        meta: Arc<MetaObject>,
        handler: Option<Arc<dyn MetaCall>>,
    ) -> ObjectId {
        event_queue::attach_current_thread();
        self.insert_object(meta, handler, ThreadAffinity::current())
    }

    /// Register an object owned by `thread`. Queued deliveries to it are run
    /// by that thread's event processing. Once `thread` has exited after
    /// touching its queue, deliveries to the object are dropped.
    pub fn create_object_on(
        &self,
        meta: Arc<MetaObject>,
        handler: Option<Arc<dyn MetaCall>>,
        thread: ThreadId,
    ) -> ObjectId {
        self.insert_object(meta, handler, ThreadAffinity::for_thread(thread))
    }

    fn insert_object(
        &self,
        meta: Arc<MetaObject>,
        handler: Option<Arc<dyn MetaCall>>,
        affinity: ThreadAffinity,
    ) -> ObjectId {
        let class = meta.class_name().to_string();
        let id = self
            .objects
            .write()
            .insert_with_key(|id| Arc::new(ConnectionState::new(id, meta, handler, affinity)));
        tracing::trace!(
            target: "horizon_lattice_connect::registry",
            object = ?id,
            class = %class,
            thread = ?affinity.thread_id(),
            "object created"
        );
        id
    }

    /// Whether `object` is registered and its teardown has not run.
    pub fn is_alive(&self, object: ObjectId) -> bool {
        self.objects
            .read()
            .get(object)
            .is_some_and(|state| !state.is_destroyed())
    }

    /// The class description of a live object.
    pub fn meta_object(&self, object: ObjectId) -> Option<Arc<MetaObject>> {
        self.live_state(object).ok().map(|state| state.meta.clone())
    }

    pub(crate) fn live_state(&self, object: ObjectId) -> ConnectResult<Arc<ConnectionState>> {
        self.objects
            .read()
            .get(object)
            .filter(|state| !state.is_destroyed())
            .cloned()
            .ok_or(ConnectError::UseAfterObjectDestroyed)
    }

    pub(crate) fn object_states(&self) -> Vec<Arc<ConnectionState>> {
        self.objects.read().values().cloned().collect()
    }

    /// Run the teardown hook of `object`.
    ///
    /// Disconnects every outgoing and incoming edge, clears the emitter from
    /// any activation frame that names it and reclaims the object's orphan
    /// chain. Call this as the first step of destroying an object; it must
    /// run exactly once.
    ///
    /// # Errors
    ///
    /// [`ConnectError::UseAfterObjectDestroyed`] if the hook already ran.
    #[tracing::instrument(skip_all, target = "horizon_lattice_connect::registry", level = "trace")]
    pub fn destroy(&self, object: ObjectId) -> ConnectResult<()> {
        let state = self
            .objects
            .read()
            .get(object)
            .cloned()
            .ok_or(ConnectError::UseAfterObjectDestroyed)?;
        if !state.mark_destroyed() {
            return Err(ConnectError::UseAfterObjectDestroyed);
        }

        // Nothing can be appended once the flag is set, since connect checks
        // it under the same lock.
        let outgoing = {
            let _write = state.write_lock.lock();
            state.table().all_edges()
        };
        for edge in &outgoing {
            if let Some(receiver) = edge.receiver_state.upgrade() {
                receiver.activations.forget_emitter(object);
            }
            let _ = self.disconnect_edge(edge);
        }

        let incoming: Vec<Arc<Edge>> = state
            .inbound
            .lock()
            .drain()
            .map(|(_, edge)| edge)
            .collect();
        for edge in &incoming {
            edge.mark_receiver_gone();
            let _ = self.disconnect_edge(edge);
        }

        state.activations.clear();
        let reclaimed = self.reclaim_state(&state);
        self.objects.write().remove(object);

        tracing::debug!(
            target: "horizon_lattice_connect::registry",
            object = ?object,
            outgoing = outgoing.len(),
            incoming = incoming.len(),
            reclaimed,
            "object destroyed"
        );
        Ok(())
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Connect signal `signal_index` of `emitter` to `slot` on `receiver`.
    ///
    /// `options` is either a [`ConnectionType`] or full [`ConnectOptions`].
    /// `Auto` is resolved here, by comparing the owning threads of emitter
    /// and receiver.
    ///
    /// Without a receiver, callable slots run in the emitter's context;
    /// method slots and queued modes need a receiver.
    ///
    /// The connection is visible to every `emit` that starts after this
    /// returns, on any thread. A failed connect changes nothing.
    #[tracing::instrument(skip_all, target = "horizon_lattice_connect::connect", level = "trace")]
    pub fn connect(
        &self,
        emitter: ObjectId,
        signal_index: usize,
        receiver: Option<ObjectId>,
        slot: Slot,
        options: impl Into<ConnectOptions>,
    ) -> ConnectResult<ConnectionId> {
        let options = options.into();
        let emitter_state = self.live_state(emitter)?;
        let signal = emitter_state.meta.signal(signal_index).ok_or(
            ConnectError::InvalidSignalIndex {
                index: signal_index,
                count: emitter_state.meta.signal_count(),
            },
        )?;

        let receiver_state = match receiver {
            Some(receiver) => self.live_state(receiver)?,
            None if options.mode.is_queued() || matches!(slot, Slot::Method(_)) => {
                return Err(ConnectError::NullReceiver);
            }
            None => emitter_state.clone(),
        };

        check_slot(signal, &slot, &receiver_state)?;

        let mode = options.mode.resolve(
            emitter_state.affinity.thread_id(),
            receiver_state.affinity.thread_id(),
        );
        let spec = EdgeSpec {
            emitter: emitter_state.clone(),
            receiver: receiver_state.clone(),
            slot,
            signal_index,
            mode,
            single_shot: options.single_shot,
        };

        let _write = emitter_state.write_lock.lock();
        if emitter_state.is_destroyed() {
            return Err(ConnectError::UseAfterObjectDestroyed);
        }
        if options.unique && self.has_duplicate(&spec) {
            tracing::trace!(
                target: "horizon_lattice_connect::connect",
                emitter = ?emitter,
                signal = signal_index,
                "refusing duplicate unique connection"
            );
            return Err(ConnectError::DuplicateConnection);
        }

        let edge = {
            let mut inbound = receiver_state.inbound.lock();
            if receiver_state.is_destroyed() {
                return Err(ConnectError::UseAfterObjectDestroyed);
            }
            let edge = {
                let mut edges = self.edges.lock();
                let id = edges.insert_with_key(|id| Arc::new(Edge::new(id, &spec)));
                edges[id].clone()
            };
            inbound.insert(edge.id, edge.clone());
            edge
        };

        let table = emitter_state.ensure_capacity(signal_index, self.config.block());
        if let Some(list) = table.list(signal_index) {
            list.append(edge.clone());
            emitter_state.edge_linked();
        }

        tracing::trace!(
            target: "horizon_lattice_connect::connect",
            connection = ?edge.id,
            emitter = ?emitter,
            receiver = ?receiver_state.id,
            signal = %signal.signature(),
            mode = ?mode,
            "connected"
        );
        Ok(edge.id)
    }

    /// Connect a typed closure, with the `Auto` mode.
    pub fn connect_fn<A, F>(
        &self,
        emitter: ObjectId,
        signal_index: usize,
        receiver: Option<ObjectId>,
        slot: F,
    ) -> ConnectResult<ConnectionId>
    where
        A: SignalArgs,
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.connect(
            emitter,
            signal_index,
            receiver,
            Slot::new(slot),
            ConnectionType::Auto,
        )
    }

    /// Connect a signal to an invokable method of `receiver`.
    pub fn connect_method(
        &self,
        emitter: ObjectId,
        signal_index: usize,
        receiver: ObjectId,
        method_index: usize,
        options: impl Into<ConnectOptions>,
    ) -> ConnectResult<ConnectionId> {
        self.connect(
            emitter,
            signal_index,
            Some(receiver),
            Slot::method(method_index),
            options,
        )
    }

    /// Connect and return a guard that disconnects when dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use horizon_lattice_connect::{ConnectionRegistry, ConnectionType, Slot};
    /// use horizon_lattice_connect::meta::MetaObject;
    /// use std::sync::Arc;
    ///
    /// let registry = Arc::new(ConnectionRegistry::new());
    /// let meta = MetaObject::builder("Timer").signal::<()>("timeout").build();
    /// let timer = registry.create_object(meta, None);
    ///
    /// {
    ///     let _guard = registry
    ///         .connect_scoped(timer, 0, None, Slot::notify(|| {}), ConnectionType::Direct)
    ///         .unwrap();
    ///     assert_eq!(registry.connection_count(timer, 0), 1);
    /// }
    /// assert_eq!(registry.connection_count(timer, 0), 0);
    /// ```
    pub fn connect_scoped(
        self: &Arc<Self>,
        emitter: ObjectId,
        signal_index: usize,
        receiver: Option<ObjectId>,
        slot: Slot,
        options: impl Into<ConnectOptions>,
    ) -> ConnectResult<ConnectionGuard> {
        let id = self.connect(emitter, signal_index, receiver, slot, options)?;
        Ok(ConnectionGuard {
            registry: self.clone(),
            id: Some(id),
        })
    }

    /// Whether an identical connected edge already exists. Caller holds the
    /// emitter's write lock.
    fn has_duplicate(&self, spec: &EdgeSpec) -> bool {
        let table = spec.emitter.table();
        table.list(spec.signal_index).is_some_and(|list| {
            list.edges().iter().any(|edge| {
                edge.is_connected()
                    && edge.receiver() == Some(spec.receiver.id)
                    && edge.slot.same_target(&spec.slot)
            })
        })
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    /// Disconnect one connection.
    ///
    /// Returns `Ok(false)` if the connection is already disconnected or was
    /// never valid; a repeated disconnect is harmless.
    pub fn disconnect(&self, id: ConnectionId) -> ConnectResult<bool> {
        let edge = self.edges.lock().get(id).cloned();
        let Some(edge) = edge else {
            return Ok(false);
        };
        match self.disconnect_edge(&edge) {
            Ok(()) => Ok(true),
            Err(ConnectError::DoubleDisconnect) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Disconnect every connection of `emitter` matching the filters.
    ///
    /// `None` matches anything: all signals, all receivers, all slots.
    /// Returns the number of connections removed.
    pub fn disconnect_matching(
        &self,
        emitter: ObjectId,
        signal_index: Option<usize>,
        receiver: Option<ObjectId>,
        slot: Option<&Slot>,
    ) -> ConnectResult<usize> {
        let state = self.live_state(emitter)?;
        if let Some(index) = signal_index
            && state.meta.signal(index).is_none()
        {
            return Err(ConnectError::InvalidSignalIndex {
                index,
                count: state.meta.signal_count(),
            });
        }

        let table = state.table();
        let candidates = match signal_index {
            Some(index) => table.list(index).map(EdgeList::edges).unwrap_or_default(),
            None => table.all_edges(),
        };

        let removed = candidates
            .iter()
            .filter(|edge| receiver.is_none_or(|r| edge.receiver() == Some(r)))
            .filter(|edge| slot.is_none_or(|s| edge.slot.same_target(s)))
            .filter(|edge| self.disconnect_edge(edge).is_ok())
            .count();
        Ok(removed)
    }

    /// Disconnect every outgoing connection of `emitter`.
    pub fn disconnect_emitter(&self, emitter: ObjectId) -> ConnectResult<usize> {
        self.disconnect_matching(emitter, None, None, None)
    }

    /// Disconnect every incoming connection of `receiver`.
    pub fn disconnect_receiver(&self, receiver: ObjectId) -> ConnectResult<usize> {
        let state = self.live_state(receiver)?;
        let incoming: Vec<Arc<Edge>> = state.inbound.lock().values().cloned().collect();
        Ok(incoming
            .iter()
            .filter(|edge| self.disconnect_edge(edge).is_ok())
            .count())
    }

    /// Unlink an edge from both lists and release the credits that can be
    /// released now.
    ///
    /// The emitter-side credit is deferred to the emitter's orphan chain while
    /// an emission on the emitter is in flight, since that emission may be
    /// standing on the edge.
    fn disconnect_edge(&self, edge: &Arc<Edge>) -> ConnectResult<()> {
        if !edge.begin_disconnect() {
            tracing::trace!(
                target: "horizon_lattice_connect::connect",
                connection = ?edge.id,
                "edge already disconnecting"
            );
            return Err(ConnectError::DoubleDisconnect);
        }
        edge.mark_receiver_gone();

        let mut freed = match edge.emitter_state.upgrade() {
            Some(emitter) => {
                {
                    let _write = emitter.write_lock.lock();
                    let table = emitter.table();
                    if table
                        .list(edge.signal_index)
                        .is_some_and(|list| list.unlink(edge))
                    {
                        emitter.edge_unlinked();
                    }
                }
                if emitter.active_emissions() > 0 {
                    emitter.orphans.push(Orphan::Edge(edge.clone()));
                    false
                } else {
                    edge.release()
                }
            }
            None => edge.release(),
        };

        if let Some(receiver) = edge.receiver_state.upgrade() {
            receiver.inbound.lock().remove(edge.id);
        }
        freed |= edge.release();

        if freed {
            self.edges.lock().remove(edge.id);
        }
        tracing::trace!(
            target: "horizon_lattice_connect::connect",
            connection = ?edge.id,
            freed,
            "disconnected"
        );
        Ok(())
    }

    // =========================================================================
    // Emit
    // =========================================================================

    /// Emit signal `signal_index` of `emitter` with `args`.
    ///
    /// Edges are visited oldest first, as linked when the emission starts.
    /// Edges whose receiver has gone are skipped; refused deliveries are
    /// recorded in the report and emission carries on.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::UseAfterObjectDestroyed`] if `emitter` is gone.
    /// - [`ConnectError::InvalidSignalIndex`] for an unknown signal.
    /// - [`ConnectError::TypeMismatch`] if `A` is not the signal's argument tuple.
    #[tracing::instrument(skip_all, target = "horizon_lattice_connect::emit", level = "trace")]
    pub fn emit<A: SignalArgs>(
        &self,
        emitter: ObjectId,
        signal_index: usize,
        args: A,
    ) -> ConnectResult<EmitReport> {
        let state = self.live_state(emitter)?;
        let signal = signal_of(&state, signal_index)?;
        if signal.payload_type() != TypeId::of::<A>() {
            return Err(ConnectError::TypeMismatch {
                signal: format_arg_types(signal.arg_types()),
                slot: format_arg_types(&A::arg_types()),
            });
        }
        Ok(self.emit_payload(&state, signal_index, &args))
    }

    /// Emit with a type-erased payload. The payload must be the signal's
    /// argument tuple.
    pub fn emit_erased(
        &self,
        emitter: ObjectId,
        signal_index: usize,
        args: &dyn Payload,
    ) -> ConnectResult<EmitReport> {
        let state = self.live_state(emitter)?;
        let signal = signal_of(&state, signal_index)?;
        if args.as_any().type_id() != signal.payload_type() {
            return Err(ConnectError::TypeMismatch {
                signal: format_arg_types(signal.arg_types()),
                slot: "<erased payload>".to_string(),
            });
        }
        Ok(self.emit_payload(&state, signal_index, args))
    }

    fn emit_payload(
        &self,
        state: &Arc<ConnectionState>,
        signal_index: usize,
        args: &dyn Payload,
    ) -> EmitReport {
        let mut report = EmitReport::default();
        if state.signals_blocked() {
            tracing::trace!(
                target: "horizon_lattice_connect::emit",
                emitter = ?state.id,
                "signals blocked, skipping emit"
            );
            return report;
        }

        let _emission = EmissionGuard::enter(self, state);
        let table = state.table();
        let mut cursor = table.list(signal_index).and_then(EdgeList::head);

        while let Some(edge) = cursor {
            // Read the successor first: the slot may unlink this edge.
            cursor = edge.next.load_full();

            if !edge.is_connected() {
                continue;
            }
            let receiver = edge
                .receiver_state
                .upgrade()
                .filter(|receiver| !receiver.is_destroyed());
            let Some(receiver) = receiver.filter(|_| edge.receiver().is_some()) else {
                report.skipped += 1;
                continue;
            };
            if edge.single_shot && !edge.claim_shot() {
                continue;
            }

            let delivery = dispatch(&edge, &receiver, args, &self.config);
            if edge.single_shot {
                if delivery.is_delivered() {
                    let _ = self.disconnect_edge(&edge);
                } else {
                    edge.unclaim_shot();
                }
            }
            report.record(edge.id, delivery);

            if state.is_destroyed() {
                tracing::trace!(
                    target: "horizon_lattice_connect::emit",
                    emitter = ?state.id,
                    "emitter destroyed by a slot, stopping emission"
                );
                break;
            }
        }

        tracing::trace!(
            target: "horizon_lattice_connect::emit",
            emitter = ?state.id,
            signal = signal_index,
            invoked = report.invoked,
            posted = report.posted,
            skipped = report.skipped,
            rejected = report.rejected.len(),
            "emission finished"
        );
        report
    }

    // =========================================================================
    // Reclamation
    // =========================================================================

    /// Reclaim the orphan chain of `object` if no emission on it is in
    /// flight. Returns the number of entries reclaimed.
    pub fn reclaim(&self, object: ObjectId) -> ConnectResult<usize> {
        let state = self.live_state(object)?;
        Ok(self.reclaim_state(&state))
    }

    fn reclaim_state(&self, state: &ConnectionState) -> usize {
        let entries = state.orphans.drain();
        if entries.is_empty() {
            return 0;
        }
        if state.active_emissions() > 0 {
            for entry in entries {
                state.orphans.push(entry);
            }
            return 0;
        }

        let count = entries.len();
        let mut freed = Vec::new();
        for entry in entries {
            match entry {
                Orphan::Table(table) => drop(table),
                Orphan::Edge(edge) => {
                    edge.next.store(None);
                    if edge.release() {
                        freed.push(edge.id);
                    }
                }
            }
        }
        if !freed.is_empty() {
            let mut edges = self.edges.lock();
            for id in freed {
                edges.remove(id);
            }
        }

        tracing::debug!(
            target: "horizon_lattice_connect::reclaim",
            object = ?state.id,
            reclaimed = count,
            "orphan chain reclaimed"
        );
        count
    }

    // =========================================================================
    // Controls and introspection
    // =========================================================================

    /// Block or unblock every signal of `object`. Returns the previous value.
    pub fn set_signals_blocked(&self, object: ObjectId, blocked: bool) -> ConnectResult<bool> {
        Ok(self.live_state(object)?.set_signals_blocked(blocked))
    }

    /// Whether signals of `object` are blocked.
    pub fn signals_blocked(&self, object: ObjectId) -> bool {
        self.live_state(object)
            .is_ok_and(|state| state.signals_blocked())
    }

    /// The emitter whose signal is being delivered to `receiver` on the
    /// calling thread.
    ///
    /// `None` outside a slot invocation, or if the emitter was destroyed
    /// while the slot was running.
    pub fn sender(&self, receiver: ObjectId) -> Option<ObjectId> {
        self.current_frame(receiver).and_then(|frame| frame.emitter)
    }

    /// The signal being delivered to `receiver` on the calling thread.
    pub fn sender_signal_index(&self, receiver: ObjectId) -> Option<usize> {
        self.current_frame(receiver).map(|frame| frame.signal_index)
    }

    fn current_frame(&self, receiver: ObjectId) -> Option<ActivationFrame> {
        let state = self.objects.read().get(receiver).cloned()?;
        state.activations.current()
    }

    /// Number of connected edges on one signal of `object`.
    pub fn connection_count(&self, object: ObjectId, signal_index: usize) -> usize {
        self.live_state(object).map_or(0, |state| {
            state
                .table()
                .list(signal_index)
                .map_or(0, |list| {
                    list.edges().iter().filter(|edge| edge.is_connected()).count()
                })
        })
    }

    /// Number of connected edges for which `object` is the receiver.
    pub fn receiver_count(&self, object: ObjectId) -> usize {
        self.live_state(object).map_or(0, |state| {
            state
                .inbound
                .lock()
                .values()
                .filter(|edge| edge.is_connected())
                .count()
        })
    }

    /// Whether any edge is connected to the signal.
    pub fn is_signal_connected(&self, object: ObjectId, signal_index: usize) -> bool {
        self.connection_count(object, signal_index) > 0
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> RegistryStats {
        let objects = self.objects.read();
        let mut stats = RegistryStats::default();
        for state in objects.values().filter(|state| !state.is_destroyed()) {
            stats.objects += 1;
            stats.live_edges += state.live_edges();
            stats.orphaned += state.orphans.len();
        }
        stats
    }
}

fn signal_of(state: &ConnectionState, signal_index: usize) -> ConnectResult<&SignalMeta> {
    state
        .meta
        .signal(signal_index)
        .ok_or(ConnectError::InvalidSignalIndex {
            index: signal_index,
            count: state.meta.signal_count(),
        })
}

/// Validate `slot` against `signal` on `receiver`.
fn check_slot(
    signal: &SignalMeta,
    slot: &Slot,
    receiver: &ConnectionState,
) -> ConnectResult<()> {
    let slot_types = match slot {
        Slot::Erased(_) => return Ok(()),
        Slot::Callable { arg_types, .. } => {
            if !arg_types.is_empty() && arg_types.len() != signal.arg_types().len() {
                return Err(ConnectError::TypeMismatch {
                    signal: format_arg_types(signal.arg_types()),
                    slot: format_arg_types(arg_types),
                });
            }
            arg_types.clone()
        }
        Slot::Method(index) => {
            let method = receiver
                .meta
                .method(*index)
                .ok_or(ConnectError::InvalidMethodIndex {
                    index: *index,
                    count: receiver.meta.method_count(),
                })?;
            if receiver.handler.is_none() {
                return Err(ConnectError::NoMethodHandler);
            }
            method.arg_types().clone()
        }
    };

    if arg_types_compatible(signal.arg_types(), &slot_types) {
        Ok(())
    } else {
        Err(ConnectError::TypeMismatch {
            signal: format_arg_types(signal.arg_types()),
            slot: format_arg_types(&slot_types),
        })
    }
}

/// Counts an emission in flight; reclaims at the last one out.
struct EmissionGuard<'a> {
    registry: &'a ConnectionRegistry,
    state: &'a ConnectionState,
}

impl<'a> EmissionGuard<'a> {
    fn enter(registry: &'a ConnectionRegistry, state: &'a ConnectionState) -> Self {
        state.enter_emission();
        Self { registry, state }
    }
}

impl Drop for EmissionGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.state.leave_emission();
        if remaining == 0
            && !self.state.orphans.is_empty()
            && (self.registry.config.reclaim_on_quiescence || self.state.is_destroyed())
        {
            self.registry.reclaim_state(self.state);
        }
    }
}

/// A connection guard that automatically disconnects when dropped.
///
/// Created by [`ConnectionRegistry::connect_scoped`]. The guard keeps the
/// registry alive, so it may outlive every other handle to it.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: Option<ConnectionId>,
}

impl ConnectionGuard {
    /// The guarded connection.
    pub fn id(&self) -> Option<ConnectionId> {
        self.id
    }

    /// Give up the guard without disconnecting.
    pub fn release(mut self) -> Option<ConnectionId> {
        self.id.take()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.registry.disconnect(id);
        }
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard").field("id", &self.id).finish()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();

/// Get the process-wide registry, creating it with the default configuration
/// on first use.
pub fn global_registry() -> &'static Arc<ConnectionRegistry> {
    GLOBAL_REGISTRY.get_or_init(|| Arc::new(ConnectionRegistry::new()))
}

static_assertions::assert_impl_all!(ConnectionRegistry: Send, Sync);
static_assertions::assert_impl_all!(ConnectionGuard: Send, Sync);
