//! Integration tests for object lifetime: owned objects, teardown from inside
//! a slot, scoped connections and the global registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use horizon_lattice_connect::meta::MetaObject;
use horizon_lattice_connect::{
    ConnectError, ConnectionDump, ConnectionRegistry, ConnectionType, DumpOptions, ObjectBase,
    ObjectId, Slot, global_registry,
};
use parking_lot::Mutex;

fn counter_meta() -> Arc<MetaObject> {
    MetaObject::builder("Counter")
        .signal::<(u32,)>("value_changed")
        .signal::<()>("overflow")
        .build()
}

/// An object embedding its registry handle as the first field, so teardown
/// runs before the rest of the object is dropped.
struct Counter {
    base: ObjectBase,
    value: u32,
}

impl Counter {
    fn new(registry: &Arc<ConnectionRegistry>) -> Self {
        Self {
            base: ObjectBase::new(registry, counter_meta()),
            value: 0,
        }
    }

    fn increment(&mut self) {
        self.value += 1;
        self.base.emit(0, (self.value,)).unwrap();
    }
}

#[test]
fn test_dropping_object_disconnects_everything() {
    let registry = Arc::new(ConnectionRegistry::new());
    let observed = Arc::new(Mutex::new(Vec::new()));

    let mut counter = Counter::new(&registry);
    let display = ObjectBase::new(&registry, counter_meta());
    let sink = observed.clone();
    registry
        .connect(
            counter.base.id(),
            0,
            Some(display.id()),
            Slot::new(move |&(value,): &(u32,)| sink.lock().push(value)),
            ConnectionType::Auto,
        )
        .unwrap();

    counter.increment();
    counter.increment();
    assert_eq!(*observed.lock(), vec![1, 2]);
    assert_eq!(registry.receiver_count(display.id()), 1);

    let counter_id = counter.base.id();
    drop(counter);
    assert!(!registry.is_alive(counter_id));
    assert_eq!(registry.receiver_count(display.id()), 0);
    assert_eq!(registry.stats().live_edges, 0);
    assert_eq!(
        registry.emit(counter_id, 0, (3u32,)),
        Err(ConnectError::UseAfterObjectDestroyed)
    );
}

#[test]
fn test_dropping_receiver_object_stops_delivery() {
    let registry = Arc::new(ConnectionRegistry::new());
    let counter = Counter::new(&registry);
    let hits = Arc::new(AtomicUsize::new(0));

    let display = ObjectBase::new(&registry, counter_meta());
    let slot_hits = hits.clone();
    registry
        .connect(
            counter.base.id(),
            1,
            Some(display.id()),
            Slot::notify(move || {
                slot_hits.fetch_add(1, Ordering::SeqCst);
            }),
            ConnectionType::Direct,
        )
        .unwrap();

    counter.base.emit(1, ()).unwrap();
    drop(display);
    let report = counter.base.emit(1, ()).unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(report.delivered(), 0);
    assert!(!registry.is_signal_connected(counter.base.id(), 1));
}

#[test]
fn test_slot_destroying_its_emitter() {
    let registry = Arc::new(ConnectionRegistry::new());
    let emitter = registry.create_object(counter_meta(), None);
    let receiver = registry.create_object(counter_meta(), None);
    let senders: Arc<Mutex<Vec<Option<ObjectId>>>> = Arc::new(Mutex::new(Vec::new()));
    let later = Arc::new(AtomicUsize::new(0));

    let slot_registry = registry.clone();
    let slot_senders = senders.clone();
    registry
        .connect(
            emitter,
            0,
            Some(receiver),
            Slot::notify(move || {
                slot_senders.lock().push(slot_registry.sender(receiver));
                slot_registry.destroy(emitter).unwrap();
                slot_senders.lock().push(slot_registry.sender(receiver));
                assert_eq!(slot_registry.sender_signal_index(receiver), Some(0));
            }),
            ConnectionType::Direct,
        )
        .unwrap();
    let later_hits = later.clone();
    registry
        .connect(
            emitter,
            0,
            Some(receiver),
            Slot::notify(move || {
                later_hits.fetch_add(1, Ordering::SeqCst);
            }),
            ConnectionType::Direct,
        )
        .unwrap();

    let report = registry.emit(emitter, 0, (1u32,)).unwrap();

    assert_eq!(report.invoked, 1);
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(*senders.lock(), vec![Some(emitter), None]);
    assert!(!registry.is_alive(emitter));
    assert_eq!(registry.receiver_count(receiver), 0);
    assert_eq!(registry.sender(receiver), None);
    assert_eq!(registry.stats().orphaned, 0);
}

#[test]
fn test_sender_visible_only_during_delivery() {
    let registry = Arc::new(ConnectionRegistry::new());
    let emitter = ObjectBase::new(&registry, counter_meta());
    let receiver = ObjectBase::new(&registry, counter_meta());
    let seen = Arc::new(Mutex::new(None));

    let slot_registry = registry.clone();
    let slot_seen = seen.clone();
    let receiver_id = receiver.id();
    registry
        .connect(
            emitter.id(),
            1,
            Some(receiver_id),
            Slot::notify(move || {
                *slot_seen.lock() = Some((
                    slot_registry.sender(receiver_id),
                    slot_registry.sender_signal_index(receiver_id),
                ));
            }),
            ConnectionType::Direct,
        )
        .unwrap();

    assert_eq!(receiver.sender(), None);
    emitter.emit(1, ()).unwrap();
    assert_eq!(*seen.lock(), Some((Some(emitter.id()), Some(1))));
    assert_eq!(receiver.sender(), None);
}

#[test]
fn test_destroy_twice_is_an_error() {
    let registry = ConnectionRegistry::new();
    let object = registry.create_object(counter_meta(), None);
    assert_eq!(registry.destroy(object), Ok(()));
    assert_eq!(
        registry.destroy(object),
        Err(ConnectError::UseAfterObjectDestroyed)
    );
    assert_eq!(
        registry.connect(object, 0, None, Slot::notify(|| {}), ConnectionType::Direct),
        Err(ConnectError::UseAfterObjectDestroyed)
    );
}

#[test]
fn test_object_base_survives_explicit_destroy() {
    let registry = Arc::new(ConnectionRegistry::new());
    let object = ObjectBase::new(&registry, counter_meta());
    registry.destroy(object.id()).unwrap();
    // Dropping afterwards must not panic.
    drop(object);
    assert_eq!(registry.stats().objects, 0);
}

#[test]
fn test_scoped_connection_outlives_registry_handle() {
    let emitter;
    let guard;
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let registry = Arc::new(ConnectionRegistry::new());
        emitter = registry.create_object(counter_meta(), None);
        let slot_hits = hits.clone();
        guard = registry
            .connect_scoped(
                emitter,
                1,
                None,
                Slot::notify(move || {
                    slot_hits.fetch_add(1, Ordering::SeqCst);
                }),
                ConnectionType::Direct,
            )
            .unwrap();
        registry.emit(emitter, 1, ()).unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(guard.id().is_some());
    drop(guard);
}

#[test]
fn test_released_guard_keeps_connection() {
    let registry = Arc::new(ConnectionRegistry::new());
    let emitter = registry.create_object(counter_meta(), None);
    let guard = registry
        .connect_scoped(emitter, 1, None, Slot::notify(|| {}), ConnectionType::Direct)
        .unwrap();
    let id = guard.release();
    assert!(id.is_some());
    assert_eq!(registry.connection_count(emitter, 1), 1);

    assert_eq!(registry.disconnect(id.unwrap()), Ok(true));
    assert_eq!(registry.connection_count(emitter, 1), 0);
}

#[test]
fn test_global_registry_is_shared() {
    let first = global_registry();
    let second = global_registry();
    assert!(Arc::ptr_eq(first, second));

    let object = ObjectBase::new(first, counter_meta());
    let from_thread = {
        let id = object.id();
        std::thread::spawn(move || global_registry().is_alive(id))
            .join()
            .unwrap()
    };
    assert!(from_thread);
}

#[test]
fn test_connection_dump_tracks_lifecycle() {
    let registry = Arc::new(ConnectionRegistry::new());
    let counter = Counter::new(&registry);
    let display = ObjectBase::new(&registry, counter_meta());
    registry
        .connect(
            counter.base.id(),
            0,
            Some(display.id()),
            Slot::new(|_: &(u32,)| {}),
            ConnectionType::Direct,
        )
        .unwrap();

    let dump = ConnectionDump::with_options(&registry, DumpOptions::minimal());
    let before = dump.format_object(counter.base.id()).unwrap();
    assert!(before.contains("value_changed(u32): 1 connection(s)"));

    drop(display);
    let after = dump.format_object(counter.base.id()).unwrap();
    assert!(!after.contains("value_changed"));

    let all = dump.format_all();
    assert!(all.contains("Connections (1 objects):"));
    assert!(all.contains("Counter"));
}
