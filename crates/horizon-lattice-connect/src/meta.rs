//! Class descriptions and argument type identification.
//!
//! Every object taking part in connections carries a [`MetaObject`] describing
//! the signals it can emit and the methods that can be invoked on it as slots.
//! Argument lists are compared through [`ArgType`]s, which are only considered
//! equal when both sides are registered with the [`MetaTypeRegistry`].
//!
//! # Example
//!
//! ```
//! use horizon_lattice_connect::meta::MetaObject;
//!
//! let base = MetaObject::builder("Control")
//!     .signal::<()>("destroyed")
//!     .build();
//! let button = MetaObject::builder("Button")
//!     .extends(base)
//!     .signal::<(bool,)>("toggled")
//!     .method::<(bool,)>("set_checked")
//!     .build();
//!
//! assert_eq!(button.signal_count(), 2);
//! assert_eq!(button.index_of_signal("toggled"), Some(1));
//! assert_eq!(button.signal(0).map(|s| s.name()), Some("destroyed"));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// A type-erased argument payload.
///
/// This is the value-copy seam used by queued delivery: the payload handed to
/// `emit` is borrowed, so queued connections take an owned copy through
/// [`clone_payload`](Payload::clone_payload) before posting.
pub trait Payload: Any + Send + Sync {
    /// Produce an owned copy of this payload.
    fn clone_payload(&self) -> Box<dyn Payload>;

    /// Access the payload for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Clone + Send + Sync> Payload for T {
    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The identity of one argument type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArgType {
    id: TypeId,
    name: &'static str,
    registered: bool,
}

impl ArgType {
    /// Look up the argument type for `T` in the global type registry.
    ///
    /// Types that were never registered produce an unregistered `ArgType`,
    /// which never [`matches`](Self::matches) anything.
    pub fn of<T: 'static>() -> Self {
        let id = TypeId::of::<T>();
        Self {
            id,
            name: std::any::type_name::<T>(),
            registered: meta_types().is_registered(id),
        }
    }

    /// The Rust type ID.
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// The Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the type was known to the type registry when this was created.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether a slot taking `other` can receive a value of this type.
    pub fn matches(&self, other: &ArgType) -> bool {
        self.registered && other.registered && self.id == other.id
    }
}

/// Render an argument list as `(A, B)` for diagnostics.
pub fn format_arg_types(types: &[ArgType]) -> String {
    let names: Vec<&str> = types
        .iter()
        .map(|t| if t.registered { t.name } else { "<unregistered>" })
        .collect();
    format!("({})", names.join(", "))
}

/// Whether a slot with argument list `slot` may be connected to a signal with
/// argument list `signal`.
///
/// The slot may take a leading part of the signal's arguments, down to none.
/// Method handlers still receive the whole payload and read the arguments
/// they declared. Typed callables downcast the payload, so the registry only
/// accepts them with no arguments or exactly the signal's.
pub fn arg_types_compatible(signal: &[ArgType], slot: &[ArgType]) -> bool {
    slot.len() <= signal.len() && signal.iter().zip(slot).all(|(a, b)| a.matches(b))
}

/// Registry of argument types known to the connection system.
pub struct MetaTypeRegistry {
    types: RwLock<HashMap<TypeId, &'static str>>,
}

impl MetaTypeRegistry {
    fn with_builtins() -> Self {
        let registry = Self {
            types: RwLock::new(HashMap::new()),
        };
        registry.register::<()>();
        registry.register::<bool>();
        registry.register::<char>();
        registry.register::<i8>();
        registry.register::<i16>();
        registry.register::<i32>();
        registry.register::<i64>();
        registry.register::<u8>();
        registry.register::<u16>();
        registry.register::<u32>();
        registry.register::<u64>();
        registry.register::<usize>();
        registry.register::<isize>();
        registry.register::<f32>();
        registry.register::<f64>();
        registry.register::<String>();
        registry.register::<Vec<u8>>();
        registry
    }

    /// Register `T` so it can appear in connected argument lists.
    ///
    /// Returns `false` if the type was already registered.
    pub fn register<T: 'static>(&self) -> bool {
        self.types
            .write()
            .insert(TypeId::of::<T>(), std::any::type_name::<T>())
            .is_none()
    }

    /// Whether the type has been registered.
    pub fn is_registered(&self, id: TypeId) -> bool {
        self.types.read().contains_key(&id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

static META_TYPES: OnceLock<MetaTypeRegistry> = OnceLock::new();

/// Get the global argument type registry.
pub fn meta_types() -> &'static MetaTypeRegistry {
    META_TYPES.get_or_init(MetaTypeRegistry::with_builtins)
}

/// Register `T` with the global argument type registry.
pub fn register_meta_type<T: 'static>() -> bool {
    meta_types().register::<T>()
}

/// A payload type usable as a signal's argument list.
///
/// Implemented for tuples of up to four elements; `()` is a signal without
/// arguments.
pub trait SignalArgs: Clone + Send + Sync + 'static {
    /// The ordered argument type list.
    fn arg_types() -> Vec<ArgType>;
}

macro_rules! impl_signal_args {
    ($($name:ident),*) => {
        impl<$($name: Clone + Send + Sync + 'static),*> SignalArgs for ($($name,)*) {
            fn arg_types() -> Vec<ArgType> {
                vec![$(ArgType::of::<$name>()),*]
            }
        }
    };
}

impl_signal_args!();
impl_signal_args!(A);
impl_signal_args!(A, B);
impl_signal_args!(A, B, C);
impl_signal_args!(A, B, C, D);

/// Description of one signal or invokable method.
#[derive(Clone)]
pub struct MemberMeta {
    name: String,
    arg_types: Arc<[ArgType]>,
    payload_type: TypeId,
}

/// A declared signal.
pub type SignalMeta = MemberMeta;
/// A declared invokable method.
pub type MethodMeta = MemberMeta;

impl MemberMeta {
    /// Describe a member taking the argument tuple `A`.
    pub fn new<A: SignalArgs>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_types: A::arg_types().into(),
            payload_type: TypeId::of::<A>(),
        }
    }

    /// The member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered argument type list.
    pub fn arg_types(&self) -> &Arc<[ArgType]> {
        &self.arg_types
    }

    /// Type ID of the argument tuple.
    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    /// Render as `name(A, B)`.
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, format_arg_types(&self.arg_types))
    }
}

impl fmt::Debug for MemberMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Runtime description of a class: its signals and invokable methods.
///
/// Indices are absolute across the class hierarchy: a class's own members
/// start after all members of its superclass chain.
#[derive(Debug)]
pub struct MetaObject {
    class_name: String,
    superclass: Option<Arc<MetaObject>>,
    signals: Vec<SignalMeta>,
    methods: Vec<MethodMeta>,
}

impl MetaObject {
    /// Start describing a class.
    pub fn builder(class_name: impl Into<String>) -> MetaObjectBuilder {
        MetaObjectBuilder {
            class_name: class_name.into(),
            superclass: None,
            signals: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// The class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The superclass description, if any.
    pub fn superclass(&self) -> Option<&Arc<MetaObject>> {
        self.superclass.as_ref()
    }

    /// Absolute index of this class's first own signal.
    pub fn signal_offset(&self) -> usize {
        self.superclass.as_ref().map_or(0, |s| s.signal_count())
    }

    /// Absolute index of this class's first own method.
    pub fn method_offset(&self) -> usize {
        self.superclass.as_ref().map_or(0, |s| s.method_count())
    }

    /// Total number of signals, inherited ones included.
    pub fn signal_count(&self) -> usize {
        self.signal_offset() + self.signals.len()
    }

    /// Total number of methods, inherited ones included.
    pub fn method_count(&self) -> usize {
        self.method_offset() + self.methods.len()
    }

    /// Look up a signal by absolute index.
    pub fn signal(&self, index: usize) -> Option<&SignalMeta> {
        let offset = self.signal_offset();
        if index < offset {
            self.superclass.as_ref()?.signal(index)
        } else {
            self.signals.get(index - offset)
        }
    }

    /// Look up a method by absolute index.
    pub fn method(&self, index: usize) -> Option<&MethodMeta> {
        let offset = self.method_offset();
        if index < offset {
            self.superclass.as_ref()?.method(index)
        } else {
            self.methods.get(index - offset)
        }
    }

    /// Find a signal by name, most-derived class first.
    pub fn index_of_signal(&self, name: &str) -> Option<usize> {
        if let Some(pos) = self.signals.iter().position(|s| s.name == name) {
            return Some(self.signal_offset() + pos);
        }
        self.superclass.as_ref()?.index_of_signal(name)
    }

    /// Find a method by name, most-derived class first.
    pub fn index_of_method(&self, name: &str) -> Option<usize> {
        if let Some(pos) = self.methods.iter().position(|m| m.name == name) {
            return Some(self.method_offset() + pos);
        }
        self.superclass.as_ref()?.index_of_method(name)
    }

    /// Whether this class is `class_name` or derives from it.
    pub fn inherits(&self, class_name: &str) -> bool {
        self.class_name == class_name
            || self
                .superclass
                .as_ref()
                .is_some_and(|s| s.inherits(class_name))
    }
}

/// Builder for [`MetaObject`].
#[derive(Debug)]
pub struct MetaObjectBuilder {
    class_name: String,
    superclass: Option<Arc<MetaObject>>,
    signals: Vec<SignalMeta>,
    methods: Vec<MethodMeta>,
}

impl MetaObjectBuilder {
    /// Derive from another class.
    pub fn extends(mut self, superclass: Arc<MetaObject>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Declare a signal taking the argument tuple `A`.
    pub fn signal<A: SignalArgs>(mut self, name: impl Into<String>) -> Self {
        self.signals.push(SignalMeta::new::<A>(name));
        self
    }

    /// Declare an invokable method taking the argument tuple `A`.
    pub fn method<A: SignalArgs>(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodMeta::new::<A>(name));
        self
    }

    /// Finish the description.
    pub fn build(self) -> Arc<MetaObject> {
        Arc::new(MetaObject {
            class_name: self.class_name,
            superclass: self.superclass,
            signals: self.signals,
            methods: self.methods,
        })
    }
}

/// Method dispatch for method-index slots.
///
/// An object registers one handler at creation; the registry calls it with
/// the absolute method index whenever a method slot on that object fires.
pub trait MetaCall: Send + Sync {
    /// Invoke method `method` with the emitted payload.
    fn meta_call(&self, method: usize, args: &dyn Payload);
}

impl<F> MetaCall for F
where
    F: Fn(usize, &dyn Payload) + Send + Sync,
{
    fn meta_call(&self, method: usize, args: &dyn Payload) {
        self(method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct NeverRegistered;

    #[test]
    fn test_builtin_types_registered() {
        assert!(ArgType::of::<i32>().is_registered());
        assert!(ArgType::of::<String>().is_registered());
        assert!(!ArgType::of::<NeverRegistered>().is_registered());
    }

    #[test]
    fn test_unregistered_never_matches() {
        let a = ArgType::of::<NeverRegistered>();
        assert!(!a.matches(&a));
        assert!(ArgType::of::<u8>().matches(&ArgType::of::<u8>()));
        assert!(!ArgType::of::<u8>().matches(&ArgType::of::<u16>()));
    }

    #[test]
    fn test_register_meta_type() {
        #[derive(Clone)]
        struct Point;

        assert!(!ArgType::of::<Point>().is_registered());
        assert!(register_meta_type::<Point>());
        assert!(!register_meta_type::<Point>());
        assert!(ArgType::of::<Point>().is_registered());
    }

    #[test]
    fn test_compatibility_rules() {
        let signal = <(i32, String)>::arg_types();
        assert!(arg_types_compatible(&signal, &[]));
        assert!(arg_types_compatible(&signal, &<(i32, String)>::arg_types()));
        assert!(arg_types_compatible(&signal, &<(i32,)>::arg_types()));
        assert!(!arg_types_compatible(&signal, &<(String,)>::arg_types()));
        assert!(!arg_types_compatible(&signal, &<(String, i32)>::arg_types()));
        assert!(!arg_types_compatible(&signal, &<(i32, String, u8)>::arg_types()));

        let odd = <(NeverRegistered,)>::arg_types();
        assert!(!arg_types_compatible(&odd, &odd));
        assert!(arg_types_compatible(&odd, &[]));
    }

    #[test]
    fn test_format_arg_types() {
        assert_eq!(format_arg_types(&<()>::arg_types()), "()");
        assert_eq!(format_arg_types(&<(u32, bool)>::arg_types()), "(u32, bool)");
        assert_eq!(
            format_arg_types(&<(NeverRegistered,)>::arg_types()),
            "(<unregistered>)"
        );
    }

    #[test]
    fn test_hierarchy_indices() {
        let base = MetaObject::builder("Base")
            .signal::<()>("a")
            .signal::<(i32,)>("b")
            .method::<()>("reset")
            .build();
        let derived = MetaObject::builder("Derived")
            .extends(base)
            .signal::<(String,)>("c")
            .method::<(i32,)>("set")
            .build();

        assert_eq!(derived.signal_offset(), 2);
        assert_eq!(derived.signal_count(), 3);
        assert_eq!(derived.method_count(), 2);
        assert_eq!(derived.signal(1).map(|s| s.name()), Some("b"));
        assert_eq!(derived.signal(2).map(|s| s.name()), Some("c"));
        assert!(derived.signal(3).is_none());
        assert_eq!(derived.index_of_method("set"), Some(1));
        assert_eq!(derived.index_of_signal("a"), Some(0));
        assert!(derived.inherits("Base"));
        assert!(!derived.inherits("Other"));
    }

    #[test]
    fn test_payload_clone_and_downcast() {
        let value: (i32, String) = (7, "seven".to_string());
        let copy = value.clone_payload();
        let back = copy.as_any().downcast_ref::<(i32, String)>();
        assert_eq!(back, Some(&value));
    }
}
