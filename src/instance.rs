//! Type-erased shared instances.
//!
//! Every value the container hands around is an `Arc<T>`. [`Instance`] erases
//! `T` (sized or a trait object) while keeping the ability to downcast back,
//! to downgrade to a weak reference, and to compare identity.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of a shared allocation.
///
/// Two `Arc`s pointing at the same value have the same id, including when
/// one of them is an interface view (`Arc<dyn Trait>`) of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    /// Id of the allocation behind `arc`.
    #[inline]
    pub fn of<T: ?Sized>(arc: &Arc<T>) -> Self {
        Self(Arc::as_ptr(arc) as *const () as usize)
    }
}

impl<T: ?Sized> From<&Arc<T>> for InstanceId {
    fn from(arc: &Arc<T>) -> Self {
        Self::of(arc)
    }
}

impl From<&Instance> for InstanceId {
    fn from(instance: &Instance) -> Self {
        instance.id
    }
}

trait ErasedArc: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn downgrade(&self) -> Box<dyn ErasedWeak>;
}

trait ErasedWeak: Send + Sync {
    fn upgrade(&self) -> Option<Instance>;
}

struct TypedArc<T: ?Sized>(Arc<T>);

struct TypedWeak<T: ?Sized>(Weak<T>);

impl<T: ?Sized + Send + Sync + 'static> ErasedArc for TypedArc<T> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn downgrade(&self) -> Box<dyn ErasedWeak> {
        Box::new(TypedWeak(Arc::downgrade(&self.0)))
    }
}

impl<T: ?Sized + Send + Sync + 'static> ErasedWeak for TypedWeak<T> {
    fn upgrade(&self) -> Option<Instance> {
        self.0.upgrade().map(Instance::new)
    }
}

/// A type-erased `Arc<T>`.
///
/// # Examples
///
/// ```rust
/// use reinject::Instance;
/// use std::sync::Arc;
///
/// trait Shape: Send + Sync { fn area(&self) -> f64; }
/// struct Square(f64);
/// impl Shape for Square { fn area(&self) -> f64 { self.0 * self.0 } }
///
/// let square = Arc::new(Square(2.0));
/// let erased = Instance::new(square.clone());
/// assert!(Arc::ptr_eq(&erased.downcast::<Square>().unwrap(), &square));
///
/// let shape: Arc<dyn Shape> = square.clone();
/// let view = Instance::new(shape);
/// assert_eq!(view.id(), erased.id());
/// assert_eq!(view.downcast::<dyn Shape>().unwrap().area(), 4.0);
/// ```
#[derive(Clone)]
pub struct Instance {
    inner: Arc<dyn ErasedArc>,
    id: InstanceId,
    type_id: TypeId,
    type_name: &'static str,
}

impl Instance {
    /// Erases `arc`.
    pub fn new<T: ?Sized + Send + Sync + 'static>(arc: Arc<T>) -> Self {
        Self {
            id: InstanceId::of(&arc),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(TypedArc(arc)),
        }
    }

    /// Recovers the typed `Arc` if this instance was created from an `Arc<T>`.
    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.as_any().downcast_ref::<Arc<T>>().cloned()
    }

    /// Whether this instance holds an `Arc<T>`.
    pub fn is<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Weak reference to the underlying allocation.
    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            inner: Arc::from(self.inner.downgrade()),
            id: self.id,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name)
            .field("id", &self.id)
            .finish()
    }
}

/// Weak counterpart of [`Instance`].
#[derive(Clone)]
pub struct WeakInstance {
    inner: Arc<dyn ErasedWeak>,
    id: InstanceId,
}

impl WeakInstance {
    /// Upgrades if the allocation is still alive.
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInstance").field("id", &self.id).finish()
    }
}
