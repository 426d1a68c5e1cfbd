//! Injectable member slots.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// A member the container fills in after construction.
///
/// Members are set through `&self`, so a type can be shared behind an `Arc`
/// before injection runs. An unset slot means the container did not know the
/// member's type when the instance was built.
///
/// ```
/// use reinject::Injected;
/// use std::sync::Arc;
///
/// let slot: Injected<str> = Injected::default();
/// assert!(slot.get().is_none());
/// slot.set(Arc::from("ready"));
/// assert_eq!(&*slot.get().unwrap(), "ready");
/// ```
pub struct Injected<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Injected<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Slot pre-filled with a value.
    pub fn with(value: Arc<T>) -> Self {
        Self {
            slot: RwLock::new(Some(value)),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    /// Returns the injected value.
    ///
    /// # Panics
    ///
    /// Panics if nothing was injected.
    pub fn get_required(&self) -> Arc<T> {
        self.get().unwrap_or_else(|| {
            panic!(
                "member of type {} was not injected",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn set(&self, value: Arc<T>) {
        *self.slot.write() = Some(value);
    }

    pub fn take(&self) -> Option<Arc<T>> {
        self.slot.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<T: ?Sized> Default for Injected<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Injected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injected")
            .field("type", &std::any::type_name::<T>())
            .field("set", &self.is_set())
            .finish()
    }
}
