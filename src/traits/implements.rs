//! Interface views of concrete services.

use std::sync::Arc;

/// Conversion of a concrete service into one of its interface views.
///
/// Registering a type under an interface key (`container.add::<T>().alias::<dyn I>()`)
/// requires `T: Implements<dyn I>`. The conversion is a plain unsizing
/// coercion, so the [`implements!`](crate::implements) macro is the usual way to
/// provide it.
///
/// Every type implements itself, which lets an injection point name the
/// concrete type directly.
pub trait Implements<I: ?Sized + Send + Sync + 'static>: Send + Sync + 'static {
    /// Returns the interface view sharing this allocation.
    fn upcast(self: Arc<Self>) -> Arc<I>;
}

impl<T: Send + Sync + 'static> Implements<T> for T {
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declares that a type can be viewed through one or more trait objects.
///
/// ```
/// use reinject::{implements, Implements};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync { fn greet(&self) -> String; }
/// trait Named: Send + Sync { fn name(&self) -> &str; }
///
/// struct English;
/// impl Greeter for English { fn greet(&self) -> String { "hello".into() } }
/// impl Named for English { fn name(&self) -> &str { "en" } }
///
/// implements!(English => dyn Greeter, dyn Named);
///
/// let greeter: Arc<dyn Greeter> = Arc::new(English).upcast();
/// assert_eq!(greeter.greet(), "hello");
/// ```
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($iface:ty),+ $(,)?) => {
        $(
            impl $crate::Implements<$iface> for $ty {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$iface> {
                    self
                }
            }
        )+
    };
}
