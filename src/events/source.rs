//! Objects exposing named event slots.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::instance::InstanceId;

use super::event::AnyEvent;

/// An object whose [`Event`](super::Event) fields can be looked up by name.
///
/// Usually implemented with [`event_source!`](crate::event_source).
pub trait EventSource: Send + Sync + 'static {
    fn event(&self, name: &str) -> Option<&dyn AnyEvent>;

    fn event_names(&self) -> Vec<&'static str>;
}

/// Implements [`EventSource`] by exposing the listed fields under their own
/// names.
///
/// ```
/// use reinject::{event_source, AsyncEvent, Event, EventSource};
///
/// #[derive(Default)]
/// struct Button {
///     clicked: Event<(i32, i32)>,
///     released: AsyncEvent<u64>,
/// }
/// event_source!(Button { clicked, released });
///
/// let button = Button::default();
/// assert!(button.event("clicked").is_some());
/// assert!(button.event("hovered").is_none());
/// assert_eq!(button.event_names(), ["clicked", "released"]);
/// ```
#[macro_export]
macro_rules! event_source {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::EventSource for $ty {
            fn event(&self, name: &str) -> ::std::option::Option<&dyn $crate::AnyEvent> {
                match name {
                    $(stringify!($field) => ::std::option::Option::Some(&self.$field),)*
                    _ => ::std::option::Option::None,
                }
            }

            fn event_names(&self) -> ::std::vec::Vec<&'static str> {
                ::std::vec![$(stringify!($field)),*]
            }
        }
    };
}

trait SourceHandle: Send + Sync {
    fn is_alive(&self) -> bool;
    fn with_event(&self, name: &str, f: &mut dyn FnMut(&dyn AnyEvent)) -> bool;
}

struct WeakSource<S>(Weak<S>);

impl<S: EventSource> SourceHandle for WeakSource<S> {
    fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    fn with_event(&self, name: &str, f: &mut dyn FnMut(&dyn AnyEvent)) -> bool {
        let Some(source) = self.0.upgrade() else {
            return false;
        };
        match source.event(name) {
            Some(event) => {
                f(event);
                true
            }
            None => false,
        }
    }
}

/// Weak reference to an event source, kept by the proxies attached to it.
#[derive(Clone)]
pub struct SourceRef {
    handle: Arc<dyn SourceHandle>,
    id: InstanceId,
    type_id: TypeId,
    type_name: &'static str,
}

impl SourceRef {
    pub fn of<S: EventSource>(source: &Arc<S>) -> Self {
        Self {
            handle: Arc::new(WeakSource(Arc::downgrade(source))),
            id: InstanceId::of(source),
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
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

    pub fn is<S: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// Runs `f` on the event slot `name` if the source is alive and has it.
    pub fn with_event<T>(&self, name: &str, f: impl FnOnce(&dyn AnyEvent) -> T) -> Option<T> {
        let mut f = Some(f);
        let mut out = None;
        self.handle.with_event(name, &mut |event| {
            if let Some(f) = f.take() {
                out = Some(f(event));
            }
        });
        out
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef")
            .field("type", &self.type_name)
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
