//! Post-injection plugins.

use crate::container::Container;
use crate::error::DiResult;
use crate::instance::{Instance, InstanceId};
use crate::metadata::TypeMetadata;

/// Hook invoked after an instance was constructed and its members injected,
/// or when [`Container::post_inject`] is called explicitly.
///
/// Post-injectors run in ascending [`priority`](Self::priority) order. They
/// bind extra behavior to the instance (scheduled tasks, event handlers) and
/// report which declarations they touched.
///
/// # Examples
///
/// ```
/// use reinject::{Container, DiResult, Instance, InstanceId, PostInjector, TypeMetadata};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Counter { seen: AtomicUsize }
///
/// impl PostInjector for Counter {
///     fn name(&self) -> &str { "counter" }
///     fn post_inject(&self, _: &Container, _: &TypeMetadata, _: &Instance) -> DiResult<Vec<&'static str>> {
///         self.seen.fetch_add(1, Ordering::SeqCst);
///         Ok(Vec::new())
///     }
///     fn set_injection_enabled(&self, _: InstanceId, _: bool) -> bool { false }
/// }
///
/// let container = Container::new("post-inject-doc");
/// let counter = Arc::new(Counter::default());
/// assert!(container.register_post_injector(counter.clone(), false));
///
/// container.post_inject(&Arc::new(5u32)).unwrap();
/// assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
/// ```
pub trait PostInjector: Send + Sync + 'static {
    /// Name distinguishing several injectors of the same type.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Binds behavior to `instance` and returns the names of the members it
    /// bound.
    fn post_inject(
        &self,
        container: &Container,
        metadata: &TypeMetadata,
        instance: &Instance,
    ) -> DiResult<Vec<&'static str>>;

    /// Enables or disables everything this injector bound to `instance`.
    /// Returns whether anything was bound.
    fn set_injection_enabled(&self, instance: InstanceId, enabled: bool) -> bool;

    /// Releases everything the injector owns. Called when it is unregistered,
    /// replaced, or its container is disposed.
    fn dispose(&self) {}
}
