//! Disposal trait for resource cleanup.

/// Trait for synchronous resource disposal.
///
/// Implement this for services that need structured teardown (flushing
/// buffers, closing connections, stopping timers). The container calls it
/// when a dependency is overwritten or the container is disposed, and a
/// [`ContainerScope`](crate::ContainerScope) calls it for the transient and
/// ad-hoc instances it handed out.
///
/// Implementations should be idempotent; disposal is best effort and may be
/// triggered more than once along different paths.
///
/// # Examples
///
/// ```
/// use reinject::{Container, Dispose};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// #[derive(Default)]
/// struct Cache { flushed: AtomicBool }
///
/// impl Dispose for Cache {
///     fn dispose(&self) {
///         self.flushed.store(true, Ordering::SeqCst);
///     }
/// }
///
/// let container = Container::new("dispose-doc");
/// container.add::<Cache>().disposable().instance(Cache::default()).unwrap();
/// let cache = container.get::<Cache>().unwrap();
///
/// container.dispose();
/// assert!(cache.flushed.load(Ordering::SeqCst));
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Perform synchronous cleanup of resources.
    fn dispose(&self);
}
