//! Deterministic cleanup for instances obtained through a child container.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DiResult;
use crate::injector::Injector;
use crate::instance::Instance;
use crate::internal::DisposeBag;
use crate::key::Key;
use crate::lifetime::Lifetime;
use crate::metadata::{Injectable, TypeMetadata};

use super::{downcast, Container, Resolved};

/// A child container that disposes the disposable transient and ad-hoc
/// instances it handed out when the scope ends.
///
/// Cached and singleton instances are shared with the owning container and
/// are left for it to dispose.
///
/// The child is created through [`Injector::new_container`] and leaves the
/// registry when the scope is disposed or dropped. Everything not shadowed by
/// the inherent methods below is available through `Deref<Target = Container>`;
/// only resolutions made through the scope's own `get`/`get_named`/`resolve`
/// are tracked.
///
/// # Examples
///
/// ```rust
/// use reinject::{Container, ContainerScope, Dispose};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// static CLOSED: AtomicUsize = AtomicUsize::new(0);
///
/// struct Connection;
/// impl Dispose for Connection {
///     fn dispose(&self) { CLOSED.fetch_add(1, Ordering::SeqCst); }
/// }
///
/// let root = Container::new("scope-doc");
/// root.add::<Connection>().disposable().transient_with(|_| Ok(Connection)).unwrap();
///
/// {
///     let scope = ContainerScope::new(&root);
///     let _a = scope.get::<Connection>().unwrap();
///     let _b = scope.get::<Connection>().unwrap();
/// }
/// assert_eq!(CLOSED.load(Ordering::SeqCst), 2);
/// ```
pub struct ContainerScope {
    container: Container,
    bag: Mutex<DisposeBag>,
    disposed: AtomicBool,
}

impl ContainerScope {
    /// Opens a scope over a fresh child of `parent`.
    pub fn new(parent: &Container) -> Self {
        Self {
            container: Injector::new_container(Some(parent)),
            bag: Mutex::new(DisposeBag::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// The child container backing the scope.
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.get_tracked(&Key::of::<T>())
    }

    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, name: &'static str) -> DiResult<Arc<T>> {
        self.get_tracked(&Key::named::<T>(name))
    }

    /// [`Container::resolve`] through the scope.
    pub fn resolve<T: Injectable>(&self) -> DiResult<Arc<T>> {
        if self.container.is_known_type::<T>() {
            return self.get::<T>();
        }
        let value = self.container.create_instance::<T>()?;
        if let Some(disposer) = TypeMetadata::of::<T>().disposer().cloned() {
            let instance = Instance::new(value.clone());
            self.track(std::any::type_name::<T>(), Box::new(move || disposer(&instance)));
        }
        Ok(value)
    }

    /// Registers a singleton value on the scope's container; its dependency
    /// is disposed with the scope.
    pub fn add_singleton<T: Send + Sync + 'static>(&self, value: T) -> DiResult<&Self> {
        self.container.add_singleton(value)?;
        if let Some(dependency) = self.container.dependency(&Key::of::<T>()) {
            self.track(
                std::any::type_name::<T>(),
                Box::new(move || dependency.dispose()),
            );
        }
        Ok(self)
    }

    fn get_tracked<T: ?Sized + Send + Sync + 'static>(&self, key: &Key) -> DiResult<Arc<T>> {
        let Resolved {
            view,
            concrete,
            dependency,
            metadata,
        } = self.container.resolve_key(key)?;

        let hook: Option<(&'static str, Box<dyn FnOnce() + Send>)> = match (dependency, metadata) {
            // Cached and singleton instances stay owned by their container
            (Some(dependency), _)
                if dependency.lifetime() != Lifetime::Transient || !dependency.is_disposable() =>
            {
                None
            }
            (Some(dependency), _) => {
                let label = dependency.type_name();
                let hook: Box<dyn FnOnce() + Send> =
                    Box::new(move || dependency.dispose_instance(&concrete));
                Some((label, hook))
            }
            (None, Some(metadata)) => metadata.disposer().cloned().map(|disposer| {
                let label = concrete.type_name();
                let hook: Box<dyn FnOnce() + Send> = Box::new(move || disposer(&concrete));
                (label, hook)
            }),
            (None, None) => None,
        };
        if let Some((label, hook)) = hook {
            self.track(label, hook);
        }

        downcast(view)
    }

    fn track(&self, label: &'static str, hook: Box<dyn FnOnce() + Send>) {
        self.bag.lock().push(label, hook);
    }

    /// Number of instances awaiting disposal.
    pub fn tracked(&self) -> usize {
        self.bag.lock().len()
    }

    /// Ends the scope: the child leaves the registry, then tracked instances
    /// are disposed, most recent first. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        Injector::remove(self.container.name());
        let mut bag = std::mem::take(&mut *self.bag.lock());
        let count = bag.len();
        bag.run_all_reverse();
        debug!(container = %self.container.name(), disposed = count, "scope ended");
    }
}

impl Deref for ContainerScope {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.container
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        self.dispose();
    }
}
