//! The dependency container.
//!
//! A [`Container`] owns a registry of dependencies, an ordered list of
//! [`PostInjector`]s and an optional parent used as a fallback for lookups.
//! Containers are cheap to clone; clones share the same state.

mod add;
mod known;
mod scope;

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{DiError, DiResult};
use crate::injector::Injector;
use crate::instance::{Instance, InstanceId};
use crate::internal::ResolutionGuard;
use crate::key::Key;
use crate::metadata::{Injectable, TypeMetadata};
use crate::post_inject::PostInjector;
use crate::registration::{Dependency, Entry, Registration, Registry};

pub use add::Add;
pub use known::KnownInstances;
pub use scope::ContainerScope;

/// Dependency container with parent fallback and a post-injection pipeline.
///
/// # Examples
///
/// ```rust
/// use reinject::Container;
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync { fn greet(&self) -> String; }
/// struct English;
/// impl Greeter for English { fn greet(&self) -> String { "hello".into() } }
/// reinject::implements!(English => dyn Greeter);
///
/// let parent = Container::new("app");
/// parent.add_singleton_as::<dyn Greeter, _>(English).unwrap();
///
/// let child = Container::with_parent("request", &parent);
/// assert!(child.is_known_type::<dyn Greeter>());
/// assert_eq!(child.get::<dyn Greeter>().unwrap().greet(), "hello");
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    name: String,
    parent: Option<Container>,
    registry: RwLock<Registry>,
    post_injectors: RwLock<Vec<PostInjectorEntry>>,
    disposed: AtomicBool,
}

#[derive(Clone)]
struct PostInjectorEntry {
    injector: Arc<dyn PostInjector>,
    // Same allocation as `injector`, kept for typed lookups
    handle: Instance,
}

/// Outcome of resolving a key, with what scopes need for disposal.
pub(crate) struct Resolved {
    pub(crate) view: Instance,
    pub(crate) concrete: Instance,
    pub(crate) dependency: Option<Arc<Dependency>>,
    pub(crate) metadata: Option<Arc<TypeMetadata>>,
}

impl Container {
    /// Standalone container. Use [`Injector::container`] for one registered
    /// in the process-wide registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Container falling back to `parent` for unknown keys.
    pub fn with_parent(name: impl Into<String>, parent: &Container) -> Self {
        Self::build(name.into(), Some(parent.clone()))
    }

    fn build(name: String, parent: Option<Container>) -> Self {
        trace!(container = %name, parent = ?parent.as_ref().map(Container::name), "created container");
        Self {
            inner: Arc::new(ContainerInner {
                name,
                parent,
                registry: RwLock::new(Registry::new()),
                post_injectors: RwLock::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    // ----- registration -------------------------------------------------

    /// Stores a registration under its key and every alias key.
    ///
    /// Keys already present are left untouched unless the registration asks
    /// to overwrite; a replaced dependency is cleared and disposed once no
    /// key refers to it anymore. Returns whether any key was written.
    pub fn register(&self, registration: Registration) -> DiResult<bool> {
        let Registration {
            key,
            aliases,
            lifetime,
            type_name,
            factory,
            instance,
            disposer,
            overwrite,
        } = registration;

        let dependency = Arc::new(Dependency::new(
            lifetime, type_name, factory, instance, disposer,
        )?);

        let mut written = false;
        let mut replaced: Vec<Arc<Dependency>> = Vec::new();
        {
            let mut registry = self.inner.registry.write();
            let keys = std::iter::once((key, None)).chain(aliases.into_iter().map(|(k, c)| (k, Some(c))));
            for (key, caster) in keys {
                if registry.contains_key(&key) && !overwrite {
                    debug!(container = %self.name(), key = %key, "key already registered, skipping");
                    continue;
                }
                trace!(container = %self.name(), key = %key, ?lifetime, "registered");
                let entry = Entry {
                    dependency: dependency.clone(),
                    caster,
                };
                if let Some(old) = registry.insert(key, entry) {
                    replaced.push(old.dependency);
                }
                written = true;
            }
            replaced.retain(|old| !registry.references(old));
        }

        for old in replaced {
            debug!(container = %self.name(), dependency = old.type_name(), "disposing overwritten dependency");
            old.clear();
            old.dispose();
        }
        Ok(written)
    }

    /// Starts a typed registration of `T`.
    pub fn add<T: ?Sized + Send + Sync + 'static>(&self) -> Add<'_, T> {
        Add::new(self)
    }

    /// Removes a key. The dependency behind it is disposed unless another key
    /// still refers to it.
    pub fn remove(&self, key: &Key) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write();
            registry
                .remove(key)
                .map(|entry| (!registry.references(&entry.dependency)).then_some(entry.dependency))
        };
        match removed {
            Some(orphan) => {
                if let Some(dependency) = orphan {
                    dependency.dispose();
                }
                true
            }
            None => false,
        }
    }

    /// Forgets cached instances; singletons survive.
    pub fn clear(&self) {
        let dependencies: Vec<_> = self
            .inner
            .registry
            .read()
            .iter()
            .map(|(_, e)| e.dependency.clone())
            .collect();
        for dependency in dependencies {
            dependency.clear();
        }
        trace!(container = %self.name(), "cleared cache");
    }

    /// Tears the container down: it leaves the process-wide registry, its
    /// post-injectors and dependencies are disposed, then the registry is
    /// emptied. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        Injector::detach(self);

        let injectors = std::mem::take(&mut *self.inner.post_injectors.write());
        for entry in injectors {
            entry.injector.dispose();
        }

        let dependencies = self.inner.registry.write().drain_dependencies();
        let count = dependencies.len();
        for dependency in dependencies {
            dependency.dispose();
        }
        debug!(container = %self.name(), dependencies = count, "disposed container");
    }

    // ----- lookup -------------------------------------------------------

    /// True when the key is registered here or in any ancestor.
    pub fn is_known(&self, key: &Key) -> bool {
        self.inner.registry.read().contains_key(key)
            || self.parent().map_or(false, |p| p.is_known(key))
    }

    pub fn is_known_type<T: ?Sized + 'static>(&self) -> bool {
        self.is_known(&Key::of::<T>())
    }

    pub fn is_known_named<T: ?Sized + 'static>(&self, name: &'static str) -> bool {
        self.is_known(&Key::named::<T>(name))
    }

    /// The dependency registered locally under `key`.
    pub fn dependency(&self, key: &Key) -> Option<Arc<Dependency>> {
        self.inner
            .registry
            .read()
            .get(key)
            .map(|e| e.dependency.clone())
    }

    /// Keys registered locally, in registry order.
    pub fn keys(&self) -> Vec<Key> {
        self.inner
            .registry
            .read()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn keys_of(&self, type_id: TypeId) -> Vec<Key> {
        self.inner
            .registry
            .read()
            .iter()
            .filter(|(k, _)| k.type_id() == type_id)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn entry(&self, key: &Key) -> Option<Entry> {
        self.inner.registry.read().get(key).cloned()
    }

    /// Resolves a key to an instance.
    ///
    /// Lookup order: local registration, then the parent chain, then ad-hoc
    /// construction when the type's metadata is cached. Metadata is cached by
    /// [`TypeMetadata::of`], by [`resolve`](Self::resolve) and by registering
    /// the type through its `Injectable` impl; until then an unregistered
    /// type is [`DiError::NotFound`].
    pub fn get_any(&self, key: &Key) -> DiResult<Instance> {
        self.resolve_key(key).map(|r| r.view)
    }

    pub(crate) fn resolve_key(&self, key: &Key) -> DiResult<Resolved> {
        if let Some(entry) = self.entry(key) {
            return self.resolve_entry(key, entry);
        }

        if let Some(parent) = self.parent() {
            if parent.is_known(key) {
                return parent.resolve_key(key);
            }
        }

        if let Some(metadata) = TypeMetadata::lookup(key.type_id()) {
            let _guard = ResolutionGuard::enter(key)?;
            let instance = metadata.create_instance(self)?;
            return Ok(Resolved {
                view: instance.clone(),
                concrete: instance,
                dependency: None,
                metadata: Some(metadata),
            });
        }

        Err(DiError::NotFound(key.to_string()))
    }

    pub(crate) fn resolve_local(&self, key: &Key) -> DiResult<Instance> {
        let entry = self
            .entry(key)
            .ok_or_else(|| DiError::NotFound(key.to_string()))?;
        self.resolve_entry(key, entry).map(|r| r.view)
    }

    fn resolve_entry(&self, key: &Key, entry: Entry) -> DiResult<Resolved> {
        let _guard = ResolutionGuard::enter(key)?;
        let concrete = entry.dependency.get(self)?;
        let view = match &entry.caster {
            Some(cast) => cast(&concrete)?,
            None => concrete.clone(),
        };
        Ok(Resolved {
            view,
            concrete,
            dependency: Some(entry.dependency),
            metadata: None,
        })
    }

    /// Resolves `T` registered without a name.
    ///
    /// See [`get_any`](Self::get_any) for when an unregistered `Injectable`
    /// type is constructed ad hoc; [`resolve`](Self::resolve) always
    /// constructs it.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        downcast(self.get_any(&Key::of::<T>())?)
    }

    /// Resolves `T` registered under `name`.
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, name: &'static str) -> DiResult<Arc<T>> {
        downcast(self.get_any(&Key::named::<T>(name))?)
    }

    /// Resolves `T`, panicking on failure.
    ///
    /// # Panics
    ///
    /// Panics with the resolution error if `T` cannot be resolved.
    pub fn get_required<T: ?Sized + Send + Sync + 'static>(&self) -> Arc<T> {
        match self.get::<T>() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// Named variant of [`get_required`](Self::get_required).
    ///
    /// # Panics
    ///
    /// Panics with the resolution error if `T` cannot be resolved.
    pub fn get_named_required<T: ?Sized + Send + Sync + 'static>(&self, name: &'static str) -> Arc<T> {
        match self.get_named::<T>(name) {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// Resolves `T` if it is known, otherwise constructs it from its metadata.
    pub fn resolve<T: Injectable>(&self) -> DiResult<Arc<T>> {
        if self.is_known_type::<T>() {
            self.get::<T>()
        } else {
            self.create_instance::<T>()
        }
    }

    /// Constructs a fresh `T` from its metadata, ignoring registrations of `T`.
    pub fn create_instance<T: Injectable>(&self) -> DiResult<Arc<T>> {
        let key = Key::of::<T>();
        let _guard = ResolutionGuard::enter(&key)?;
        downcast(TypeMetadata::of::<T>().create_instance(self)?)
    }

    /// Lazily enumerates every instance registered under a key of type `T`,
    /// optionally continuing into the parent chain.
    ///
    /// Each item carries the registration name. Enumeration resolves
    /// instances as it goes, so transient registrations produce new
    /// instances.
    pub fn get_all_known_instances<T: ?Sized + Send + Sync + 'static>(
        &self,
        search_parents: bool,
    ) -> KnownInstances<T> {
        KnownInstances::new(self.clone(), search_parents)
    }

    // ----- post-injection -----------------------------------------------

    /// Runs the post-injectors on an existing instance.
    pub fn post_inject<T: ?Sized + Send + Sync + 'static>(
        &self,
        instance: &Arc<T>,
    ) -> DiResult<Vec<&'static str>> {
        let instance = Instance::new(instance.clone());
        match TypeMetadata::lookup(TypeId::of::<T>()) {
            Some(metadata) => self.run_post_injectors(&instance, &metadata),
            None => self.run_post_injectors(
                &instance,
                &TypeMetadata::empty(TypeId::of::<T>(), std::any::type_name::<T>()),
            ),
        }
    }

    pub(crate) fn run_post_injectors(
        &self,
        instance: &Instance,
        metadata: &TypeMetadata,
    ) -> DiResult<Vec<&'static str>> {
        let injectors: Vec<Arc<dyn PostInjector>> = self
            .inner
            .post_injectors
            .read()
            .iter()
            .map(|e| e.injector.clone())
            .collect();

        let mut touched = Vec::new();
        for injector in injectors {
            let members = injector.post_inject(self, metadata, instance)?;
            if !members.is_empty() {
                trace!(
                    container = %self.name(),
                    injector = injector.name(),
                    type_name = metadata.type_name(),
                    ?members,
                    "post-injected"
                );
            }
            touched.extend(members);
        }
        Ok(touched)
    }

    /// Adds a post-injector. An injector of the same type and name already
    /// present is kept (returns `false`) unless `overwrite` is set, in which
    /// case it is disposed and replaced.
    pub fn register_post_injector<P: PostInjector>(&self, injector: Arc<P>, overwrite: bool) -> bool {
        let replaced = {
            let mut injectors = self.inner.post_injectors.write();
            let existing = injectors
                .iter()
                .position(|e| e.handle.is::<P>() && e.injector.name() == injector.name());

            let replaced = match existing {
                Some(_) if !overwrite => return false,
                Some(pos) => Some(injectors.remove(pos)),
                None => None,
            };

            injectors.push(PostInjectorEntry {
                injector: injector.clone(),
                handle: Instance::new(injector.clone()),
            });
            injectors.sort_by_key(|e| e.injector.priority());
            replaced
        };

        if let Some(old) = replaced {
            old.injector.dispose();
        }
        debug!(
            container = %self.name(),
            injector = injector.name(),
            priority = injector.priority(),
            "registered post-injector"
        );
        true
    }

    /// Removes and disposes the first injector of type `P` (matching `name`
    /// when given).
    pub fn unregister_post_injector<P: PostInjector>(&self, name: Option<&str>) -> bool {
        let removed = {
            let mut injectors = self.inner.post_injectors.write();
            injectors
                .iter()
                .position(|e| e.handle.is::<P>() && name.map_or(true, |n| e.injector.name() == n))
                .map(|pos| injectors.remove(pos))
        };
        match removed {
            Some(entry) => {
                entry.injector.dispose();
                true
            }
            None => false,
        }
    }

    /// Removes and disposes this exact injector.
    pub fn unregister_post_injector_instance<P: PostInjector>(&self, injector: &Arc<P>) -> bool {
        let id = InstanceId::of(injector);
        let removed = {
            let mut injectors = self.inner.post_injectors.write();
            injectors
                .iter()
                .position(|e| e.handle.id() == id)
                .map(|pos| injectors.remove(pos))
        };
        match removed {
            Some(entry) => {
                entry.injector.dispose();
                true
            }
            None => false,
        }
    }

    /// First injector of type `P` (matching `name` when given).
    pub fn post_injector<P: PostInjector>(&self, name: Option<&str>) -> Option<Arc<P>> {
        self.inner
            .post_injectors
            .read()
            .iter()
            .filter(|e| name.map_or(true, |n| e.injector.name() == n))
            .find_map(|e| e.handle.downcast::<P>())
    }

    /// Every injector of type `P`, in execution order.
    pub fn post_injectors_of<P: PostInjector>(&self) -> Vec<Arc<P>> {
        self.inner
            .post_injectors
            .read()
            .iter()
            .filter_map(|e| e.handle.downcast::<P>())
            .collect()
    }

    /// Registered injectors in execution order.
    pub fn post_injectors(&self) -> Vec<Arc<dyn PostInjector>> {
        self.inner
            .post_injectors
            .read()
            .iter()
            .map(|e| e.injector.clone())
            .collect()
    }

    /// Toggles what every injector (matching `name` when given) bound to the
    /// instance. Returns how many injectors had something bound.
    pub fn set_post_injections_enabled(
        &self,
        instance: impl Into<InstanceId>,
        enabled: bool,
        name: Option<&str>,
    ) -> usize {
        self.toggle_injections(instance.into(), enabled, |e| {
            name.map_or(true, |n| e.injector.name() == n)
        })
    }

    /// Like [`set_post_injections_enabled`](Self::set_post_injections_enabled),
    /// restricted to injectors of type `P`.
    pub fn set_post_injections_enabled_for<P: PostInjector>(
        &self,
        instance: impl Into<InstanceId>,
        enabled: bool,
        name: Option<&str>,
    ) -> usize {
        self.toggle_injections(instance.into(), enabled, |e| {
            e.handle.is::<P>() && name.map_or(true, |n| e.injector.name() == n)
        })
    }

    fn toggle_injections(
        &self,
        instance: InstanceId,
        enabled: bool,
        filter: impl Fn(&PostInjectorEntry) -> bool,
    ) -> usize {
        let injectors: Vec<_> = self
            .inner
            .post_injectors
            .read()
            .iter()
            .filter(|e| filter(e))
            .map(|e| e.injector.clone())
            .collect();
        let count = injectors
            .iter()
            .filter(|i| i.set_injection_enabled(instance, enabled))
            .count();
        if count == 0 {
            debug!(container = %self.name(), ?instance, "no post-injections bound to instance");
        }
        count
    }

    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("=== Container '{}' ===\n", self.name()));
        if let Some(parent) = self.parent() {
            s.push_str(&format!("Parent: {}\n", parent.name()));
        }
        s.push_str("Dependencies:\n");
        for (k, e) in self.inner.registry.read().iter() {
            s.push_str(&format!(
                "  {}: {:?} ({})\n",
                k,
                e.dependency.lifetime(),
                e.dependency.type_name()
            ));
        }
        s.push_str("Post-injectors:\n");
        for e in self.inner.post_injectors.read().iter() {
            s.push_str(&format!("  {} (priority {})\n", e.injector.name(), e.injector.priority()));
        }
        s
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.name)
            .field("parent", &self.parent().map(Container::name))
            .field("dependencies", &self.inner.registry.read().len())
            .field("post_injectors", &self.inner.post_injectors.read().len())
            .finish()
    }
}

pub(crate) fn downcast<T: ?Sized + Send + Sync + 'static>(instance: Instance) -> DiResult<Arc<T>> {
    instance.downcast::<T>().ok_or_else(|| {
        DiError::TypeMismatch(format!(
            "{} resolved as {}",
            std::any::type_name::<T>(),
            instance.type_name()
        ))
    })
}
