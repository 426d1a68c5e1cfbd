//! Dependency entries and the per-container registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::instance::{Instance, WeakInstance};
use crate::key::Key;
use crate::lifetime::Lifetime;

/// Type-erased factory producing an instance of the registered type
pub(crate) type Factory = Arc<dyn Fn(&Container) -> DiResult<Instance> + Send + Sync>;
/// Type-erased disposer, invoked with an instance of the registered type
pub(crate) type Disposer = Arc<dyn Fn(&Instance) + Send + Sync>;
/// Produces the interface view for an alias key
pub(crate) type Caster = Arc<dyn Fn(&Instance) -> DiResult<Instance> + Send + Sync>;

enum Slot {
    Empty,
    Weak(WeakInstance),
    Strong(Instance),
}

impl Slot {
    fn current(&self) -> Option<Instance> {
        match self {
            Slot::Empty => None,
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Strong(instance) => Some(instance.clone()),
        }
    }
}

/// A registered dependency: a lifetime strategy wrapped around a factory or value.
///
/// The same dependency is shared between its primary key and every alias key,
/// so clearing or disposing it through one key affects all of them.
pub struct Dependency {
    lifetime: Lifetime,
    type_name: &'static str,
    factory: Option<Factory>,
    slot: Mutex<Slot>,
    disposer: Option<Disposer>,
    disposed: AtomicBool,
}

impl Dependency {
    pub(crate) fn new(
        lifetime: Lifetime,
        type_name: &'static str,
        factory: Option<Factory>,
        instance: Option<Instance>,
        disposer: Option<Disposer>,
    ) -> DiResult<Self> {
        let slot = match (lifetime, instance) {
            (Lifetime::Singleton, Some(instance)) => Slot::Strong(instance),
            (Lifetime::Singleton, None) => {
                return Err(DiError::InvalidArgument(format!(
                    "singleton {} registered without an instance",
                    type_name
                )))
            }
            (_, Some(_)) => {
                return Err(DiError::InvalidArgument(format!(
                    "{:?} dependency {} takes a factory, not an instance",
                    lifetime, type_name
                )))
            }
            (_, None) if factory.is_none() => {
                return Err(DiError::InvalidArgument(format!(
                    "{:?} dependency {} registered without a factory",
                    lifetime, type_name
                )))
            }
            (_, None) => Slot::Empty,
        };

        Ok(Self {
            lifetime,
            type_name,
            factory,
            slot: Mutex::new(slot),
            disposer,
            disposed: AtomicBool::new(false),
        })
    }

    /// The lifetime strategy of this dependency.
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// See [`Lifetime::is_singleton`].
    pub fn is_singleton(&self) -> bool {
        self.lifetime.is_singleton()
    }

    /// Name of the registered implementation type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether this dependency carries a disposer.
    pub fn is_disposable(&self) -> bool {
        self.disposer.is_some()
    }

    /// The instance currently held, without creating one.
    pub fn current(&self) -> Option<Instance> {
        self.slot.lock().current()
    }

    /// Returns the instance for this access according to the lifetime.
    ///
    /// The factory never runs while the slot lock is held. When two threads
    /// race to fill a cached slot, the first stored instance wins and both
    /// callers receive it.
    pub(crate) fn get(&self, container: &Container) -> DiResult<Instance> {
        if self.is_disposed() {
            return Err(DiError::Disposed(self.type_name.to_string()));
        }

        match self.lifetime {
            Lifetime::Transient => self.create(container),
            Lifetime::Singleton => self
                .current()
                .ok_or_else(|| DiError::Disposed(self.type_name.to_string())),
            Lifetime::Cached | Lifetime::LazySingleton => {
                if let Some(existing) = self.current() {
                    return Ok(existing);
                }

                let created = self.create(container)?;

                let mut slot = self.slot.lock();
                if let Some(existing) = slot.current() {
                    return Ok(existing);
                }
                *slot = if self.lifetime == Lifetime::Cached {
                    Slot::Weak(created.downgrade())
                } else {
                    Slot::Strong(created.clone())
                };
                Ok(created)
            }
        }
    }

    fn create(&self, container: &Container) -> DiResult<Instance> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| DiError::InvalidArgument(format!("{} has no factory", self.type_name)))?;
        trace!(dependency = self.type_name, lifetime = ?self.lifetime, "invoking factory");
        factory(container)
    }

    /// Forgets cached state. Singletons are unaffected.
    pub fn clear(&self) {
        if matches!(self.lifetime, Lifetime::Cached | Lifetime::LazySingleton) {
            *self.slot.lock() = Slot::Empty;
        }
    }

    /// Disposes the held instance (if any and if disposable) and forgets it.
    ///
    /// Idempotent. A disposed dependency refuses further resolution.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let held = {
            let mut slot = self.slot.lock();
            std::mem::replace(&mut *slot, Slot::Empty).current()
        };

        if let (Some(disposer), Some(instance)) = (&self.disposer, held) {
            trace!(dependency = self.type_name, "disposing instance");
            disposer(&instance);
        }
    }

    /// Runs the disposer on an instance this dependency handed out.
    pub(crate) fn dispose_instance(&self, instance: &Instance) {
        if let Some(disposer) = &self.disposer {
            disposer(instance);
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("type", &self.type_name)
            .field("lifetime", &self.lifetime)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A key's view of a dependency.
#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) dependency: Arc<Dependency>,
    pub(crate) caster: Option<Caster>,
}

/// Type-erased registration request, produced by [`Add`](crate::Add).
pub struct Registration {
    pub(crate) key: Key,
    pub(crate) aliases: Vec<(Key, Caster)>,
    pub(crate) lifetime: Lifetime,
    pub(crate) type_name: &'static str,
    pub(crate) factory: Option<Factory>,
    pub(crate) instance: Option<Instance>,
    pub(crate) disposer: Option<Disposer>,
    pub(crate) overwrite: bool,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("aliases", &self.aliases.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("lifetime", &self.lifetime)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

/// Registry holding a container's entries
///
/// Small registries are scanned linearly, larger ones spill into a map.
/// Iteration yields the vector part in insertion order, then the map part.
pub(crate) struct Registry {
    small: Vec<(Key, Entry)>,
    large: HashMap<Key, Entry>,
    small_threshold: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            small: Vec::new(),
            large: HashMap::new(),
            small_threshold: 16,
        }
    }

    /// Inserts or replaces, returning the replaced entry.
    pub(crate) fn insert(&mut self, key: Key, entry: Entry) -> Option<Entry> {
        if let Some(pos) = self.small.iter().position(|(k, _)| k == &key) {
            return Some(std::mem::replace(&mut self.small[pos].1, entry));
        }
        if self.small.len() < self.small_threshold && !self.large.contains_key(&key) {
            self.small.push((key, entry));
            None
        } else {
            self.large.insert(key, entry)
        }
    }

    #[inline]
    pub(crate) fn get(&self, key: &Key) -> Option<&Entry> {
        self.small
            .iter()
            .find_map(|(k, e)| (k == key).then_some(e))
            .or_else(|| self.large.get(key))
    }

    #[inline]
    pub(crate) fn contains_key(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<Entry> {
        match self.small.iter().position(|(k, _)| k == key) {
            Some(pos) => Some(self.small.remove(pos).1),
            None => self.large.remove(key),
        }
    }

    /// Whether any key still points at `dependency`.
    pub(crate) fn references(&self, dependency: &Arc<Dependency>) -> bool {
        self.iter().any(|(_, e)| Arc::ptr_eq(&e.dependency, dependency))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Key, &Entry)> {
        self.small.iter().map(|(k, e)| (k, e)).chain(self.large.iter())
    }

    pub(crate) fn len(&self) -> usize {
        self.small.len() + self.large.len()
    }

    /// Empties the registry and returns each distinct dependency once.
    pub(crate) fn drain_dependencies(&mut self) -> Vec<Arc<Dependency>> {
        let mut unique: Vec<Arc<Dependency>> = Vec::new();
        for (_, entry) in self.small.drain(..).chain(self.large.drain()) {
            if !unique.iter().any(|d| Arc::ptr_eq(d, &entry.dependency)) {
                unique.push(entry.dependency);
            }
        }
        unique
    }
}
