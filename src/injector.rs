//! Process-wide registry of named containers.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::container::Container;

const DEFAULT_CONTAINER: &str = "default";

static CONTAINERS: Lazy<RwLock<HashMap<String, Container>>> = Lazy::new(|| RwLock::new(HashMap::new()));
static DEFAULT: Lazy<Container> = Lazy::new(|| Container::new(DEFAULT_CONTAINER));

/// Entry point to the process-wide container registry.
///
/// Containers are created on first use by name and live until removed,
/// disposed, or the cache is cleared.
///
/// # Examples
///
/// ```rust
/// use reinject::Injector;
///
/// let a = Injector::container("injector-doc");
/// let b = Injector::container("injector-doc");
/// assert!(a.ptr_eq(&b));
///
/// let child = Injector::new_container(Some(&a));
/// assert!(child.parent().unwrap().ptr_eq(&a));
///
/// Injector::remove("injector-doc");
/// assert!(Injector::get("injector-doc").is_none());
/// ```
pub struct Injector;

impl Injector {
    /// Container registered under `name`, created without a parent if missing.
    pub fn container(name: &str) -> Container {
        Self::get_or_create(name, None)
    }

    /// Container registered under `name`, created as a child of `parent` if
    /// missing. An existing container keeps its original parent.
    pub fn container_with_parent(name: &str, parent: &Container) -> Container {
        Self::get_or_create(name, Some(parent))
    }

    /// Registers a new container under a random name.
    pub fn new_container(parent: Option<&Container>) -> Container {
        Self::get_or_create(&Uuid::new_v4().to_string(), parent)
    }

    /// The unnamed default container. It is not part of the named registry.
    pub fn default_container() -> Container {
        DEFAULT.clone()
    }

    pub fn get(name: &str) -> Option<Container> {
        CONTAINERS.read().get(name).cloned()
    }

    pub fn contains(name: &str) -> bool {
        CONTAINERS.read().contains_key(name)
    }

    /// Names of registered containers.
    pub fn names() -> Vec<String> {
        CONTAINERS.read().keys().cloned().collect()
    }

    /// Removes a container from the registry and clears its cache.
    pub fn remove(name: &str) -> Option<Container> {
        let removed = CONTAINERS.write().remove(name);
        if let Some(container) = &removed {
            container.clear();
            debug!(container = name, "removed container");
        }
        removed
    }

    /// Clears every registered container, empties the registry and clears
    /// the default container.
    pub fn clear_cache() {
        let drained: Vec<Container> = CONTAINERS.write().drain().map(|(_, c)| c).collect();
        for container in &drained {
            container.clear();
        }
        DEFAULT.clear();
        debug!(containers = drained.len(), "cleared injector cache");
    }

    fn get_or_create(name: &str, parent: Option<&Container>) -> Container {
        if let Some(existing) = Self::get(name) {
            return existing;
        }
        CONTAINERS
            .write()
            .entry(name.to_string())
            .or_insert_with(|| match parent {
                Some(parent) => Container::with_parent(name, parent),
                None => Container::new(name),
            })
            .clone()
    }

    /// Drops `container` from the registry if it is the one registered under
    /// its name.
    pub(crate) fn detach(container: &Container) {
        let mut containers = CONTAINERS.write();
        if containers
            .get(container.name())
            .map_or(false, |c| c.ptr_eq(container))
        {
            containers.remove(container.name());
        }
    }
}
