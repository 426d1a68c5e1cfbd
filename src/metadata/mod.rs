//! Per-type injection metadata and the constructor resolver.
//!
//! A type opts into container construction by implementing [`Injectable`],
//! describing its constructors, injectable members, event handlers and
//! background tasks through a [`TypeMetadataBuilder`]. The description is built
//! once and cached process-wide by `TypeId`; [`TypeMetadata::recompute`]
//! replaces a cached entry.
//!
//! # Examples
//!
//! ```rust
//! use reinject::{Container, Injectable, Injected, Param, TypeMetadataBuilder};
//! use std::sync::Arc;
//!
//! struct Config { url: String }
//! struct Metrics;
//!
//! struct Repository {
//!     config: Arc<Config>,
//!     metrics: Injected<Metrics>,
//! }
//!
//! impl Injectable for Repository {
//!     fn describe(meta: &mut TypeMetadataBuilder<Self>) {
//!         meta.constructor([Param::of::<Config>()], |args| {
//!             Ok(Repository { config: args.get(0)?, metrics: Injected::new() })
//!         })
//!         .inject("metrics", |r| &r.metrics);
//!     }
//! }
//!
//! let container = Container::new("metadata-doc");
//! container.add_singleton(Config { url: "db://".into() }).unwrap();
//! container.add_singleton(Metrics).unwrap();
//!
//! let repo = container.resolve::<Repository>().unwrap();
//! assert_eq!(repo.config.url, "db://");
//! assert!(repo.metrics.is_set());
//! ```

mod builder;
mod injected;

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::background::BackgroundTaskDecl;
use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::events::ErasedHandler;
use crate::instance::Instance;
use crate::key::Key;
use crate::registration::Disposer;

pub use builder::{Args, Param, TypeMetadataBuilder};
pub(crate) use builder::disposer_for;
pub use injected::Injected;

/// A type the container can construct on its own.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Declares how to build and wire `Self`.
    fn describe(meta: &mut TypeMetadataBuilder<Self>);
}

static METADATA_CACHE: Lazy<RwLock<HashMap<TypeId, Arc<TypeMetadata>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub(crate) struct ConstructorDecl {
    pub(crate) params: Vec<Param>,
    pub(crate) invoke: Arc<dyn Fn(&Args) -> DiResult<Instance> + Send + Sync>,
}

pub(crate) struct MemberDecl {
    pub(crate) name: &'static str,
    pub(crate) key: Key,
    pub(crate) assign: Arc<dyn Fn(&Instance, &Instance) -> bool + Send + Sync>,
}

/// A method bindable to a logical event.
pub struct EventHandlerDecl {
    pub(crate) member: &'static str,
    pub(crate) event: Cow<'static, str>,
    pub(crate) priority: i32,
    pub(crate) handler: ErasedHandler,
}

impl EventHandlerDecl {
    pub fn member(&self) -> &'static str {
        self.member
    }

    /// Logical event name the handler listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn handler(&self) -> &ErasedHandler {
        &self.handler
    }
}

/// Cached description of one type.
pub struct TypeMetadata {
    type_id: TypeId,
    type_name: &'static str,
    constructors: Vec<ConstructorDecl>,
    fallback: Option<Arc<dyn Fn() -> Instance + Send + Sync>>,
    members: Vec<MemberDecl>,
    event_handlers: Vec<EventHandlerDecl>,
    background_tasks: Vec<BackgroundTaskDecl>,
    disposer: Option<Disposer>,
}

impl TypeMetadata {
    /// Cached metadata for `T`, describing it on first use.
    pub fn of<T: Injectable>() -> Arc<TypeMetadata> {
        if let Some(existing) = Self::lookup(TypeId::of::<T>()) {
            return existing;
        }

        let built = Arc::new(Self::describe::<T>());
        METADATA_CACHE
            .write()
            .entry(TypeId::of::<T>())
            .or_insert(built)
            .clone()
    }

    /// Describes `T` again and replaces the cached entry.
    pub fn recompute<T: Injectable>() -> Arc<TypeMetadata> {
        let built = Arc::new(Self::describe::<T>());
        METADATA_CACHE.write().insert(TypeId::of::<T>(), built.clone());
        built
    }

    /// Cached metadata for a type id, if the type was described before.
    pub fn lookup(type_id: TypeId) -> Option<Arc<TypeMetadata>> {
        METADATA_CACHE.read().get(&type_id).cloned()
    }

    /// Drops every cached description.
    pub fn clear_cache() {
        METADATA_CACHE.write().clear();
    }

    /// Metadata carrying no declarations, used for types that never described
    /// themselves.
    pub fn empty(type_id: TypeId, type_name: &'static str) -> TypeMetadata {
        TypeMetadata {
            type_id,
            type_name,
            constructors: Vec::new(),
            fallback: None,
            members: Vec::new(),
            event_handlers: Vec::new(),
            background_tasks: Vec::new(),
            disposer: None,
        }
    }

    fn describe<T: Injectable>() -> TypeMetadata {
        let mut builder = TypeMetadataBuilder::<T>::new();
        T::describe(&mut builder);
        let metadata = builder.build();
        debug!(
            type_name = metadata.type_name,
            constructors = metadata.constructors.len(),
            members = metadata.members.len(),
            "described type"
        );
        metadata
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn constructor_count(&self) -> usize {
        self.constructors.len()
    }

    /// Names of the injectable members, in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.members.iter().map(|m| m.name)
    }

    pub fn event_handlers(&self) -> &[EventHandlerDecl] {
        &self.event_handlers
    }

    pub fn background_tasks(&self) -> &[BackgroundTaskDecl] {
        &self.background_tasks
    }

    pub fn is_disposable(&self) -> bool {
        self.disposer.is_some()
    }

    pub(crate) fn disposer(&self) -> Option<&Disposer> {
        self.disposer.as_ref()
    }

    /// Greedy constructor selection: the eligible constructor with the most
    /// parameters, first declared on ties.
    fn select_constructor(&self, container: &Container) -> Option<&ConstructorDecl> {
        let mut best: Option<&ConstructorDecl> = None;
        for ctor in &self.constructors {
            let eligible = ctor
                .params
                .iter()
                .all(|p| p.default.is_some() || container.is_known(&p.key));
            if eligible && best.map_or(true, |b| ctor.params.len() > b.params.len()) {
                best = Some(ctor);
            }
        }
        best
    }

    /// Builds an instance: constructor, member injection, post-injection.
    pub fn create_instance(&self, container: &Container) -> DiResult<Instance> {
        let instance = match self.select_constructor(container) {
            Some(ctor) => {
                let mut values = Vec::with_capacity(ctor.params.len());
                for param in &ctor.params {
                    let value = if container.is_known(&param.key) {
                        container.get_any(&param.key)?
                    } else if let Some(default) = &param.default {
                        default()
                    } else {
                        return Err(DiError::UnresolvableParameter {
                            parameter: param.key.to_string(),
                            owner: self.type_name.to_string(),
                        });
                    };
                    values.push(value);
                }

                trace!(
                    type_name = self.type_name,
                    params = values.len(),
                    "invoking constructor"
                );
                (ctor.invoke)(&Args::new(self.type_name, values)).map_err(|source| {
                    DiError::Construction {
                        type_name: self.type_name.to_string(),
                        source: Box::new(source),
                    }
                })?
            }
            None => match &self.fallback {
                Some(allocate) => {
                    trace!(type_name = self.type_name, "no eligible constructor, using fallback");
                    allocate()
                }
                None => return Err(DiError::NoEligibleConstructor(self.type_name.to_string())),
            },
        };

        self.inject_members(container, &instance)?;
        container.run_post_injectors(&instance, self)?;
        Ok(instance)
    }

    /// Sets every member whose key the container knows. Returns the names of
    /// the members that were set.
    pub fn inject_members(
        &self,
        container: &Container,
        instance: &Instance,
    ) -> DiResult<Vec<&'static str>> {
        let mut injected = Vec::new();
        for member in &self.members {
            if !container.is_known(&member.key) {
                continue;
            }
            let value = container.get_any(&member.key)?;
            if (member.assign)(instance, &value) {
                injected.push(member.name);
            } else {
                return Err(DiError::TypeMismatch(format!(
                    "member {}.{} cannot hold {}",
                    self.type_name,
                    member.name,
                    value.type_name()
                )));
            }
        }
        Ok(injected)
    }
}

impl fmt::Debug for TypeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMetadata")
            .field("type", &self.type_name)
            .field("constructors", &self.constructors.len())
            .field("members", &self.members.iter().map(|m| m.name).collect::<Vec<_>>())
            .field("event_handlers", &self.event_handlers.len())
            .field("background_tasks", &self.background_tasks.len())
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}
