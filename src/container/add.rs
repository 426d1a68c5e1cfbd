//! Typed registration builder and registration shorthands.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{DiError, DiResult};
use crate::instance::Instance;
use crate::key::Key;
use crate::lifetime::Lifetime;
use crate::metadata::{disposer_for, Injectable, TypeMetadata};
use crate::registration::{Caster, Disposer, Factory, Registration};
use crate::traits::{Dispose, Implements};

use super::Container;

/// Typed registration of `T`, started with [`Container::add`].
///
/// Options (`named`, `alias`, `overwrite`, `disposable`) are set first; a
/// lifetime method finishes the registration.
///
/// # Examples
///
/// ```rust
/// use reinject::{Container, Lifetime};
/// use std::sync::Arc;
///
/// trait Store: Send + Sync { fn get(&self) -> u32; }
/// struct Memory(u32);
/// impl Store for Memory { fn get(&self) -> u32 { self.0 } }
/// reinject::implements!(Memory => dyn Store);
///
/// let container = Container::new("add-doc");
/// container
///     .add::<Memory>()
///     .named("primary")
///     .alias::<dyn Store>()
///     .lazy_singleton_with(|_| Ok(Memory(7)))
///     .unwrap();
///
/// let concrete = container.get_named::<Memory>("primary").unwrap();
/// let view = container.get_named::<dyn Store>("primary").unwrap();
/// assert_eq!(view.get(), 7);
/// assert_eq!(reinject::InstanceId::of(&concrete), reinject::InstanceId::of(&view));
/// ```
#[must_use = "a registration does nothing until a lifetime method is called"]
pub struct Add<'c, T: ?Sized> {
    container: &'c Container,
    name: Option<Cow<'static, str>>,
    aliases: Vec<(Key, Caster)>,
    overwrite: bool,
    disposer: Option<Disposer>,
    _type: PhantomData<fn() -> Arc<T>>,
}

impl<'c, T: ?Sized + Send + Sync + 'static> Add<'c, T> {
    pub(crate) fn new(container: &'c Container) -> Self {
        Self {
            container,
            name: None,
            aliases: Vec::new(),
            overwrite: false,
            disposer: None,
            _type: PhantomData,
        }
    }

    /// Registers under a name, for the type and every alias.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace existing registrations of the same keys.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Also registers the dependency under the interface `I`.
    ///
    /// Both keys share one dependency, so clearing or disposing it through
    /// either key affects the other.
    pub fn alias<I>(mut self) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        T: Implements<I>,
    {
        let caster: Caster = Arc::new(|instance: &Instance| {
            instance
                .downcast::<T>()
                .map(|concrete| Instance::new(<T as Implements<I>>::upcast(concrete)))
                .ok_or_else(|| {
                    DiError::TypeMismatch(format!(
                        "{} is not a {}",
                        instance.type_name(),
                        std::any::type_name::<T>()
                    ))
                })
        });
        self.aliases.push((Key::of::<I>(), caster));
        self
    }

    /// Disposes instances through [`Dispose`] when the dependency is torn down.
    pub fn disposable(mut self) -> Self
    where
        T: Dispose + Sized,
    {
        self.disposer = Some(disposer_for::<T>());
        self
    }

    /// New instance from `factory` on every access.
    pub fn transient_with<V, F>(self, factory: F) -> DiResult<&'c Container>
    where
        V: Into<Arc<T>>,
        F: Fn(&Container) -> DiResult<V> + Send + Sync + 'static,
    {
        self.finish(Lifetime::Transient, Some(typed_factory(factory)), None)
    }

    /// Instance from `factory`, held weakly.
    pub fn cached_with<V, F>(self, factory: F) -> DiResult<&'c Container>
    where
        V: Into<Arc<T>>,
        F: Fn(&Container) -> DiResult<V> + Send + Sync + 'static,
    {
        self.finish(Lifetime::Cached, Some(typed_factory(factory)), None)
    }

    /// Instance from `factory` on first access, kept until the cache is cleared.
    pub fn lazy_singleton_with<V, F>(self, factory: F) -> DiResult<&'c Container>
    where
        V: Into<Arc<T>>,
        F: Fn(&Container) -> DiResult<V> + Send + Sync + 'static,
    {
        self.finish(Lifetime::LazySingleton, Some(typed_factory(factory)), None)
    }

    /// Runs `factory` now and registers the result as a singleton.
    pub fn singleton_with<V, F>(self, factory: F) -> DiResult<&'c Container>
    where
        V: Into<Arc<T>>,
        F: FnOnce(&Container) -> DiResult<V>,
    {
        let value: Arc<T> = factory(self.container)?.into();
        self.instance(value)
    }

    /// Registers an existing value as a singleton.
    pub fn instance(self, value: impl Into<Arc<T>>) -> DiResult<&'c Container> {
        let instance = Instance::new(value.into());
        self.finish(Lifetime::Singleton, None, Some(instance))
    }

    fn finish(
        self,
        lifetime: Lifetime,
        factory: Option<Factory>,
        instance: Option<Instance>,
    ) -> DiResult<&'c Container> {
        let Add {
            container,
            name,
            aliases,
            overwrite,
            disposer,
            ..
        } = self;

        container.register(Registration {
            key: Key::of::<T>().with_name(name.clone()),
            aliases: aliases
                .into_iter()
                .map(|(key, caster)| (key.with_name(name.clone()), caster))
                .collect(),
            lifetime,
            type_name: std::any::type_name::<T>(),
            factory,
            instance,
            disposer,
            overwrite,
        })?;
        Ok(container)
    }
}

impl<'c, T: Injectable> Add<'c, T> {
    /// New instance built from `T`'s metadata on every access.
    pub fn transient(self) -> DiResult<&'c Container> {
        self.with_metadata(Lifetime::Transient)
    }

    /// Instance built from metadata, held weakly.
    pub fn cached(self) -> DiResult<&'c Container> {
        self.with_metadata(Lifetime::Cached)
    }

    /// Instance built from metadata on first access.
    pub fn lazy_singleton(self) -> DiResult<&'c Container> {
        self.with_metadata(Lifetime::LazySingleton)
    }

    /// Builds `T` from its metadata now and registers it as a singleton.
    pub fn singleton(mut self) -> DiResult<&'c Container> {
        let metadata = TypeMetadata::of::<T>();
        if self.disposer.is_none() {
            self.disposer = metadata.disposer().cloned();
        }
        let instance = metadata.create_instance(self.container)?;
        self.finish(Lifetime::Singleton, None, Some(instance))
    }

    fn with_metadata(mut self, lifetime: Lifetime) -> DiResult<&'c Container> {
        let metadata = TypeMetadata::of::<T>();
        if self.disposer.is_none() {
            self.disposer = metadata.disposer().cloned();
        }
        let factory: Factory = Arc::new(move |container: &Container| metadata.create_instance(container));
        self.finish(lifetime, Some(factory), None)
    }
}

fn typed_factory<T, V, F>(factory: F) -> Factory
where
    T: ?Sized + Send + Sync + 'static,
    V: Into<Arc<T>>,
    F: Fn(&Container) -> DiResult<V> + Send + Sync + 'static,
{
    Arc::new(move |container: &Container| {
        factory(container).map(|value| Instance::new::<T>(value.into()))
    })
}

/// Shorthands over [`Container::add`].
impl Container {
    /// Registers `T` as transient, built from its metadata.
    pub fn add_transient<T: Injectable>(&self) -> DiResult<&Self> {
        self.add::<T>().transient()
    }

    /// Registers `T` as cached, built from its metadata.
    pub fn add_cached<T: Injectable>(&self) -> DiResult<&Self> {
        self.add::<T>().cached()
    }

    /// Registers `T` as lazy singleton, built from its metadata.
    pub fn add_lazy_singleton<T: Injectable>(&self) -> DiResult<&Self> {
        self.add::<T>().lazy_singleton()
    }

    /// Registers a value as singleton.
    pub fn add_singleton<T: Send + Sync + 'static>(&self, value: T) -> DiResult<&Self> {
        self.add::<T>().instance(value)
    }

    pub fn add_transient_factory<T, F>(&self, factory: F) -> DiResult<&Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> DiResult<T> + Send + Sync + 'static,
    {
        self.add::<T>().transient_with(factory)
    }

    pub fn add_cached_factory<T, F>(&self, factory: F) -> DiResult<&Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> DiResult<T> + Send + Sync + 'static,
    {
        self.add::<T>().cached_with(factory)
    }

    pub fn add_lazy_singleton_factory<T, F>(&self, factory: F) -> DiResult<&Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> DiResult<T> + Send + Sync + 'static,
    {
        self.add::<T>().lazy_singleton_with(factory)
    }

    /// Registers `T` as transient under its own key and the interface `I`.
    pub fn add_transient_as<I, T>(&self) -> DiResult<&Self>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Injectable + Implements<I>,
    {
        self.add::<T>().alias::<I>().transient()
    }

    /// Registers `T` as cached under its own key and the interface `I`.
    pub fn add_cached_as<I, T>(&self) -> DiResult<&Self>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Injectable + Implements<I>,
    {
        self.add::<T>().alias::<I>().cached()
    }

    /// Registers `T` as lazy singleton under its own key and the interface `I`.
    pub fn add_lazy_singleton_as<I, T>(&self) -> DiResult<&Self>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Injectable + Implements<I>,
    {
        self.add::<T>().alias::<I>().lazy_singleton()
    }

    /// Registers a value as singleton under its own key and the interface `I`.
    pub fn add_singleton_as<I, T>(&self, value: T) -> DiResult<&Self>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Implements<I>,
    {
        self.add::<T>().alias::<I>().instance(value)
    }
}
