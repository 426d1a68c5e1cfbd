//! Push-based construction of [`TypeMetadata`].

use std::any::TypeId;
use std::borrow::Cow;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::background::{BackgroundTaskDecl, ScheduleSource};
use crate::error::{DiError, DiResult};
use crate::events::ErasedHandler;
use crate::instance::Instance;
use crate::key::Key;
use crate::registration::Disposer;
use crate::traits::{Dispose, Implements};

use super::{ConstructorDecl, EventHandlerDecl, Injectable, Injected, MemberDecl, TypeMetadata};

/// A constructor parameter.
///
/// The parameter is satisfied by the container when its key is known there,
/// otherwise by its default (if any).
#[derive(Clone)]
pub struct Param {
    pub(crate) key: Key,
    pub(crate) default: Option<Arc<dyn Fn() -> Instance + Send + Sync>>,
}

impl Param {
    /// Parameter resolved by type.
    pub fn of<T: ?Sized + Send + Sync + 'static>() -> Self {
        Self {
            key: Key::of::<T>(),
            default: None,
        }
    }

    /// Parameter with a default used when the container does not know `T`.
    pub fn defaulted<T, F>(default: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            key: Key::of::<T>(),
            default: Some(Arc::new(move || Instance::new(Arc::new(default())))),
        }
    }

    /// Resolves the parameter under a registration name.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.key = self.key.with_name(Some(name.into()));
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("key", &self.key)
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// Bound constructor arguments, in declaration order.
pub struct Args {
    owner: &'static str,
    values: Vec<Instance>,
}

impl Args {
    pub(crate) fn new(owner: &'static str, values: Vec<Instance>) -> Self {
        Self { owner, values }
    }

    /// Argument at `index`, as declared by the matching [`Param`].
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> DiResult<Arc<T>> {
        let value = self.values.get(index).ok_or_else(|| {
            DiError::InvalidArgument(format!(
                "constructor of {} has no parameter {}",
                self.owner, index
            ))
        })?;
        value.downcast::<T>().ok_or_else(|| {
            DiError::TypeMismatch(format!(
                "parameter {} of {} is {}, not {}",
                index,
                self.owner,
                value.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Collects the shape of `T`: constructors, injectable members, event
/// handlers, background tasks and disposal.
///
/// Handed to [`Injectable::describe`]; every method returns `&mut Self` so
/// declarations chain.
pub struct TypeMetadataBuilder<T> {
    constructors: Vec<ConstructorDecl>,
    fallback: Option<Arc<dyn Fn() -> Instance + Send + Sync>>,
    members: Vec<MemberDecl>,
    event_handlers: Vec<EventHandlerDecl>,
    background_tasks: Vec<BackgroundTaskDecl>,
    disposer: Option<Disposer>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Injectable> TypeMetadataBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            constructors: Vec::new(),
            fallback: None,
            members: Vec::new(),
            event_handlers: Vec::new(),
            background_tasks: Vec::new(),
            disposer: None,
            _type: PhantomData,
        }
    }

    /// Declares a constructor.
    ///
    /// Among the constructors whose parameters are all satisfiable, the one
    /// with the most parameters is used; the first declared wins a tie.
    pub fn constructor<P, F>(&mut self, params: P, f: F) -> &mut Self
    where
        P: IntoIterator<Item = Param>,
        F: Fn(&Args) -> DiResult<T> + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorDecl {
            params: params.into_iter().collect(),
            invoke: Arc::new(move |args| f(args).map(|value| Instance::new(Arc::new(value)))),
        });
        self
    }

    /// Allocation used when no constructor is satisfiable.
    pub fn fallback<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(move || Instance::new(Arc::new(f()))));
        self
    }

    /// [`fallback`](Self::fallback) through `Default`.
    pub fn fallback_default(&mut self) -> &mut Self
    where
        T: Default,
    {
        self.fallback(T::default)
    }

    /// Injects the member when the container knows `U`.
    pub fn inject<U>(&mut self, member: &'static str, slot: fn(&T) -> &Injected<U>) -> &mut Self
    where
        U: ?Sized + Send + Sync + 'static,
    {
        self.push_member::<U, U>(member, Key::of::<U>(), slot, |value| value)
    }

    /// Injects the member from the registration named `name`.
    pub fn inject_named<U>(
        &mut self,
        member: &'static str,
        name: &'static str,
        slot: fn(&T) -> &Injected<U>,
    ) -> &mut Self
    where
        U: ?Sized + Send + Sync + 'static,
    {
        self.push_member::<U, U>(member, Key::named::<U>(name), slot, |value| value)
    }

    /// Injects the member from the registration of `V`, viewed as `U`.
    ///
    /// Use this when the member is declared through a wider type than the one
    /// registered in the container.
    pub fn inject_as<V, U>(
        &mut self,
        member: &'static str,
        name: Option<&'static str>,
        slot: fn(&T) -> &Injected<U>,
    ) -> &mut Self
    where
        V: Implements<U>,
        U: ?Sized + Send + Sync + 'static,
    {
        let key = Key::of::<V>().with_name(name.map(Cow::Borrowed));
        self.push_member::<V, U>(member, key, slot, <V as Implements<U>>::upcast)
    }

    fn push_member<V, U>(
        &mut self,
        member: &'static str,
        key: Key,
        slot: fn(&T) -> &Injected<U>,
        convert: fn(Arc<V>) -> Arc<U>,
    ) -> &mut Self
    where
        V: ?Sized + Send + Sync + 'static,
        U: ?Sized + Send + Sync + 'static,
    {
        self.members.push(MemberDecl {
            name: member,
            key,
            assign: Arc::new(move |target: &Instance, value: &Instance| {
                match (target.downcast::<T>(), value.downcast::<V>()) {
                    (Some(target), Some(value)) => {
                        slot(&target).set(convert(value));
                        true
                    }
                    _ => false,
                }
            }),
        });
        self
    }

    /// Declares a handler for the logical event `event`.
    ///
    /// Once an event injector knows a source for that name, post-injection
    /// binds the instance (weakly) as a target with the given priority.
    pub fn event_handler<A, R, F>(
        &mut self,
        member: &'static str,
        event: impl Into<Cow<'static, str>>,
        priority: i32,
        handler: F,
    ) -> &mut Self
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        self.event_handlers.push(EventHandlerDecl {
            member,
            event: event.into(),
            priority,
            handler: ErasedHandler::bound::<T, A, R, _>(handler),
        });
        self
    }

    /// Declares a recurring task on a cron schedule.
    pub fn background_task<F>(
        &mut self,
        member: &'static str,
        schedule: &str,
        start: bool,
        f: F,
    ) -> &mut Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.background_tasks.push(BackgroundTaskDecl::sync::<T, _>(
            member,
            ScheduleSource::Expression(schedule.to_string()),
            start,
            f,
        ));
        self
    }

    /// Declares a recurring asynchronous task on a cron schedule.
    pub fn background_task_async<F, Fut>(
        &mut self,
        member: &'static str,
        schedule: &str,
        start: bool,
        f: F,
    ) -> &mut Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.background_tasks.push(BackgroundTaskDecl::asynchronous::<T, _, _>(
            member,
            ScheduleSource::Expression(schedule.to_string()),
            start,
            f,
        ));
        self
    }

    /// Declares a recurring task whose cron expression is read from the
    /// instance at post-injection time.
    pub fn background_task_scheduled_by<S, F>(
        &mut self,
        member: &'static str,
        schedule_of: S,
        start: bool,
        f: F,
    ) -> &mut Self
    where
        S: Fn(&T) -> String + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let source = ScheduleSource::FromInstance(Arc::new(move |instance: &Instance| {
            instance.downcast::<T>().map(|t| schedule_of(&t))
        }));
        self.background_tasks
            .push(BackgroundTaskDecl::sync::<T, _>(member, source, start, f));
        self
    }

    /// Instances of `T` are disposed through [`Dispose`].
    pub fn disposable(&mut self) -> &mut Self
    where
        T: Dispose,
    {
        self.disposer = Some(disposer_for::<T>());
        self
    }

    pub(crate) fn build(self) -> TypeMetadata {
        TypeMetadata {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            constructors: self.constructors,
            fallback: self.fallback,
            members: self.members,
            event_handlers: self.event_handlers,
            background_tasks: self.background_tasks,
            disposer: self.disposer,
        }
    }
}

pub(crate) fn disposer_for<T: Dispose>() -> Disposer {
    Arc::new(|instance: &Instance| {
        if let Some(value) = instance.downcast::<T>() {
            value.dispose();
        }
    })
}
