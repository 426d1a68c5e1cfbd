//! Post-injector binding declared event handlers to registered sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::instance::{Instance, InstanceId};
use crate::metadata::TypeMetadata;
use crate::post_inject::PostInjector;

use super::proxy::{AnyEventProxy, ErasedHandler, EventProxy, TargetId};
use super::source::{EventSource, SourceRef};

type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
type EventPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How [`EventInjector::register_event_sources`] maps a source's slots to
/// logical names.
#[derive(Clone, Default)]
pub struct SourceOptions {
    rename: Option<NameFn>,
    filter: Option<EventPredicate>,
    overwrite: Option<EventPredicate>,
}

impl SourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical name of a slot, before the prefix. Defaults to the slot name.
    pub fn rename(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.rename = Some(Arc::new(f));
        self
    }

    /// Slots to register. Defaults to all.
    pub fn filter(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Slots replacing an existing registration of the same name. Defaults
    /// to none.
    pub fn overwrite(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.overwrite = Some(Arc::new(f));
        self
    }
}

/// Routes events of registered sources to the handlers instances declare.
///
/// Sources are registered under unique logical names. When the container
/// builds an instance whose type declares a handler for one of those names,
/// the instance is added (weakly) as a target of that event.
///
/// # Examples
///
/// ```
/// use reinject::{event_source, Container, Event, EventInjector, Injectable, TypeMetadataBuilder};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// #[derive(Default)]
/// struct Clock { tick: Event<u32> }
/// event_source!(Clock { tick });
///
/// #[derive(Default)]
/// struct Screen { last: AtomicU32 }
/// impl Injectable for Screen {
///     fn describe(meta: &mut TypeMetadataBuilder<Self>) {
///         meta.fallback_default()
///             .event_handler("on_tick", "clock.tick", 0, |s: &Screen, n: u32| {
///                 s.last.store(n, Ordering::SeqCst)
///             });
///     }
/// }
///
/// let clock = Arc::new(Clock::default());
/// let events = Arc::new(EventInjector::new("events", 0));
/// events.register_event_source(&clock, "tick", "clock.tick", false).unwrap();
///
/// let container = Container::new("event-injector-doc");
/// container.register_post_injector(events.clone(), false);
///
/// let screen = container.resolve::<Screen>().unwrap();
/// clock.tick.raise(42);
/// assert_eq!(screen.last.load(Ordering::SeqCst), 42);
/// ```
pub struct EventInjector {
    name: String,
    priority: i32,
    proxies: RwLock<HashMap<String, Arc<dyn AnyEventProxy>>>,
    disposed: AtomicBool,
}

impl EventInjector {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            proxies: RwLock::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Attaches to the slot `native` of `source` and registers it as `name`.
    ///
    /// An existing registration of `name` is kept unless `overwrite` is set,
    /// in which case its proxy is disposed along with its targets.
    pub fn register_event_source<S: EventSource>(
        &self,
        source: &Arc<S>,
        native: &str,
        name: &str,
        overwrite: bool,
    ) -> DiResult<&Self> {
        if !overwrite && self.has_event(name) {
            trace!(injector = %self.name, event = name, "event already registered");
            return Ok(self);
        }
        let event = source.event(native).ok_or_else(|| DiError::UnknownEvent {
            source_type: std::any::type_name::<S>().to_string(),
            event: native.to_string(),
        })?;
        let proxy = event.create_proxy(name, native, SourceRef::of(source));
        self.insert(name, proxy);
        Ok(self)
    }

    /// Registers every slot of `source` as `prefix` + its (renamed) name.
    pub fn register_event_sources<S: EventSource>(
        &self,
        source: &Arc<S>,
        prefix: &str,
        options: SourceOptions,
    ) -> DiResult<&Self> {
        for native in source.event_names() {
            if let Some(filter) = &options.filter {
                if !filter(native) {
                    continue;
                }
            }
            let name = match &options.rename {
                Some(rename) => format!("{}{}", prefix, rename(native)),
                None => format!("{}{}", prefix, native),
            };
            let overwrite = options.overwrite.as_ref().map_or(false, |f| f(native));
            self.register_event_source(source, native, &name, overwrite)?;
        }
        Ok(self)
    }

    /// Disposes the proxy registered as `name`.
    pub fn unregister_event_source(&self, name: &str) -> bool {
        let removed = self.proxies.write().remove(name);
        match removed {
            Some(proxy) => {
                proxy.dispose();
                true
            }
            None => false,
        }
    }

    /// Disposes every proxy attached to `source`.
    pub fn unregister_event_sources<S: EventSource>(&self, source: &Arc<S>) -> usize {
        let id = InstanceId::of(source);
        self.remove_where(|proxy| proxy.source().id() == id)
    }

    /// Disposes every proxy attached to a source of type `S`.
    pub fn unregister_event_sources_of<S: EventSource>(&self) -> usize {
        self.remove_where(|proxy| proxy.source().is::<S>())
    }

    /// Adds `handler` on `receiver` as a target of the event `name`.
    ///
    /// Returns `Ok(false)` when no such event is registered, and
    /// [`DiError::SignatureMismatch`] when the handler's types differ from the
    /// event's.
    pub fn register_event_target<T, A, R, F>(
        &self,
        name: &str,
        receiver: &Arc<T>,
        priority: i32,
        handler: F,
    ) -> DiResult<bool>
    where
        T: Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let Some(proxy) = self.proxy_any(name) else {
            return Ok(false);
        };
        let receiver = Instance::new(receiver.clone());
        proxy.add_erased_target(Some(&receiver), priority, &ErasedHandler::bound::<T, A, R, F>(handler))?;
        Ok(true)
    }

    /// Adds a receiver-less handler to the event `name`.
    pub fn register_event_handler<A, R, F>(
        &self,
        name: &str,
        priority: i32,
        handler: F,
    ) -> DiResult<Option<TargetId>>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        match self.proxy_any(name) {
            Some(proxy) => proxy
                .add_erased_target(None, priority, &ErasedHandler::free::<A, R, F>(handler))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Toggles the targets bound to `target` on the named events, or on all
    /// events when `events` is empty. Other events keep their state.
    /// Returns how many targets were toggled.
    pub fn set_event_target_enabled(
        &self,
        target: impl Into<InstanceId>,
        enabled: bool,
        events: &[&str],
    ) -> usize {
        let target = target.into();
        self.proxies_for(events)
            .iter()
            .map(|proxy| proxy.set_target_enabled(target, enabled))
            .sum()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.proxies.read().contains_key(name)
    }

    /// Registered logical event names.
    pub fn event_names(&self) -> Vec<String> {
        self.proxies.read().keys().cloned().collect()
    }

    pub fn proxy_any(&self, name: &str) -> Option<Arc<dyn AnyEventProxy>> {
        self.proxies.read().get(name).cloned()
    }

    /// The proxy registered as `name`, if its signature is `fn(A) -> R`.
    pub fn proxy<A, R>(&self, name: &str) -> Option<Arc<EventProxy<A, R>>>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.proxy_any(name)
            .and_then(|proxy| EventProxy::<A, R>::downcast(proxy).ok())
    }

    /// Proxies for `events`, or all of them when empty.
    pub(crate) fn proxies_for(&self, events: &[&str]) -> Vec<Arc<dyn AnyEventProxy>> {
        let proxies = self.proxies.read();
        if events.is_empty() {
            proxies.values().cloned().collect()
        } else {
            events.iter().filter_map(|e| proxies.get(*e).cloned()).collect()
        }
    }

    fn insert(&self, name: &str, proxy: Arc<dyn AnyEventProxy>) {
        let replaced = self.proxies.write().insert(name.to_string(), proxy);
        debug!(
            injector = %self.name,
            event = name,
            replaced = replaced.is_some(),
            "registered event source"
        );
        if let Some(old) = replaced {
            old.dispose();
        }
    }

    fn remove_where(&self, predicate: impl Fn(&Arc<dyn AnyEventProxy>) -> bool) -> usize {
        let removed: Vec<Arc<dyn AnyEventProxy>> = {
            let mut proxies = self.proxies.write();
            let names: Vec<String> = proxies
                .iter()
                .filter(|(_, proxy)| predicate(proxy))
                .map(|(name, _)| name.clone())
                .collect();
            names.iter().filter_map(|name| proxies.remove(name)).collect()
        };
        for proxy in &removed {
            proxy.dispose();
        }
        removed.len()
    }
}

impl PostInjector for EventInjector {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn post_inject(
        &self,
        _container: &Container,
        metadata: &TypeMetadata,
        instance: &Instance,
    ) -> DiResult<Vec<&'static str>> {
        let mut bound = Vec::new();
        for decl in metadata.event_handlers() {
            if let Some(proxy) = self.proxy_any(decl.event()) {
                proxy.add_erased_target(Some(instance), decl.priority(), decl.handler())?;
                bound.push(decl.member());
            }
        }
        Ok(bound)
    }

    fn set_injection_enabled(&self, instance: InstanceId, enabled: bool) -> bool {
        self.set_event_target_enabled(instance, enabled, &[]) > 0
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let proxies: Vec<_> = self.proxies.write().drain().map(|(_, p)| p).collect();
        for proxy in &proxies {
            proxy.dispose();
        }
        debug!(injector = %self.name, events = proxies.len(), "event injector disposed");
    }
}

impl std::fmt::Debug for EventInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventInjector")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("events", &self.event_names())
            .finish()
    }
}
