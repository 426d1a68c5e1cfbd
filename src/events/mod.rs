//! Event sources, proxies and the event post-injector.
//!
//! An [`EventSource`] exposes [`Event`] slots by name. Registering a slot on an
//! [`EventInjector`] creates an [`EventProxy`] subscribed to it; the proxy
//! forwards each raise to its targets in priority order and merges their
//! results the way the slot does ([`LastWins`] for plain values,
//! [`JoinAll`] for [`Completion`]s). Targets are held weakly and skipped once
//! dropped. Target panics and failures are logged, never propagated.

mod event;
mod injector;
mod proxy;
mod source;

pub use event::{AnyEvent, AsyncEvent, Completion, Event, HandlerId, JoinAll, LastWins, MergePolicy, Signature};
pub use injector::{EventInjector, SourceOptions};
pub use proxy::{AnyEventProxy, ErasedHandler, EventProxy, TargetId};
pub use source::{EventSource, SourceRef};

use std::sync::Arc;

use crate::container::Container;
use crate::error::DiResult;
use crate::instance::InstanceId;
use crate::post_inject::PostInjector;

/// Event injector shorthands on [`Container`].
pub trait EventContainerExt {
    /// Creates an event injector, lets `setup` register sources on it, and
    /// registers it both as post-injector and as a singleton named `name`.
    ///
    /// With `overwrite` unset an existing injector of that name stays in
    /// effect and is returned.
    fn add_event_injector<F>(
        &self,
        name: &str,
        priority: i32,
        overwrite: bool,
        setup: F,
    ) -> DiResult<Arc<EventInjector>>
    where
        F: FnOnce(&EventInjector) -> DiResult<()>;

    /// The event injector registered as post-injector under `name`, or the
    /// first one.
    fn event_injector(&self, name: Option<&str>) -> Option<Arc<EventInjector>>;

    /// Toggles `target`'s handlers for `events` (all when empty) across
    /// every event injector. Returns how many targets were toggled.
    fn set_event_target_enabled(&self, target: impl Into<InstanceId>, enabled: bool, events: &[&str]) -> usize;
}

impl EventContainerExt for Container {
    fn add_event_injector<F>(
        &self,
        name: &str,
        priority: i32,
        overwrite: bool,
        setup: F,
    ) -> DiResult<Arc<EventInjector>>
    where
        F: FnOnce(&EventInjector) -> DiResult<()>,
    {
        let injector = EventInjector::new(name, priority);
        setup(&injector)?;
        let injector = Arc::new(injector);

        if !self.register_post_injector(injector.clone(), overwrite) {
            PostInjector::dispose(&*injector);
            return Ok(self.event_injector(Some(name)).unwrap_or(injector));
        }
        self.add::<EventInjector>()
            .named(name.to_string())
            .overwrite(true)
            .instance(injector.clone())?;
        Ok(injector)
    }

    fn event_injector(&self, name: Option<&str>) -> Option<Arc<EventInjector>> {
        self.post_injector::<EventInjector>(name)
    }

    fn set_event_target_enabled(&self, target: impl Into<InstanceId>, enabled: bool, events: &[&str]) -> usize {
        let target = target.into();
        self.post_injectors_of::<EventInjector>()
            .iter()
            .map(|injector| injector.set_event_target_enabled(target, enabled, events))
            .sum()
    }
}
