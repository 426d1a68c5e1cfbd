//! Scheduled tasks and their declarations.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

use crate::instance::{Instance, InstanceId, WeakInstance};

use super::schedule::Schedule;
use super::worker::BackgroundWorkerInjector;

type AsyncCall = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Where a declared task gets its cron expression.
#[derive(Clone)]
pub enum ScheduleSource {
    Expression(String),
    /// Read from the instance when it is post-injected.
    FromInstance(Arc<dyn Fn(&Instance) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for ScheduleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSource::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
            ScheduleSource::FromInstance(_) => f.write_str("FromInstance"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum BoundCallable {
    Sync(Arc<dyn Fn(&Instance) + Send + Sync>),
    Async(Arc<dyn Fn(Instance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>),
}

/// A method of `T` to run on a schedule, declared through
/// [`TypeMetadataBuilder::background_task`](crate::TypeMetadataBuilder::background_task).
#[derive(Clone)]
pub struct BackgroundTaskDecl {
    member: &'static str,
    schedule: ScheduleSource,
    start: bool,
    callable: BoundCallable,
}

impl BackgroundTaskDecl {
    pub(crate) fn sync<T, F>(member: &'static str, schedule: ScheduleSource, start: bool, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            member,
            schedule,
            start,
            callable: BoundCallable::Sync(Arc::new(move |instance: &Instance| {
                if let Some(target) = instance.downcast::<T>() {
                    f(&target);
                }
            })),
        }
    }

    pub(crate) fn asynchronous<T, F, Fut>(
        member: &'static str,
        schedule: ScheduleSource,
        start: bool,
        f: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            member,
            schedule,
            start,
            callable: BoundCallable::Async(Arc::new(move |instance: Instance| {
                match instance.downcast::<T>() {
                    Some(target) => f(target).boxed(),
                    None => futures::future::ready(Ok(())).boxed(),
                }
            })),
        }
    }

    pub fn member(&self) -> &'static str {
        self.member
    }

    pub fn schedule(&self) -> &ScheduleSource {
        &self.schedule
    }

    /// Whether the task is enabled as soon as it is bound.
    pub fn auto_start(&self) -> bool {
        self.start
    }

    pub fn is_async(&self) -> bool {
        matches!(self.callable, BoundCallable::Async(_))
    }

    pub(crate) fn callable(&self) -> &BoundCallable {
        &self.callable
    }
}

impl fmt::Debug for BackgroundTaskDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskDecl")
            .field("member", &self.member)
            .field("schedule", &self.schedule)
            .field("start", &self.start)
            .field("async", &self.is_async())
            .finish()
    }
}

pub(crate) enum TaskCallable {
    Sync(Arc<dyn Fn() + Send + Sync>),
    Async(AsyncCall),
    Bound { target: WeakInstance, call: BoundCallable },
}

/// One firing of a task, detached from the task's locks.
pub(crate) enum Run {
    Inline(Box<dyn FnOnce() + Send>),
    Spawn(BoxFuture<'static, anyhow::Result<()>>),
}

impl TaskCallable {
    /// `None` once a bound target was dropped.
    pub(crate) fn prepare(&self) -> Option<Run> {
        match self {
            TaskCallable::Sync(f) => {
                let f = f.clone();
                Some(Run::Inline(Box::new(move || f())))
            }
            TaskCallable::Async(f) => Some(Run::Spawn(f())),
            TaskCallable::Bound { target, call } => {
                let instance = target.upgrade()?;
                Some(match call {
                    BoundCallable::Sync(f) => {
                        let f = f.clone();
                        Run::Inline(Box::new(move || f(&instance)))
                    }
                    BoundCallable::Async(f) => Run::Spawn(f(instance)),
                })
            }
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            TaskCallable::Bound { target, .. } => target.is_alive(),
            _ => true,
        }
    }

    fn target(&self) -> Option<InstanceId> {
        match self {
            TaskCallable::Bound { target, .. } => Some(target.id()),
            _ => None,
        }
    }
}

struct Timer {
    generation: u64,
    at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// A callable run on a schedule by a [`BackgroundWorkerInjector`].
///
/// A task is armed (holds a pending one-shot timer) only while enabled and
/// while its next occurrence falls inside the worker's current scan window.
pub struct BackgroundTask {
    id: Uuid,
    tag: Option<String>,
    schedule: Arc<dyn Schedule>,
    callable: TaskCallable,
    enabled: AtomicBool,
    disposed: AtomicBool,
    generation: AtomicU64,
    timer: Mutex<Option<Timer>>,
    worker: Weak<BackgroundWorkerInjector>,
}

impl BackgroundTask {
    pub(crate) fn new(
        schedule: Arc<dyn Schedule>,
        callable: TaskCallable,
        tag: Option<String>,
        worker: Weak<BackgroundWorkerInjector>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tag,
            schedule,
            callable,
            enabled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
            worker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn schedule(&self) -> &Arc<dyn Schedule> {
        &self.schedule
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enabling arms the task if its next occurrence is inside the current
    /// window; disabling cancels the pending timer. An invocation already in
    /// flight runs to completion.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        if self.is_disposed() {
            return;
        }
        self.enabled.store(enabled, Ordering::Release);
        if enabled {
            if let Some(worker) = self.worker.upgrade() {
                worker.arm(self);
            }
        } else {
            self.cancel();
        }
    }

    /// Whether a one-shot timer is pending.
    pub fn is_armed(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Occurrence the pending timer fires for.
    pub fn armed_for(&self) -> Option<DateTime<Utc>> {
        self.timer.lock().as_ref().map(|t| t.at)
    }

    /// Instance the task is bound to, for tasks declared on a type.
    pub fn target(&self) -> Option<InstanceId> {
        self.callable.target()
    }

    /// Whether the task can still run: not disposed and, if bound, its
    /// instance still alive.
    pub fn is_alive(&self) -> bool {
        !self.is_disposed() && self.callable.is_alive()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Disables the task for good and cancels its timer. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enabled.store(false, Ordering::Release);
        self.cancel();
        trace!(task = %self.id, tag = ?self.tag, "disposed background task");
    }

    pub(crate) fn callable(&self) -> &TaskCallable {
        &self.callable
    }

    fn cancel(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.handle.abort();
        }
    }

    /// Installs a timer unless one is pending. `spawn` receives the timer's
    /// generation and runs under the slot lock, so a timer firing right away
    /// cannot clear the slot before it is filled.
    pub(crate) fn install_timer(
        &self,
        at: DateTime<Utc>,
        spawn: impl FnOnce(u64) -> JoinHandle<()>,
    ) -> bool {
        let mut slot = self.timer.lock();
        if slot.is_some() {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *slot = Some(Timer {
            generation,
            at,
            handle: spawn(generation),
        });
        true
    }

    /// Clears the slot if it still holds the timer of `generation`.
    pub(crate) fn release_timer(&self, generation: u64) {
        let mut slot = self.timer.lock();
        if slot.as_ref().map_or(false, |t| t.generation == generation) {
            *slot = None;
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.handle.abort();
        }
    }
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("schedule", &self.schedule)
            .field("enabled", &self.is_enabled())
            .field("armed_for", &self.armed_for())
            .finish()
    }
}
