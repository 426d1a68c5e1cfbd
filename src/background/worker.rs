//! The scheduler: a post-injector owning every background task.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::instance::{Instance, InstanceId};
use crate::metadata::TypeMetadata;
use crate::post_inject::PostInjector;

use super::options::WorkerOptions;
use super::schedule::{Clock, CronSchedule, Schedule, SystemClock};
use super::task::{BackgroundTask, Run, ScheduleSource, TaskCallable};

struct Window {
    period: Duration,
    last_tick: DateTime<Utc>,
}

/// Runs background tasks on their schedules.
///
/// A master timer rescans the task list every schedule period. A task gets a
/// one-shot timer only when its next occurrence is no later than
/// [`next_update`](Self::next_update); later occurrences are picked up by a
/// following scan. As a post-injector the worker binds the background tasks
/// a type declares to each new instance of it, holding the instance weakly.
///
/// # Examples
///
/// ```
/// use reinject::{BackgroundWorkerInjector, CronSchedule};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> reinject::DiResult<()> {
/// let worker = BackgroundWorkerInjector::builder().name("jobs").build()?;
/// let task = worker.register_background_task(
///     CronSchedule::parse("*/5 * * * *")?,
///     || println!("tick"),
///     true,
///     Some("heartbeat"),
/// );
/// assert!(task.is_enabled());
/// assert_eq!(worker.tasks().len(), 1);
///
/// worker.dispose();
/// assert!(!task.is_armed());
/// # Ok(())
/// # }
/// ```
pub struct BackgroundWorkerInjector {
    this: Weak<Self>,
    name: String,
    priority: i32,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    window: Mutex<Window>,
    tasks: RwLock<Vec<Arc<BackgroundTask>>>,
    master: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

/// Builder for [`BackgroundWorkerInjector`].
#[must_use]
pub struct BackgroundWorkerBuilder {
    options: WorkerOptions,
    clock: Option<Arc<dyn Clock>>,
    runtime: Option<Handle>,
}

impl BackgroundWorkerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn schedule_period(mut self, period: Duration) -> Self {
        self.options.schedule_period = period;
        self
    }

    pub fn options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Time source for occurrences. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Runtime driving the timers. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the worker and starts its master timer.
    pub fn build(self) -> DiResult<Arc<BackgroundWorkerInjector>> {
        if self.options.schedule_period.is_zero() {
            return Err(DiError::InvalidArgument(
                "schedule period must be positive".to_string(),
            ));
        }
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| DiError::NoRuntime)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let WorkerOptions {
            name,
            priority,
            schedule_period,
        } = self.options;

        let worker = Arc::new_cyclic(|this| BackgroundWorkerInjector {
            this: this.clone(),
            name,
            priority,
            window: Mutex::new(Window {
                period: schedule_period,
                last_tick: clock.now(),
            }),
            clock,
            runtime,
            tasks: RwLock::new(Vec::new()),
            master: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        worker.start_master(schedule_period);
        debug!(worker = %worker.name, period = ?schedule_period, "background worker started");
        Ok(worker)
    }
}

impl BackgroundWorkerInjector {
    pub fn builder() -> BackgroundWorkerBuilder {
        BackgroundWorkerBuilder {
            options: WorkerOptions::default(),
            clock: None,
            runtime: None,
        }
    }

    /// Worker with default options on the current runtime.
    pub fn new() -> DiResult<Arc<Self>> {
        Self::builder().build()
    }

    pub fn from_options(options: WorkerOptions) -> DiResult<Arc<Self>> {
        Self::builder().options(options).build()
    }

    /// End of the current scan window: last master tick plus the period.
    pub fn next_update(&self) -> DateTime<Utc> {
        let window = self.window.lock();
        ChronoDuration::from_std(window.period)
            .ok()
            .and_then(|period| window.last_tick.checked_add_signed(period))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn schedule_period(&self) -> Duration {
        self.window.lock().period
    }

    /// Restarts the master timer with a new period and rescans right away.
    pub fn set_schedule_period(&self, period: Duration) -> DiResult<()> {
        if period.is_zero() {
            return Err(DiError::InvalidArgument(
                "schedule period must be positive".to_string(),
            ));
        }
        self.window.lock().period = period;
        self.start_master(period);
        self.master_tick();
        Ok(())
    }

    /// Adds a free-standing task.
    pub fn register_background_task<S, F>(
        &self,
        schedule: S,
        f: F,
        start: bool,
        tag: Option<&str>,
    ) -> Arc<BackgroundTask>
    where
        S: Schedule + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        self.add_task(
            Arc::new(schedule),
            TaskCallable::Sync(Arc::new(f)),
            start,
            tag.map(str::to_string),
        )
    }

    /// Adds a free-standing asynchronous task. Each run is spawned on the
    /// worker's runtime and not awaited; failures are logged.
    pub fn register_background_task_async<S, F, Fut>(
        &self,
        schedule: S,
        f: F,
        start: bool,
        tag: Option<&str>,
    ) -> Arc<BackgroundTask>
    where
        S: Schedule + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_task(
            Arc::new(schedule),
            TaskCallable::Async(Arc::new(move || f().boxed())),
            start,
            tag.map(str::to_string),
        )
    }

    /// Removes a task and cancels its timer.
    pub fn unregister_background_task(&self, id: Uuid) -> bool {
        let removed = {
            let mut tasks = self.tasks.write();
            tasks
                .iter()
                .position(|t| t.id() == id)
                .map(|pos| tasks.remove(pos))
        };
        match removed {
            Some(task) => {
                task.dispose();
                debug!(worker = %self.name, task = %id, "unregistered background task");
                true
            }
            None => false,
        }
    }

    pub fn tasks(&self) -> Vec<Arc<BackgroundTask>> {
        self.tasks.read().clone()
    }

    /// Tasks bound to `instance` by post-injection.
    pub fn tasks_of(&self, instance: impl Into<InstanceId>) -> Vec<Arc<BackgroundTask>> {
        let id = instance.into();
        self.tasks
            .read()
            .iter()
            .filter(|t| t.target() == Some(id))
            .cloned()
            .collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stops the master timer and disposes every task. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(master) = self.master.lock().take() {
            master.abort();
        }
        let tasks = std::mem::take(&mut *self.tasks.write());
        for task in &tasks {
            task.dispose();
        }
        debug!(worker = %self.name, tasks = tasks.len(), "background worker disposed");
    }

    fn add_task(
        &self,
        schedule: Arc<dyn Schedule>,
        callable: TaskCallable,
        start: bool,
        tag: Option<String>,
    ) -> Arc<BackgroundTask> {
        let task = Arc::new(BackgroundTask::new(schedule, callable, tag, self.this.clone()));
        if self.is_disposed() {
            warn!(worker = %self.name, task = %task.id(), "worker disposed, task will never run");
            task.dispose();
            return task;
        }
        self.tasks.write().push(task.clone());
        debug!(
            worker = %self.name,
            task = %task.id(),
            tag = ?task.tag(),
            schedule = ?task.schedule(),
            start,
            "registered background task"
        );
        if start {
            task.set_enabled(true);
        }
        task
    }

    fn start_master(&self, period: Duration) {
        let weak = self.this.clone();
        let handle = {
            let _context = self.runtime.enter();
            let start = tokio::time::Instant::now() + period;
            self.runtime.spawn(async move {
                let mut interval = tokio::time::interval_at(start, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    match weak.upgrade() {
                        Some(worker) => worker.master_tick(),
                        None => break,
                    }
                }
            })
        };
        if let Some(previous) = self.master.lock().replace(handle) {
            previous.abort();
        }
    }

    fn master_tick(&self) {
        if self.is_disposed() {
            return;
        }
        self.window.lock().last_tick = self.clock.now();

        let tasks = {
            let mut tasks = self.tasks.write();
            tasks.retain(|task| {
                if task.is_alive() {
                    return true;
                }
                task.dispose();
                debug!(worker = %self.name, task = %task.id(), "pruned task of dropped instance");
                false
            });
            tasks.clone()
        };

        let armed = tasks.iter().filter(|task| self.arm(task)).count();
        trace!(
            worker = %self.name,
            tasks = tasks.len(),
            armed,
            next_update = %self.next_update(),
            "master tick"
        );
    }

    pub(crate) fn arm(&self, task: &Arc<BackgroundTask>) -> bool {
        self.arm_after(task, self.clock.now())
    }

    /// Arms `task` for its first occurrence after `after` if that falls inside
    /// the current window. Tasks that are disabled, dead or already armed are
    /// left alone.
    fn arm_after(&self, task: &Arc<BackgroundTask>, after: DateTime<Utc>) -> bool {
        if self.is_disposed() || !task.is_enabled() || !task.is_alive() || task.is_armed() {
            return false;
        }

        let Some(next) = task.schedule().next_occurrence(after) else {
            debug!(worker = %self.name, task = %task.id(), "schedule has no further occurrence");
            return false;
        };
        let window_end = self.next_update();
        if next > window_end {
            trace!(
                worker = %self.name,
                task = %task.id(),
                %next,
                %window_end,
                "next occurrence outside window"
            );
            return false;
        }

        let delay = (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let worker = self.this.clone();
        let weak_task = Arc::downgrade(task);
        let runtime = self.runtime.clone();
        let _context = self.runtime.enter();
        let deadline = tokio::time::Instant::now() + delay;

        let armed = task.install_timer(next, move |generation| {
            runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let (Some(worker), Some(task)) = (worker.upgrade(), weak_task.upgrade()) {
                    worker.fire(&task, generation, next);
                }
            })
        });
        if armed {
            trace!(worker = %self.name, task = %task.id(), %next, "armed task");
        }
        armed
    }

    fn fire(&self, task: &Arc<BackgroundTask>, generation: u64, occurrence: DateTime<Utc>) {
        task.release_timer(generation);
        if self.is_disposed() || !task.is_enabled() {
            return;
        }

        match task.callable().prepare() {
            None => {
                trace!(worker = %self.name, task = %task.id(), "target dropped, skipping");
                return;
            }
            Some(Run::Inline(run)) => {
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(run)) {
                    error!(
                        worker = %self.name,
                        task = %task.id(),
                        tag = ?task.tag(),
                        panic = panic_message(&*panic),
                        "background task panicked"
                    );
                }
            }
            Some(Run::Spawn(future)) => {
                let name = self.name.clone();
                let id = task.id();
                self.runtime.spawn(async move {
                    match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(worker = %name, task = %id, error = %e, "background task failed")
                        }
                        Err(panic) => error!(
                            worker = %name,
                            task = %id,
                            panic = panic_message(&*panic),
                            "background task panicked"
                        ),
                    }
                });
            }
        }
        trace!(worker = %self.name, task = %task.id(), %occurrence, "fired task");

        let after = std::cmp::max(self.clock.now(), occurrence);
        self.arm_after(task, after);
    }
}

impl PostInjector for BackgroundWorkerInjector {
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
        if self.is_disposed() {
            return Ok(Vec::new());
        }
        let mut bound = Vec::new();
        for decl in metadata.background_tasks() {
            let expression = match decl.schedule() {
                ScheduleSource::Expression(expression) => expression.clone(),
                ScheduleSource::FromInstance(read) => match read(instance) {
                    Some(expression) => expression,
                    None => {
                        warn!(
                            worker = %self.name,
                            type_name = metadata.type_name(),
                            member = decl.member(),
                            "could not read schedule from instance"
                        );
                        continue;
                    }
                },
            };
            let schedule = CronSchedule::parse(&expression)?;
            self.add_task(
                Arc::new(schedule),
                TaskCallable::Bound {
                    target: instance.downgrade(),
                    call: decl.callable().clone(),
                },
                decl.auto_start(),
                Some(format!("{}::{}", metadata.type_name(), decl.member())),
            );
            bound.push(decl.member());
        }
        Ok(bound)
    }

    fn set_injection_enabled(&self, instance: InstanceId, enabled: bool) -> bool {
        let tasks = self.tasks_of(instance);
        for task in &tasks {
            task.set_enabled(enabled);
        }
        !tasks.is_empty()
    }

    fn dispose(&self) {
        BackgroundWorkerInjector::dispose(self);
    }
}

impl Drop for BackgroundWorkerInjector {
    fn drop(&mut self) {
        if let Some(master) = self.master.get_mut().take() {
            master.abort();
        }
    }
}

impl std::fmt::Debug for BackgroundWorkerInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorkerInjector")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("schedule_period", &self.schedule_period())
            .field("tasks", &self.tasks.read().len())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
