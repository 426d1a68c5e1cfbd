//! Cron-driven background tasks.
//!
//! [`BackgroundWorkerInjector`] is a [`PostInjector`](crate::PostInjector):
//! registered on a container, it binds the background tasks a type declares
//! (see [`TypeMetadataBuilder::background_task`](crate::TypeMetadataBuilder::background_task))
//! to every instance the container builds. Free-standing tasks are added with
//! [`BackgroundWorkerInjector::register_background_task`].
//!
//! Timing is two-level. A master timer rescans every task once per schedule
//! period; a task only holds a one-shot timer when its next occurrence falls
//! inside the current window, which ends at the next master tick. Callback
//! failures are logged and the task is rescheduled regardless.

mod options;
mod schedule;
mod task;
mod worker;

pub use options::{WorkerOptions, DEFAULT_SCHEDULE_PERIOD};
pub use schedule::{Clock, CronSchedule, Schedule, SystemClock, TokioClock};
pub use task::{BackgroundTask, BackgroundTaskDecl, ScheduleSource};
pub use worker::{BackgroundWorkerBuilder, BackgroundWorkerInjector};

pub(crate) use worker::panic_message;

use std::sync::Arc;

use crate::container::Container;
use crate::error::DiResult;
use crate::post_inject::PostInjector;

/// Background worker shorthands on [`Container`].
pub trait BackgroundContainerExt {
    /// Creates a worker with default options on the current runtime and
    /// registers it. An existing worker of the same name is kept and returned.
    fn add_background_worker(&self) -> DiResult<Arc<BackgroundWorkerInjector>>;

    /// Registers `worker`, replacing one of the same name when `overwrite`.
    /// Returns the worker in effect.
    fn use_background_worker(
        &self,
        worker: Arc<BackgroundWorkerInjector>,
        overwrite: bool,
    ) -> Arc<BackgroundWorkerInjector>;

    /// The worker registered under `name`, or the first one.
    fn background_worker(&self, name: Option<&str>) -> Option<Arc<BackgroundWorkerInjector>>;
}

impl BackgroundContainerExt for Container {
    fn add_background_worker(&self) -> DiResult<Arc<BackgroundWorkerInjector>> {
        let defaults = WorkerOptions::default();
        if let Some(existing) = self.post_injector::<BackgroundWorkerInjector>(Some(&defaults.name)) {
            return Ok(existing);
        }
        let worker = BackgroundWorkerInjector::from_options(defaults)?;
        Ok(self.use_background_worker(worker, false))
    }

    fn use_background_worker(
        &self,
        worker: Arc<BackgroundWorkerInjector>,
        overwrite: bool,
    ) -> Arc<BackgroundWorkerInjector> {
        if self.register_post_injector(worker.clone(), overwrite) {
            return worker;
        }
        match self.post_injector::<BackgroundWorkerInjector>(Some(worker.name())) {
            Some(existing) => existing,
            None => worker,
        }
    }

    fn background_worker(&self, name: Option<&str>) -> Option<Arc<BackgroundWorkerInjector>> {
        self.post_injector::<BackgroundWorkerInjector>(name)
    }
}
