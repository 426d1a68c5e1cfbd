use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use reinject::{
    BackgroundContainerExt, BackgroundWorkerInjector, Container, CronSchedule, DiError, Injectable,
    Schedule, TokioClock, TypeMetadataBuilder,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const MINUTE: Duration = Duration::from_secs(60);
const JUST_AFTER: Duration = Duration::from_secs(1);

fn jan_first() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

fn worker(period: Duration) -> Arc<BackgroundWorkerInjector> {
    BackgroundWorkerInjector::builder()
        .name("test-worker")
        .schedule_period(period)
        .clock(TokioClock::starting_at(jan_first()))
        .build()
        .unwrap()
}

/// Lets paused time run forward, firing every timer due on the way.
async fn run_for(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    (runs, move || {
        r.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test(start_paused = true)]
async fn test_task_armed_only_inside_window() {
    let worker = worker(HOUR);
    assert_eq!(worker.next_update(), at(1, 0));

    let (runs, f) = counter();
    let task = worker.register_background_task(CronSchedule::parse("0 3 * * *").unwrap(), f, true, None);
    assert!(task.is_enabled());
    assert!(!task.is_armed());

    run_for(HOUR + JUST_AFTER).await;
    assert_eq!(worker.next_update(), at(2, 0));
    assert!(!task.is_armed());

    run_for(HOUR).await;
    assert_eq!(worker.next_update(), at(3, 0));
    assert!(task.is_armed());
    assert_eq!(task.armed_for(), Some(at(3, 0)));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    run_for(HOUR).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!task.is_armed());
}

/// Minutely while open, exhausted while closed.
#[derive(Debug, Clone, Default)]
struct Gate {
    open: Arc<AtomicBool>,
}

impl Schedule for Gate {
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.open.load(Ordering::SeqCst) {
            return None;
        }
        let minute = after.with_second(0)?.with_nanosecond(0)?;
        Some(minute + chrono::Duration::minutes(1))
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_schedule_waits_for_master_rescan() {
    let worker = worker(HOUR);
    let gate = Gate::default();
    let (runs, f) = counter();
    let task = worker.register_background_task(gate.clone(), f, true, Some("gated"));
    assert!(task.is_enabled());
    assert!(!task.is_armed());

    run_for(HOUR + JUST_AFTER).await;
    assert!(!task.is_armed());

    // Reopening alone does not arm; the next master tick does
    gate.open.store(true, Ordering::SeqCst);
    assert!(!task.is_armed());
    run_for(HOUR).await;
    assert_eq!(task.armed_for(), Some(at(2, 1)));

    run_for(MINUTE).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(task.armed_for(), Some(at(2, 2)));

    gate.open.store(false, Ordering::SeqCst);
    run_for(MINUTE).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!task.is_armed());
    assert!(task.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_recurring_task_rearms_after_each_run() {
    let worker = worker(HOUR);
    let (runs, f) = counter();
    let task = worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), f, true, Some("minutely"));
    assert_eq!(task.tag(), Some("minutely"));
    assert_eq!(task.armed_for(), Some(at(0, 1)));

    run_for(3 * MINUTE + JUST_AFTER).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(task.armed_for(), Some(at(0, 4)));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_task_never_runs() {
    let worker = worker(HOUR);
    let (runs, f) = counter();
    let task = worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), f, false, None);
    assert!(!task.is_enabled());
    assert!(!task.is_armed());

    run_for(2 * MINUTE + JUST_AFTER).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    task.set_enabled(true);
    assert!(task.is_armed());
    run_for(MINUTE).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    task.set_enabled(false);
    assert!(!task.is_armed());
    run_for(5 * MINUTE).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_does_not_stop_others() {
    let worker = worker(HOUR);
    let (runs, f) = counter();
    let panicking = worker.register_background_task(
        CronSchedule::parse("* * * * *").unwrap(),
        || panic!("task blew up"),
        true,
        Some("panics"),
    );
    worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), f, true, Some("counts"));

    run_for(3 * MINUTE + JUST_AFTER).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(panicking.is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_async_task_runs_and_failures_are_contained() {
    let worker = worker(HOUR);
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    worker.register_background_task_async(
        CronSchedule::parse("* * * * *").unwrap(),
        move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
        true,
        None,
    );
    let failing = worker.register_background_task_async(
        CronSchedule::parse("* * * * *").unwrap(),
        || async { Err(anyhow::anyhow!("remote unavailable")) },
        true,
        None,
    );

    run_for(2 * MINUTE + JUST_AFTER).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(failing.is_armed());
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_failures_are_logged() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let worker = worker(HOUR);
    worker.register_background_task(
        CronSchedule::parse("* * * * *").unwrap(),
        || panic!("task blew up"),
        true,
        Some("panics"),
    );
    worker.register_background_task_async(
        CronSchedule::parse("* * * * *").unwrap(),
        || async { Err(anyhow::anyhow!("remote unavailable")) },
        true,
        Some("fails"),
    );

    run_for(MINUTE + JUST_AFTER).await;
    let output = String::from_utf8_lossy(&logs.0.lock()).into_owned();
    assert!(output.contains("background task panicked"), "{}", output);
    assert!(output.contains("task blew up"), "{}", output);
    assert!(output.contains("background task failed"), "{}", output);
    assert!(output.contains("remote unavailable"), "{}", output);
}

#[tokio::test(start_paused = true)]
async fn test_set_schedule_period_rescans_immediately() {
    let worker = worker(HOUR);
    let (_runs, f) = counter();
    let task = worker.register_background_task(CronSchedule::parse("0 3 * * *").unwrap(), f, true, None);
    assert!(!task.is_armed());

    assert!(matches!(
        worker.set_schedule_period(Duration::ZERO),
        Err(DiError::InvalidArgument(_))
    ));

    worker.set_schedule_period(6 * HOUR).unwrap();
    assert_eq!(worker.schedule_period(), 6 * HOUR);
    assert_eq!(worker.next_update(), at(6, 0));
    assert_eq!(task.armed_for(), Some(at(3, 0)));
}

#[tokio::test(start_paused = true)]
async fn test_unregister_and_dispose_cancel_timers() {
    let worker = worker(HOUR);
    let (runs, f) = counter();
    let (_other_runs, g) = counter();
    let first = worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), f, true, None);
    let second = worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), g, true, None);

    assert!(worker.unregister_background_task(first.id()));
    assert!(!worker.unregister_background_task(first.id()));
    assert!(first.is_disposed());
    assert!(!first.is_armed());

    worker.dispose();
    assert!(worker.is_disposed());
    assert!(second.is_disposed());
    assert!(worker.tasks().is_empty());

    run_for(3 * MINUTE).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let (_late_runs, h) = counter();
    let late = worker.register_background_task(CronSchedule::parse("* * * * *").unwrap(), h, true, None);
    assert!(late.is_disposed());
}

#[test]
fn test_build_without_runtime_fails() {
    assert!(matches!(
        BackgroundWorkerInjector::builder().build(),
        Err(DiError::NoRuntime)
    ));
}

#[tokio::test]
async fn test_zero_period_rejected() {
    assert!(matches!(
        BackgroundWorkerInjector::builder().schedule_period(Duration::ZERO).build(),
        Err(DiError::InvalidArgument(_))
    ));
}

#[derive(Default)]
struct Reporter {
    reports: AtomicUsize,
    syncs: AtomicUsize,
}

impl Injectable for Reporter {
    fn describe(meta: &mut TypeMetadataBuilder<Self>) {
        meta.fallback_default()
            .background_task("report", "*/5 * * * *", true, |r| {
                r.reports.fetch_add(1, Ordering::SeqCst);
            })
            .background_task_async("sync_remote", "* * * * *", true, |r: Arc<Reporter>| async move {
                r.syncs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
    }
}

#[tokio::test(start_paused = true)]
async fn test_declared_tasks_bound_on_construction() {
    let container = Container::new("background-bound");
    let worker = container.use_background_worker(worker(HOUR), false);

    let reporter = container.resolve::<Reporter>().unwrap();
    let tasks = worker.tasks_of(&reporter);
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().any(|t| t.tag().map_or(false, |tag| tag.ends_with("Reporter::report"))));

    run_for(10 * MINUTE + JUST_AFTER).await;
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 2);
    assert_eq!(reporter.syncs.load(Ordering::SeqCst), 10);

    assert_eq!(container.set_post_injections_enabled(&reporter, false, None), 1);
    assert!(tasks.iter().all(|t| !t.is_enabled() && !t.is_armed()));
    run_for(10 * MINUTE).await;
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 2);

    assert_eq!(container.set_post_injections_enabled(&reporter, true, None), 1);
    assert!(tasks.iter().all(|t| t.is_armed()));
}

#[tokio::test(start_paused = true)]
async fn test_tasks_of_dropped_instance_are_pruned() {
    let container = Container::new("background-pruned");
    let worker = container.use_background_worker(worker(HOUR), false);

    let reporter = container.resolve::<Reporter>().unwrap();
    assert_eq!(worker.tasks().len(), 2);
    drop(reporter);

    run_for(HOUR + JUST_AFTER).await;
    assert!(worker.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_declared_schedule_fails_construction() {
    #[derive(Default)]
    struct Broken;
    impl Injectable for Broken {
        fn describe(meta: &mut TypeMetadataBuilder<Self>) {
            meta.fallback_default()
                .background_task("never", "not a cron", true, |_| {});
        }
    }

    let container = Container::new("background-broken");
    container.use_background_worker(worker(HOUR), false);
    match container.resolve::<Broken>() {
        Err(DiError::InvalidSchedule { expression, .. }) => assert_eq!(expression, "not a cron"),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("construction should fail"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_schedule_read_from_instance() {
    struct Configured {
        cron: String,
        runs: AtomicUsize,
    }
    impl Injectable for Configured {
        fn describe(meta: &mut TypeMetadataBuilder<Self>) {
            meta.fallback(|| Configured {
                cron: "*/2 * * * *".into(),
                runs: AtomicUsize::new(0),
            })
            .background_task_scheduled_by("tick", |c| c.cron.clone(), true, |c| {
                c.runs.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    let container = Container::new("background-configured");
    let worker = container.use_background_worker(worker(HOUR), false);
    let configured = container.resolve::<Configured>().unwrap();
    assert_eq!(worker.tasks_of(&configured)[0].armed_for(), Some(at(0, 2)));

    run_for(6 * MINUTE + JUST_AFTER).await;
    assert_eq!(configured.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_add_background_worker_is_idempotent() {
    let container = Container::new("background-ext");
    let first = container.add_background_worker().unwrap();
    let second = container.add_background_worker().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&container.background_worker(None).unwrap(), &first));

    let replacement = BackgroundWorkerInjector::builder().build().unwrap();
    let kept = container.use_background_worker(replacement.clone(), false);
    assert!(Arc::ptr_eq(&kept, &first));

    let replaced = container.use_background_worker(replacement.clone(), true);
    assert!(Arc::ptr_eq(&replaced, &replacement));
    assert!(first.is_disposed());
}

#[test]
fn test_cron_day_of_week_follows_unix_numbering() {
    // 2024-01-06 is a Saturday
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();

    let weekdays = CronSchedule::parse("0 9 * * 1-5").unwrap();
    let next = weekdays.next_occurrence(saturday).unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!(next.hour(), 9);

    let sunday = CronSchedule::parse("30 8 * * 0").unwrap();
    assert_eq!(sunday.next_occurrence(saturday).unwrap().weekday(), Weekday::Sun);
    let sunday_alias = CronSchedule::parse("30 8 * * 7").unwrap();
    assert_eq!(sunday_alias.next_occurrence(saturday).unwrap().weekday(), Weekday::Sun);

    let weekend = CronSchedule::parse("0 0 * * 6-7").unwrap();
    let friday = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
    let first = weekend.next_occurrence(friday).unwrap();
    let second = weekend.next_occurrence(first).unwrap();
    assert_eq!(first.weekday(), Weekday::Sat);
    assert_eq!(second.weekday(), Weekday::Sun);
}

#[test]
fn test_cron_six_fields_pass_through() {
    let every_ten_seconds: CronSchedule = "*/10 * * * * *".parse().unwrap();
    let next = every_ten_seconds.next_occurrence(jan_first()).unwrap();
    assert_eq!(next.second(), 10);
    assert_eq!(every_ten_seconds.to_string(), "*/10 * * * * *");
}

#[test]
fn test_invalid_cron_rejected() {
    for expression in ["", "* * *", "61 * * * *", "0 0 * * 8"] {
        assert!(
            matches!(CronSchedule::parse(expression), Err(DiError::InvalidSchedule { .. })),
            "{:?} should be rejected",
            expression
        );
    }
}
