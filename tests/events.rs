use parking_lot::Mutex;
use reinject::{
    event_source, AnyEventProxy, AsyncEvent, Completion, Container, DiError, Event, EventContainerExt,
    EventInjector, Injectable, SourceOptions, TypeMetadataBuilder,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Thermostat {
    reading: Event<f64, String>,
    alarm: Event<u32>,
    saved: AsyncEvent<u32>,
}

event_source!(Thermostat { reading, alarm, saved });

struct Display {
    name: &'static str,
    seen: Mutex<Vec<f64>>,
}

impl Display {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            seen: Mutex::new(Vec::new()),
        })
    }
}

fn injector_with_reading(source: &Arc<Thermostat>) -> EventInjector {
    let events = EventInjector::new("events", 0);
    events
        .register_event_source(source, "reading", "temp.reading", false)
        .unwrap();
    events
}

#[test]
fn test_targets_run_by_priority_and_last_wins() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);

    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [1, 5, 3] {
        let order = order.clone();
        events
            .register_event_handler("temp.reading", priority, move |value: f64| {
                order.lock().push(priority);
                format!("{}@{}", priority, value)
            })
            .unwrap()
            .unwrap();
    }

    assert_eq!(source.reading.raise(21.5), "1@21.5");
    assert_eq!(*order.lock(), vec![5, 3, 1]);
}

#[test]
fn test_equal_priority_keeps_registration_order() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let first = Display::new("first");
    let second = Display::new("second");

    for display in [&first, &second] {
        assert!(events
            .register_event_target("temp.reading", display, 0, |d: &Display, v: f64| {
                d.seen.lock().push(v);
                d.name.to_string()
            })
            .unwrap());
    }

    assert_eq!(source.reading.raise(1.0), "second");
    assert_eq!(*first.seen.lock(), vec![1.0]);
    assert_eq!(*second.seen.lock(), vec![1.0]);
}

#[test]
fn test_dropped_target_is_skipped_and_pruned() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let kept = Display::new("kept");
    let dropped = Display::new("dropped");

    events
        .register_event_target("temp.reading", &kept, 0, |d: &Display, _: f64| d.name.to_string())
        .unwrap();
    events
        .register_event_target("temp.reading", &dropped, 0, |d: &Display, _: f64| d.name.to_string())
        .unwrap();
    let proxy = events.proxy_any("temp.reading").unwrap();
    assert_eq!(proxy.target_count(), 2);

    drop(dropped);
    assert_eq!(source.reading.raise(2.0), "kept");
    assert_eq!(proxy.target_count(), 1);
}

#[test]
fn test_no_targets_yields_default() {
    let source = Arc::new(Thermostat::default());
    let _events = injector_with_reading(&source);
    assert_eq!(source.reading.raise(3.0), "");
}

#[test]
fn test_panicking_target_does_not_stop_others() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    events
        .register_event_handler("temp.reading", 10, |_: f64| -> String { panic!("sensor exploded") })
        .unwrap();
    events
        .register_event_handler("temp.reading", 0, |_: f64| "survived".to_string())
        .unwrap();

    assert_eq!(source.reading.raise(4.0), "survived");
}

#[test]
fn test_disabled_proxy_detaches_from_source() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    events
        .register_event_handler("temp.reading", 0, move |_: f64| {
            c.fetch_add(1, Ordering::SeqCst);
            "seen".to_string()
        })
        .unwrap();

    let proxy = events.proxy_any("temp.reading").unwrap();
    proxy.set_enabled(false);
    assert!(!proxy.is_enabled());
    assert_eq!(source.reading.handler_count(), 0);
    assert_eq!(source.reading.raise(5.0), "");

    proxy.set_enabled(true);
    assert_eq!(source.reading.handler_count(), 1);
    assert_eq!(source.reading.raise(5.0), "seen");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_signature_and_name_errors() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let display = Display::new("d");

    match events.register_event_target("temp.reading", &display, 0, |_: &Display, _: u32| ()) {
        Err(DiError::SignatureMismatch { event, .. }) => assert_eq!(event, "temp.reading"),
        other => panic!("expected signature mismatch, got {:?}", other),
    }
    assert!(!events
        .register_event_target("temp.unknown", &display, 0, |_: &Display, _: f64| String::new())
        .unwrap());
    assert!(events
        .register_event_handler("temp.unknown", 0, |_: f64| String::new())
        .unwrap()
        .is_none());

    match events.register_event_source(&source, "humidity", "temp.humidity", false) {
        Err(DiError::UnknownEvent { event, source_type }) => {
            assert_eq!(event, "humidity");
            assert!(source_type.contains("Thermostat"));
        }
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("unknown slot should be rejected"),
    }

    assert!(events.proxy::<f64, String>("temp.reading").is_some());
    assert!(events.proxy::<u32, ()>("temp.reading").is_none());
}

#[test]
fn test_existing_name_kept_unless_overwritten() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let original = events.proxy_any("temp.reading").unwrap();

    events
        .register_event_source(&source, "reading", "temp.reading", false)
        .unwrap();
    assert_eq!(events.proxy_any("temp.reading").unwrap().id(), original.id());
    assert_eq!(source.reading.handler_count(), 1);

    events
        .register_event_source(&source, "reading", "temp.reading", true)
        .unwrap();
    assert_ne!(events.proxy_any("temp.reading").unwrap().id(), original.id());
    assert!(original.is_disposed());
    assert_eq!(source.reading.handler_count(), 1);
}

#[test]
fn test_register_all_slots_with_prefix_and_options() {
    let source = Arc::new(Thermostat::default());
    let events = EventInjector::new("bulk", 0);
    events
        .register_event_sources(
            &source,
            "thermo.",
            SourceOptions::new()
                .filter(|name| name != "saved")
                .rename(|name| name.to_uppercase()),
        )
        .unwrap();

    let mut names = events.event_names();
    names.sort();
    assert_eq!(names, vec!["thermo.ALARM".to_string(), "thermo.READING".to_string()]);
    assert_eq!(events.proxy_any("thermo.ALARM").unwrap().native_name(), "alarm");

    assert_eq!(events.unregister_event_sources(&source), 2);
    assert_eq!(source.reading.handler_count(), 0);
    assert_eq!(source.alarm.handler_count(), 0);
    assert!(events.event_names().is_empty());
}

#[test]
fn test_unregister_by_source_type_and_name() {
    let first = Arc::new(Thermostat::default());
    let second = Arc::new(Thermostat::default());
    let events = EventInjector::new("by-type", 0);
    events.register_event_sources(&first, "a.", SourceOptions::new()).unwrap();
    events.register_event_sources(&second, "b.", SourceOptions::new()).unwrap();

    assert!(events.unregister_event_source("a.alarm"));
    assert!(!events.unregister_event_source("a.alarm"));
    assert_eq!(first.alarm.handler_count(), 0);

    assert_eq!(events.unregister_event_sources_of::<Thermostat>(), 5);
    assert_eq!(second.saved.handler_count(), 0);
}

#[test]
fn test_dropped_source_is_safe_to_dispose() {
    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    let proxy = events.proxy_any("temp.reading").unwrap();

    drop(source);
    assert!(!proxy.source().is_alive());
    assert!(events.unregister_event_source("temp.reading"));
    assert!(proxy.is_disposed());
}

async fn explode(_: u32) -> anyhow::Result<()> {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_async_handlers_join_and_report_first_failure() {
    let source = Arc::new(Thermostat::default());
    let events = EventInjector::new("async", 0);
    events
        .register_event_source(&source, "saved", "temp.saved", false)
        .unwrap();

    let total = Arc::new(AtomicUsize::new(0));
    for priority in [0, 1] {
        let total = total.clone();
        events
            .register_event_handler("temp.saved", priority, move |n: u32| {
                let total = total.clone();
                Completion::new(async move {
                    total.fetch_add(n as usize, Ordering::SeqCst);
                    Ok(())
                })
            })
            .unwrap();
    }
    events
        .register_event_handler("temp.saved", 10, |_: u32| Completion::failed(anyhow::anyhow!("disk full")))
        .unwrap();
    events
        .register_event_handler("temp.saved", 5, |n: u32| Completion::new(explode(n)))
        .unwrap();

    let err = source.saved.raise(2).await.unwrap_err();
    assert!(err.to_string().contains("disk full"));
    assert_eq!(total.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_async_handlers_run_when_raise_is_not_awaited() {
    let source = Arc::new(Thermostat::default());
    let events = EventInjector::new("async-detached", 0);
    events
        .register_event_source(&source, "saved", "temp.saved", false)
        .unwrap();

    let total = Arc::new(AtomicUsize::new(0));
    {
        let total = total.clone();
        events
            .register_event_handler("temp.saved", 0, move |n: u32| {
                let total = total.clone();
                Completion::new(async move {
                    tokio::task::yield_now().await;
                    total.fetch_add(n as usize, Ordering::SeqCst);
                    Ok(())
                })
            })
            .unwrap();
    }

    drop(source.saved.raise(3));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(total.load(Ordering::SeqCst), 3);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[tokio::test]
async fn test_target_failures_are_logged_not_raised() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let source = Arc::new(Thermostat::default());
    let events = injector_with_reading(&source);
    events
        .register_event_source(&source, "saved", "temp.saved", false)
        .unwrap();
    events
        .register_event_handler("temp.reading", 0, |_: f64| -> String { panic!("sensor offline") })
        .unwrap();
    events
        .register_event_handler("temp.saved", 0, |_: u32| Completion::failed(anyhow::anyhow!("quota exceeded")))
        .unwrap();

    assert_eq!(source.reading.raise(1.0), "");
    drop(source.saved.raise(1));
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    let output = logs.contents();
    assert!(output.contains("event target panicked"), "{}", output);
    assert!(output.contains("sensor offline"), "{}", output);
    assert!(output.contains("event handler failed"), "{}", output);
    assert_eq!(output.matches("quota exceeded").count(), 1, "{}", output);
}

#[tokio::test]
async fn test_async_event_without_targets_completes() {
    let source = Arc::new(Thermostat::default());
    let events = EventInjector::new("async-empty", 0);
    events
        .register_event_source(&source, "saved", "temp.saved", false)
        .unwrap();

    source.saved.raise(1).await.unwrap();
}

#[derive(Default)]
struct Panel {
    readings: Mutex<Vec<f64>>,
    alarms: AtomicUsize,
}

impl Injectable for Panel {
    fn describe(meta: &mut TypeMetadataBuilder<Self>) {
        meta.fallback_default()
            .event_handler("on_reading", "temp.reading", 0, |p: &Panel, v: f64| {
                p.readings.lock().push(v);
                format!("panel {}", v)
            })
            .event_handler("on_alarm", "temp.alarm", 0, |p: &Panel, _code: u32| {
                p.alarms.fetch_add(1, Ordering::SeqCst);
            })
            .event_handler("on_humidity", "temp.humidity", 0, |_: &Panel, _: f64| ());
    }
}

#[test]
fn test_declared_handlers_bound_on_construction() {
    let container = Container::new("events-container");
    let source = Arc::new(Thermostat::default());
    let events = container
        .add_event_injector("events", 0, false, |injector| {
            injector.register_event_sources(&source, "temp.", SourceOptions::new())?;
            Ok(())
        })
        .unwrap();
    assert!(Arc::ptr_eq(&container.get_named_required::<EventInjector>("events"), &events));

    let panel = container.resolve::<Panel>().unwrap();
    let members = container.post_inject(&panel).unwrap();
    assert_eq!(members, vec!["on_reading", "on_alarm"]);
    // post_inject bound the handlers a second time
    assert_eq!(events.proxy_any("temp.reading").unwrap().target_count(), 2);

    assert_eq!(source.reading.raise(20.0), "panel 20");
    source.alarm.raise(7);
    assert_eq!(panel.alarms.load(Ordering::SeqCst), 2);

    assert_eq!(container.set_event_target_enabled(&panel, false, &["temp.alarm"]), 2);
    source.alarm.raise(8);
    assert_eq!(panel.alarms.load(Ordering::SeqCst), 2);
    source.reading.raise(21.0);
    assert_eq!(panel.readings.lock().len(), 4);

    assert_eq!(container.set_post_injections_enabled(&panel, false, None), 1);
    source.reading.raise(22.0);
    assert_eq!(panel.readings.lock().len(), 4);
    assert_eq!(source.reading.raise(22.0), "");

    assert_eq!(container.set_event_target_enabled(&panel, true, &[]), 4);
    source.alarm.raise(9);
    assert_eq!(panel.alarms.load(Ordering::SeqCst), 4);
}

#[test]
fn test_mismatched_declaration_fails_construction() {
    #[derive(Default)]
    struct Confused;
    impl Injectable for Confused {
        fn describe(meta: &mut TypeMetadataBuilder<Self>) {
            meta.fallback_default()
                .event_handler("on_reading", "temp.reading", 0, |_: &Confused, _: u32| ());
        }
    }

    let container = Container::new("events-mismatch");
    let source = Arc::new(Thermostat::default());
    container
        .add_event_injector("events", 0, false, |injector| {
            injector.register_event_source(&source, "reading", "temp.reading", false)?;
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        container.resolve::<Confused>(),
        Err(DiError::SignatureMismatch { .. })
    ));
}

#[test]
fn test_second_injector_with_same_name_is_discarded() {
    let container = Container::new("events-duplicate");
    let source = Arc::new(Thermostat::default());
    let setup = |injector: &EventInjector| -> reinject::DiResult<()> {
        injector.register_event_sources(&source, "temp.", SourceOptions::new())?;
        Ok(())
    };

    let first = container.add_event_injector("events", 0, false, setup).unwrap();
    let second = container.add_event_injector("events", 0, false, setup).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.reading.handler_count(), 1);
    assert!(Arc::ptr_eq(&container.event_injector(Some("events")).unwrap(), &first));
}
