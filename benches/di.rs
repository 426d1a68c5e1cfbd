use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reinject::*;
use std::sync::Arc;

// ===== Resolution =====

fn bench_singleton_hit(c: &mut Criterion) {
    let container = Container::new("bench-singleton");
    container.add_singleton(42u64).unwrap();

    c.bench_function("singleton_hit_u64", |b| {
        b.iter(|| {
            let v = container.get::<u64>().unwrap();
            black_box(v);
        })
    });
}

fn bench_lifetimes(c: &mut Criterion) {
    #[derive(Clone)]
    struct Payload {
        data: [u8; 64],
    }

    let mut group = c.benchmark_group("lifetimes");

    let transient = Container::new("bench-transient");
    transient
        .add_transient_factory(|_| Ok(Payload { data: [0; 64] }))
        .unwrap();
    group.bench_function("transient", |b| {
        b.iter(|| {
            let v = transient.get::<Payload>().unwrap();
            black_box(&v.data);
        })
    });

    let cached = Container::new("bench-cached");
    cached
        .add_cached_factory(|_| Ok(Payload { data: [0; 64] }))
        .unwrap();
    let held = cached.get::<Payload>().unwrap();
    group.bench_function("cached_alive", |b| {
        b.iter(|| {
            let v = cached.get::<Payload>().unwrap();
            black_box(&v.data);
        })
    });
    drop(held);

    let lazy = Container::new("bench-lazy");
    lazy.add_lazy_singleton_factory(|_| Ok(Payload { data: [0; 64] }))
        .unwrap();
    group.bench_function("lazy_singleton_hit", |b| {
        b.iter(|| {
            let v = lazy.get::<Payload>().unwrap();
            black_box(&v.data);
        })
    });

    group.finish();
}

fn bench_concrete_vs_trait(c: &mut Criterion) {
    trait Greeter: Send + Sync {
        fn greet(&self) -> usize;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> usize {
            5
        }
    }

    implements!(English => dyn Greeter);

    let container = Container::new("bench-trait");
    container
        .add::<English>()
        .alias::<dyn Greeter>()
        .instance(English)
        .unwrap();

    let mut group = c.benchmark_group("concrete_vs_trait");
    group.bench_function("concrete", |b| {
        b.iter(|| black_box(container.get::<English>().unwrap().greet()))
    });
    group.bench_function("trait_alias", |b| {
        b.iter(|| black_box(container.get::<dyn Greeter>().unwrap().greet()))
    });
    group.finish();
}

fn bench_parent_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("parent_chain_depth");

    for depth in [1usize, 4, 16] {
        let root = Container::new("bench-root");
        root.add_singleton(7u32).unwrap();
        let mut leaf = root.clone();
        for level in 0..depth {
            leaf = Container::with_parent(format!("bench-level-{}", level), &leaf);
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), &leaf, |b, leaf| {
            b.iter(|| black_box(*leaf.get::<u32>().unwrap()))
        });
    }

    group.finish();
}

// ===== Construction =====

struct Config {
    retries: u32,
}

struct Repository {
    config: Arc<Config>,
}

struct Service {
    repository: Arc<Repository>,
    config: Arc<Config>,
}

impl Injectable for Repository {
    fn describe(meta: &mut TypeMetadataBuilder<Self>) {
        meta.constructor([Param::of::<Config>()], |args| {
            Ok(Repository { config: args.get(0)? })
        });
    }
}

impl Injectable for Service {
    fn describe(meta: &mut TypeMetadataBuilder<Self>) {
        meta.constructor([Param::of::<Repository>()], |args| {
            let repository: Arc<Repository> = args.get(0)?;
            Ok(Service {
                config: repository.config.clone(),
                repository,
            })
        });
        meta.constructor(
            [Param::of::<Repository>(), Param::of::<Config>()],
            |args| {
                Ok(Service {
                    repository: args.get(0)?,
                    config: args.get(1)?,
                })
            },
        );
    }
}

fn bench_constructor_resolution(c: &mut Criterion) {
    let container = Container::new("bench-ctor");
    container.add_singleton(Config { retries: 3 }).unwrap();
    container.add_transient::<Repository>().unwrap();
    container.add_transient::<Service>().unwrap();

    c.bench_function("constructor_two_levels", |b| {
        b.iter(|| {
            let service = container.get::<Service>().unwrap();
            black_box(service.config.retries + service.repository.config.retries);
        })
    });
}

// ===== Events =====

#[derive(Default)]
struct Counter {
    tick: Event<u64, u64>,
}

event_source!(Counter { tick });

struct Sink {
    offset: u64,
}

fn bench_event_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_dispatch");

    for targets in [1usize, 8, 64] {
        let source = Arc::new(Counter::default());
        let events = EventInjector::new("bench-events", 0);
        events
            .register_event_source(&source, "tick", "tick", false)
            .unwrap();

        let sinks: Vec<Arc<Sink>> = (0..targets)
            .map(|i| Arc::new(Sink { offset: i as u64 }))
            .collect();
        for (i, sink) in sinks.iter().enumerate() {
            events
                .register_event_target("tick", sink, i as i32, |s: &Sink, v: u64| v + s.offset)
                .unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(targets), &source, |b, source| {
            b.iter(|| black_box(source.tick.raise(black_box(1))))
        });

        drop(sinks);
    }

    group.finish();
}

// ===== Registry =====

fn bench_large_registry(c: &mut Criterion) {
    const NAMES: usize = 1000;

    let container = Container::new("bench-large");
    let names: Vec<&'static str> = (0..NAMES)
        .map(|i| &*Box::leak(format!("svc-{}", i).into_boxed_str()))
        .collect();
    for (i, name) in names.iter().enumerate() {
        container
            .add::<usize>()
            .named(*name)
            .instance(i)
            .unwrap();
    }

    c.bench_function("large_registry_named_lookup", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % NAMES;
            black_box(*container.get_named::<usize>(names[i]).unwrap())
        })
    });
}

criterion_group!(
    resolution_benches,
    bench_singleton_hit,
    bench_lifetimes,
    bench_concrete_vs_trait,
    bench_parent_chain
);

criterion_group!(
    workload_benches,
    bench_constructor_resolution,
    bench_event_dispatch,
    bench_large_registry
);

criterion_main!(resolution_benches, workload_benches);
