//! # reinject
//!
//! Runtime dependency injection with pluggable post-injection: cron-driven
//! background tasks and event-source-to-handler routing.
//!
//! ## Features
//!
//! - **Four lifetimes**: Transient, Cached (weakly held), LazySingleton and Singleton
//! - **Container hierarchy**: child containers see and shadow their parent's registrations
//! - **Constructor resolution**: the satisfiable constructor with the most parameters wins
//! - **Interface aliases**: one dependency registered under several trait-object keys
//! - **Post-injectors**: plug-ins that bind behavior to every instance the container builds
//! - **Background tasks**: cron schedules with a bounded number of live timers
//! - **Event proxies**: prioritized, weakly held handlers on named event slots
//!
//! ## Quick Start
//!
//! ```rust
//! use reinject::{Container, Injectable, Param, TypeMetadataBuilder};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Injectable for UserService {
//!     fn describe(meta: &mut TypeMetadataBuilder<Self>) {
//!         meta.constructor([Param::of::<Database>()], |args| {
//!             Ok(UserService { db: args.get(0)? })
//!         });
//!     }
//! }
//!
//! let container = Container::new("quick-start");
//! container.add_singleton(Database { url: "postgres://localhost".into() }).unwrap();
//! container.add_transient::<UserService>().unwrap();
//!
//! let users = container.get_required::<UserService>();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Lifetimes
//!
//! - **Transient**: the factory runs on every resolution
//! - **Cached**: the container keeps a weak reference and rebuilds once it died
//! - **LazySingleton**: built on first resolution, kept until the cache is cleared
//! - **Singleton**: the value given at registration, never rebuilt
//!
//! ## Interfaces and names
//!
//! ```rust
//! use reinject::{implements, Container};
//!
//! trait Greeter: Send + Sync { fn greet(&self) -> &'static str; }
//! struct English;
//! struct French;
//! impl Greeter for English { fn greet(&self) -> &'static str { "hello" } }
//! impl Greeter for French { fn greet(&self) -> &'static str { "bonjour" } }
//! implements!(English => dyn Greeter);
//! implements!(French => dyn Greeter);
//!
//! let container = Container::new("interfaces");
//! container.add_singleton_as::<dyn Greeter, _>(English).unwrap();
//! container.add::<French>().named("fr").alias::<dyn Greeter>().instance(French).unwrap();
//!
//! assert_eq!(container.get_required::<dyn Greeter>().greet(), "hello");
//! assert_eq!(container.get_named_required::<dyn Greeter>("fr").greet(), "bonjour");
//! ```
//!
//! ## Scoped cleanup
//!
//! A [`ContainerScope`] disposes the disposable transient and ad-hoc
//! instances it handed out when it ends; see its documentation.

pub mod background;
pub mod container;
pub mod error;
pub mod events;
pub mod injector;
pub mod instance;
pub mod key;
pub mod lifetime;
pub mod metadata;
pub mod post_inject;
pub mod traits;

mod internal;
mod registration;

pub use background::{
    BackgroundContainerExt, BackgroundTask, BackgroundTaskDecl, BackgroundWorkerBuilder,
    BackgroundWorkerInjector, Clock, CronSchedule, Schedule, ScheduleSource, SystemClock, TokioClock,
    WorkerOptions,
};
pub use container::{Add, Container, ContainerScope, KnownInstances};
pub use error::{DiError, DiResult};
pub use events::{
    AnyEvent, AnyEventProxy, AsyncEvent, Completion, ErasedHandler, Event, EventContainerExt,
    EventInjector, EventProxy, EventSource, HandlerId, JoinAll, LastWins, MergePolicy, Signature,
    SourceOptions, SourceRef, TargetId,
};
pub use injector::Injector;
pub use instance::{Instance, InstanceId, WeakInstance};
pub use key::Key;
pub use lifetime::Lifetime;
pub use metadata::{Args, EventHandlerDecl, Injectable, Injected, Param, TypeMetadata, TypeMetadataBuilder};
pub use post_inject::PostInjector;
pub use registration::{Dependency, Registration};
pub use traits::{Dispose, Implements};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn singleton_resolution() {
        let container = Container::new("lib-singleton");
        container.add_singleton(42usize).unwrap();

        let a = container.get_required::<usize>();
        let b = container.get_required::<usize>();

        assert_eq!(*a, 42);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn transient_resolution() {
        let container = Container::new("lib-transient");
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        container
            .add_transient_factory(move |_| {
                let n = counter_clone.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("instance-{}", n))
            })
            .unwrap();

        let a = container.get_required::<String>();
        let b = container.get_required::<String>();

        assert_eq!(a.as_str(), "instance-1");
        assert_eq!(b.as_str(), "instance-2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn trait_resolution() {
        trait TestTrait: Send + Sync {
            fn get_value(&self) -> i32;
        }

        struct TestImpl {
            value: i32,
        }

        impl TestTrait for TestImpl {
            fn get_value(&self) -> i32 {
                self.value
            }
        }

        crate::implements!(TestImpl => dyn TestTrait);

        let container = Container::new("lib-trait");
        container
            .add_singleton_as::<dyn TestTrait, _>(TestImpl { value: 42 })
            .unwrap();

        assert_eq!(container.get_required::<dyn TestTrait>().get_value(), 42);
        assert_eq!(container.get_required::<TestImpl>().value, 42);
    }

    #[test]
    fn lazy_singleton_is_built_once_until_cleared() {
        let container = Container::new("lib-lazy");
        let built = Arc::new(AtomicUsize::new(0));
        let built_clone = built.clone();
        container
            .add_lazy_singleton_factory(move |_| {
                built_clone.fetch_add(1, Ordering::SeqCst);
                Ok(7u64)
            })
            .unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 0);
        let a = container.get_required::<u64>();
        let b = container.get_required::<u64>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        container.clear();
        let c = container.get_required::<u64>();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
