//! Native multicast event slots and how their handlers' results merge.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::background::panic_message;
use crate::error::DiResult;

use super::proxy::{AnyEventProxy, EventProxy};
use super::source::SourceRef;

/// Handle of a subscription on an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Argument and return types of an event, compared when binding handlers.
#[derive(Clone, Copy)]
pub struct Signature {
    args: TypeId,
    args_name: &'static str,
    ret: TypeId,
    ret_name: &'static str,
}

impl Signature {
    pub fn of<A: 'static, R: 'static>() -> Self {
        Self {
            args: TypeId::of::<A>(),
            args_name: std::any::type_name::<A>(),
            ret: TypeId::of::<R>(),
            ret_name: std::any::type_name::<R>(),
        }
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.args == other.args && self.ret == other.ret
    }
}

impl Eq for Signature {}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}) -> {}", self.args_name, self.ret_name)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Combines the results of every handler called by one raise.
pub trait MergePolicy<R>: Send + Sync + 'static {
    /// `results` are in invocation order; empty when nothing was called.
    fn merge(results: Vec<R>) -> R;
}

/// The value of the last handler invoked, or `R::default()` when none ran.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWins;

impl<R: Default> MergePolicy<R> for LastWins {
    fn merge(results: Vec<R>) -> R {
        results.into_iter().last().unwrap_or_default()
    }
}

/// Joins every handler's [`Completion`] into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinAll;

impl MergePolicy<Completion> for JoinAll {
    fn merge(results: Vec<Completion>) -> Completion {
        Completion::join_all(results)
    }
}

/// Pending result of an asynchronous handler.
///
/// A single completion does nothing until polled. A joined completion is
/// different: inside a tokio runtime its parts are spawned as soon as it is
/// created, so handlers run whether or not the raiser awaits. Each failure
/// is logged where it happens; awaiting the join yields the first one.
#[must_use = "awaiting a completion is the only way to observe its failure"]
pub struct Completion {
    future: BoxFuture<'static, anyhow::Result<()>>,
    // Produced by `join_all`; its parts are already running and logged
    joined: bool,
}

impl Completion {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
            joined: false,
        }
    }

    /// Already finished successfully.
    pub fn ready() -> Self {
        Self::new(futures::future::ready(Ok(())))
    }

    pub fn failed(error: anyhow::Error) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// Completion of all `parts`. Failures and panics of one part do not stop
    /// the others.
    ///
    /// Outside a tokio runtime nothing can be spawned, and the parts only run
    /// once the returned completion is awaited.
    pub fn join_all(parts: Vec<Completion>) -> Self {
        if parts.is_empty() {
            return Self::ready();
        }
        if parts.len() == 1 && parts[0].joined {
            return parts.into_iter().next().unwrap_or_default();
        }

        let joined = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handles: Vec<_> = parts
                    .into_iter()
                    .map(|part| runtime.spawn(observe(part)))
                    .collect();
                Self::new(async move {
                    let mut first = None;
                    for joined in futures::future::join_all(handles).await {
                        let outcome = joined.unwrap_or_else(|e| {
                            warn!(error = %e, "event handler task did not finish");
                            Err(anyhow::anyhow!("event handler task did not finish: {}", e))
                        });
                        if let Err(e) = outcome {
                            first.get_or_insert(e);
                        }
                    }
                    first.map_or(Ok(()), Err)
                })
            }
            Err(_) => Self::new(async move {
                futures::future::join_all(parts.into_iter().map(observe))
                    .await
                    .into_iter()
                    .find_map(Result::err)
                    .map_or(Ok(()), Err)
            }),
        };
        Self { joined: true, ..joined }
    }
}

// Runs one part, logging its failure or panic.
async fn observe(part: Completion) -> anyhow::Result<()> {
    let nested = part.joined;
    match AssertUnwindSafe(part).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if nested => Err(e),
        Ok(Err(e)) => {
            warn!(error = %e, "event handler failed");
            Err(e)
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(panic = %message, "event handler panicked");
            Err(anyhow::anyhow!("event handler panicked: {}", message))
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::ready()
    }
}

impl Future for Completion {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

type Handler<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A multicast event slot owned by an event source.
///
/// Every raise calls the subscribed handlers in subscription order and merges
/// their results with `M`.
///
/// ```
/// use reinject::Event;
///
/// let changed: Event<u32, u32> = Event::new();
/// changed.subscribe(|v| v + 1);
/// changed.subscribe(|v| v * 10);
/// assert_eq!(changed.raise(4), 40);
/// ```
pub struct Event<A, R = (), M = LastWins> {
    handlers: RwLock<Vec<(HandlerId, Handler<A, R>)>>,
    next_id: AtomicU64,
    _merge: PhantomData<fn() -> M>,
}

/// An event whose handlers run asynchronously.
pub type AsyncEvent<A> = Event<A, Completion, JoinAll>;

impl<A, R, M> Event<A, R, M>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    M: MergePolicy<R>,
{
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            _merge: PhantomData,
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Calls every handler with a clone of `args`.
    pub fn raise(&self, args: A) -> R {
        let handlers: Vec<Handler<A, R>> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        let results = handlers.iter().map(|h| h(args.clone())).collect();
        M::merge(results)
    }
}

impl<A, R, M> Default for Event<A, R, M>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    M: MergePolicy<R>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R, M> fmt::Debug for Event<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("signature", &format_args!("fn({}) -> {}", std::any::type_name::<A>(), std::any::type_name::<R>()))
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

/// Type-erased view of an [`Event`], used to attach proxies by name.
pub trait AnyEvent: Send + Sync {
    fn signature(&self) -> Signature;

    fn handler_count(&self) -> usize;

    /// Creates a proxy for this slot and subscribes it.
    fn create_proxy(&self, name: &str, native: &str, source: SourceRef) -> Arc<dyn AnyEventProxy>;

    /// Subscribes an existing proxy created for this slot's signature.
    fn attach(&self, proxy: &Arc<dyn AnyEventProxy>) -> DiResult<HandlerId>;

    fn detach(&self, handler: HandlerId) -> bool;
}

impl<A, R, M> AnyEvent for Event<A, R, M>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    M: MergePolicy<R>,
{
    fn signature(&self) -> Signature {
        Signature::of::<A, R>()
    }

    fn handler_count(&self) -> usize {
        Event::handler_count(self)
    }

    fn create_proxy(&self, name: &str, native: &str, source: SourceRef) -> Arc<dyn AnyEventProxy> {
        let proxy = EventProxy::<A, R>::new(name, native, source, M::merge);
        let handler = self.subscribe(proxy.forwarder());
        proxy.set_native_handler(Some(handler));
        proxy
    }

    fn attach(&self, proxy: &Arc<dyn AnyEventProxy>) -> DiResult<HandlerId> {
        let typed = EventProxy::<A, R>::downcast(proxy.clone())?;
        Ok(self.subscribe(typed.forwarder()))
    }

    fn detach(&self, handler: HandlerId) -> bool {
        self.unsubscribe(handler)
    }
}
