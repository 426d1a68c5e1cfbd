//! Fan-out from one native event slot to prioritized, weakly held targets.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::background::panic_message;
use crate::error::{DiError, DiResult};
use crate::instance::{Instance, InstanceId, WeakInstance};

use super::event::{HandlerId, Signature};
use super::source::SourceRef;

/// Handle of a target added to an [`EventProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

type BoundFn<A, R> = Arc<dyn Fn(&Instance, A) -> Option<R> + Send + Sync>;
type FreeFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct BoundHandler<A, R>(BoundFn<A, R>);
struct FreeHandler<A, R>(FreeFn<A, R>);

/// A handler whose argument and return types are only known at runtime.
///
/// Produced by event handler declarations; binding it to a proxy of another
/// signature fails with [`DiError::SignatureMismatch`].
#[derive(Clone)]
pub struct ErasedHandler {
    signature: Signature,
    bound: bool,
    func: Arc<dyn Any + Send + Sync>,
}

impl ErasedHandler {
    /// Handler calling `f` on the receiver it gets bound to.
    pub fn bound<T, A, R, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let call: BoundFn<A, R> =
            Arc::new(move |receiver: &Instance, args: A| receiver.downcast::<T>().map(|t| f(&t, args)));
        Self {
            signature: Signature::of::<A, R>(),
            bound: true,
            func: Arc::new(BoundHandler(call)),
        }
    }

    /// Handler without a receiver.
    pub fn free<A, R, F>(f: F) -> Self
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let call: FreeFn<A, R> = Arc::new(f);
        Self {
            signature: Signature::of::<A, R>(),
            bound: false,
            func: Arc::new(FreeHandler(call)),
        }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Whether the handler has to be bound to a receiver.
    pub fn needs_receiver(&self) -> bool {
        self.bound
    }

    fn bound_fn<A: 'static, R: 'static>(&self) -> Option<BoundFn<A, R>> {
        self.func.downcast_ref::<BoundHandler<A, R>>().map(|h| h.0.clone())
    }

    fn free_fn<A: 'static, R: 'static>(&self) -> Option<FreeFn<A, R>> {
        self.func.downcast_ref::<FreeHandler<A, R>>().map(|h| h.0.clone())
    }
}

impl fmt::Debug for ErasedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedHandler")
            .field("signature", &self.signature)
            .field("bound", &self.bound)
            .finish()
    }
}

enum TargetFn<A, R> {
    Bound { receiver: WeakInstance, call: BoundFn<A, R> },
    Free(FreeFn<A, R>),
}

impl<A, R> Clone for TargetFn<A, R> {
    fn clone(&self) -> Self {
        match self {
            TargetFn::Bound { receiver, call } => TargetFn::Bound {
                receiver: receiver.clone(),
                call: call.clone(),
            },
            TargetFn::Free(call) => TargetFn::Free(call.clone()),
        }
    }
}

struct Target<A, R> {
    id: TargetId,
    priority: i32,
    seq: u64,
    enabled: bool,
    func: TargetFn<A, R>,
}

impl<A, R> Target<A, R> {
    fn receiver(&self) -> Option<InstanceId> {
        match &self.func {
            TargetFn::Bound { receiver, .. } => Some(receiver.id()),
            TargetFn::Free(_) => None,
        }
    }

    fn is_alive(&self) -> bool {
        match &self.func {
            TargetFn::Bound { receiver, .. } => receiver.is_alive(),
            TargetFn::Free(_) => true,
        }
    }
}

/// Type-erased view of an [`EventProxy`].
pub trait AnyEventProxy: Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Logical name the proxy is registered under.
    fn name(&self) -> &str;

    /// Name of the slot on the source.
    fn native_name(&self) -> &str;

    fn signature(&self) -> Signature;

    fn source(&self) -> &SourceRef;

    fn is_enabled(&self) -> bool;

    /// Disabling detaches the proxy from the native slot, so raising the
    /// source event no longer reaches any target. Enabling reattaches it.
    fn set_enabled(&self, enabled: bool);

    /// Adds a target from a type-erased handler. A bound handler needs a
    /// receiver, which is held weakly.
    fn add_erased_target(
        &self,
        receiver: Option<&Instance>,
        priority: i32,
        handler: &ErasedHandler,
    ) -> DiResult<TargetId>;

    /// Toggles every target bound to `receiver`. Returns how many matched.
    fn set_target_enabled(&self, receiver: InstanceId, enabled: bool) -> usize;

    fn remove_target(&self, target: TargetId) -> bool;

    /// Removes every target bound to `receiver`.
    fn remove_targets_of(&self, receiver: InstanceId) -> usize;

    fn target_count(&self) -> usize;

    /// Clears the targets and detaches from the source. Idempotent, and safe
    /// after the source is gone.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Adapter subscribed to one native [`Event`](super::Event) slot.
///
/// Each raise of the slot invokes the enabled, live targets in descending
/// priority, registration order breaking ties, and merges their results like
/// the slot does. A target that panics is logged and skipped.
pub struct EventProxy<A, R> {
    this: Weak<Self>,
    id: Uuid,
    name: String,
    native: String,
    source: SourceRef,
    merge: fn(Vec<R>) -> R,
    targets: RwLock<Vec<Target<A, R>>>,
    next_seq: AtomicU64,
    native_handler: Mutex<Option<HandlerId>>,
    enabled: AtomicBool,
    disposed: AtomicBool,
}

impl<A, R> EventProxy<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(name: &str, native: &str, source: SourceRef, merge: fn(Vec<R>) -> R) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            id: Uuid::new_v4(),
            name: name.to_string(),
            native: native.to_string(),
            source,
            merge,
            targets: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            native_handler: Mutex::new(None),
            enabled: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn downcast(proxy: Arc<dyn AnyEventProxy>) -> DiResult<Arc<Self>> {
        let found = proxy.signature();
        let name = proxy.name().to_string();
        proxy.as_any_arc().downcast::<Self>().map_err(|_| DiError::SignatureMismatch {
            event: name,
            expected: Signature::of::<A, R>().to_string(),
            found: found.to_string(),
        })
    }

    /// Closure subscribed on the native slot.
    pub(crate) fn forwarder(&self) -> impl Fn(A) -> R + Send + Sync + 'static {
        let proxy = self.this.clone();
        let merge = self.merge;
        move |args: A| match proxy.upgrade() {
            Some(proxy) => proxy.dispatch(args),
            None => merge(Vec::new()),
        }
    }

    pub(crate) fn set_native_handler(&self, handler: Option<HandlerId>) {
        *self.native_handler.lock() = handler;
    }

    /// Adds `handler` bound to `receiver`, which is held weakly.
    pub fn add_target<T, F>(&self, receiver: &Arc<T>, priority: i32, handler: F) -> TargetId
    where
        T: Send + Sync + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let call: BoundFn<A, R> =
            Arc::new(move |receiver: &Instance, args: A| receiver.downcast::<T>().map(|t| handler(&t, args)));
        self.push_target(
            priority,
            TargetFn::Bound {
                receiver: Instance::new(receiver.clone()).downgrade(),
                call,
            },
        )
    }

    /// Adds a target without receiver.
    pub fn add_handler<F>(&self, priority: i32, handler: F) -> TargetId
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.push_target(priority, TargetFn::Free(Arc::new(handler)))
    }

    /// Enables or disables one target.
    pub fn set_target_enabled_by_id(&self, target: TargetId, enabled: bool) -> bool {
        let mut targets = self.targets.write();
        match targets.iter_mut().find(|t| t.id == target) {
            Some(t) => {
                t.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Invokes the targets as a raise of the native slot would.
    pub fn dispatch(&self, args: A) -> R {
        let targets: Vec<(TargetId, TargetFn<A, R>)> = self
            .targets
            .read()
            .iter()
            .filter(|t| t.enabled)
            .map(|t| (t.id, t.func.clone()))
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        let mut dead = false;
        for (id, func) in targets {
            let outcome = match func {
                TargetFn::Bound { receiver, call } => match receiver.upgrade() {
                    Some(instance) => {
                        let args = args.clone();
                        std::panic::catch_unwind(AssertUnwindSafe(|| call(&instance, args)))
                    }
                    None => {
                        dead = true;
                        continue;
                    }
                },
                TargetFn::Free(call) => {
                    let args = args.clone();
                    std::panic::catch_unwind(AssertUnwindSafe(|| Some(call(args))))
                }
            };
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(panic) => error!(
                    event = %self.name,
                    target = ?id,
                    panic = %panic_message(&*panic),
                    "event target panicked"
                ),
            }
        }

        if dead {
            let mut targets = self.targets.write();
            let before = targets.len();
            targets.retain(Target::is_alive);
            trace!(event = %self.name, pruned = before - targets.len(), "dropped dead targets");
        }

        (self.merge)(results)
    }

    fn push_target(&self, priority: i32, func: TargetFn<A, R>) -> TargetId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = TargetId(seq);
        let mut targets = self.targets.write();
        targets.retain(Target::is_alive);
        targets.push(Target {
            id,
            priority,
            seq,
            enabled: true,
            func,
        });
        targets.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        trace!(event = %self.name, target = ?id, priority, "added event target");
        id
    }

    fn attach(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let erased: Arc<dyn AnyEventProxy> = this;
        let mut slot = self.native_handler.lock();
        if slot.is_some() {
            return;
        }
        match self.source.with_event(&self.native, |event| event.attach(&erased)) {
            Some(Ok(handler)) => *slot = Some(handler),
            Some(Err(e)) => error!(event = %self.name, error = %e, "could not reattach to source"),
            None => debug!(event = %self.name, "source gone, cannot reattach"),
        }
    }
}

impl<A, R> EventProxy<A, R> {
    fn detach(&self) {
        let handler = self.native_handler.lock().take();
        if let Some(handler) = handler {
            let detached = self.source.with_event(&self.native, |event| event.detach(handler));
            if detached.is_none() {
                trace!(event = %self.name, "source gone, nothing to detach");
            }
        }
    }
}

impl<A, R> Drop for EventProxy<A, R> {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            self.detach();
        }
    }
}

impl<A, R> AnyEventProxy for EventProxy<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn native_name(&self) -> &str {
        &self.native
    }

    fn signature(&self) -> Signature {
        Signature::of::<A, R>()
    }

    fn source(&self) -> &SourceRef {
        &self.source
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        if self.is_disposed() || self.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if enabled {
            self.attach();
        } else {
            self.detach();
        }
        debug!(event = %self.name, enabled, "event proxy toggled");
    }

    fn add_erased_target(
        &self,
        receiver: Option<&Instance>,
        priority: i32,
        handler: &ErasedHandler,
    ) -> DiResult<TargetId> {
        let mismatch = || DiError::SignatureMismatch {
            event: self.name.clone(),
            expected: Signature::of::<A, R>().to_string(),
            found: handler.signature().to_string(),
        };
        if handler.signature() != Signature::of::<A, R>() {
            return Err(mismatch());
        }

        let func = match (handler.bound_fn::<A, R>(), handler.free_fn::<A, R>(), receiver) {
            (Some(call), _, Some(receiver)) => TargetFn::Bound {
                receiver: receiver.downgrade(),
                call,
            },
            (Some(_), _, None) => {
                return Err(DiError::InvalidArgument(format!(
                    "handler for event '{}' needs a receiver",
                    self.name
                )))
            }
            (None, Some(call), _) => TargetFn::Free(call),
            (None, None, _) => return Err(mismatch()),
        };
        Ok(self.push_target(priority, func))
    }

    fn set_target_enabled(&self, receiver: InstanceId, enabled: bool) -> usize {
        let mut targets = self.targets.write();
        let mut count = 0;
        for target in targets.iter_mut().filter(|t| t.receiver() == Some(receiver)) {
            target.enabled = enabled;
            count += 1;
        }
        count
    }

    fn remove_target(&self, target: TargetId) -> bool {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|t| t.id != target);
        targets.len() != before
    }

    fn remove_targets_of(&self, receiver: InstanceId) -> usize {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|t| t.receiver() != Some(receiver));
        before - targets.len()
    }

    fn target_count(&self) -> usize {
        self.targets.read().len()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.targets.write().clear();
        self.detach();
        debug!(event = %self.name, source = self.source.type_name(), "event proxy disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<A, R> fmt::Debug for EventProxy<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProxy")
            .field("name", &self.name)
            .field("native", &self.native)
            .field("source", &self.source)
            .field("targets", &self.targets.read().len())
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish()
    }
}
