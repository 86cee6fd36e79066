//! Fibers and the operations available to the currently running fiber.
//!
//! With the fiber module, you can:
//! - create, run and manage [fibers](fn.spawn.html): lightweight execution
//!   contexts with their own stacks, cooperatively scheduled over the OS
//!   threads of the process,
//! - use synchronization mechanisms built on the fiber scheduler:
//!   [mutexes](mutex::Mutex), [condition variables](cond::Cond),
//!   [promises and futures](future::Promise), [channels](channel::Channel),
//!   [one-shot events](event::OneShotEvent) and [barriers](barrier::Barrier).
//!
//! Fibers yield to each other only at well-defined suspension points
//! (waiting on a primitive, sleeping, yielding); there is no preemption.
//! A fiber can be asked to stop with [`JoinHandle::interrupt`]: the request
//! is delivered as [`Error::Interrupted`] at the fiber's next interruption
//! point and propagates like any other error until handled.
//!
//! The scheduling policy of the current thread is chosen with
//! [`sched::set_scheduling_algorithm`](crate::sched::set_scheduling_algorithm)
//! before the first fiber operation; round-robin is installed by default.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, Result};
use crate::sched;
use crate::sys::exec::{self, ExecutionContext};
use crate::sys::stack::StackSize;

pub(crate) mod context;

pub mod barrier;
pub mod channel;
pub mod cond;
mod csw;
pub mod event;
pub mod future;
pub mod mutex;

pub use barrier::Barrier;
pub use channel::{
    Channel, RecvError, SendError, TryRecvError, TrySendError, UnboundedChannel,
};
pub use cond::{Cond, WaitStatus};
pub use context::FiberId;
pub use csw::{check_yield, csw, YieldResult};
pub use event::OneShotEvent;
pub use future::{Future, PackagedTask, Promise};
pub use mutex::Mutex;

use context::{Context, FiberRef};

////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////

/// Fiber factory which can be used to configure the properties of the new
/// fiber.
///
/// Methods can be chained on it in order to configure it.
///
/// The currently supported configurations are:
///
/// * `name`:       specifies an associated name for the fiber
/// * `stack_size`: specifies the desired stack size for the fiber
/// * `priority`:   scheduling priority (meaningful under the
///   [priority algorithm](crate::sched::PriorityScheduling))
/// * `pinned`:     forbids migrating the fiber to another thread's
///   scheduler
///
/// The [`spawn`](Self::spawn) method takes ownership of the builder and
/// returns a [`Result`] to the fiber's [`JoinHandle`].
///
/// The [`fiber::spawn`](spawn) and [`fiber::spawn_proc`](spawn_proc) free
/// functions use a `Builder` with default configuration and unwrap the
/// return value.
#[derive(Debug)]
pub struct Builder {
    name: Option<String>,
    stack_size: StackSize,
    priority: i32,
    pinned: bool,
}

impl Builder {
    /// Generates the base configuration for spawning a fiber, from which
    /// configuration methods can be chained.
    pub fn new() -> Self {
        Self {
            name: None,
            stack_size: StackSize::default(),
            priority: 0,
            pinned: false,
        }
    }

    /// Names the fiber-to-be.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the size of the stack (in bytes) for the new fiber.
    ///
    /// The size is validated right away; a request below the supported
    /// minimum fails with [`Error::InvalidArgument`].
    pub fn stack_size(mut self, stack_size: usize) -> Result<Self> {
        self.stack_size = StackSize::new(stack_size)?;
        Ok(self)
    }

    /// Sets the scheduling priority of the new fiber. Higher runs first
    /// under the priority algorithm; other algorithms ignore it.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Pins the fiber to the scheduler it is spawned on, excluding it from
    /// migration and work stealing.
    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Spawns a new fiber by taking ownership of the `Builder`, and
    /// returns a [`Result`] to its [`JoinHandle`].
    ///
    /// The new fiber is scheduled for execution on the current thread's
    /// scheduler; the calling fiber keeps running until its next
    /// suspension point.
    ///
    /// Fails with [`Error::ResourceUnavailable`] if the execution context
    /// or its stack could not be created.
    pub fn spawn<F, T>(self, f: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let parent = sched::active();
        let scheduler = parent.owner();
        let name = self.name.unwrap_or_else(|| "<fiber>".into());

        let ctx = Context::new_worker(name, self.priority, self.pinned);
        ctx.set_owner(scheduler.clone());

        let result = Arc::new(StdMutex::new(None));
        let fiber_ctx = ctx.clone();
        let fiber_result = result.clone();
        let exec = ExecutionContext::spawn(
            ctx.name(),
            self.stack_size.get(),
            move |_resumer| fiber_main(fiber_ctx, f, fiber_result),
        )?;
        ctx.set_exec(exec);

        log::debug!("spawned fiber {} ({})", ctx.id(), ctx.name());
        scheduler.enqueue_ready(ctx.clone());
        Ok(JoinHandle {
            ctx: Some(ctx),
            result,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// The body every fiber runs on its own stack: invoke the user function,
/// latch the result, terminate.
fn fiber_main<F, T>(ctx: FiberRef, f: F, result: Arc<StdMutex<Option<T>>>)
where
    F: FnOnce() -> T,
{
    sched::bind_thread(ctx.clone());
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            *result.lock().expect("fiber result slot poisoned") = Some(value);
        }
        Err(payload) => {
            // A panic escaping the fiber function is a contract violation:
            // there may be nobody left to report it to, so the process goes
            // down loudly rather than losing state silently.
            let msg = panic_message(&payload);
            log::error!("fiber {} ({}) panicked: {}", ctx.id(), ctx.name(), msg);
            eprintln!(
                "fatal: fiber {} ({}) panicked: {}",
                ctx.id(),
                ctx.name(),
                msg
            );
            std::process::abort();
        }
    }

    let joiners = ctx.finish();
    for waiter in joiners {
        sched::make_ready(&waiter);
    }
    ctx.fls_clear();
    let scheduler = ctx.owner();
    scheduler.retire(ctx.clone());
    log::debug!("fiber {} ({}) finished", ctx.id(), ctx.name());
    exec::finish(ctx.exec(), scheduler.dispatcher_ctx().exec());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

////////////////////////////////////////////////////////////////////////////////
// JoinHandle
////////////////////////////////////////////////////////////////////////////////

/// An owned permission to join on a fiber (block on its termination).
///
/// Dropping the handle detaches the fiber: it keeps running and its result
/// is discarded on termination.
pub struct JoinHandle<T> {
    ctx: Option<FiberRef>,
    result: Arc<StdMutex<Option<T>>>,
}

impl<T> JoinHandle<T> {
    /// Blocks until the fiber's termination and returns its result value.
    ///
    /// This is an interruption point: if the *calling* fiber is
    /// interrupted while waiting, `Err(`[`Error::Interrupted`]`)` is
    /// returned and the target fiber is left detached.
    pub fn join(mut self) -> Result<T> {
        let ctx = self.ctx.take().expect("join handle without a context");
        if let Err(e) = sched::join_ctx(&ctx) {
            ctx.set_detached();
            return Err(e);
        }
        let value = self
            .result
            .lock()
            .expect("fiber result slot poisoned")
            .take()
            .expect("fiber terminated without storing a result");
        Ok(value)
    }

    /// Detaches the fiber explicitly. Equivalent to dropping the handle.
    pub fn detach(mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.set_detached();
        }
    }

    /// Requests interruption of the fiber.
    ///
    /// The request is delivered as [`Error::Interrupted`] at the fiber's
    /// next interruption point, unless the fiber currently blocks
    /// interruption delivery (see [`DisableInterruption`]), in which case
    /// it stays pending.
    pub fn interrupt(&self) {
        let ctx = self.ctx.as_ref().expect("join handle without a context");
        sched::interrupt_ctx(ctx);
    }

    /// Whether an interruption request is pending for the fiber.
    pub fn interruption_requested(&self) -> bool {
        self.ctx
            .as_ref()
            .expect("join handle without a context")
            .interruption_requested()
    }

    /// The fiber's id.
    pub fn id(&self) -> FiberId {
        self.ctx.as_ref().expect("join handle without a context").id()
    }

    /// Adjusts the fiber's scheduling priority. Takes effect the next time
    /// the fiber enters a ready queue.
    pub fn set_priority(&self, priority: i32) {
        self.ctx
            .as_ref()
            .expect("join handle without a context")
            .set_priority(priority);
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.set_detached();
        }
    }
}

impl<T> PartialEq for JoinHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T> Eq for JoinHandle<T> {}

impl<T> std::hash::Hash for JoinHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.ctx.as_ref().map(|c| c.id()))
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Free functions
////////////////////////////////////////////////////////////////////////////////

/// Creates a new fiber and schedules it for execution, returning a
/// [`JoinHandle`] for it.
///
/// **NOTE**: The argument `f` is a function that returns `T`. In case when
/// `T = ()` (no return value) one can use [`spawn_proc`].
///
/// The join handle will implicitly *detach* the child fiber upon being
/// dropped. In this case, the child fiber may outlive the parent.
/// Additionally, the join handle provides a [`JoinHandle::join`] method
/// that can be used to join the child fiber and acquire the result value
/// of the fiber function.
///
/// This will create a fiber using default parameters of [`Builder`], if
/// you want to specify the stack size or the name of the fiber, use that
/// API instead.
pub fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new().spawn(f).expect("failed to spawn a fiber")
}

/// Creates a new proc fiber and schedules it for execution, returning a
/// [`JoinHandle`]`<()>` for it.
///
/// The *proc fiber* is a special case of a fiber whose function does not
/// return a value.
///
/// For more details see: [`spawn`]
pub fn spawn_proc<F>(f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    spawn(f)
}

/// Yields control to the scheduler: the calling fiber is moved to the back
/// of the ready queue and resumed after the fibers already waiting there.
pub fn yield_now() {
    sched::yield_current();
}

/// [`yield_now`] plus an interruption check.
///
/// Works likewise `fiber::sleep(Duration::ZERO)` but returns an error if
/// the fiber was interrupted by another routine while rescheduled.
pub fn yield_checked() -> Result<()> {
    sched::yield_current();
    interruption_point()
}

/// Puts the current fiber to sleep for at least `timeout`.
///
/// Yields control to the scheduler and wakes up once the timeout elapsed.
/// A zero timeout still reschedules the fiber once, so `sleep(Duration::
/// ZERO)` is an explicit "give others a chance to run".
///
/// This is an interruption point.
pub fn sleep(timeout: Duration) -> Result<()> {
    sleep_until(clock::deadline(timeout))
}

/// Puts the current fiber to sleep until `deadline`.
///
/// This is an interruption point.
pub fn sleep_until(deadline: Instant) -> Result<()> {
    sched::sleep_ctx_until(deadline)
}

/// The id of the current fiber.
pub fn current_id() -> FiberId {
    sched::active().id()
}

/// The name of the current fiber.
pub fn current_name() -> String {
    sched::active().name().to_string()
}

/// Consumes a pending interruption request, if any.
///
/// Returns `Err(`[`Error::Interrupted`]`)` when an interruption was
/// requested and delivery is currently enabled; `Ok(())` otherwise.
/// Long-running computations without natural suspension points should call
/// this periodically to stay cancellable.
pub fn interruption_point() -> Result<()> {
    if sched::active().take_interruption() {
        return Err(Error::Interrupted);
    }
    Ok(())
}

/// Whether an interruption of the current fiber has been requested (and
/// not yet consumed).
pub fn is_interruption_requested() -> bool {
    sched::active().interruption_requested()
}

/// Whether interruption delivery is currently enabled for the calling
/// fiber (see [`DisableInterruption`]).
pub fn interruption_enabled() -> bool {
    sched::active().interruption_enabled()
}

/// Sets the scheduling priority of the current fiber. Takes effect the
/// next time the fiber enters a ready queue.
pub fn set_priority(priority: i32) {
    sched::active().set_priority(priority);
}

/// The scheduling priority of the current fiber.
pub fn priority() -> i32 {
    sched::active().priority()
}

////////////////////////////////////////////////////////////////////////////////
// interruption scopes
////////////////////////////////////////////////////////////////////////////////

/// Blocks interruption delivery for the current fiber while alive.
///
/// Interruption requests arriving in the scope stay pending and are
/// delivered at the first interruption point after the scope ends (or
/// inside a nested [`RestoreInterruption`] scope). Scopes nest; dropping
/// restores the state that was in effect when the scope was entered.
pub struct DisableInterruption {
    was_blocked: bool,
    // scopes are tied to the fiber that created them
    _not_send: PhantomData<*const ()>,
}

impl DisableInterruption {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            was_blocked: sched::active().set_interruption_blocked(true),
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisableInterruption {
    fn drop(&mut self) {
        sched::active().set_interruption_blocked(self.was_blocked);
    }
}

/// Re-enables interruption delivery inside a [`DisableInterruption`]
/// scope, for the duration of its own scope.
pub struct RestoreInterruption<'a> {
    _scope: &'a DisableInterruption,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RestoreInterruption<'a> {
    pub fn new(scope: &'a DisableInterruption) -> Self {
        sched::active().set_interruption_blocked(false);
        Self {
            _scope: scope,
            _not_send: PhantomData,
        }
    }
}

impl<'a> Drop for RestoreInterruption<'a> {
    fn drop(&mut self) {
        sched::active().set_interruption_blocked(true);
    }
}

////////////////////////////////////////////////////////////////////////////////
// fiber-local storage
////////////////////////////////////////////////////////////////////////////////

/// A key into fiber-local storage.
///
/// Each fiber sees its own value for the key. Values are destroyed when
/// the owning fiber terminates, in reverse insertion order; a cleanup
/// function registered with [`set_with_cleanup`](Self::set_with_cleanup)
/// runs at that point (cleanup functions must not suspend).
///
/// ```no_run
/// use strand::fiber::FiberLocal;
///
/// let request_id: FiberLocal<u64> = FiberLocal::new();
/// request_id.set(42);
/// assert_eq!(request_id.get(), Some(42));
/// ```
pub struct FiberLocal<T> {
    key: u64,
    marker: PhantomData<fn(T) -> T>,
}

impl<T: Send + 'static> FiberLocal<T> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        static KEYS: AtomicU64 = AtomicU64::new(1);
        Self {
            key: KEYS.fetch_add(1, Ordering::Relaxed),
            marker: PhantomData,
        }
    }

    /// Stores `value` in the current fiber's slot, dropping a previous
    /// value (and running its cleanup) if there was one.
    pub fn set(&self, value: T) {
        sched::active().fls_set(self.key, Box::new(value), None);
    }

    /// As [`set`](Self::set), additionally registering a cleanup function
    /// invoked with the value when the fiber terminates.
    pub fn set_with_cleanup<C>(&self, value: T, cleanup: C)
    where
        C: FnOnce(T) + Send + 'static,
    {
        sched::active().fls_set(
            self.key,
            Box::new(value),
            Some(Box::new(move |any| {
                if let Ok(value) = any.downcast::<T>() {
                    cleanup(*value);
                }
            })),
        );
    }

    /// Calls `f` with a reference to the current fiber's value, or `None`
    /// if the slot was never set.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        sched::active().fls_with(self.key, |slot| {
            f(slot.and_then(|any| any.downcast_ref::<T>()))
        })
    }

    /// A clone of the current fiber's value, or `None`.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.with(|v| v.cloned())
    }
}

impl<T> std::fmt::Debug for FiberLocal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FiberLocal").field("key", &self.key).finish()
    }
}
