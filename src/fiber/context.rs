//! The fiber context: identity, state machine, flags, fiber-local storage
//! and join bookkeeping.
//!
//! A context is shared as an [`Arc`] between the owning scheduler's queues,
//! join handles and wait queues, so it is never freed while linked
//! anywhere. All mutable pieces are individually synchronized; the state
//! byte is the single authority every wake-up path races on.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::sched::Scheduler;
use crate::sys::exec::ExecutionContext;

pub(crate) type FiberRef = Arc<Context>;

////////////////////////////////////////////////////////////////////////////////
// FiberId
////////////////////////////////////////////////////////////////////////////////

/// A fiber's unique identifier.
///
/// Unique for the lifetime of the process, never reused. Usable for
/// equality, ordering, hashing and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn next_fiber_id() -> FiberId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    FiberId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

////////////////////////////////////////////////////////////////////////////////
// State
////////////////////////////////////////////////////////////////////////////////

/// Fiber life cycle. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
    Ready = 0,
    Running = 1,
    Waiting = 2,
    Terminated = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Terminated,
            _ => unreachable!("corrupt fiber state"),
        }
    }
}

bitflags::bitflags! {
    pub(crate) struct ContextFlags: u32 {
        /// The context that adopted the thread which created the scheduler.
        const MAIN                   = 1 << 1;
        /// The context running the scheduler driver loop.
        const DISPATCHER             = 1 << 2;
        /// An ordinary spawned fiber.
        const WORKER                 = 1 << 3;
        /// Pending interruptions are held back until re-enabled.
        const INTERRUPTION_BLOCKED   = 1 << 4;
        /// Another fiber requested an interruption.
        const INTERRUPTION_REQUESTED = 1 << 5;
        /// Must never migrate to another scheduler.
        const PINNED                 = 1 << 6;
        /// No join handle will ever claim the termination result.
        const DETACHED               = 1 << 7;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Context
////////////////////////////////////////////////////////////////////////////////

struct FlsEntry {
    key: u64,
    value: Box<dyn Any + Send>,
    cleanup: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>,
}

struct JoinState {
    terminated: bool,
    waiters: Vec<FiberRef>,
}

pub(crate) struct Context {
    id: FiberId,
    name: String,
    state: AtomicU8,
    flags: AtomicU32,
    priority: AtomicI32,
    /// Set once right after the backing context is created, before the
    /// fiber is first offered to a scheduling algorithm.
    exec: OnceCell<ExecutionContext>,
    /// The scheduler currently responsible for this fiber. Changes only
    /// between activations (work stealing), never while the fiber runs.
    owner: Mutex<Option<Arc<Scheduler>>>,
    /// Bumped at every suspension; sleep-queue entries remember the value
    /// they were created under and are discarded when it has moved on.
    wait_epoch: AtomicU64,
    /// Times this context was switched into by a scheduler.
    resumes: AtomicU64,
    fls: Mutex<Vec<FlsEntry>>,
    join: Mutex<JoinState>,
}

impl Context {
    fn new(name: String, flags: ContextFlags, state: State) -> Self {
        Self {
            id: next_fiber_id(),
            name,
            state: AtomicU8::new(state as u8),
            flags: AtomicU32::new(flags.bits()),
            priority: AtomicI32::new(0),
            exec: OnceCell::new(),
            owner: Mutex::new(None),
            wait_epoch: AtomicU64::new(0),
            resumes: AtomicU64::new(0),
            fls: Mutex::new(Vec::new()),
            join: Mutex::new(JoinState {
                terminated: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// The context adopting the thread a scheduler was created on.
    pub fn new_main() -> FiberRef {
        let ctx = Self::new(
            "main".into(),
            ContextFlags::MAIN | ContextFlags::PINNED,
            State::Running,
        );
        ctx.exec
            .set(ExecutionContext::for_current_thread())
            .ok()
            .expect("fresh context already has a continuation");
        Arc::new(ctx)
    }

    /// The context that will run a scheduler driver loop.
    pub fn new_dispatcher() -> FiberRef {
        Arc::new(Self::new(
            "dispatcher".into(),
            ContextFlags::DISPATCHER | ContextFlags::PINNED,
            State::Waiting,
        ))
    }

    /// An ordinary fiber, initially ready.
    pub fn new_worker(name: String, priority: i32, pinned: bool) -> FiberRef {
        let mut flags = ContextFlags::WORKER;
        if pinned {
            flags |= ContextFlags::PINNED;
        }
        let ctx = Self::new(name, flags, State::Ready);
        ctx.priority.store(priority, Ordering::Relaxed);
        Arc::new(ctx)
    }

    #[inline(always)]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_exec(&self, exec: ExecutionContext) {
        self.exec
            .set(exec)
            .ok()
            .expect("context continuation initialized twice");
    }

    pub fn exec(&self) -> &ExecutionContext {
        self.exec
            .get()
            .expect("context offered to a scheduler before its continuation was created")
    }

    ////////////////////////////////////////////////////////////////////////
    // state machine
    ////////////////////////////////////////////////////////////////////////

    #[inline]
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state() == State::Terminated
    }

    /// The one racy transition: Waiting -> Ready. Every wake-up path
    /// (notification, timer, interruption, join release) goes through here,
    /// so a context can be handed to a ready queue at most once per
    /// suspension.
    pub fn transition_ready(&self) -> bool {
        self.state
            .compare_exchange(
                State::Waiting as u8,
                State::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Yield path: the running fiber re-enters the ready queue directly.
    pub fn set_ready_from_running(&self) {
        let prev = self.state.swap(State::Ready as u8, Ordering::AcqRel);
        debug_assert_eq!(State::from_u8(prev), State::Running);
    }

    /// Driver picked this context; only ever called on a `Ready` context.
    pub fn set_running(&self) {
        let prev = self.state.swap(State::Running as u8, Ordering::AcqRel);
        debug_assert_eq!(State::from_u8(prev), State::Ready);
    }

    /// The running fiber is about to suspend on some wait queue.
    pub fn set_waiting(&self) {
        let prev = self.state.swap(State::Waiting as u8, Ordering::AcqRel);
        debug_assert_eq!(State::from_u8(prev), State::Running);
    }

    ////////////////////////////////////////////////////////////////////////
    // flags
    ////////////////////////////////////////////////////////////////////////

    #[inline]
    fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.flags().contains(ContextFlags::PINNED)
    }

    #[inline]
    pub fn is_dispatcher(&self) -> bool {
        self.flags().contains(ContextFlags::DISPATCHER)
    }

    pub fn set_detached(&self) {
        self.flags
            .fetch_or(ContextFlags::DETACHED.bits(), Ordering::AcqRel);
    }

    pub fn request_interruption(&self) {
        self.flags
            .fetch_or(ContextFlags::INTERRUPTION_REQUESTED.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn interruption_requested(&self) -> bool {
        self.flags().contains(ContextFlags::INTERRUPTION_REQUESTED)
    }

    #[inline]
    pub fn interruption_enabled(&self) -> bool {
        !self.flags().contains(ContextFlags::INTERRUPTION_BLOCKED)
    }

    /// Sets the interruption-blocked flag, returning the previous value of
    /// "blocked".
    pub fn set_interruption_blocked(&self, blocked: bool) -> bool {
        let bit = ContextFlags::INTERRUPTION_BLOCKED.bits();
        let prev = if blocked {
            self.flags.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.flags.fetch_and(!bit, Ordering::AcqRel)
        };
        prev & bit != 0
    }

    /// Consumes a pending interruption if interruptions are enabled.
    pub fn take_interruption(&self) -> bool {
        if !self.interruption_enabled() {
            return false;
        }
        let bit = ContextFlags::INTERRUPTION_REQUESTED.bits();
        self.flags.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    ////////////////////////////////////////////////////////////////////////
    // priority
    ////////////////////////////////////////////////////////////////////////

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    ////////////////////////////////////////////////////////////////////////
    // ownership
    ////////////////////////////////////////////////////////////////////////

    pub fn owner(&self) -> Arc<Scheduler> {
        self.owner
            .lock()
            .expect("context owner poisoned")
            .clone()
            .expect("fiber operation on a context with no scheduler")
    }

    pub fn set_owner(&self, scheduler: Arc<Scheduler>) {
        *self.owner.lock().expect("context owner poisoned") = Some(scheduler);
    }

    pub fn is_owned_by(&self, scheduler: &Arc<Scheduler>) -> bool {
        match &*self.owner.lock().expect("context owner poisoned") {
            Some(owner) => Arc::ptr_eq(owner, scheduler),
            None => false,
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // timed waits
    ////////////////////////////////////////////////////////////////////////

    /// Opens a new suspension epoch. Sleep-queue entries created for this
    /// suspension carry the returned value; entries from earlier epochs are
    /// stale and get dropped by the driver.
    pub fn begin_wait(&self) -> u64 {
        self.wait_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn wait_epoch(&self) -> u64 {
        self.wait_epoch.load(Ordering::Acquire)
    }

    pub fn bump_resume_count(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn resume_count(&self) -> u64 {
        self.resumes.load(Ordering::Relaxed)
    }

    ////////////////////////////////////////////////////////////////////////
    // join bookkeeping
    ////////////////////////////////////////////////////////////////////////

    /// Enrolls `waiter` unless this context already terminated, in which
    /// case `false` is returned and the caller must not suspend.
    pub fn enroll_joiner(&self, waiter: FiberRef) -> bool {
        let mut join = self.join.lock().expect("join state poisoned");
        if join.terminated {
            return false;
        }
        waiter.set_waiting();
        join.waiters.push(waiter);
        true
    }

    pub fn remove_joiner(&self, id: FiberId) {
        let mut join = self.join.lock().expect("join state poisoned");
        join.waiters.retain(|w| w.id() != id);
    }

    /// Marks the context terminated and returns the fibers waiting in
    /// `join`. The state byte and the join flag are updated under the same
    /// lock `enroll_joiner` takes, so a joiner either observes the
    /// termination or is woken by it.
    pub fn finish(&self) -> Vec<FiberRef> {
        let mut join = self.join.lock().expect("join state poisoned");
        join.terminated = true;
        self.state.store(State::Terminated as u8, Ordering::Release);
        std::mem::take(&mut join.waiters)
    }

    ////////////////////////////////////////////////////////////////////////
    // fiber-local storage
    ////////////////////////////////////////////////////////////////////////

    pub fn fls_set(
        &self,
        key: u64,
        value: Box<dyn Any + Send>,
        cleanup: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>,
    ) {
        let mut fls = self.fls.lock().expect("fiber-local storage poisoned");
        // replacing runs the old slot's cleanup right away
        if let Some(pos) = fls.iter().position(|e| e.key == key) {
            let old = fls.remove(pos);
            if let Some(cleanup) = old.cleanup {
                cleanup(old.value);
            }
        }
        fls.push(FlsEntry { key, value, cleanup });
    }

    pub fn fls_with<R>(&self, key: u64, f: impl FnOnce(Option<&(dyn Any + Send)>) -> R) -> R {
        let fls = self.fls.lock().expect("fiber-local storage poisoned");
        f(fls.iter().find(|e| e.key == key).map(|e| &*e.value))
    }

    /// Destroys fiber-local slots in reverse insertion order, invoking
    /// their cleanup functions. Runs on the fiber's own stack right before
    /// termination.
    pub fn fls_clear(&self) {
        loop {
            // entries are popped one by one so a cleanup function may
            // itself touch (re-create) other slots without deadlocking
            let entry = {
                let mut fls = self.fls.lock().expect("fiber-local storage poisoned");
                match fls.pop() {
                    Some(entry) => entry,
                    None => return,
                }
            };
            if let Some(cleanup) = entry.cleanup {
                cleanup(entry.value);
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = Context::new_worker("a".into(), 0, false);
        let b = Context::new_worker("b".into(), 0, false);
        assert_ne!(a.id(), b.id());
        assert!(a.id() < b.id());
    }

    #[test]
    fn ready_transition_happens_once() {
        let ctx = Context::new_worker("w".into(), 0, false);
        ctx.set_running();
        ctx.set_waiting();
        assert!(ctx.transition_ready());
        assert!(!ctx.transition_ready());
    }

    #[test]
    fn interruption_flags() {
        let ctx = Context::new_worker("w".into(), 0, false);
        assert!(ctx.interruption_enabled());
        assert!(!ctx.take_interruption());
        ctx.request_interruption();
        let was_blocked = ctx.set_interruption_blocked(true);
        assert!(!was_blocked);
        // blocked: the request stays pending
        assert!(!ctx.take_interruption());
        assert!(ctx.interruption_requested());
        ctx.set_interruption_blocked(false);
        assert!(ctx.take_interruption());
        assert!(!ctx.interruption_requested());
    }

    #[test]
    fn fls_cleanup_runs_in_reverse_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let order = Arc::new(Mutex::new(Vec::new()));
        let ctx = Context::new_worker("w".into(), 0, false);
        for key in 0..3u64 {
            let order = order.clone();
            ctx.fls_set(
                key,
                Box::new(key),
                Some(Box::new(move |_| order.lock().unwrap().push(key))),
            );
        }
        static TOUCHED: AtomicUsize = AtomicUsize::new(0);
        ctx.fls_with(1, |v| {
            assert_eq!(*v.unwrap().downcast_ref::<u64>().unwrap(), 1);
            TOUCHED.fetch_add(1, Ordering::Relaxed);
        });
        ctx.fls_clear();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }
}
