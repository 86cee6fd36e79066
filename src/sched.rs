//! Per-thread scheduler: driver loop, sleep queue and fiber hand-off.
//!
//! Every OS thread that touches the fiber API gets its own [`Scheduler`]
//! lazily (with the round-robin algorithm), or explicitly via
//! [`set_scheduling_algorithm`]. The scheduler runs its driver loop on a
//! dedicated *dispatcher* context; fibers always switch to the dispatcher
//! when they suspend, and the dispatcher decides whom to resume next by
//! asking the installed scheduling [`Algorithm`].
//!
//! Cross-thread wake-ups never touch the algorithm directly: a fiber that
//! becomes ready is pushed onto its owning scheduler's remote-ready queue
//! and the scheduler's wake event is set; the driver drains that queue at
//! the top of every iteration. This keeps the ready queue single-writer
//! and makes `notify` cheap when the driver isn't sleeping.

use std::cell::RefCell;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use once_cell::sync::OnceCell;

use crate::clock;
use crate::error::{Error, Result};
use crate::fiber::context::{Context, FiberRef};
use crate::sys::event::AutoResetEvent;
use crate::sys::exec;
use crate::sys::stack;

pub mod algorithm;
pub mod priority;
pub mod round_robin;
pub mod shared_queue;
pub(crate) mod wait_list;
pub mod work_stealing;

pub use algorithm::{Algorithm, ReadyContext};
pub use priority::PriorityScheduling;
pub use round_robin::RoundRobin;
pub use shared_queue::{SharedGroup, SharedQueue};
pub use work_stealing::{StealGroup, WorkStealing};

////////////////////////////////////////////////////////////////////////////////
// thread binding
////////////////////////////////////////////////////////////////////////////////

thread_local! {
    /// The context bound to this OS thread: the scheduler's main context on
    /// a user thread, the fiber itself on a fiber's backing thread.
    static ACTIVE: RefCell<Option<FiberRef>> = RefCell::new(None);
}

pub(crate) fn bind_thread(ctx: FiberRef) {
    ACTIVE.with(|active| *active.borrow_mut() = Some(ctx));
}

pub(crate) fn try_active() -> Option<FiberRef> {
    ACTIVE.with(|active| active.borrow().clone())
}

/// The fiber bound to the calling thread, initializing the thread's
/// scheduler with the default algorithm on first use.
pub(crate) fn active() -> FiberRef {
    if let Some(ctx) = try_active() {
        return ctx;
    }
    init_scheduler(Box::new(RoundRobin::new()));
    try_active().expect("scheduler init left the thread unbound")
}

/// Installs a scheduling algorithm for the current thread.
///
/// Affects only the calling thread and must happen before any other fiber
/// operation on it; otherwise the thread already runs the default
/// round-robin scheduler and [`Error::InvalidArgument`] is returned.
pub fn set_scheduling_algorithm(algorithm: impl Algorithm) -> Result<()> {
    if try_active().is_some() {
        return Err(Error::InvalidArgument(
            "scheduler already initialized on this thread",
        ));
    }
    init_scheduler(Box::new(algorithm));
    Ok(())
}

fn init_scheduler(algorithm: Box<dyn Algorithm>) {
    let scheduler = Scheduler::start(algorithm);
    let main = scheduler
        .main
        .get()
        .expect("scheduler started without a main context")
        .clone();
    bind_thread(main);
}

////////////////////////////////////////////////////////////////////////////////
// Scheduler
////////////////////////////////////////////////////////////////////////////////

/// One scheduler per OS thread that runs fibers.
///
/// Shared behind an [`Arc`]: contexts point back at their owner, and other
/// threads use that pointer to hand woken fibers back to it.
pub(crate) struct Scheduler {
    algo: Mutex<Box<dyn Algorithm>>,
    /// Clone of the algorithm's wake event; setting it interrupts an idle
    /// driver sleeping in `suspend_until`.
    wake: Arc<AutoResetEvent>,
    /// Contexts woken by other threads (and by this scheduler's own running
    /// fibers), drained into the algorithm by the driver.
    remote: Mutex<VecDeque<FiberRef>>,
    sleep: Mutex<BinaryHeap<SleepEntry>>,
    /// Contexts whose fiber function has finished; the driver drops the
    /// final runtime references outside of the dying fiber's own switch.
    terminated: Mutex<Vec<FiberRef>>,
    main: OnceCell<FiberRef>,
    dispatcher: OnceCell<FiberRef>,
    /// Fibers resumed by this scheduler since it started.
    switches: AtomicU64,
}

impl Scheduler {
    /// Creates the scheduler for the calling thread and spins up its
    /// dispatcher context. The calling thread becomes the main context.
    fn start(algorithm: Box<dyn Algorithm>) -> Arc<Scheduler> {
        let wake = algorithm.wake_event().clone();
        let scheduler = Arc::new(Scheduler {
            algo: Mutex::new(algorithm),
            wake,
            remote: Mutex::new(VecDeque::new()),
            sleep: Mutex::new(BinaryHeap::new()),
            terminated: Mutex::new(Vec::new()),
            main: OnceCell::new(),
            dispatcher: OnceCell::new(),
            switches: AtomicU64::new(0),
        });

        let main = Context::new_main();
        main.set_owner(scheduler.clone());
        scheduler
            .main
            .set(main)
            .ok()
            .expect("scheduler main context initialized twice");

        let dispatcher = Context::new_dispatcher();
        dispatcher.set_owner(scheduler.clone());
        let driver_sched = scheduler.clone();
        let driver_ctx = dispatcher.clone();
        let driver_exec = exec::ExecutionContext::spawn(
            "strand-dispatcher",
            stack::DEFAULT_STACK_SIZE,
            move |_resumer| {
                bind_thread(driver_ctx.clone());
                driver(driver_sched, driver_ctx);
            },
        )
        .expect("failed to spawn the scheduler dispatcher");
        dispatcher.set_exec(driver_exec);
        scheduler
            .dispatcher
            .set(dispatcher)
            .ok()
            .expect("scheduler dispatcher initialized twice");

        log::debug!("scheduler started on {:?}", std::thread::current().id());
        scheduler
    }

    pub fn dispatcher_ctx(&self) -> &FiberRef {
        self.dispatcher
            .get()
            .expect("scheduler has no dispatcher context")
    }

    /// Hands a context that is already in the `Ready` state to this
    /// scheduler. Safe to call from any thread.
    pub fn enqueue_ready(&self, ctx: FiberRef) {
        self.remote
            .lock()
            .expect("remote ready queue poisoned")
            .push_back(ctx);
        self.wake.set();
    }

    /// Registers a wake-up deadline for `ctx`'s current suspension epoch.
    pub fn sleep_enroll(&self, deadline: Instant, epoch: u64, ctx: FiberRef) {
        self.sleep
            .lock()
            .expect("sleep queue poisoned")
            .push(SleepEntry {
                deadline,
                epoch,
                ctx,
            });
    }

    pub fn retire(&self, ctx: FiberRef) {
        self.terminated
            .lock()
            .expect("terminated list poisoned")
            .push(ctx);
    }

    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("switches", &self.switch_count())
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// sleep queue
////////////////////////////////////////////////////////////////////////////////

struct SleepEntry {
    deadline: Instant,
    epoch: u64,
    ctx: FiberRef,
}

// BinaryHeap is a max-heap; order entries so the earliest deadline is on
// top.
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for SleepEntry {}

////////////////////////////////////////////////////////////////////////////////
// driver
////////////////////////////////////////////////////////////////////////////////

/// The scheduler driver loop, running on the dispatcher context.
fn driver(sched: Arc<Scheduler>, dispatcher: FiberRef) {
    loop {
        // 1. accept contexts woken since the last pass
        let woken = {
            let mut remote = sched.remote.lock().expect("remote ready queue poisoned");
            std::mem::take(&mut *remote)
        };
        if !woken.is_empty() {
            let mut algo = sched.algo.lock().expect("scheduling algorithm poisoned");
            for ctx in woken {
                algo.awakened(ReadyContext::new(ctx));
            }
        }

        // 2. wake sleepers whose deadline has passed
        let now = clock::now();
        let due = {
            let mut sleep = sched.sleep.lock().expect("sleep queue poisoned");
            let mut due = Vec::new();
            while sleep.peek().map_or(false, |e| e.deadline <= now) {
                due.push(sleep.pop().expect("peeked entry vanished"));
            }
            due
        };
        for entry in due {
            // entries from suspensions that already ended are stale
            if entry.ctx.wait_epoch() == entry.epoch && entry.ctx.transition_ready() {
                sched
                    .algo
                    .lock()
                    .expect("scheduling algorithm poisoned")
                    .awakened(ReadyContext::new(entry.ctx));
            }
        }

        // 3. let go of fibers that finished since the last pass
        sched
            .terminated
            .lock()
            .expect("terminated list poisoned")
            .clear();

        // 4. run the next ready fiber, or sleep
        let next = sched
            .algo
            .lock()
            .expect("scheduling algorithm poisoned")
            .pick_next();
        match next {
            Some(ready) => {
                let ctx = ready.into_inner();
                if !ctx.is_owned_by(&sched) {
                    // stolen from a peer scheduler; attach it here
                    ctx.set_owner(sched.clone());
                }
                ctx.set_running();
                ctx.bump_resume_count();
                sched.switches.fetch_add(1, Ordering::Relaxed);
                log::trace!("resuming fiber {} ({})", ctx.id(), ctx.name());
                exec::switch(dispatcher.exec(), ctx.exec());
            }
            None => {
                let deadline = sched
                    .sleep
                    .lock()
                    .expect("sleep queue poisoned")
                    .peek()
                    .map(|e| e.deadline);
                log::trace!("scheduler idle until {:?}", deadline);
                sched
                    .algo
                    .lock()
                    .expect("scheduling algorithm poisoned")
                    .suspend_until(deadline);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// fiber-side operations
////////////////////////////////////////////////////////////////////////////////

/// Makes a waiting context ready and hands it to its owner scheduler.
///
/// No-op if the context isn't in the `Waiting` state (it already got woken
/// through another path, or is running, or terminated) — this is what makes
/// double notifications safe.
pub(crate) fn make_ready(ctx: &FiberRef) {
    if ctx.transition_ready() {
        ctx.owner().enqueue_ready(ctx.clone());
    }
}

/// Suspends the calling fiber. The caller must already have linked itself
/// into whatever wait queue will wake it and moved itself into the
/// `Waiting` state. With a deadline, the fiber is additionally enrolled in
/// its scheduler's sleep queue.
pub(crate) fn suspend(me: &FiberRef, deadline: Option<Instant>) {
    let epoch = me.begin_wait();
    let sched = me.owner();
    if let Some(deadline) = deadline {
        sched.sleep_enroll(deadline, epoch, me.clone());
    }
    exec::switch(me.exec(), sched.dispatcher_ctx().exec());
}

/// Reschedules the calling fiber to the back of the ready queue.
pub(crate) fn yield_current() {
    let me = active();
    let sched = me.owner();
    me.set_ready_from_running();
    sched.enqueue_ready(me.clone());
    exec::switch(me.exec(), sched.dispatcher_ctx().exec());
}

/// Blocks the calling fiber until `target` terminates.
pub(crate) fn join_ctx(target: &FiberRef) -> Result<()> {
    let me = active();
    if Arc::ptr_eq(&me, target) {
        return Err(Error::Lock("a fiber cannot join itself"));
    }
    loop {
        // enroll_joiner moves `me` into the waiting state unless the target
        // has already terminated
        if !target.enroll_joiner(me.clone()) {
            return Ok(());
        }
        suspend(&me, None);
        if me.take_interruption() {
            target.remove_joiner(me.id());
            return Err(Error::Interrupted);
        }
        // spurious wake-up or actual termination; loop decides
    }
}

/// Requests interruption of `ctx` and kicks it out of a wait if it is in
/// one, so the request is noticed promptly.
pub(crate) fn interrupt_ctx(ctx: &FiberRef) {
    ctx.request_interruption();
    make_ready(ctx);
}

/// Puts the calling fiber to sleep until `deadline`.
///
/// An interruption pending or arriving during the sleep cuts it short with
/// [`Error::Interrupted`].
pub(crate) fn sleep_ctx_until(deadline: Instant) -> Result<()> {
    let me = active();
    if clock::now() >= deadline {
        // zero or elapsed timeout still costs exactly one reschedule
        yield_current();
        if me.take_interruption() {
            return Err(Error::Interrupted);
        }
        return Ok(());
    }
    loop {
        me.set_waiting();
        suspend(&me, Some(deadline));
        if me.take_interruption() {
            return Err(Error::Interrupted);
        }
        if clock::now() >= deadline {
            return Ok(());
        }
        // woken early without an interruption: sleep the rest
    }
}

/// Number of times the calling fiber has been resumed by its scheduler.
pub(crate) fn resume_count() -> u64 {
    active().resume_count()
}
