//! The pluggable scheduling-algorithm interface.
//!
//! A scheduler driver owns exactly one [`Algorithm`] and is its only
//! caller for `awakened`/`pick_next`; the algorithm in turn owns its ready
//! queue. Idle sleeping goes through the algorithm's wake event so that
//! algorithm implementations may coordinate wake-ups across schedulers
//! (work distribution needs that; the simple algorithms just use the
//! default behavior).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::fiber::context::FiberRef;
use crate::fiber::FiberId;
use crate::sys::event::AutoResetEvent;

/// A fiber in the `Ready` state, in flight between the scheduler driver
/// and the scheduling algorithm's ready queue.
pub struct ReadyContext {
    ctx: FiberRef,
}

impl ReadyContext {
    pub(crate) fn new(ctx: FiberRef) -> Self {
        Self { ctx }
    }

    pub(crate) fn into_inner(self) -> FiberRef {
        self.ctx
    }

    pub fn id(&self) -> FiberId {
        self.ctx.id()
    }

    /// Pinned contexts (a scheduler's main context, explicitly pinned
    /// workers) must never be given away to another scheduler.
    pub fn is_pinned(&self) -> bool {
        self.ctx.is_pinned()
    }

    /// The fiber's scheduling priority, as set at spawn time or adjusted
    /// later. Read it at enqueue time; it may change between runs.
    pub fn priority(&self) -> i32 {
        self.ctx.priority()
    }
}

impl fmt::Debug for ReadyContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadyContext")
            .field("id", &self.id())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// A scheduling policy for one scheduler.
///
/// `awakened` and `pick_next` are called by the owning driver only and must
/// not block beyond short internal locking. `suspend_until`/`notify` bridge
/// the driver's idleness to the OS: the driver parks in `suspend_until`
/// when it has nothing to run, and anything that hands the scheduler new
/// work sets the [wake event](Self::wake_event), which `notify` is a
/// shorthand for. A wake event set between the driver's emptiness check and
/// its sleep makes the sleep return immediately, so the hand-off can't be
/// lost.
pub trait Algorithm: Send + 'static {
    /// The event `suspend_until` sleeps on and `notify` sets.
    fn wake_event(&self) -> &Arc<AutoResetEvent>;

    /// A context became ready: put it into the ready queue.
    ///
    /// The runtime guarantees a context is reported at most once per
    /// suspension, so implementations never see double links.
    fn awakened(&mut self, ctx: ReadyContext);

    /// Removes and returns the context to run next, if any.
    fn pick_next(&mut self) -> Option<ReadyContext>;

    /// Whether the ready queue is non-empty.
    fn has_ready(&self) -> bool;

    /// Blocks the calling (driver) thread until `deadline` or until the
    /// wake event is set, whichever comes first. `None` means no deadline.
    fn suspend_until(&self, deadline: Option<Instant>) {
        self.wake_event().wait_deadline_opt(deadline);
    }

    /// Interrupts a concurrent or future `suspend_until`. Idempotent.
    fn notify(&self) {
        self.wake_event().set();
    }

    /// Detaches one unpinned ready context so another scheduler may attach
    /// it. Algorithms that don't participate in work distribution keep the
    /// default.
    fn steal(&mut self) -> Option<ReadyContext> {
        None
    }
}
