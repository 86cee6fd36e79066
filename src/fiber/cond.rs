//! Condition variable for fibers.
//!
//! Pairs with [`Mutex`]: a waiter atomically enqueues itself, releases the
//! mutex and suspends; on wake-up the mutex is re-acquired before control
//! returns to the caller, including when the wait ends with an
//! interruption (the error is surfaced only after re-acquisition, so the
//! waiter list and the mutex are always left consistent).
//!
//! As with any condition variable, wake-ups may be spurious; wrap waits in
//! a predicate loop or use [`Cond::wait_while`].

use std::fmt;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::Result;
use crate::fiber::mutex::{Mutex, MutexGuard};
use crate::sched;
use crate::sched::wait_list::WaitList;

/// Whether a timed wait was cut short by a notification or by its
/// deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Notified,
    TimedOut,
}

impl WaitStatus {
    #[inline(always)]
    pub fn timed_out(self) -> bool {
        self == Self::TimedOut
    }
}

/// Condition variable with FIFO wake-up order.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use strand::fiber::{self, Cond, Mutex};
///
/// let pair = Arc::new((Mutex::new(false), Cond::new()));
/// let pair2 = pair.clone();
/// let worker = fiber::spawn_proc(move || {
///     let (ready, cond) = &*pair2;
///     *ready.lock().unwrap() = true;
///     cond.notify_one();
/// });
/// let (ready, cond) = &*pair;
/// let guard = ready.lock().unwrap();
/// let _guard = cond.wait_while(guard, |ready| !*ready).unwrap();
/// worker.join().unwrap();
/// ```
#[derive(Default)]
pub struct Cond {
    waiters: StdMutex<WaitList>,
}

impl Cond {
    /// Instantiate a new fiber cond object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes up the longest-waiting fiber, if any. Does not suspend, and
    /// may be called with or without the associated mutex held.
    pub fn notify_one(&self) {
        let next = self
            .waiters
            .lock()
            .expect("cond waiter list poisoned")
            .pop_front();
        if let Some(ctx) = next {
            sched::make_ready(&ctx);
        }
    }

    /// Wakes up every fiber currently waiting. Does not suspend.
    pub fn notify_all(&self) {
        let all = self
            .waiters
            .lock()
            .expect("cond waiter list poisoned")
            .take_all();
        for ctx in all {
            sched::make_ready(&ctx);
        }
    }

    /// Releases `guard`'s mutex and suspends the current fiber until
    /// notified, then re-acquires the mutex and returns its guard.
    ///
    /// This is an interruption point; on `Err(`[`Interrupted`]`)` the
    /// mutex has been re-acquired and released again, so the caller no
    /// longer holds it.
    ///
    /// [`Interrupted`]: crate::error::Error::Interrupted
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        self.wait_impl(guard, None, true).map(|(guard, _)| guard)
    }

    /// As [`wait`](Self::wait), giving up at `deadline`.
    ///
    /// A lost race between a timeout and a concurrent notification may
    /// report either outcome; re-check the predicate (or use
    /// [`wait_until_while`](Self::wait_until_while)).
    pub fn wait_until<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Instant,
    ) -> Result<(MutexGuard<'a, T>, WaitStatus)> {
        self.wait_impl(guard, Some(deadline), true)
    }

    /// As [`wait_until`](Self::wait_until) with a relative timeout.
    pub fn wait_for<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> Result<(MutexGuard<'a, T>, WaitStatus)> {
        self.wait_until(guard, clock::deadline(timeout))
    }

    /// Waits while `condition` holds, re-checking it after every wake-up.
    pub fn wait_while<'a, T: ?Sized, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
    ) -> Result<MutexGuard<'a, T>>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    /// Waits while `condition` holds, giving up at `deadline`.
    ///
    /// On [`WaitStatus::TimedOut`] the condition was still true at the
    /// deadline (it is re-checked one final time after the wait ends).
    pub fn wait_until_while<'a, T: ?Sized, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Instant,
        mut condition: F,
    ) -> Result<(MutexGuard<'a, T>, WaitStatus)>
    where
        F: FnMut(&mut T) -> bool,
    {
        loop {
            if !condition(&mut *guard) {
                return Ok((guard, WaitStatus::Notified));
            }
            let (reacquired, status) = self.wait_until(guard, deadline)?;
            guard = reacquired;
            if status.timed_out() {
                let status = if condition(&mut *guard) {
                    WaitStatus::TimedOut
                } else {
                    WaitStatus::Notified
                };
                return Ok((guard, status));
            }
        }
    }

    /// Wait without being an interruption point: used by primitives that
    /// must keep their bookkeeping consistent (e.g. barriers). A pending
    /// interruption stays pending.
    pub(crate) fn wait_noint<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.wait_impl(guard, None, false)
            .map(|(guard, _)| guard)
            .expect("uninterruptible wait cannot fail")
    }

    fn wait_impl<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> Result<(MutexGuard<'a, T>, WaitStatus)> {
        let me = sched::active();
        let mutex: &'a Mutex<T> = guard.mutex();

        // enqueue before releasing the mutex: a notifier that acquires the
        // mutex after us is guaranteed to see us in the list
        {
            let mut waiters = self.waiters.lock().expect("cond waiter list poisoned");
            waiters.push(me.clone());
            me.set_waiting();
        }
        drop(guard);
        sched::suspend(&me, deadline);

        // a notification removes us from the list; if we are still linked
        // the wake-up came from a timer or an interruption
        let was_linked = self
            .waiters
            .lock()
            .expect("cond waiter list poisoned")
            .remove(me.id());

        let guard = mutex.lock_noint();
        if interruptible && me.take_interruption() {
            return Err(crate::error::Error::Interrupted);
        }
        let status = match (was_linked, deadline) {
            (false, _) => WaitStatus::Notified,
            (true, Some(deadline)) if clock::now() >= deadline => WaitStatus::TimedOut,
            // woken without a notification and before the deadline:
            // spurious success, permitted
            (true, _) => WaitStatus::Notified,
        };
        Ok((guard, status))
    }
}

impl fmt::Debug for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cond")
            .field(
                "waiters",
                &self.waiters.lock().expect("cond waiter list poisoned").len(),
            )
            .finish()
    }
}
