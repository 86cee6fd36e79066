//! One-shot event: a latch fibers can wait on.

use std::fmt;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, Result};
use crate::fiber::cond::WaitStatus;
use crate::sched;
use crate::sched::wait_list::WaitList;

struct EventState {
    set: bool,
    waiters: WaitList,
}

/// A one-shot event.
///
/// Starts unset; [`set`](Self::set) flips it exactly once and wakes every
/// waiter, current and future (a wait on a set event returns
/// immediately). The set happens-before every return from a wait.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use strand::fiber::{self, OneShotEvent};
///
/// let started = Arc::new(OneShotEvent::new());
/// let started2 = started.clone();
/// let worker = fiber::spawn_proc(move || {
///     started2.wait().unwrap();
///     // the service is up at this point
/// });
/// started.set();
/// worker.join().unwrap();
/// ```
#[derive(Default)]
pub struct OneShotEvent {
    state: StdMutex<EventState>,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            set: false,
            waiters: WaitList::new(),
        }
    }
}

impl OneShotEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event, waking all waiters. Idempotent.
    pub fn set(&self) {
        let waiters = {
            let mut state = self.state.lock().expect("event state poisoned");
            if state.set {
                return;
            }
            state.set = true;
            state.waiters.take_all()
        };
        for ctx in waiters {
            sched::make_ready(&ctx);
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().expect("event state poisoned").set
    }

    /// Non-suspending check, for symmetry with the timed waits.
    pub fn try_wait(&self) -> bool {
        self.is_set()
    }

    /// Suspends the current fiber until the event is set.
    ///
    /// This is an interruption point.
    pub fn wait(&self) -> Result<()> {
        self.wait_impl(None).map(|_| ())
    }

    /// As [`wait`](Self::wait), giving up at `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> Result<WaitStatus> {
        self.wait_impl(Some(deadline))
    }

    /// As [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> Result<WaitStatus> {
        self.wait_until(clock::deadline(timeout))
    }

    fn wait_impl(&self, deadline: Option<Instant>) -> Result<WaitStatus> {
        let me = sched::active();
        loop {
            {
                let mut state = self.state.lock().expect("event state poisoned");
                if state.set {
                    return Ok(WaitStatus::Notified);
                }
                state.waiters.push(me.clone());
                me.set_waiting();
            }
            sched::suspend(&me, deadline);
            self.state
                .lock()
                .expect("event state poisoned")
                .waiters
                .remove(me.id());
            if me.take_interruption() {
                return Err(Error::Interrupted);
            }
            if let Some(deadline) = deadline {
                if clock::now() >= deadline {
                    let set = self.is_set();
                    return Ok(if set {
                        WaitStatus::Notified
                    } else {
                        WaitStatus::TimedOut
                    });
                }
            }
            // spurious wake-up: re-check and re-enqueue
        }
    }
}

impl fmt::Debug for OneShotEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OneShotEvent")
            .field("set", &self.is_set())
            .finish()
    }
}
