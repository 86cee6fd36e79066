//! One-shot value passing between fibers: promises, futures and packaged
//! tasks.
//!
//! A [`Promise`] and its [`Future`] share a reference-counted state with a
//! single value slot. The producing side stores a value or an error
//! exactly once; the consuming side blocks until that happens. Dropping an
//! unsatisfied promise stores [`FutureError::BrokenPromise`] so the future
//! never hangs forever.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, FutureError, Result};
use crate::fiber::cond::WaitStatus;
use crate::sched;
use crate::sched::wait_list::WaitList;

enum Slot<T> {
    Empty,
    Value(T),
    Failed(Error),
    Taken,
}

impl<T> Slot<T> {
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

struct StateInner<T> {
    slot: Slot<T>,
    waiters: WaitList,
}

/// The shared state backing one promise/future pair.
struct SharedState<T> {
    inner: StdMutex<StateInner<T>>,
}

impl<T> SharedState<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(StateInner {
                slot: Slot::Empty,
                waiters: WaitList::new(),
            }),
        })
    }

    /// Stores the outcome if the slot is still empty and wakes all
    /// waiters. The store happens-before any waiter observing readiness.
    fn satisfy(&self, outcome: Slot<T>) -> Result<()> {
        let waiters = {
            let mut inner = self.inner.lock().expect("shared state poisoned");
            if !inner.slot.is_empty() {
                return Err(FutureError::PromiseAlreadySatisfied.into());
            }
            inner.slot = outcome;
            inner.waiters.take_all()
        };
        for ctx in waiters {
            sched::make_ready(&ctx);
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Promise
////////////////////////////////////////////////////////////////////////////////

/// The producing half of a one-shot value slot.
pub struct Promise<T> {
    state: Option<Arc<SharedState<T>>>,
    future_retrieved: bool,
}

impl<T: Send> Promise<T> {
    /// Creates a promise with a fresh shared state.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: Some(SharedState::new()),
            future_retrieved: false,
        }
    }

    /// The consuming half. Succeeds at most once per promise.
    pub fn future(&mut self) -> Result<Future<T>> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        if self.future_retrieved {
            return Err(FutureError::FutureAlreadyRetrieved.into());
        }
        self.future_retrieved = true;
        Ok(Future {
            state: Some(state.clone()),
        })
    }

    /// Stores `value` and makes the future ready, waking its waiters.
    ///
    /// Fails with [`FutureError::PromiseAlreadySatisfied`] if an outcome
    /// was already stored.
    pub fn set_value(&mut self, value: T) -> Result<()> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        state.satisfy(Slot::Value(value))
    }

    /// Stores `error` as the outcome; the future's `get` will return it.
    pub fn set_error(&mut self, error: Error) -> Result<()> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        state.satisfy(Slot::Failed(error))
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            // an unsatisfied promise going away must not leave the future
            // hanging
            let _ = state.satisfy(Slot::Failed(FutureError::BrokenPromise.into()));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Promise")
            .field("future_retrieved", &self.future_retrieved)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Future
////////////////////////////////////////////////////////////////////////////////

/// The consuming half of a one-shot value slot.
pub struct Future<T> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T: Send> Future<T> {
    /// `true` while the future still references a shared state, i.e.
    /// [`get`](Self::get) can be called.
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Blocks the current fiber until the promise side stores an outcome.
    ///
    /// This is an interruption point.
    pub fn wait(&self) -> Result<()> {
        self.wait_ready(None).map(|_| ())
    }

    /// As [`wait`](Self::wait), giving up at `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> Result<WaitStatus> {
        self.wait_ready(Some(deadline))
    }

    /// As [`wait`](Self::wait) with a relative timeout.
    pub fn wait_for(&self, timeout: Duration) -> Result<WaitStatus> {
        self.wait_until(clock::deadline(timeout))
    }

    /// Waits for the outcome and returns it, consuming the future.
    ///
    /// Returns the stored value, or the stored error (for a dropped
    /// promise that's [`FutureError::BrokenPromise`]). Fails with
    /// [`FutureError::NoState`] on a future that was already consumed.
    pub fn get(mut self) -> Result<T> {
        self.wait()?;
        let state = self.state.take().ok_or(FutureError::NoState)?;
        let mut inner = state.inner.lock().expect("shared state poisoned");
        match std::mem::replace(&mut inner.slot, Slot::Taken) {
            Slot::Value(value) => Ok(value),
            Slot::Failed(error) => Err(error),
            Slot::Empty | Slot::Taken => {
                unreachable!("future became ready with nothing in the slot")
            }
        }
    }

    fn wait_ready(&self, deadline: Option<Instant>) -> Result<WaitStatus> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        let me = sched::active();
        loop {
            {
                let mut inner = state.inner.lock().expect("shared state poisoned");
                if !inner.slot.is_empty() {
                    return Ok(WaitStatus::Notified);
                }
                inner.waiters.push(me.clone());
                me.set_waiting();
            }
            sched::suspend(&me, deadline);
            state
                .inner
                .lock()
                .expect("shared state poisoned")
                .waiters
                .remove(me.id());
            if me.take_interruption() {
                return Err(Error::Interrupted);
            }
            if let Some(deadline) = deadline {
                if clock::now() >= deadline {
                    let ready = !state
                        .inner
                        .lock()
                        .expect("shared state poisoned")
                        .slot
                        .is_empty();
                    return Ok(if ready {
                        WaitStatus::Notified
                    } else {
                        WaitStatus::TimedOut
                    });
                }
            }
            // spurious wake-up: the loop re-checks readiness
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// PackagedTask
////////////////////////////////////////////////////////////////////////////////

/// A callable bundled with a promise for its result.
///
/// [`run`](Self::run) invokes the callable once and fulfills the promise
/// with its return value; running it again fails with
/// [`FutureError::TaskAlreadyExecuted`]. Dropping a task that never ran
/// breaks its promise.
///
/// # Examples
/// ```no_run
/// use strand::fiber::{self, PackagedTask};
///
/// let mut task = PackagedTask::new(|| 6 * 7);
/// let future = task.future().unwrap();
/// fiber::spawn_proc(move || {
///     task.run().unwrap();
/// });
/// assert_eq!(future.get().unwrap(), 42);
/// ```
pub struct PackagedTask<T> {
    f: Option<Box<dyn FnOnce() -> T + Send>>,
    promise: Promise<T>,
}

impl<T: Send> PackagedTask<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            f: Some(Box::new(f)),
            promise: Promise::new(),
        }
    }

    /// The future for the task's result. Succeeds at most once.
    pub fn future(&mut self) -> Result<Future<T>> {
        self.promise.future()
    }

    /// Invokes the callable and fulfills the promise with its result.
    pub fn run(&mut self) -> Result<()> {
        let f = self.f.take().ok_or(FutureError::TaskAlreadyExecuted)?;
        self.promise.set_value(f())
    }

    /// Whether the task has already been executed.
    pub fn executed(&self) -> bool {
        self.f.is_none()
    }
}

impl<T> fmt::Debug for PackagedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PackagedTask")
            .field("executed", &self.f.is_none())
            .finish_non_exhaustive()
    }
}
