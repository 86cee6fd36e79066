//! Mutual exclusion for fibers: plain, timed and reentrant flavors.
//!
//! All flavors share the same core: a FIFO waiter list and direct
//! hand-off. When an owner unlocks a contended mutex, ownership is
//! transferred to the waiter at the head of the list before that waiter
//! even runs again, so no other fiber can barge in between the unlock and
//! the wake-up. Fairness is strict arrival order.
//!
//! Unlike their `std::sync` counterparts these suspend the calling
//! *fiber*, letting the OS thread run other fibers meanwhile.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, Result};
use crate::fiber::FiberId;
use crate::sched;
use crate::sched::wait_list::WaitList;

////////////////////////////////////////////////////////////////////////////////
// RawMutex
////////////////////////////////////////////////////////////////////////////////

struct RawState {
    owner: Option<FiberId>,
    /// Recursion depth; always 1 for the non-reentrant flavors.
    depth: u32,
    waiters: WaitList,
}

/// Ownership tracking and waiter parking shared by every mutex flavor.
/// The inner lock is held only for queue manipulation, never across a
/// suspension.
pub(crate) struct RawMutex {
    state: StdMutex<RawState>,
}

impl RawMutex {
    fn new() -> Self {
        Self {
            state: StdMutex::new(RawState {
                owner: None,
                depth: 1,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Acquires the lock, suspending the calling fiber while it is
    /// contended.
    ///
    /// Returns `Ok(true)` on acquisition, `Ok(false)` on `deadline`
    /// expiry. With `reentrant` a repeated acquisition by the owner bumps
    /// the depth; without it that's a usage error. Interruptions are
    /// consumed and surfaced only when `interruptible` (the relock inside
    /// a condition-variable wait must not fail).
    fn acquire(
        &self,
        reentrant: bool,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> Result<bool> {
        let me = sched::active();
        let my_id = me.id();
        let mut state = self.state.lock().expect("mutex state poisoned");
        if state.owner.is_none() {
            state.owner = Some(my_id);
            state.depth = 1;
            return Ok(true);
        }
        if state.owner == Some(my_id) {
            if reentrant {
                state.depth += 1;
                return Ok(true);
            }
            return Err(Error::Lock("mutex relocked by the owning fiber"));
        }
        loop {
            state.waiters.push(me.clone());
            me.set_waiting();
            drop(state);
            sched::suspend(&me, deadline);
            state = self.state.lock().expect("mutex state poisoned");
            if state.owner == Some(my_id) {
                // hand-off won the race against whatever woke us
                return Ok(true);
            }
            state.waiters.remove(my_id);
            if interruptible && me.take_interruption() {
                return Err(Error::Interrupted);
            }
            if let Some(deadline) = deadline {
                if clock::now() >= deadline {
                    return Ok(false);
                }
            }
            // spurious wake-up: queue up again
        }
    }

    fn try_acquire(&self, reentrant: bool) -> bool {
        let my_id = sched::active().id();
        let mut state = self.state.lock().expect("mutex state poisoned");
        if state.owner.is_none() {
            state.owner = Some(my_id);
            state.depth = 1;
            return true;
        }
        if reentrant && state.owner == Some(my_id) {
            state.depth += 1;
            return true;
        }
        false
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("mutex state poisoned");
        debug_assert_eq!(
            state.owner,
            Some(sched::active().id()),
            "mutex released by a fiber that doesn't own it"
        );
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        match state.waiters.pop_front() {
            Some(next) => {
                // hand-off: the head waiter owns the mutex from this point
                state.owner = Some(next.id());
                state.depth = 1;
                drop(state);
                sched::make_ready(&next);
            }
            None => {
                state.owner = None;
            }
        }
    }

    fn is_locked(&self) -> bool {
        self.state
            .lock()
            .expect("mutex state poisoned")
            .owner
            .is_some()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Mutex
////////////////////////////////////////////////////////////////////////////////

/// A mutual exclusion primitive protecting its data, for fibers.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use strand::fiber::{self, Mutex};
///
/// let shared = Arc::new(Mutex::new(0));
/// let inner = shared.clone();
/// fiber::spawn_proc(move || {
///     *inner.lock().unwrap() += 1;
/// })
/// .join()
/// .unwrap();
/// assert_eq!(*shared.lock().unwrap(), 1);
/// ```
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, suspending the current fiber until it is able
    /// to do so.
    ///
    /// Fails with [`Error::Lock`] if the calling fiber already holds the
    /// mutex, or with [`Error::Interrupted`] if the fiber is interrupted
    /// while waiting (the mutex is *not* acquired in that case).
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.raw.acquire(false, None, true)?;
        Ok(MutexGuard::new(self))
    }

    /// Attempts to acquire this lock without suspending.
    ///
    /// Returns `None` if the mutex is held (by anyone, including the
    /// calling fiber).
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_acquire(false) {
            Some(MutexGuard::new(self))
        } else {
            None
        }
    }

    /// Immediately drops the guard, and consequently unlocks the mutex.
    ///
    /// This function is equivalent to calling [`drop`] on the guard but is
    /// more self-documenting.
    pub fn unlock(guard: MutexGuard<'_, T>) {
        drop(guard);
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking
    /// needs to take place.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Relock after a condition-variable wait: never fails, leaves any
    /// pending interruption for the caller to surface.
    pub(crate) fn lock_noint(&self) -> MutexGuard<'_, T> {
        let acquired = self
            .raw
            .acquire(false, None, false)
            .expect("uninterruptible relock cannot fail");
        debug_assert!(acquired, "untimed relock cannot time out");
        MutexGuard::new(self)
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(t: T) -> Self {
        Mutex::new(t)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => {
                d.field("data", &&*guard);
            }
            None => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this
/// structure is dropped (falls out of scope), the lock will be unlocked.
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
    // a guard stays on the fiber that acquired it
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<'a, T: ?Sized + Sync> Sync for MutexGuard<'a, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(lock: &'a Mutex<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<'a, T: ?Sized> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

////////////////////////////////////////////////////////////////////////////////
// TimedMutex
////////////////////////////////////////////////////////////////////////////////

/// A [`Mutex`] that can additionally be acquired with a deadline.
pub struct TimedMutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for TimedMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for TimedMutex<T> {}

impl<T> TimedMutex<T> {
    pub fn new(t: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(t),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TimedMutex<T> {
    /// See [`Mutex::lock`].
    pub fn lock(&self) -> Result<TimedMutexGuard<'_, T>> {
        self.raw.acquire(false, None, true)?;
        Ok(TimedMutexGuard::new(self))
    }

    /// See [`Mutex::try_lock`].
    pub fn try_lock(&self) -> Option<TimedMutexGuard<'_, T>> {
        if self.raw.try_acquire(false) {
            Some(TimedMutexGuard::new(self))
        } else {
            None
        }
    }

    /// Attempts to acquire the mutex, giving up at `deadline`.
    ///
    /// Returns `Ok(None)` on timeout. If a concurrent hand-off makes the
    /// calling fiber the owner right as the deadline expires, the hand-off
    /// wins and the guard is returned.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<Option<TimedMutexGuard<'_, T>>> {
        if self.raw.acquire(false, Some(deadline), true)? {
            Ok(Some(TimedMutexGuard::new(self)))
        } else {
            Ok(None)
        }
    }

    /// [`try_lock_until`](Self::try_lock_until) with a relative timeout.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<Option<TimedMutexGuard<'_, T>>> {
        self.try_lock_until(clock::deadline(timeout))
    }

    pub fn unlock(guard: TimedMutexGuard<'_, T>) {
        drop(guard);
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for TimedMutex<T> {
    fn default() -> Self {
        TimedMutex::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for TimedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TimedMutex");
        match self.try_lock() {
            Some(guard) => {
                d.field("data", &&*guard);
            }
            None => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

/// RAII guard of a [`TimedMutex`].
pub struct TimedMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a TimedMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<'a, T: ?Sized + Sync> Sync for TimedMutexGuard<'a, T> {}

impl<'a, T: ?Sized> TimedMutexGuard<'a, T> {
    fn new(lock: &'a TimedMutex<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<'a, T: ?Sized> Drop for TimedMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<T: ?Sized> Deref for TimedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TimedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for TimedMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

////////////////////////////////////////////////////////////////////////////////
// ReentrantMutex
////////////////////////////////////////////////////////////////////////////////

/// A mutex the owning fiber may lock again without deadlocking.
///
/// Each `lock` must be matched by dropping its guard; the mutex is
/// released (and handed off) when the depth reaches zero. Guards grant
/// shared access only, since several guards may be alive in one fiber at
/// once.
pub struct ReentrantMutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for ReentrantMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub fn new(t: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(t),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> ReentrantMutex<T> {
    /// Acquires the mutex, suspending if another fiber owns it; relocking
    /// by the owner succeeds immediately.
    ///
    /// An interruption delivered while waiting leaves the recursion depth
    /// exactly as it was before the call.
    pub fn lock(&self) -> Result<ReentrantMutexGuard<'_, T>> {
        self.raw.acquire(true, None, true)?;
        Ok(ReentrantMutexGuard::new(self))
    }

    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, T>> {
        if self.raw.try_acquire(true) {
            Some(ReentrantMutexGuard::new(self))
        } else {
            None
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for ReentrantMutex<T> {
    fn default() -> Self {
        ReentrantMutex::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReentrantMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantMutex")
            .field("locked", &self.raw.is_locked())
            .finish_non_exhaustive()
    }
}

/// Shared-access RAII guard of a [`ReentrantMutex`].
pub struct ReentrantMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a ReentrantMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<'a, T: ?Sized + Sync> Sync for ReentrantMutexGuard<'a, T> {}

impl<'a, T: ?Sized> ReentrantMutexGuard<'a, T> {
    fn new(lock: &'a ReentrantMutex<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<'a, T: ?Sized> Drop for ReentrantMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<T: ?Sized> Deref for ReentrantMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReentrantMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

////////////////////////////////////////////////////////////////////////////////
// ReentrantTimedMutex
////////////////////////////////////////////////////////////////////////////////

/// A [`ReentrantMutex`] that can additionally be acquired with a deadline.
pub struct ReentrantTimedMutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for ReentrantTimedMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for ReentrantTimedMutex<T> {}

impl<T> ReentrantTimedMutex<T> {
    pub fn new(t: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> ReentrantTimedMutex<T> {
    pub fn lock(&self) -> Result<ReentrantTimedMutexGuard<'_, T>> {
        self.raw.acquire(true, None, true)?;
        Ok(ReentrantTimedMutexGuard::new(self))
    }

    pub fn try_lock(&self) -> Option<ReentrantTimedMutexGuard<'_, T>> {
        if self.raw.try_acquire(true) {
            Some(ReentrantTimedMutexGuard::new(self))
        } else {
            None
        }
    }

    /// See [`TimedMutex::try_lock_until`]; relocking by the owner never
    /// waits, so it cannot time out.
    pub fn try_lock_until(
        &self,
        deadline: Instant,
    ) -> Result<Option<ReentrantTimedMutexGuard<'_, T>>> {
        if self.raw.acquire(true, Some(deadline), true)? {
            Ok(Some(ReentrantTimedMutexGuard::new(self)))
        } else {
            Ok(None)
        }
    }

    pub fn try_lock_for(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReentrantTimedMutexGuard<'_, T>>> {
        self.try_lock_until(clock::deadline(timeout))
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReentrantTimedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantTimedMutex")
            .field("locked", &self.raw.is_locked())
            .finish_non_exhaustive()
    }
}

/// Shared-access RAII guard of a [`ReentrantTimedMutex`].
pub struct ReentrantTimedMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a ReentrantTimedMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<'a, T: ?Sized + Sync> Sync for ReentrantTimedMutexGuard<'a, T> {}

impl<'a, T: ?Sized> ReentrantTimedMutexGuard<'a, T> {
    fn new(lock: &'a ReentrantTimedMutex<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<'a, T: ?Sized> Drop for ReentrantTimedMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<T: ?Sized> Deref for ReentrantTimedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}
