//! Autoreset wake event.
//!
//! One event per scheduler driver. The driver sleeps on it when there is
//! nothing ready; any thread that hands the scheduler new work sets it.
//! The event is level-triggered: a `set` that lands between the driver's
//! emptiness check and its sleep simply makes the sleep return immediately,
//! so the handoff can never deadlock.

use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// An autoreset event: `set` makes exactly one subsequent (or pending)
/// `wait` return.
///
/// Setting an already-set event is a no-op, and setting with no waiter is
/// cheap (one uncontended mutex acquisition).
#[derive(Default)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the event, waking one waiter if any.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock().expect("wake event poisoned");
        if !*signaled {
            *signaled = true;
            self.cond.notify_one();
        }
    }

    /// Blocks the calling thread until the event is set, then resets it.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().expect("wake event poisoned");
        while !*signaled {
            signaled = self.cond.wait(signaled).expect("wake event poisoned");
        }
        *signaled = false;
    }

    /// Blocks the calling thread until the event is set or `deadline`
    /// passes. Returns `true` if the event was set (and has been reset).
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut signaled = self.signaled.lock().expect("wake event poisoned");
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .cond
                .wait_timeout(signaled, deadline - now)
                .expect("wake event poisoned");
            signaled = guard;
        }
        *signaled = false;
        true
    }

    /// [`wait`](Self::wait) with an optional deadline.
    pub fn wait_deadline_opt(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.wait_deadline(deadline),
            None => {
                self.wait();
                true
            }
        }
    }
}

impl std::fmt::Debug for AutoResetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AutoResetEvent").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn set_before_wait() {
        let ev = AutoResetEvent::new();
        ev.set();
        ev.set(); // idempotent
        ev.wait(); // must not block
        assert!(!ev.wait_deadline(Instant::now() + Duration::from_millis(10)));
    }

    #[test]
    fn set_from_other_thread() {
        let ev = Arc::new(AutoResetEvent::new());
        let ev2 = ev.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            ev2.set();
        });
        assert!(ev.wait_deadline(Instant::now() + Duration::from_secs(5)));
        t.join().unwrap();
    }

    #[test]
    fn timeout_elapses() {
        let ev = AutoResetEvent::new();
        let started = Instant::now();
        assert!(!ev.wait_deadline(started + Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
