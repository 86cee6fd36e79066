//! Portable execution-context primitive.
//!
//! An [`ExecutionContext`] is an opaque resumable continuation. The runtime
//! only ever does three things with one: create it, [`switch`] into it, and
//! [`finish`] into it. This reference implementation backs every context
//! with a parked OS thread and implements `switch` as a mailbox handshake:
//! the caller posts a resume token into the target's mailbox, wakes it, and
//! parks itself until its own token arrives.
//!
//! The scheduler guarantees that at most one resume token is in flight per
//! context (a context is resumed only after it has been popped from exactly
//! one ready queue), so a single boolean token per mailbox is sufficient.
//! Every switch performs an acquire/release handshake through the mailbox
//! mutex, which gives the happens-before edge between the code before a
//! suspension and the code after the matching resumption.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A resumable continuation backed by a parked OS thread.
///
/// Cloning is shallow; all clones designate the same continuation.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    inner: Arc<Mailbox>,
}

struct Mailbox {
    state: Mutex<MailboxState>,
    cond: Condvar,
}

struct MailboxState {
    /// A resume token has been posted and not yet consumed.
    token: bool,
    /// The context that posted the token.
    from: Option<ExecutionContext>,
}

impl ExecutionContext {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mailbox {
                state: Mutex::new(MailboxState {
                    token: false,
                    from: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// The continuation designating the calling thread itself.
    ///
    /// Used for the context that adopts an already-running thread (the main
    /// context of a scheduler).
    pub fn for_current_thread() -> Self {
        Self::new()
    }

    /// Creates a new context executing `entry` once first switched into.
    ///
    /// `entry` receives the context that performed the first switch. When
    /// `entry` returns the context is dead and must not be switched into
    /// again; `entry` is expected to end with a [`finish`] hand-off.
    ///
    /// `stack_size` is a request; the backing implementation may round it.
    pub fn spawn<F>(name: &str, stack_size: usize, entry: F) -> io::Result<Self>
    where
        F: FnOnce(ExecutionContext) + Send + 'static,
    {
        let ctx = Self::new();
        let handle = ctx.clone();
        thread::Builder::new()
            .name(name.into())
            .stack_size(stack_size)
            .spawn(move || {
                let from = handle.park();
                entry(from);
            })?;
        Ok(ctx)
    }

    /// Parks the calling thread until a resume token arrives, consuming it.
    /// Returns the context that posted the token.
    fn park(&self) -> ExecutionContext {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("execution context mailbox poisoned");
        while !state.token {
            state = self
                .inner
                .cond
                .wait(state)
                .expect("execution context mailbox poisoned");
        }
        state.token = false;
        state.from.take().expect("resume token posted without origin")
    }

    /// Posts a resume token on behalf of `from`.
    fn post(&self, from: ExecutionContext) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("execution context mailbox poisoned");
        debug_assert!(!state.token, "second resume posted before the first was consumed");
        state.token = true;
        state.from = Some(from);
        self.inner.cond.notify_one();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ExecutionContext").finish_non_exhaustive()
    }
}

/// Transfers control from `from` to `to`.
///
/// Returns when some context switches back into `from`, yielding the
/// context that performed that switch.
pub(crate) fn switch(from: &ExecutionContext, to: &ExecutionContext) -> ExecutionContext {
    to.post(from.clone());
    from.park()
}

/// Transfers control to `to` without ever resuming the caller.
///
/// Used as the terminal hand-off of a dying context: the caller's backing
/// thread is expected to unwind and exit right after this call.
pub(crate) fn finish(from: &ExecutionContext, to: &ExecutionContext) {
    to.post(from.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_round_trip() {
        let here = ExecutionContext::for_current_thread();
        let main = here.clone();
        let child = ExecutionContext::spawn("child", 64 * 1024, move |from| {
            // resumed by the test thread
            finish(&from, &main);
        })
        .unwrap();
        // switches into the child, which immediately finishes back
        let _resumer = switch(&here, &child);
    }

    #[test]
    fn post_before_park_is_not_lost() {
        let here = ExecutionContext::for_current_thread();
        here.post(here.clone());
        // the token was posted before parking; park must return immediately
        let _ = here.park();
    }
}
