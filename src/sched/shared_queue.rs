//! Work sharing: several schedulers feed from one shared ready queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::algorithm::{Algorithm, ReadyContext};
use crate::sys::event::AutoResetEvent;

/// The queue shared by a set of [`SharedQueue`] schedulers.
///
/// Create one, clone it into every participating thread, and construct
/// that thread's algorithm from it before any fiber operation:
///
/// ```no_run
/// use strand::sched::{self, SharedGroup, SharedQueue};
///
/// let group = SharedGroup::new();
/// let group2 = group.clone();
/// std::thread::spawn(move || {
///     sched::set_scheduling_algorithm(SharedQueue::new(&group2)).unwrap();
///     // fibers spawned here may be run by any thread of the group
/// });
/// sched::set_scheduling_algorithm(SharedQueue::new(&group)).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct SharedGroup {
    inner: Arc<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    queue: Mutex<VecDeque<ReadyContext>>,
    /// Wake events of all member schedulers; set whenever work is added so
    /// idle members come and get it.
    wakes: Mutex<Vec<Arc<AutoResetEvent>>>,
}

impl SharedGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_members(&self) {
        for wake in self.inner.wakes.lock().expect("shared group poisoned").iter() {
            wake.set();
        }
    }
}

/// Scheduling algorithm drawing unpinned fibers from a [`SharedGroup`]'s
/// global FIFO; pinned contexts (each thread's main context) stay in a
/// thread-local slot and never migrate.
pub struct SharedQueue {
    group: SharedGroup,
    local: VecDeque<ReadyContext>,
    wake: Arc<AutoResetEvent>,
}

impl SharedQueue {
    pub fn new(group: &SharedGroup) -> Self {
        let wake = Arc::new(AutoResetEvent::new());
        group
            .inner
            .wakes
            .lock()
            .expect("shared group poisoned")
            .push(wake.clone());
        Self {
            group: group.clone(),
            local: VecDeque::new(),
            wake,
        }
    }
}

impl Algorithm for SharedQueue {
    fn wake_event(&self) -> &Arc<AutoResetEvent> {
        &self.wake
    }

    fn awakened(&mut self, ctx: ReadyContext) {
        if ctx.is_pinned() {
            self.local.push_back(ctx);
        } else {
            self.group
                .inner
                .queue
                .lock()
                .expect("shared group poisoned")
                .push_back(ctx);
            self.group.notify_members();
        }
    }

    fn pick_next(&mut self) -> Option<ReadyContext> {
        let shared = self
            .group
            .inner
            .queue
            .lock()
            .expect("shared group poisoned")
            .pop_front();
        shared.or_else(|| self.local.pop_front())
    }

    fn has_ready(&self) -> bool {
        !self.local.is_empty()
            || !self
                .group
                .inner
                .queue
                .lock()
                .expect("shared group poisoned")
                .is_empty()
    }
}
