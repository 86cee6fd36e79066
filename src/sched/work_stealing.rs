//! Work stealing: one deque per scheduler, idle schedulers raid a random
//! peer.
//!
//! The owner treats its deque as a stack (newest ready fiber runs first);
//! thieves take from the opposite end, so they grab the oldest work, which
//! tends to be the largest remaining piece. Pinned contexts live in a
//! separate local list and are never offered to thieves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rand::Rng;

use super::algorithm::{Algorithm, ReadyContext};
use crate::sys::event::AutoResetEvent;

struct WsQueue {
    deque: Mutex<VecDeque<ReadyContext>>,
    wake: Arc<AutoResetEvent>,
}

impl WsQueue {
    /// Thief end.
    fn steal(&self) -> Option<ReadyContext> {
        self.deque.lock().expect("steal deque poisoned").pop_front()
    }
}

/// The set of schedulers stealing from each other.
///
/// Clone it into every participating thread and build that thread's
/// [`WorkStealing`] from it before any fiber operation.
#[derive(Clone, Default)]
pub struct StealGroup {
    members: Arc<Mutex<Vec<Arc<WsQueue>>>>,
}

impl StealGroup {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Work-stealing scheduling algorithm over a [`StealGroup`].
pub struct WorkStealing {
    queue: Arc<WsQueue>,
    /// Pinned contexts; never visible to peers.
    local: VecDeque<ReadyContext>,
    group: StealGroup,
}

impl WorkStealing {
    pub fn new(group: &StealGroup) -> Self {
        let queue = Arc::new(WsQueue {
            deque: Mutex::new(VecDeque::new()),
            wake: Arc::new(AutoResetEvent::new()),
        });
        group
            .members
            .lock()
            .expect("steal group poisoned")
            .push(queue.clone());
        Self {
            queue,
            local: VecDeque::new(),
            group: group.clone(),
        }
    }

    /// One steal attempt from one uniformly chosen peer.
    fn try_steal(&self) -> Option<ReadyContext> {
        let members = self.group.members.lock().expect("steal group poisoned");
        let victims: Vec<&Arc<WsQueue>> = members
            .iter()
            .filter(|m| !Arc::ptr_eq(m, &self.queue))
            .collect();
        if victims.is_empty() {
            return None;
        }
        let victim = victims[rand::thread_rng().gen_range(0..victims.len())];
        victim.steal()
    }

    /// Lets sleeping peers know there is work to take.
    fn notify_peers(&self) {
        for member in self.group.members.lock().expect("steal group poisoned").iter() {
            if !Arc::ptr_eq(member, &self.queue) {
                member.wake.set();
            }
        }
    }
}

impl Algorithm for WorkStealing {
    fn wake_event(&self) -> &Arc<AutoResetEvent> {
        &self.queue.wake
    }

    fn awakened(&mut self, ctx: ReadyContext) {
        if ctx.is_pinned() {
            self.local.push_back(ctx);
            return;
        }
        let became_nonempty = {
            let mut deque = self.queue.deque.lock().expect("steal deque poisoned");
            let was_empty = deque.is_empty();
            deque.push_back(ctx);
            was_empty
        };
        if became_nonempty {
            self.notify_peers();
        }
    }

    fn pick_next(&mut self) -> Option<ReadyContext> {
        // owner end
        if let Some(ctx) = self.queue.deque.lock().expect("steal deque poisoned").pop_back() {
            return Some(ctx);
        }
        if let Some(ctx) = self.local.pop_front() {
            return Some(ctx);
        }
        self.try_steal()
    }

    fn has_ready(&self) -> bool {
        !self.local.is_empty()
            || !self.queue.deque.lock().expect("steal deque poisoned").is_empty()
    }

    fn steal(&mut self) -> Option<ReadyContext> {
        self.queue.steal()
    }
}
