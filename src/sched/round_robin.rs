//! First-in-first-out scheduling, the default policy.

use std::collections::VecDeque;
use std::sync::Arc;

use super::algorithm::{Algorithm, ReadyContext};
use crate::sys::event::AutoResetEvent;

/// FIFO ready queue: fibers run in the order they became ready.
#[derive(Default)]
pub struct RoundRobin {
    rqueue: VecDeque<ReadyContext>,
    wake: Arc<AutoResetEvent>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Algorithm for RoundRobin {
    fn wake_event(&self) -> &Arc<AutoResetEvent> {
        &self.wake
    }

    fn awakened(&mut self, ctx: ReadyContext) {
        self.rqueue.push_back(ctx);
    }

    fn pick_next(&mut self) -> Option<ReadyContext> {
        self.rqueue.pop_front()
    }

    fn has_ready(&self) -> bool {
        !self.rqueue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::context::Context;

    #[test]
    fn fifo_order() {
        let mut algo = RoundRobin::new();
        assert!(!algo.has_ready());
        let a = Context::new_worker("a".into(), 0, false);
        let b = Context::new_worker("b".into(), 0, false);
        let a_id = a.id();
        let b_id = b.id();
        algo.awakened(ReadyContext::new(a));
        algo.awakened(ReadyContext::new(b));
        assert!(algo.has_ready());
        assert_eq!(algo.pick_next().unwrap().id(), a_id);
        assert_eq!(algo.pick_next().unwrap().id(), b_id);
        assert!(algo.pick_next().is_none());
    }
}
