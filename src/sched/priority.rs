//! Priority scheduling: higher priority runs first, FIFO within a class.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::algorithm::{Algorithm, ReadyContext};
use crate::sys::event::AutoResetEvent;

struct Entry {
    priority: i32,
    seq: u64,
    ctx: ReadyContext,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: highest priority wins; earlier arrival breaks ties
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

/// Ready queue ordered by the fibers' integer priority (see
/// [`fiber::set_priority`]); equal priorities retain arrival order.
///
/// A fiber's priority is sampled when it enters the ready queue, so a
/// change made while the fiber runs (or waits) takes effect the next time
/// it becomes ready.
///
/// [`fiber::set_priority`]: crate::fiber::set_priority
#[derive(Default)]
pub struct PriorityScheduling {
    rqueue: BinaryHeap<Entry>,
    seq: u64,
    wake: Arc<AutoResetEvent>,
}

impl PriorityScheduling {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Algorithm for PriorityScheduling {
    fn wake_event(&self) -> &Arc<AutoResetEvent> {
        &self.wake
    }

    fn awakened(&mut self, ctx: ReadyContext) {
        self.seq += 1;
        self.rqueue.push(Entry {
            priority: ctx.priority(),
            seq: self.seq,
            ctx,
        });
    }

    fn pick_next(&mut self) -> Option<ReadyContext> {
        self.rqueue.pop().map(|e| e.ctx)
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
    fn higher_priority_first_fifo_within() {
        let mut algo = PriorityScheduling::new();
        let low1 = Context::new_worker("low1".into(), 1, false);
        let low2 = Context::new_worker("low2".into(), 1, false);
        let high = Context::new_worker("high".into(), 5, false);
        let (low1_id, low2_id, high_id) = (low1.id(), low2.id(), high.id());
        algo.awakened(ReadyContext::new(low1));
        algo.awakened(ReadyContext::new(low2));
        algo.awakened(ReadyContext::new(high));
        assert_eq!(algo.pick_next().unwrap().id(), high_id);
        assert_eq!(algo.pick_next().unwrap().id(), low1_id);
        assert_eq!(algo.pick_next().unwrap().id(), low2_id);
        assert!(algo.pick_next().is_none());
    }

    #[test]
    fn priority_is_sampled_at_enqueue() {
        let mut algo = PriorityScheduling::new();
        let a = Context::new_worker("a".into(), 0, false);
        let b = Context::new_worker("b".into(), 0, false);
        let (a_id, b_id) = (a.id(), b.id());
        // raised before entering the queue: effective immediately
        b.set_priority(10);
        algo.awakened(ReadyContext::new(a));
        algo.awakened(ReadyContext::new(b));
        assert_eq!(algo.pick_next().unwrap().id(), b_id);
        assert_eq!(algo.pick_next().unwrap().id(), a_id);
    }
}
