//! FIFO list of fibers blocked on one synchronization primitive.

use std::collections::VecDeque;

use crate::fiber::context::FiberRef;
use crate::fiber::FiberId;

/// The waiter list every synchronization primitive embeds, protected by
/// the primitive's own short lock. Wake-up order is arrival order.
#[derive(Default)]
pub(crate) struct WaitList {
    queue: VecDeque<FiberRef>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ctx: FiberRef) {
        self.queue.push_back(ctx);
    }

    pub fn pop_front(&mut self) -> Option<FiberRef> {
        self.queue.pop_front()
    }

    /// Unlinks `id` if still present. Timed-out and interrupted waiters
    /// remove themselves through this; losing the race to a concurrent
    /// notification is fine, the caller observes that through the
    /// primitive's own state.
    pub fn remove(&mut self, id: FiberId) -> bool {
        match self.queue.iter().position(|c| c.id() == id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn take_all(&mut self) -> VecDeque<FiberRef> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::context::Context;

    #[test]
    fn fifo_and_removal() {
        let mut list = WaitList::new();
        let a = Context::new_worker("a".into(), 0, false);
        let b = Context::new_worker("b".into(), 0, false);
        let c = Context::new_worker("c".into(), 0, false);
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
        list.push(a);
        list.push(b);
        list.push(c);
        assert_eq!(list.len(), 3);
        assert!(list.remove(b_id));
        assert!(!list.remove(b_id));
        assert_eq!(list.pop_front().unwrap().id(), a_id);
        assert_eq!(list.pop_front().unwrap().id(), c_id);
        assert!(list.is_empty());
    }
}
