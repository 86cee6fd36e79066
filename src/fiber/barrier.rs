//! A rendezvous point for a fixed party of fibers.

use std::fmt;

use crate::fiber::cond::Cond;
use crate::fiber::mutex::Mutex;

struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Blocks a group of fibers until all of them have arrived.
///
/// Reusable: once `parties` fibers passed, the barrier resets for the next
/// round. Exactly one fiber per round observes `true` (the leader).
///
/// `wait` is deliberately *not* an interruption point: a cancelled waiter
/// would leave the remaining parties stuck one short forever. Pending
/// interruptions stay pending and surface at the next interruption point
/// after the barrier.
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cond: Cond,
}

impl Barrier {
    /// Creates a barrier for `parties` fibers.
    ///
    /// # Panics
    /// If `parties` is zero.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cond: Cond::new(),
        }
    }

    /// Blocks until all parties of the current round arrived. Returns
    /// `true` for exactly one fiber per round.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock_noint();
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.cond.notify_all();
            return true;
        }
        let generation = state.generation;
        while state.generation == generation {
            state = self.cond.wait_noint(state);
        }
        false
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("parties", &self.parties)
            .finish_non_exhaustive()
    }
}
