//! A cooperative user-space fiber runtime.
//!
//! This library multiplexes many lightweight execution contexts (*fibers*)
//! onto the OS threads of the process. Each fiber owns a private stack and
//! yields control only at well-defined suspension points; there is no
//! preemption. The library contains:
//!
//! - [Fibers: spawning, joining, interruption, fiber-local storage](fiber)
//! - [Schedulers: per-thread drivers and pluggable policies](sched)
//!   (round-robin, priority, shared queue, work stealing)
//! - [Mutexes](fiber::mutex) and [condition variables](fiber::cond)
//! - [Promises and futures](fiber::future)
//! - [Bounded and unbounded channels](fiber::channel)
//! - [One-shot events](fiber::event) and [barriers](fiber::barrier)
//! - [Error handling](error)
//! - [Monotonic clock helpers](clock)
//!
//! Diagnostics go through the [`log`](https://docs.rs/log/) facade; install
//! any logger to see scheduler traces.
//!
//! ### Example
//!
//! ```no_run
//! use strand::fiber::{self, Channel};
//!
//! let ch = Channel::new(4);
//! let tx = ch.clone();
//! let producer = fiber::spawn_proc(move || {
//!     for i in 0..10 {
//!         tx.send(i).unwrap();
//!     }
//!     tx.close();
//! });
//! let total: i32 = ch.iter().sum();
//! producer.join().unwrap();
//! assert_eq!(total, 45);
//! ```
//!
//! ### Threads
//!
//! Every thread that touches the fiber API gets its own scheduler, created
//! on first use with the round-robin policy. To pick a different policy,
//! call [`sched::set_scheduling_algorithm`] before any fiber operation on
//! that thread. Fibers spawned on a thread stay on its scheduler unless a
//! cross-thread policy (shared queue, work stealing) migrates them;
//! pinned fibers and each scheduler's main context never migrate.

pub mod clock;
pub mod error;
pub mod fiber;
pub mod sched;
pub mod sys;

pub use error::{Error, FutureError, Result};
