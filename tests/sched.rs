use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use strand::fiber::{self, OneShotEvent, Promise};
use strand::sched::{
    self, PriorityScheduling, RoundRobin, SharedGroup, SharedQueue, StealGroup, WorkStealing,
};
use strand::Error;

/// fib(n) via a tree of fibers, children joined through futures.
fn fib(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut left = Promise::new();
    let mut right = Promise::new();
    let left_future = left.future().unwrap();
    let right_future = right.future().unwrap();
    fiber::spawn_proc(move || {
        let v = fib(n - 1);
        left.set_value(v).unwrap();
    })
    .detach();
    fiber::spawn_proc(move || {
        let v = fib(n - 2);
        right.set_value(v).unwrap();
    })
    .detach();
    left_future.get().unwrap() + right_future.get().unwrap()
}

#[test]
fn fib_tree_single_thread() {
    assert_eq!(fib(10), 55);
}

#[test]
fn fib_tree_work_stealing_four_threads() {
    let group = StealGroup::new();
    sched::set_scheduling_algorithm(WorkStealing::new(&group)).unwrap();

    let done = Arc::new(OneShotEvent::new());
    let mut helpers = Vec::new();
    for k in 0..3 {
        let group = group.clone();
        let done = done.clone();
        helpers.push(
            thread::Builder::new()
                .name(format!("helper-{}", k))
                .spawn(move || {
                    sched::set_scheduling_algorithm(WorkStealing::new(&group)).unwrap();
                    // parking the main fiber leaves the driver free to run
                    // stolen work until the computation is over
                    done.wait().unwrap();
                })
                .unwrap(),
        );
    }

    assert_eq!(fib(10), 55);

    done.set();
    for helper in helpers {
        helper.join().unwrap();
    }
}

#[test]
fn shared_queue_spreads_work_between_threads() {
    let group = SharedGroup::new();
    sched::set_scheduling_algorithm(SharedQueue::new(&group)).unwrap();

    let done = Arc::new(OneShotEvent::new());
    let helper = {
        let group = group.clone();
        let done = done.clone();
        thread::spawn(move || {
            sched::set_scheduling_algorithm(SharedQueue::new(&group)).unwrap();
            done.wait().unwrap();
        })
    };

    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..32 {
        let counter = counter.clone();
        handles.push(fiber::spawn_proc(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            fiber::yield_now();
            counter.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for jh in handles {
        jh.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 64);

    done.set();
    helper.join().unwrap();
}

#[test]
fn priority_orders_ready_fibers() {
    sched::set_scheduling_algorithm(PriorityScheduling::new()).unwrap();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (name, priority) in [("low", 1), ("mid", 2), ("high", 3)] {
        let log = log.clone();
        handles.push(
            fiber::Builder::new()
                .priority(priority)
                .spawn(move || log.lock().unwrap().push(name))
                .unwrap(),
        );
    }
    fiber::yield_now();
    assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low"]);
    for jh in handles {
        jh.join().unwrap();
    }
}

#[test]
fn installing_an_algorithm_twice_fails() {
    sched::set_scheduling_algorithm(RoundRobin::new()).unwrap();
    assert!(matches!(
        sched::set_scheduling_algorithm(RoundRobin::new()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn installing_after_first_fiber_operation_fails() {
    fiber::yield_now();
    assert!(matches!(
        sched::set_scheduling_algorithm(RoundRobin::new()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn one_shot_event_across_threads() {
    let started = Arc::new(OneShotEvent::new());
    let released = Arc::new(AtomicUsize::new(0));

    let mut waiters = Vec::new();
    for _ in 0..2 {
        let started = started.clone();
        let released = released.clone();
        waiters.push(thread::spawn(move || {
            started.wait().unwrap();
            released.fetch_add(1, Ordering::Relaxed);
        }));
    }

    thread::sleep(Duration::from_millis(20));
    assert_eq!(released.load(Ordering::Relaxed), 0);
    assert!(!started.is_set());
    started.set();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(released.load(Ordering::Relaxed), 2);
    // waiting on a set event returns immediately
    started.wait().unwrap();
    assert!(started.try_wait());
}

#[test]
fn pinned_fiber_completes_under_work_stealing() {
    // a pinned fiber lives in the scheduler's local list, invisible to
    // thieves; its own scheduler must keep running it to completion
    let group = StealGroup::new();
    sched::set_scheduling_algorithm(WorkStealing::new(&group)).unwrap();

    let done = Arc::new(OneShotEvent::new());
    let helper = {
        let group = group.clone();
        let done = done.clone();
        thread::spawn(move || {
            sched::set_scheduling_algorithm(WorkStealing::new(&group)).unwrap();
            done.wait().unwrap();
        })
    };

    let jh = fiber::Builder::new()
        .pinned(true)
        .spawn(|| {
            let mut rounds = 0;
            for _ in 0..10 {
                fiber::yield_now();
                rounds += 1;
            }
            rounds
        })
        .unwrap();
    assert_eq!(jh.join().unwrap(), 10);

    done.set();
    helper.join().unwrap();
}
