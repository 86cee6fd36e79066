use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use strand::fiber::{
    self, check_yield, Builder, DisableInterruption, FiberLocal, RestoreInterruption,
    YieldResult::{DoesntYield, Yields},
};
use strand::Error;

#[test]
fn spawn_and_join() {
    let jh = fiber::spawn(|| 69);
    assert_eq!(jh.join().unwrap(), 69);

    let jh = Builder::new().name("boo").spawn(|| 420).unwrap();
    assert_eq!(jh.join().unwrap(), 420);
}

#[test]
fn spawn_with_attrs() {
    let jh = Builder::new()
        .name("sized")
        .stack_size(128 * 1024)
        .unwrap()
        .spawn(|| 42)
        .unwrap();
    assert_eq!(jh.join().unwrap(), 42);

    assert!(Builder::new().stack_size(1).is_err());
}

#[test]
fn multiple_fibers() {
    let fibers = vec![vec![1, 2], vec![3, 4], vec![5, 6]]
        .into_iter()
        .map(|v| fiber::spawn(move || v.into_iter().map(|e| e + 1).collect::<Vec<_>>()))
        .collect::<Vec<_>>();
    let mut res = vec![1];
    for jh in fibers {
        res.extend(jh.join().unwrap());
    }
    res.push(8);
    assert_eq!(res, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn unit_fiber() {
    let jh = fiber::spawn_proc(|| ());
    jh.join().unwrap();
}

#[test]
fn deferred_until_suspension() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran2 = ran.clone();
    let jh = fiber::spawn_proc(move || ran2.store(true, Ordering::Relaxed));
    // the spawner keeps running until it suspends
    assert!(!ran.load(Ordering::Relaxed));
    fiber::yield_now();
    assert!(ran.load(Ordering::Relaxed));
    jh.join().unwrap();
}

#[test]
fn join_delivers_pure_value() {
    assert_eq!(fiber::spawn(|| 7 * 8).join().unwrap(), 56);
}

#[test]
fn join_already_terminated() {
    let jh = fiber::spawn(|| "done");
    fiber::yield_now();
    fiber::yield_now();
    // the fiber terminated long ago; join must not hang
    assert_eq!(jh.join().unwrap(), "done");
}

#[test]
fn detach_keeps_fiber_running() {
    let done = Arc::new(AtomicBool::new(false));
    let done2 = done.clone();
    fiber::spawn_proc(move || done2.store(true, Ordering::Relaxed)).detach();
    while !done.load(Ordering::Relaxed) {
        fiber::yield_now();
    }
}

#[test]
fn yield_reschedules() {
    assert_eq!(check_yield(fiber::yield_now), Yields(()));
    assert_eq!(check_yield(|| 17), DoesntYield(17));
}

#[test]
fn sleep_takes_at_least_the_timeout() {
    let started = Instant::now();
    fiber::sleep(Duration::from_millis(50)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn zero_sleep_still_yields() {
    assert_eq!(
        check_yield(|| fiber::sleep(Duration::ZERO).unwrap()),
        Yields(())
    );
}

#[test]
fn ids_are_stable_and_displayed() {
    let jh = fiber::spawn(fiber::current_id);
    let id = jh.id();
    assert_eq!(jh.join().unwrap(), id);
    assert!(!id.to_string().is_empty());
}

#[test]
fn fiber_names() {
    let jh = Builder::new()
        .name("observer")
        .spawn(fiber::current_name)
        .unwrap();
    assert_eq!(jh.join().unwrap(), "observer");
}

#[test]
fn interruption_surfaces_at_the_wait_site() {
    let jh = fiber::spawn(|| match fiber::sleep(Duration::from_secs(3600)) {
        Err(Error::Interrupted) => true,
        _ => false,
    });
    fiber::yield_now();
    jh.interrupt();
    assert!(jh.join().unwrap());
}

#[test]
fn interruption_point_consumes_the_request() {
    let jh = fiber::spawn(|| {
        // spin until the request arrives
        while !fiber::is_interruption_requested() {
            fiber::yield_now();
        }
        let first = fiber::interruption_point();
        let second = fiber::interruption_point();
        (first.is_err(), second.is_ok())
    });
    fiber::yield_now();
    jh.interrupt();
    assert_eq!(jh.join().unwrap(), (true, true));
}

#[test]
fn disable_interruption_delays_delivery() {
    let jh = fiber::spawn(|| {
        let scope = DisableInterruption::new();
        assert!(!fiber::interruption_enabled());
        // the request arrives while delivery is blocked; the sleep must
        // run to completion
        let slept = fiber::sleep(Duration::from_millis(30));
        drop(scope);
        let after = fiber::interruption_point();
        (slept.is_ok(), after.is_err())
    });
    fiber::yield_now();
    jh.interrupt();
    assert_eq!(jh.join().unwrap(), (true, true));
}

#[test]
fn restore_interruption_reopens_the_scope() {
    let jh = fiber::spawn(|| {
        let scope = DisableInterruption::new();
        while !fiber::is_interruption_requested() {
            fiber::yield_now();
        }
        let blocked = fiber::interruption_point().is_ok();
        let reopened = {
            let _restore = RestoreInterruption::new(&scope);
            fiber::interruption_point().is_err()
        };
        (blocked, reopened)
    });
    fiber::yield_now();
    jh.interrupt();
    assert_eq!(jh.join().unwrap(), (true, true));
}

#[test]
fn fiber_local_values_are_per_fiber() {
    let slot: Arc<FiberLocal<u32>> = Arc::new(FiberLocal::new());
    let (a_slot, b_slot) = (slot.clone(), slot.clone());
    let a = fiber::spawn(move || {
        a_slot.set(1);
        fiber::yield_now();
        a_slot.get()
    });
    let b = fiber::spawn(move || {
        b_slot.set(2);
        fiber::yield_now();
        b_slot.get()
    });
    assert_eq!(a.join().unwrap(), Some(1));
    assert_eq!(b.join().unwrap(), Some(2));
    assert_eq!(slot.get(), None);
}

#[test]
fn fiber_local_cleanup_runs_reversed_on_termination() {
    let log = Arc::new(StdMutex::new(Vec::new()));
    let first: Arc<FiberLocal<&'static str>> = Arc::new(FiberLocal::new());
    let second: Arc<FiberLocal<&'static str>> = Arc::new(FiberLocal::new());
    let (f, s, l) = (first.clone(), second.clone(), log.clone());
    fiber::spawn_proc(move || {
        let l2 = l.clone();
        f.set_with_cleanup("first", move |v| l2.lock().unwrap().push(v));
        second_set(&s, &l);
    })
    .join()
    .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);

    fn second_set(slot: &FiberLocal<&'static str>, log: &Arc<StdMutex<Vec<&'static str>>>) {
        let log = log.clone();
        slot.set_with_cleanup("second", move |v| log.lock().unwrap().push(v));
    }
}

#[test]
fn priority_accessors() {
    let jh = Builder::new()
        .priority(3)
        .spawn(|| {
            let initial = fiber::priority();
            fiber::set_priority(7);
            (initial, fiber::priority())
        })
        .unwrap();
    assert_eq!(jh.join().unwrap(), (3, 7));
}

#[test]
fn csw_counts_resumptions() {
    let before = fiber::csw();
    fiber::yield_now();
    fiber::yield_now();
    assert!(fiber::csw() >= before + 2);
}
