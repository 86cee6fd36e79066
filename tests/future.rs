use std::time::Duration;

use strand::fiber::{self, PackagedTask, Promise, WaitStatus};
use strand::{Error, FutureError};

#[test]
fn set_value_then_get() {
    let mut p = Promise::new();
    let f = p.future().unwrap();
    p.set_value(42).unwrap();
    assert!(f.valid());
    assert_eq!(f.get().unwrap(), 42);
}

#[test]
fn get_blocks_until_the_value_arrives() {
    let mut p = Promise::new();
    let f = p.future().unwrap();
    let producer = fiber::spawn_proc(move || {
        fiber::yield_now();
        p.set_value("ready").unwrap();
    });
    assert_eq!(f.get().unwrap(), "ready");
    producer.join().unwrap();
}

#[test]
fn future_can_only_be_retrieved_once() {
    let mut p = Promise::<()>::new();
    let _f = p.future().unwrap();
    assert!(matches!(
        p.future(),
        Err(Error::Future(FutureError::FutureAlreadyRetrieved))
    ));
}

#[test]
fn promise_can_only_be_satisfied_once() {
    let mut p = Promise::new();
    p.set_value(1).unwrap();
    assert!(matches!(
        p.set_value(2),
        Err(Error::Future(FutureError::PromiseAlreadySatisfied))
    ));
    assert!(matches!(
        p.set_error(Error::Interrupted),
        Err(Error::Future(FutureError::PromiseAlreadySatisfied))
    ));
}

#[test]
fn dropped_promise_breaks_the_future() {
    let mut p = Promise::<i32>::new();
    let f = p.future().unwrap();
    drop(p);
    assert!(matches!(
        f.get(),
        Err(Error::Future(FutureError::BrokenPromise))
    ));
}

#[test]
fn dropped_promise_wakes_a_blocked_waiter() {
    let mut p = Promise::<i32>::new();
    let f = p.future().unwrap();
    let producer = fiber::spawn_proc(move || {
        fiber::yield_now();
        drop(p);
    });
    assert!(matches!(
        f.get(),
        Err(Error::Future(FutureError::BrokenPromise))
    ));
    producer.join().unwrap();
}

#[test]
fn stored_error_is_rethrown_by_get() {
    let mut p = Promise::<i32>::new();
    let f = p.future().unwrap();
    p.set_error(Error::InvalidArgument("made up")).unwrap();
    assert!(matches!(f.get(), Err(Error::InvalidArgument("made up"))));
}

#[test]
fn timed_wait_on_a_pending_future() {
    let mut p = Promise::<i32>::new();
    let f = p.future().unwrap();
    assert_eq!(
        f.wait_for(Duration::from_millis(10)).unwrap(),
        WaitStatus::TimedOut
    );
    p.set_value(5).unwrap();
    assert_eq!(
        f.wait_for(Duration::from_millis(10)).unwrap(),
        WaitStatus::Notified
    );
    assert_eq!(f.get().unwrap(), 5);
}

#[test]
fn wait_is_an_interruption_point() {
    let mut p = Promise::<i32>::new();
    let f = p.future().unwrap();
    let jh = fiber::spawn(move || match f.get() {
        Err(Error::Interrupted) => true,
        _ => false,
    });
    fiber::yield_now();
    jh.interrupt();
    assert!(jh.join().unwrap());
    // the promise side is unaffected
    p.set_value(1).unwrap();
}

#[test]
fn packaged_task_runs_once() {
    let mut task = PackagedTask::new(|| 6 * 7);
    let f = task.future().unwrap();
    assert!(!task.executed());
    task.run().unwrap();
    assert!(task.executed());
    assert!(matches!(
        task.run(),
        Err(Error::Future(FutureError::TaskAlreadyExecuted))
    ));
    assert_eq!(f.get().unwrap(), 42);
}

#[test]
fn packaged_task_across_fibers() {
    let mut task = PackagedTask::new(|| "computed in another fiber");
    let f = task.future().unwrap();
    let worker = fiber::spawn_proc(move || task.run().unwrap());
    assert_eq!(f.get().unwrap(), "computed in another fiber");
    worker.join().unwrap();
}

#[test]
fn dropped_unexecuted_task_breaks_its_future() {
    let mut task = PackagedTask::new(|| 1);
    let f = task.future().unwrap();
    drop(task);
    assert!(matches!(
        f.get(),
        Err(Error::Future(FutureError::BrokenPromise))
    ));
}
