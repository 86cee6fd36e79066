use std::time::Duration;

use pretty_assertions::assert_eq;
use strand::fiber::{
    self, check_yield, Channel, RecvError, SendError, TryRecvError, TrySendError,
    UnboundedChannel,
    YieldResult::{DoesntYield, Yields},
};
use strand::Error;

#[test]
fn send_self() {
    let ch = Channel::new(1);
    ch.send("hello").unwrap();
    assert_eq!(ch.recv().unwrap(), "hello");
}

#[test]
fn send_full() {
    let ch = Channel::new(1);
    ch.send("fill").unwrap();

    assert_eq!(
        check_yield(|| ch
            .send_timeout("echo1", Duration::from_millis(1))
            .unwrap_err()),
        Yields(SendError::Timeout("echo1"))
    );

    assert_eq!(
        check_yield(|| ch.try_send("echo2").unwrap_err()),
        DoesntYield(TrySendError::Full("echo2"))
    );
}

#[test]
fn recv_empty() {
    let ch = Channel::<()>::new(1);

    assert_eq!(
        check_yield(|| ch.recv_timeout(Duration::from_millis(1)).unwrap_err()),
        Yields(RecvError::Timeout)
    );

    assert_eq!(
        check_yield(|| ch.try_recv().unwrap_err()),
        DoesntYield(TryRecvError::Empty)
    );
}

#[test]
fn blocked_receiver_wakes_on_send() {
    let ch = Channel::new(1);
    let rx = ch.clone();
    let jh = fiber::spawn(move || rx.recv().unwrap());
    assert_eq!(check_yield(|| ch.send("hello").unwrap()), Yields(()));
    assert_eq!(jh.join().unwrap(), "hello");
}

#[test]
fn close_drains_then_reports_closed() {
    let ch = Channel::new(2);
    ch.send(1).unwrap();
    ch.send(2).unwrap();
    ch.close();
    assert!(ch.is_closed());
    assert_eq!(ch.send(3).unwrap_err(), SendError::Closed(3));
    // queued items are still delivered, closed comes after the last one
    assert_eq!(ch.recv().unwrap(), 1);
    assert_eq!(ch.recv().unwrap(), 2);
    assert_eq!(ch.recv().unwrap_err(), RecvError::Closed);
    assert_eq!(ch.try_recv().unwrap_err(), TryRecvError::Closed);
}

#[test]
fn close_wakes_blocked_receiver() {
    let ch = Channel::<()>::new(1);
    let rx = ch.clone();
    let jh = fiber::spawn(move || rx.recv().unwrap_err());
    fiber::yield_now();
    ch.close();
    assert_eq!(jh.join().unwrap(), RecvError::Closed);
}

#[test]
fn one_sender_two_receivers() {
    let ch = Channel::new(1);
    let (rx1, rx2) = (ch.clone(), ch.clone());
    let f1 = fiber::spawn(move || rx1.recv().unwrap());
    let f2 = fiber::spawn(move || rx2.recv().unwrap());
    ch.send("hello").unwrap();
    ch.send("what's up").unwrap();
    assert_eq!(f1.join().unwrap(), "hello");
    assert_eq!(f2.join().unwrap(), "what's up");
}

#[test]
fn two_senders_one_receiver() {
    let ch = Channel::new(1);
    let (tx1, tx2) = (ch.clone(), ch.clone());
    let f1 = fiber::spawn_proc(move || tx1.send("how ya doin?").unwrap());
    let f2 = fiber::spawn_proc(move || tx2.send("what's good").unwrap());
    assert_eq!(ch.recv().unwrap(), "how ya doin?");
    assert_eq!(ch.recv().unwrap(), "what's good");
    f1.join().unwrap();
    f2.join().unwrap();
}

#[test]
fn watermark_validation() {
    assert!(matches!(
        Channel::<()>::with_watermarks(0, 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        Channel::<()>::with_watermarks(4, 4),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        Channel::<()>::with_watermarks(4, 5),
        Err(Error::InvalidArgument(_))
    ));
    assert!(Channel::<()>::with_watermarks(4, 2).is_ok());
}

#[test]
fn fills_to_capacity_without_blocking() {
    // one slot left: a send doesn't block; at capacity the next one does
    let ch = Channel::new(4);
    for i in 0..3 {
        assert_eq!(check_yield(|| ch.send(i).unwrap()), DoesntYield(()));
    }
    assert_eq!(check_yield(|| ch.send(3).unwrap()), DoesntYield(()));
    assert!(ch.is_full());
    assert_eq!(
        check_yield(|| ch.send_timeout(4, Duration::from_millis(1)).unwrap_err()),
        Yields(SendError::Timeout(4))
    );
}

#[test]
fn producer_consumer_ordered_with_bounded_buffer() {
    let ch = Channel::with_watermarks(4, 2).unwrap();
    let tx = ch.clone();
    let producer = fiber::spawn(move || {
        // the bounded buffer must suspend the producer at least once
        check_yield(|| {
            for i in 0..100 {
                tx.send(i).unwrap();
            }
            tx.close();
        })
    });
    let mut received = Vec::with_capacity(100);
    loop {
        assert!(ch.len() <= 4);
        match ch.recv() {
            Ok(v) => received.push(v),
            Err(RecvError::Closed) => break,
            Err(e) => panic!("unexpected recv outcome: {:?}", e),
        }
    }
    assert_eq!(received, (0..100).collect::<Vec<_>>());
    assert_eq!(producer.join().unwrap(), Yields(()));
}

#[test]
fn low_watermark_wakes_all_producers() {
    let ch = Channel::with_watermarks(4, 1).unwrap();
    for i in 0..4 {
        ch.send(i).unwrap();
    }
    let (tx1, tx2) = (ch.clone(), ch.clone());
    let p1 = fiber::spawn_proc(move || tx1.send(4).unwrap());
    let p2 = fiber::spawn_proc(move || tx2.send(5).unwrap());
    fiber::yield_now(); // let both producers block
    // draining to the low watermark releases both of them
    assert_eq!(ch.recv().unwrap(), 0);
    assert_eq!(ch.recv().unwrap(), 1);
    assert_eq!(ch.recv().unwrap(), 2);
    p1.join().unwrap();
    p2.join().unwrap();
    assert_eq!(
        (0..3).map(|_| ch.recv().unwrap()).collect::<Vec<_>>(),
        vec![3, 4, 5]
    );
}

#[test]
fn ping_pong() {
    let ab = Channel::<u64>::new(1);
    let ba = Channel::<u64>::new(1);
    let (ping_rx, ping_tx) = (ab.clone(), ba.clone());
    let ping = fiber::spawn(move || {
        let mut observed = 0u64;
        let mut last = 0;
        for _ in 0..1000 {
            last = ping_rx.recv().unwrap();
            observed += 1;
            ping_tx.send(last + 1).unwrap();
        }
        (observed, last)
    });
    let (pong_rx, pong_tx) = (ba.clone(), ab.clone());
    let pong = fiber::spawn(move || {
        let mut observed = 0u64;
        let mut last = 0;
        for _ in 0..1000 {
            last = pong_rx.recv().unwrap();
            observed += 1;
            pong_tx.send(last + 1).unwrap();
        }
        (observed, last)
    });
    ab.send(1).unwrap();
    assert_eq!(ping.join().unwrap(), (1000, 1999));
    assert_eq!(pong.join().unwrap(), (1000, 2000));
    // the final message of the exchange is still in flight
    assert_eq!(ab.try_recv().unwrap(), 2001);
    assert!(ba.is_empty());
}

#[test]
fn iterators() {
    let ch = Channel::new(4);
    for i in 0..4 {
        ch.send(i).unwrap();
    }
    assert_eq!(ch.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    let tx = ch.clone();
    let producer = fiber::spawn_proc(move || {
        for i in 10..13 {
            tx.send(i).unwrap();
        }
        tx.close();
    });
    assert_eq!(ch.iter().collect::<Vec<_>>(), vec![10, 11, 12]);
    producer.join().unwrap();
}

#[test]
fn interrupted_sender_gets_the_value_back() {
    let ch = Channel::new(1);
    ch.send(1).unwrap();
    let tx = ch.clone();
    let jh = fiber::spawn(move || tx.send(2).unwrap_err());
    fiber::yield_now();
    jh.interrupt();
    assert_eq!(jh.join().unwrap(), SendError::Interrupted(2));
    // the channel is untouched by the aborted send
    assert_eq!(ch.recv().unwrap(), 1);
    assert!(ch.is_empty());
}

#[test]
fn interrupted_receiver() {
    let ch = Channel::<()>::new(1);
    let rx = ch.clone();
    let jh = fiber::spawn(move || rx.recv().unwrap_err());
    fiber::yield_now();
    jh.interrupt();
    assert_eq!(jh.join().unwrap(), RecvError::Interrupted);
}

#[test]
fn unbounded_never_blocks_on_send() {
    let ch = UnboundedChannel::new();
    assert_eq!(
        check_yield(|| {
            for i in 0..10_000 {
                ch.send(i).unwrap();
            }
        }),
        DoesntYield(())
    );
    assert_eq!(ch.len(), 10_000);
    assert_eq!(ch.recv().unwrap(), 0);
}

#[test]
fn unbounded_close_semantics() {
    let ch = UnboundedChannel::new();
    ch.send("queued").unwrap();
    ch.close();
    assert_eq!(ch.send("late").unwrap_err(), SendError::Closed("late"));
    assert_eq!(ch.recv().unwrap(), "queued");
    assert_eq!(ch.recv().unwrap_err(), RecvError::Closed);
}

#[test]
fn unbounded_timed_recv() {
    let ch = UnboundedChannel::<()>::new();
    assert_eq!(
        ch.recv_timeout(Duration::from_millis(1)).unwrap_err(),
        RecvError::Timeout
    );
    assert_eq!(ch.try_recv().unwrap_err(), TryRecvError::Empty);
}
