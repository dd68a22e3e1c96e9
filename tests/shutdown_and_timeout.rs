//! Shutdown and timeout behaviour
//!
//! A participant spinning on a peer that will never publish must be
//! releasable: by a deadline, by an external shutdown flag, or by closing the
//! region.

use shmcast::disruptor::{
    BusySpin, BusySpinWithHint, DisruptorError, SharedRegion, WaitLimit,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Region = SharedRegion<u64, 4, 2>;

#[test]
fn test_recv_timeout_on_idle_producer() {
    let region = Region::new();
    let mut consumer = region.join(BusySpin).unwrap();
    let _producer = region.open_writer(BusySpin).unwrap();

    let start = Instant::now();
    assert_eq!(
        consumer.recv_timeout(Duration::from_millis(30)),
        Err(DisruptorError::Timeout)
    );
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_publish_timeout_on_stalled_consumer() {
    let region = Region::new();
    let _consumer = region.join(BusySpin).unwrap();
    let mut producer = region.open_writer(BusySpin).unwrap();
    for value in 0..4 {
        producer.publish(value).unwrap();
    }

    assert_eq!(
        producer.publish_timeout(4, Duration::from_millis(30)),
        Err(DisruptorError::Timeout)
    );
    // Nothing was published by the failed attempt
    assert_eq!(producer.position(), 3);
    assert_eq!(region.writer_position(), 3);
}

#[test]
fn test_shutdown_flag_releases_consumer() {
    let region = Region::new();
    let mut consumer = region.join(BusySpinWithHint).unwrap();
    let shutdown = AtomicBool::new(false);

    thread::scope(|s| {
        let waiter = s.spawn(|| consumer.recv_within(WaitLimit::none().with_shutdown(&shutdown)));
        thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::Release);
        assert_eq!(waiter.join().unwrap(), Err(DisruptorError::Shutdown));
    });
}

#[test]
fn test_close_releases_blocked_producer() {
    let region = Region::new();
    let _consumer = region.join(BusySpin).unwrap();
    let mut producer = region.open_writer(BusySpin).unwrap();
    for value in 0..4 {
        producer.publish(value).unwrap();
    }

    thread::scope(|s| {
        let blocked = s.spawn(|| producer.publish(4));
        thread::sleep(Duration::from_millis(20));
        region.close();
        assert_eq!(blocked.join().unwrap(), Err(DisruptorError::Alert));
    });
}

#[test]
fn test_close_releases_every_consumer() {
    let region = Region::new();
    let first = region.join(BusySpin).unwrap();
    let second = region.join(BusySpin).unwrap();

    thread::scope(|s| {
        let waiters: Vec<_> = [first, second]
            .into_iter()
            .map(|mut consumer| s.spawn(move || consumer.recv()))
            .collect();
        thread::sleep(Duration::from_millis(20));
        region.close();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(DisruptorError::Alert));
        }
    });
    assert!(region.is_closed());
}

#[test]
fn test_leaving_consumer_unblocks_producer() {
    let region = Region::new();
    let mut active = region.join(BusySpin).unwrap();
    let stalled = region.join(BusySpin).unwrap();
    let mut producer = region.open_writer(BusySpin).unwrap();
    for value in 0..4 {
        producer.publish(value).unwrap();
    }
    for expected in 0..4 {
        assert_eq!(active.recv(), Ok(expected));
    }

    thread::scope(|s| {
        let blocked = s.spawn(|| producer.publish_timeout(4, Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        drop(stalled);
        assert_eq!(blocked.join().unwrap(), Ok(4));
    });
    assert_eq!(active.recv(), Ok(4));
    assert_eq!(region.reader_count(), 1);
}
