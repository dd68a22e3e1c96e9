//! Relocation tests
//!
//! A region copied byte for byte to another address (what a second process
//! mapping the same memory sees) must keep every internal reference pointing
//! into the copy and none into the original.

use shmcast::disruptor::{BusySpin, ReadCursor, SharedRegion, WaitLimit};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr;
use std::time::Duration;

type Region = SharedRegion<u64, 8, 4>;

/// Raw, suitably aligned memory standing in for a mapping
struct Mapping {
    raw: *mut Region,
    layout: Layout,
}

impl Mapping {
    fn new() -> Self {
        let layout = Layout::new::<Region>();
        let raw = unsafe { alloc(layout) } as *mut Region;
        assert!(!raw.is_null());
        Self { raw, layout }
    }

    fn copy_from(&self, other: &Mapping) {
        unsafe {
            ptr::copy_nonoverlapping(other.raw as *const u8, self.raw as *mut u8, self.layout.size());
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { dealloc(self.raw as *mut u8, self.layout) };
    }
}

#[test]
fn test_copied_region_resolves_into_itself() {
    let original = Mapping::new();
    let copy = Mapping::new();

    {
        let region = unsafe { Region::init_in_place(original.raw) };
        let first = region.join(BusySpin).unwrap();
        let second = region.join(BusySpin).unwrap();
        {
            let mut producer = region.open_writer(BusySpin).unwrap();
            for value in [10, 11, 12] {
                producer.publish(value).unwrap();
            }
        }
        assert_eq!((first.slot(), second.slot()), (0, 1));

        copy.copy_from(&original);
        // Unwires the original only
        drop(first);
        drop(second);
        assert_eq!(region.writer_state().barrier().follower_count(), 0);
    }
    drop(original);

    let region = unsafe { Region::attach(copy.raw) };
    let writer = region.writer_state();
    assert_eq!(region.writer_position(), 2);
    assert_eq!(region.reader_count(), 2);
    assert_eq!(writer.barrier().follower_count(), 2);

    for index in 0..2 {
        let reader = region.reader_state(index).unwrap();
        assert!(writer.barrier().is_following(reader.sequence()));
        assert!(reader.barrier().is_following(writer.sequence()));
    }

    // The copy's barriers read the copy's sequences
    region.reader_state(0).unwrap().sequence().set(1);
    assert_eq!(writer.barrier().minimum(), -1);
    region.reader_state(1).unwrap().sequence().set(0);
    assert_eq!(writer.barrier().minimum(), 0);
    assert_eq!(region.reader_state(1).unwrap().barrier().minimum(), 2);
}

#[test]
fn test_copied_region_keeps_streaming() {
    let original = Mapping::new();
    let copy = Mapping::new();

    let region = unsafe { Region::init_in_place(original.raw) };
    let reader = region.join(BusySpin).unwrap();
    {
        let mut producer = region.open_writer(BusySpin).unwrap();
        for value in 0..5u64 {
            producer.publish(value * 7).unwrap();
        }
    }
    copy.copy_from(&original);
    drop(reader);
    drop(original);

    let moved = unsafe { Region::attach(copy.raw) };
    let state = moved.reader_state(0).unwrap();
    let mut reader = ReadCursor::new(state, -1, BusySpin);
    let limit = || WaitLimit::none().with_timeout(Duration::from_millis(100));

    for value in 0..5u64 {
        assert_eq!(unsafe { reader.read_with(moved.ring(), limit(), |v| *v) }, Ok(value * 7));
    }

    // The writer seat was free when the bytes were copied, so it can reopen
    let mut producer = moved.open_writer(BusySpin).unwrap();
    assert_eq!(producer.publish(35), Ok(5));
    assert_eq!(unsafe { reader.read_with(moved.ring(), limit(), |v| *v) }, Ok(35));
}
