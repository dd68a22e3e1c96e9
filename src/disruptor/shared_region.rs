//! Shared region
//!
//! A [`SharedRegion`] packs everything participants need into one `#[repr(C)]`
//! block: the writer's cursor state, a fixed table of reader slots and the ring
//! itself. All references between them are relative, so the block can be
//! placed in memory mapped by several processes at different addresses.
//!
//! The region also owns the bootstrap protocol. [`SharedRegion::join`] claims a
//! reader slot, seeds it from the writer's position and wires the follow graph
//! in both directions; dropping the returned [`Consumer`] unwires it again.

use crate::disruptor::{
    BusySpin, CursorState, DisruptorError, ReadCursor, Result, RingBuffer, WaitLimit,
    WaitStrategy, WriteCursor, INITIAL_CURSOR_VALUE,
};
use std::alloc::{alloc, handle_alloc_error, Layout};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[repr(C)]
struct ReaderSlot {
    claimed: AtomicBool,
    state: CursorState,
}

impl ReaderSlot {
    fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            state: CursorState::new(INITIAL_CURSOR_VALUE),
        }
    }
}

/// One writer, up to `R` readers and a ring of `N` slots of `T`
///
/// `T` is a plain fixed-size payload: it is `Copy` so it carries no heap
/// pointers that would be meaningless in another address space.
#[repr(C)]
pub struct SharedRegion<T, const N: usize, const R: usize> {
    writer_claimed: AtomicBool,
    closed: AtomicBool,
    writer: CursorState,
    readers: [ReaderSlot; R],
    ring: RingBuffer<T, N>,
}

impl<T, const N: usize, const R: usize> SharedRegion<T, N, R>
where
    T: Copy + Default + Send + Sync,
{
    /// Allocate and initialise a region on the heap
    pub fn new() -> Box<Self> {
        let layout = Layout::new::<Self>();
        // SAFETY: the layout is non-zero sized; the block is fully initialised
        // before being handed to Box, which frees it with the same layout.
        unsafe {
            let raw = alloc(layout) as *mut Self;
            if raw.is_null() {
                handle_alloc_error(layout);
            }
            Self::init_in_place(raw);
            Box::from_raw(raw)
        }
    }

    /// Initialise a region inside memory provided by the caller
    ///
    /// Used by whichever participant creates a mapping; the others call
    /// [`SharedRegion::attach`].
    ///
    /// # Safety
    /// `raw` must be valid for writes of `size_of::<Self>()` bytes, aligned for
    /// `Self`, and stay mapped for `'a`.
    pub unsafe fn init_in_place<'a>(raw: *mut Self) -> &'a Self {
        ptr::addr_of_mut!((*raw).writer_claimed).write(AtomicBool::new(false));
        ptr::addr_of_mut!((*raw).closed).write(AtomicBool::new(false));
        ptr::addr_of_mut!((*raw).writer).write(CursorState::new(INITIAL_CURSOR_VALUE));
        let readers = ptr::addr_of_mut!((*raw).readers) as *mut ReaderSlot;
        for index in 0..R {
            readers.add(index).write(ReaderSlot::new());
        }
        RingBuffer::init_in_place(ptr::addr_of_mut!((*raw).ring));
        debug!(capacity = N, reader_slots = R, "shared region initialised");
        &*raw
    }

    /// View a region another participant already initialised
    ///
    /// # Safety
    /// `raw` must point at a region set up by [`SharedRegion::init_in_place`]
    /// (possibly through a different mapping) that stays mapped for `'a`.
    pub unsafe fn attach<'a>(raw: *const Self) -> &'a Self {
        &*raw
    }

    /// The ring shared by all participants
    pub fn ring(&self) -> &RingBuffer<T, N> {
        &self.ring
    }

    /// The writer's shared cursor state
    pub fn writer_state(&self) -> &CursorState {
        &self.writer
    }

    /// The cursor state of reader slot `index`
    pub fn reader_state(&self, index: usize) -> Option<&CursorState> {
        self.readers.get(index).map(|slot| &slot.state)
    }

    /// Last position published by the writer
    pub fn writer_position(&self) -> i64 {
        self.writer.sequence().get()
    }

    /// Number of reader slots currently claimed
    pub fn reader_count(&self) -> usize {
        self.readers
            .iter()
            .filter(|slot| slot.claimed.load(Ordering::Acquire))
            .count()
    }

    /// Whether [`SharedRegion::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(DisruptorError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Claim the single writer seat
    ///
    /// A writer reopening a region resumes after the last published position.
    ///
    /// # Errors
    /// `WriterInUse` if another producer holds the seat, `Shutdown` if closed.
    pub fn open_writer<W: WaitStrategy>(&self, strategy: W) -> Result<Producer<'_, T, N, R, W>> {
        self.check_open()?;
        self.writer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DisruptorError::WriterInUse)?;

        let position = self.writer_position();
        let writer = if position == INITIAL_CURSOR_VALUE {
            WriteCursor::new(&self.writer, N, strategy)
        } else {
            WriteCursor::resume(&self.writer, N, strategy)
        };
        match writer {
            Ok(writer) => {
                info!(position, "writer opened");
                Ok(Producer {
                    region: self,
                    writer,
                })
            }
            Err(error) => {
                self.writer_claimed.store(false, Ordering::Release);
                Err(error)
            }
        }
    }

    /// Join as a new reader, starting after everything already published
    ///
    /// # Errors
    /// `NoFreeSlot` if all `R` slots are taken, `BarrierFull` if the writer
    /// cannot follow another reader, `Shutdown` if the region is closed.
    pub fn join<W: WaitStrategy>(&self, strategy: W) -> Result<Consumer<'_, T, N, R, W>> {
        self.check_open()?;
        let index = self
            .readers
            .iter()
            .position(|slot| {
                slot.claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .ok_or(DisruptorError::NoFreeSlot { capacity: R })?;
        let state = &self.readers[index].state;

        // Gate the writer at its current position before wiring, then seed from
        // a fresh read so nothing published during the wiring is skipped.
        state.sequence().set(self.writer_position());
        if let Err(error) = self.wire(state) {
            self.readers[index].claimed.store(false, Ordering::Release);
            return Err(error);
        }
        let seed = self.writer_position();
        let reader = ReadCursor::new(state, seed, strategy);

        info!(slot = index, seed, "reader joined");
        Ok(Consumer {
            region: self,
            slot: index,
            reader,
        })
    }

    fn wire(&self, state: &CursorState) -> Result<()> {
        // SAFETY: both states live inside this region and are unwired by
        // `unwire` before the slot can be reused.
        unsafe {
            state.follows(&self.writer)?;
            if let Err(error) = self.writer.follows(state) {
                state.unfollow(&self.writer)?;
                return Err(error);
            }
        }
        Ok(())
    }

    fn unwire(&self, index: usize) {
        let slot = &self.readers[index];
        // Retire the reader from the writer's barrier first so the writer never
        // resolves a slot that is about to be handed to someone else.
        if let Err(error) = self.writer.unfollow(&slot.state) {
            warn!(slot = index, %error, "writer was not following leaving reader");
        }
        if let Err(error) = slot.state.unfollow(&self.writer) {
            warn!(slot = index, %error, "leaving reader was not following writer");
        }
        slot.claimed.store(false, Ordering::Release);
        info!(slot = index, "reader left");
    }

    /// Alert every barrier in the region; spinning participants return `Alert`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.writer.barrier().alert();
        for slot in &self.readers {
            slot.state.barrier().alert();
        }
        info!("shared region closed");
    }
}

impl<T, const N: usize, const R: usize> std::fmt::Debug for SharedRegion<T, N, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("capacity", &N)
            .field("reader_slots", &R)
            .field("writer", &self.writer)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// The writing participant of a [`SharedRegion`]
#[derive(Debug)]
pub struct Producer<'a, T, const N: usize, const R: usize, W = BusySpin>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    region: &'a SharedRegion<T, N, R>,
    writer: WriteCursor<'a, W>,
}

impl<'a, T, const N: usize, const R: usize, W> Producer<'a, T, N, R, W>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    /// Write `value` into the next slot and publish it, spinning while full
    ///
    /// # Errors
    /// `Alert` once the region is closed.
    pub fn publish(&mut self, value: T) -> Result<i64> {
        self.publish_within(value, WaitLimit::none())
    }

    /// [`Producer::publish`] giving up after `timeout`
    ///
    /// # Errors
    /// `Timeout` if no slot frees up in time, `Alert` once closed.
    pub fn publish_timeout(&mut self, value: T, timeout: Duration) -> Result<i64> {
        self.publish_within(value, WaitLimit::none().with_timeout(timeout))
    }

    /// [`Producer::publish`] under an arbitrary wait limit
    ///
    /// # Errors
    /// Whatever bound in `limit` trips first, `Alert` once closed.
    pub fn publish_within(&mut self, value: T, limit: WaitLimit<'_>) -> Result<i64> {
        // SAFETY: the writer seat is exclusive and every reader of the ring was
        // wired into the writer's barrier by `join`.
        unsafe {
            self.writer
                .write_with(&self.region.ring, limit, |slot| *slot = value)
        }
    }

    /// Publish without waiting; `None` if the slowest reader is a lap behind
    pub fn try_publish(&mut self, value: T) -> Option<i64> {
        // SAFETY: as in `publish_within`.
        unsafe { self.writer.try_write_with(&self.region.ring, |slot| *slot = value) }
    }

    /// Last published position
    pub fn position(&self) -> i64 {
        self.writer.begin() - 1
    }

    /// The underlying write cursor
    pub fn cursor(&self) -> &WriteCursor<'a, W> {
        &self.writer
    }
}

impl<T, const N: usize, const R: usize, W> Drop for Producer<'_, T, N, R, W>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    fn drop(&mut self) {
        self.region.writer_claimed.store(false, Ordering::Release);
        debug!(position = self.position(), "writer released");
    }
}

/// A reading participant of a [`SharedRegion`]
#[derive(Debug)]
pub struct Consumer<'a, T, const N: usize, const R: usize, W = BusySpin>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    region: &'a SharedRegion<T, N, R>,
    slot: usize,
    reader: ReadCursor<'a, W>,
}

impl<'a, T, const N: usize, const R: usize, W> Consumer<'a, T, N, R, W>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    /// Receive the next value, spinning until it is published
    ///
    /// # Errors
    /// `Alert` once the region is closed.
    pub fn recv(&mut self) -> Result<T> {
        self.recv_within(WaitLimit::none())
    }

    /// [`Consumer::recv`] giving up after `timeout`
    ///
    /// # Errors
    /// `Timeout` if nothing is published in time, `Alert` once closed.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T> {
        self.recv_within(WaitLimit::none().with_timeout(timeout))
    }

    /// [`Consumer::recv`] under an arbitrary wait limit
    ///
    /// # Errors
    /// Whatever bound in `limit` trips first, `Alert` once closed.
    pub fn recv_within(&mut self, limit: WaitLimit<'_>) -> Result<T> {
        // SAFETY: `join` wired this reader to follow the region's writer.
        unsafe { self.reader.read_with(&self.region.ring, limit, |value| *value) }
    }

    /// Receive without waiting; `None` if nothing new is published
    pub fn try_recv(&mut self) -> Option<T> {
        // SAFETY: as in `recv_within`.
        unsafe { self.reader.try_read_with(&self.region.ring, |value| *value) }
    }

    /// Last consumed position
    pub fn position(&self) -> i64 {
        self.reader.begin() - 1
    }

    /// The reader slot this consumer occupies
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The underlying read cursor
    pub fn cursor(&self) -> &ReadCursor<'a, W> {
        &self.reader
    }
}

impl<T, const N: usize, const R: usize, W> Drop for Consumer<'_, T, N, R, W>
where
    T: Copy + Default + Send + Sync,
    W: WaitStrategy,
{
    fn drop(&mut self) {
        self.region.unwire(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Region = SharedRegion<u64, 4, 3>;

    #[test]
    fn test_new_region_is_empty() {
        let region = Region::new();
        assert_eq!(region.writer_position(), INITIAL_CURSOR_VALUE);
        assert_eq!(region.reader_count(), 0);
        assert!(!region.is_closed());
        assert_eq!(region.writer_state().barrier().follower_count(), 0);
    }

    #[test]
    fn test_single_writer_seat() {
        let region = Region::new();
        let producer = region.open_writer(BusySpin).unwrap();
        assert_eq!(
            region.open_writer(BusySpin).unwrap_err(),
            DisruptorError::WriterInUse
        );
        drop(producer);
        assert!(region.open_writer(BusySpin).is_ok());
    }

    #[test]
    fn test_join_wires_both_directions() {
        let region = Region::new();
        let consumer = region.join(BusySpin).unwrap();
        let state = region.reader_state(consumer.slot()).unwrap();

        assert!(region.writer_state().barrier().is_following(state.sequence()));
        assert!(state.barrier().is_following(region.writer_state().sequence()));
        assert_eq!(region.reader_count(), 1);

        drop(consumer);
        assert_eq!(region.reader_count(), 0);
        assert_eq!(region.writer_state().barrier().follower_count(), 0);
        assert_eq!(state.barrier().follower_count(), 0);
    }

    #[test]
    fn test_leave_frees_slot_when_wiring_already_gone() {
        let region = Region::new();
        let consumer = region.join(BusySpin).unwrap();
        let state = region.reader_state(consumer.slot()).unwrap();
        region.writer_state().unfollow(state).unwrap();

        // Logged, not fatal: the slot is still released
        drop(consumer);
        assert_eq!(region.reader_count(), 0);
        assert_eq!(state.barrier().follower_count(), 0);
        let again = region.join(BusySpin).unwrap();
        assert_eq!(again.slot(), 0);
    }

    #[test]
    fn test_join_reports_exhausted_slots() {
        let region = Region::new();
        let _a = region.join(BusySpin).unwrap();
        let _b = region.join(BusySpin).unwrap();
        let _c = region.join(BusySpin).unwrap();
        assert_eq!(
            region.join(BusySpin).unwrap_err(),
            DisruptorError::NoFreeSlot { capacity: 3 }
        );
    }

    #[test]
    fn test_writer_barrier_overflow_rolls_back() {
        let region = SharedRegion::<u64, 4, 10>::new();
        let consumers: Vec<_> = (0..8).map(|_| region.join(BusySpin).unwrap()).collect();
        assert_eq!(
            region.join(BusySpin).unwrap_err(),
            DisruptorError::BarrierFull { capacity: 8 }
        );
        assert_eq!(region.reader_count(), 8);
        drop(consumers);
        assert_eq!(region.reader_count(), 0);
    }

    #[test]
    fn test_publish_and_receive() {
        let region = Region::new();
        let mut consumer = region.join(BusySpin).unwrap();
        let mut producer = region.open_writer(BusySpin).unwrap();

        for value in 10..14 {
            producer.publish(value).unwrap();
        }
        assert_eq!(producer.try_publish(14), None);

        for expected in 10..14 {
            assert_eq!(consumer.recv(), Ok(expected));
        }
        assert_eq!(consumer.try_recv(), None);
        assert_eq!(producer.try_publish(14), Some(4));
        assert_eq!(consumer.try_recv(), Some(14));
        assert_eq!(consumer.position(), 4);
    }

    #[test]
    fn test_writer_resumes_after_reopen() {
        let region = Region::new();
        let mut consumer = region.join(BusySpin).unwrap();
        {
            let mut producer = region.open_writer(BusySpin).unwrap();
            producer.publish(1).unwrap();
            producer.publish(2).unwrap();
        }
        let mut producer = region.open_writer(BusySpin).unwrap();
        assert_eq!(producer.cursor().begin(), 2);
        assert_eq!(producer.publish(3), Ok(2));

        assert_eq!(consumer.recv(), Ok(1));
        assert_eq!(consumer.recv(), Ok(2));
        assert_eq!(consumer.recv(), Ok(3));
    }

    #[test]
    fn test_close_rejects_and_alerts() {
        let region = Region::new();
        let mut consumer = region.join(BusySpin).unwrap();
        region.close();

        assert_eq!(consumer.recv(), Err(DisruptorError::Alert));
        assert_eq!(region.join(BusySpin).unwrap_err(), DisruptorError::Shutdown);
        assert_eq!(
            region.open_writer(BusySpin).unwrap_err(),
            DisruptorError::Shutdown
        );
    }
}
