//! Event cursors
//!
//! A cursor is split in two. [`CursorState`] is the part other participants
//! see: the published [`Sequence`] and the [`SequenceBarrier`] gating it. It
//! lives in the shared region. [`ReadCursor`] and [`WriteCursor`] are the
//! owner's private handles: they borrow a `CursorState` and keep the local
//! `[begin, end)` window of positions the owner may currently touch.

use crate::disruptor::{
    is_power_of_two, DisruptorError, Result, RingBuffer, Sequence, SequenceBarrier,
    WaitLimit, WaitStrategy, BusySpin, INITIAL_CURSOR_VALUE, UNBOUNDED,
};
use std::ptr;

/// The shared half of a cursor: its published position and its barrier
#[repr(C)]
#[derive(Debug, Default)]
pub struct CursorState {
    sequence: Sequence,
    barrier: SequenceBarrier,
}

impl CursorState {
    /// Create a cursor state publishing `initial`
    pub fn new(initial: i64) -> Self {
        Self {
            sequence: Sequence::new(initial),
            barrier: SequenceBarrier::new(),
        }
    }

    /// The published position of this cursor
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// The barrier gating this cursor
    pub fn barrier(&self) -> &SequenceBarrier {
        &self.barrier
    }

    /// Make this cursor wait on `other`'s published position
    ///
    /// # Errors
    /// `SelfFollow`, `AlreadyFollowing` or `BarrierFull`.
    ///
    /// # Safety
    /// `other` must outlive the registration and move together with `self`
    /// (same region) until [`CursorState::unfollow`] is called.
    pub unsafe fn follows(&self, other: &CursorState) -> Result<()> {
        if ptr::eq(self, other) {
            return Err(DisruptorError::SelfFollow);
        }
        self.barrier.follows(&other.sequence)
    }

    /// Stop waiting on `other`
    ///
    /// # Errors
    /// `NotFollowing` if `other` was not followed.
    pub fn unfollow(&self, other: &CursorState) -> Result<()> {
        self.barrier.unfollow(&other.sequence)
    }
}

/// The local window shared by read and write cursors
#[derive(Debug)]
pub struct EventCursor<'a> {
    state: &'a CursorState,
    begin: i64,
    end: i64,
}

impl<'a> EventCursor<'a> {
    fn new(state: &'a CursorState, begin: i64, end: i64) -> Self {
        debug_assert!(begin <= end);
        Self { state, begin, end }
    }

    /// Next position to use
    #[inline]
    pub fn begin(&self) -> i64 {
        self.begin
    }

    /// Exclusive bound of the currently granted window
    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of positions still usable without waiting
    #[inline]
    pub fn available(&self) -> i64 {
        self.end - self.begin
    }

    /// The shared state this handle drives
    pub fn state(&self) -> &'a CursorState {
        self.state
    }

    /// Make `position` visible to every cursor following this one
    #[inline]
    pub fn publish(&mut self, position: i64) {
        debug_assert!(
            position >= self.begin && position < self.end,
            "publishing {position} outside window [{}, {})",
            self.begin,
            self.end
        );
        self.begin = position + 1;
        self.state.sequence.set(position);
    }

    #[inline]
    fn set_end(&mut self, end: i64) -> i64 {
        self.end = end.max(self.begin);
        self.end
    }
}

/// A consumer's cursor
///
/// Its window ends one past the slowest followed position: it may read
/// everything its upstream cursors have published.
#[derive(Debug)]
pub struct ReadCursor<'a, W = BusySpin> {
    cursor: EventCursor<'a>,
    strategy: W,
}

impl<'a, W: WaitStrategy> ReadCursor<'a, W> {
    /// Attach a reader to `state`, resuming after `seed`
    ///
    /// `seed` is the last position already available when the reader joins
    /// (the producer's current position, or [`INITIAL_CURSOR_VALUE`] before
    /// anything was published). The reader publishes `seed` as "consumed" and
    /// starts with an empty window at `seed + 1`.
    pub fn new(state: &'a CursorState, seed: i64, strategy: W) -> Self {
        debug_assert!(seed >= INITIAL_CURSOR_VALUE);
        state.sequence.set(seed);
        Self {
            cursor: EventCursor::new(state, seed + 1, seed + 1),
            strategy,
        }
    }

    /// Next position to read
    #[inline]
    pub fn begin(&self) -> i64 {
        self.cursor.begin()
    }

    /// Exclusive bound of the readable window
    #[inline]
    pub fn end(&self) -> i64 {
        self.cursor.end()
    }

    /// The local window
    pub fn cursor(&self) -> &EventCursor<'a> {
        &self.cursor
    }

    /// Mark `position` consumed
    #[inline]
    pub fn publish(&mut self, position: i64) {
        self.cursor.publish(position);
    }

    /// Spin until `position` is published upstream and return the new `end`
    ///
    /// # Errors
    /// `Alert` if the barrier is alerted while waiting.
    pub fn wait_for(&mut self, position: i64) -> Result<i64> {
        self.wait_for_within(position, WaitLimit::none())
    }

    /// Bounded form of [`ReadCursor::wait_for`]
    ///
    /// # Errors
    /// `Timeout`, `Shutdown` or `Alert`, whichever `limit` trips.
    pub fn wait_for_within(&mut self, position: i64, limit: WaitLimit<'_>) -> Result<i64> {
        let minimum = self
            .cursor
            .state
            .barrier
            .wait_for_within(position, &self.strategy, limit)?;
        Ok(self.cursor.set_end(minimum.saturating_add(1)))
    }

    /// Extend the window from the current upstream positions without waiting
    pub fn check_end(&mut self) -> i64 {
        let minimum = self.cursor.state.barrier.minimum();
        self.cursor.set_end(minimum.saturating_add(1))
    }

    /// Block until at least one position is readable and return it
    ///
    /// # Errors
    /// As [`ReadCursor::wait_for_within`].
    pub fn next_within(&mut self, limit: WaitLimit<'_>) -> Result<i64> {
        if self.begin() == self.end() {
            self.wait_for_within(self.end(), limit)?;
        }
        Ok(self.begin())
    }

    /// Read the slot at `begin` and mark it consumed
    ///
    /// # Errors
    /// As [`ReadCursor::wait_for_within`].
    ///
    /// # Safety
    /// This reader must follow the write cursor of `ring` (directly or through
    /// upstream readers) so that its window never covers unpublished slots.
    pub unsafe fn read_with<T, const N: usize, R>(
        &mut self,
        ring: &RingBuffer<T, N>,
        limit: WaitLimit<'_>,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R> {
        let position = self.next_within(limit)?;
        let result = f(ring.get_unchecked(position));
        self.publish(position);
        Ok(result)
    }

    /// Non-blocking [`ReadCursor::read_with`]: `Ok(None)` if nothing is published
    ///
    /// # Safety
    /// Same contract as [`ReadCursor::read_with`].
    pub unsafe fn try_read_with<T, const N: usize, R>(
        &mut self,
        ring: &RingBuffer<T, N>,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        if self.begin() == self.end() && self.check_end() == self.begin() {
            return None;
        }
        let position = self.begin();
        let result = f(ring.get_unchecked(position));
        self.publish(position);
        Some(result)
    }
}

/// A producer's cursor
///
/// Its window ends one lap (`capacity`) past the slowest follower: a slot may
/// only be overwritten once every follower consumed its previous occupant.
#[derive(Debug)]
pub struct WriteCursor<'a, W = BusySpin> {
    cursor: EventCursor<'a>,
    capacity: i64,
    strategy: W,
    /// Whether the current window was granted while nothing was followed
    unbounded: bool,
}

fn checked_capacity(capacity: usize) -> Result<i64> {
    if !is_power_of_two(capacity) {
        return Err(DisruptorError::InvalidBufferSize(capacity));
    }
    i64::try_from(capacity).map_err(|_| DisruptorError::InvalidBufferSize(capacity))
}

impl<'a, W: WaitStrategy> WriteCursor<'a, W> {
    /// Attach a writer to `state` for a ring of `capacity` slots
    ///
    /// The writer publishes [`INITIAL_CURSOR_VALUE`] and starts with the whole
    /// ring available: `[0, capacity)`.
    ///
    /// # Errors
    /// `InvalidBufferSize` if `capacity` is not a power of two.
    pub fn new(state: &'a CursorState, capacity: usize, strategy: W) -> Result<Self> {
        let capacity = checked_capacity(capacity)?;
        state.sequence.set(INITIAL_CURSOR_VALUE);
        Ok(Self {
            cursor: EventCursor::new(state, 0, capacity),
            capacity,
            strategy,
            unbounded: false,
        })
    }

    /// Re-attach a writer to a state that has already published
    ///
    /// Continues after the published position; the window is recomputed from
    /// the followers instead of being assumed full.
    ///
    /// # Errors
    /// `InvalidBufferSize` if `capacity` is not a power of two.
    pub fn resume(state: &'a CursorState, capacity: usize, strategy: W) -> Result<Self> {
        let capacity = checked_capacity(capacity)?;
        let begin = state.sequence.get() + 1;
        let mut writer = Self {
            cursor: EventCursor::new(state, begin, begin),
            capacity,
            strategy,
            unbounded: false,
        };
        writer.check_end();
        Ok(writer)
    }

    /// Ring capacity this writer laps around
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Next position to write
    #[inline]
    pub fn begin(&self) -> i64 {
        self.cursor.begin()
    }

    /// Exclusive bound of the writable window
    #[inline]
    pub fn end(&self) -> i64 {
        self.cursor.end()
    }

    /// The local window
    pub fn cursor(&self) -> &EventCursor<'a> {
        &self.cursor
    }

    /// Make `position` visible to consumers
    #[inline]
    pub fn publish(&mut self, position: i64) {
        self.cursor.publish(position);
    }

    fn grant(&mut self, position: i64, minimum: i64) -> i64 {
        self.unbounded = minimum == UNBOUNDED;
        let end = if self.unbounded {
            position + self.capacity + 1
        } else {
            minimum + self.capacity + 1
        };
        self.cursor.set_end(end)
    }

    /// Spin until `position` may be overwritten and return the new `end`
    ///
    /// The slot at `position` last held `position - capacity`, so every
    /// follower must have published at least that.
    ///
    /// # Errors
    /// `Alert` if the barrier is alerted while waiting.
    pub fn wait_for(&mut self, position: i64) -> Result<i64> {
        self.wait_for_within(position, WaitLimit::none())
    }

    /// Bounded form of [`WriteCursor::wait_for`]
    ///
    /// # Errors
    /// `Timeout`, `Shutdown` or `Alert`, whichever `limit` trips.
    pub fn wait_for_within(&mut self, position: i64, limit: WaitLimit<'_>) -> Result<i64> {
        let minimum = self.cursor.state.barrier.wait_for_within(
            position - self.capacity,
            &self.strategy,
            limit,
        )?;
        Ok(self.grant(position, minimum))
    }

    /// Extend the window from the followers' current positions without waiting
    ///
    /// Grants up to `minimum + capacity + 1`, the bound `wait_for` uses, and
    /// not the tighter `minimum + capacity`. A follower at `minimum` has
    /// already consumed that position, so its slot may be written again.
    pub fn check_end(&mut self) -> i64 {
        let minimum = self.cursor.state.barrier.minimum();
        self.grant(self.begin(), minimum)
    }

    /// Block until at least one position is writable and return it
    ///
    /// # Errors
    /// As [`WriteCursor::wait_for_within`].
    ///
    /// A window granted while nothing was followed is only trusted for one
    /// position: a reader may have joined since, so it is recomputed first.
    pub fn next_within(&mut self, limit: WaitLimit<'_>) -> Result<i64> {
        if self.unbounded {
            self.check_end();
        }
        if self.begin() == self.end() {
            self.wait_for_within(self.end(), limit)?;
        }
        Ok(self.begin())
    }

    /// Fill the slot at `begin` through `f` and publish it
    ///
    /// Returns the published position.
    ///
    /// # Errors
    /// As [`WriteCursor::wait_for_within`].
    ///
    /// # Safety
    /// This must be the only writer of `ring`, and every reader of `ring` must
    /// be followed by this cursor, so its window never covers unread slots.
    pub unsafe fn write_with<T, const N: usize>(
        &mut self,
        ring: &RingBuffer<T, N>,
        limit: WaitLimit<'_>,
        f: impl FnOnce(&mut T),
    ) -> Result<i64> {
        debug_assert_eq!(N as i64, self.capacity);
        let position = self.next_within(limit)?;
        f(&mut *ring.get_mut_unchecked(position));
        self.publish(position);
        Ok(position)
    }

    /// Non-blocking [`WriteCursor::write_with`]: `None` if the ring is full
    ///
    /// # Safety
    /// Same contract as [`WriteCursor::write_with`].
    pub unsafe fn try_write_with<T, const N: usize>(
        &mut self,
        ring: &RingBuffer<T, N>,
        f: impl FnOnce(&mut T),
    ) -> Option<i64> {
        debug_assert_eq!(N as i64, self.capacity);
        if (self.unbounded || self.begin() == self.end()) && self.check_end() == self.begin() {
            return None;
        }
        let position = self.begin();
        f(&mut *ring.get_mut_unchecked(position));
        self.publish(position);
        Some(position)
    }
}
