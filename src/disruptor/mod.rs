//! Shmcast Disruptor Implementation
//!
//! This module provides the sequencing core: padded atomic sequences, a
//! power-of-two ring, sequence barriers gated on a bounded follower set and the
//! read/write cursor pair built on top of them. Every cross-structure reference
//! is stored as a self-relative offset, so the whole graph stays valid when the
//! hosting region is mapped at different base addresses.

pub mod event_cursor;
pub mod relative_ptr;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod shared_region;
pub mod thread_management;
pub mod wait_strategy;


pub use event_cursor::{CursorState, EventCursor, ReadCursor, WriteCursor};
pub use relative_ptr::RelativePtr;
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequence_barrier::{SequenceBarrier, MAX_FOLLOWERS};
pub use shared_region::{Consumer, Producer, SharedRegion};
pub use thread_management::{available_cores, ManagedThread, ThreadContext};
pub use wait_strategy::{BackoffSpin, BusySpin, BusySpinWithHint, WaitLimit, WaitStrategy};

/// The initial cursor value for sequences
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Barrier minimum reported when no follower imposes a lower bound
pub const UNBOUNDED: i64 = i64::MAX;

/// Errors that can occur in the Disruptor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisruptorError {
    #[error("Buffer size must be a power of 2, got: {0}")]
    InvalidBufferSize(usize),

    #[error("Sequence barrier is full ({capacity} followers)")]
    BarrierFull { capacity: usize },

    #[error("Sequence is already followed by this barrier")]
    AlreadyFollowing,

    #[error("Sequence is not followed by this barrier")]
    NotFollowing,

    #[error("A cursor cannot follow its own sequence")]
    SelfFollow,

    #[error("Timeout waiting for sequence")]
    Timeout,

    #[error("Sequence barrier was alerted")]
    Alert,

    #[error("Disruptor has been shut down")]
    Shutdown,

    #[error("No free reader slot ({capacity} in use)")]
    NoFreeSlot { capacity: usize },

    #[error("Writer cursor is already claimed")]
    WriterInUse,
}

pub type Result<T> = std::result::Result<T, DisruptorError>;

/// Utility function to check if a number is a power of 2
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}
