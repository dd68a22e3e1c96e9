//! `shmcast` - Single-producer multicast ring for shared memory
//!
//! A disruptor-style sequencing core in which one writer publishes into a
//! fixed power-of-two ring and every reader observes the full stream. All
//! coordination state lives inside one `#[repr(C)]` block and refers to itself
//! through relative offsets, so it can be mapped by several processes at
//! different base addresses.
//!
//! ## Features
//!
//! - **Lock-free**: Uses only atomic loads and stores with acquire/release ordering
//! - **Zero-allocation**: The ring and every cursor are laid out up front
//! - **Mechanical sympathy**: Sequences are padded to their own cache line
//! - **Multicast**: Each reader sees every position; the writer waits for the slowest
//! - **Relocatable**: No absolute pointers anywhere in the shared block
//!
//! ## Quick Start
//!
//! ```rust
//! use shmcast::disruptor::{BusySpin, SharedRegion};
//!
//! let region = SharedRegion::<u64, 8, 4>::new();
//! let mut first = region.join(BusySpin).unwrap();
//! let mut second = region.join(BusySpin).unwrap();
//! let mut producer = region.open_writer(BusySpin).unwrap();
//!
//! for value in 1..=3 {
//!     producer.publish(value).unwrap();
//! }
//!
//! for expected in 1..=3 {
//!     assert_eq!(first.recv().unwrap(), expected);
//!     assert_eq!(second.recv().unwrap(), expected);
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`Sequence`**: Cache-line padded position counter
//! - **`RingBuffer`**: Inline power-of-two slot array
//! - **`SequenceBarrier`**: Up to eight followed sequences and a cached minimum
//! - **`ReadCursor` / `WriteCursor`**: Local `[begin, end)` windows over a shared `CursorState`
//! - **`SharedRegion`**: The relocatable block plus the join and close protocol
//! - **`WaitStrategy`**: Spin-only ways of waiting between polls
//! - **`ipc::MappedRegion`**: A region inside a named POSIX shared memory segment

pub mod disruptor;
pub mod ipc;

// Re-export the main types for convenience
pub use disruptor::{
    // Utility functions
    is_power_of_two,
    // Participants
    Consumer,
    // Cursors
    CursorState,
    // Error types
    DisruptorError,
    Producer,
    ReadCursor,
    RelativePtr,
    Result,
    RingBuffer,
    Sequence,
    SequenceBarrier,
    SharedRegion,
    WaitLimit,
    // Wait strategies
    WaitStrategy,
    WriteCursor,
    // Constants
    INITIAL_CURSOR_VALUE,
    MAX_FOLLOWERS,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the version of the `shmcast` library
#[must_use]
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
