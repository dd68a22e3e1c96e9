//! Sequence implementation for the Disruptor
//!
//! A Sequence is the published position of exactly one cursor. Its owner stores
//! with release ordering, everyone else loads with acquire ordering; there is no
//! read-modify-write primitive because a sequence never has two writers.

use std::sync::atomic::{AtomicI64, Ordering};

/// Cache line size for padding to prevent false sharing
const CACHE_LINE_SIZE: usize = 64;

/// A sequence number that prevents false sharing
///
/// The atomic value is padded out to a full cache line so that sequences owned
/// by different participants never share one, even when placed back to back in
/// a shared region.
#[repr(C, align(64))]
pub struct Sequence {
    /// The actual sequence value
    value: AtomicI64,
    /// Padding to prevent false sharing (cache line size - size of AtomicI64)
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
}

impl Sequence {
    /// Create a new sequence with the given initial value
    pub const fn new(initial_value: i64) -> Self {
        Self {
            value: AtomicI64::new(initial_value),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
        }
    }

    /// Get the current sequence value (acquire load)
    ///
    /// Every write the owner made before the matching [`Sequence::set`] is
    /// visible once this returns the stored value.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the sequence value (release store)
    ///
    /// Only the owning cursor may call this, and values must never regress.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Get the minimum value across a set of sequences, or `default` if empty
    pub fn get_minimum_sequence<'a, I>(sequences: I, default: i64) -> i64
    where
        I: IntoIterator<Item = &'a Sequence>,
    {
        sequences
            .into_iter()
            .map(Sequence::get)
            .min()
            .unwrap_or(default)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(crate::disruptor::INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("value", &self.get())
            .finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}
