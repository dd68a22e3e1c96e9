//! Ring Buffer Implementation
//!
//! This module provides the fixed-capacity circular storage shared by all
//! cursors. Slots are stored inline (no heap pointer) so the buffer can live
//! inside a region mapped by several processes.

use std::cell::UnsafeCell;

/// The core ring buffer for storing events
///
/// # Type Parameters
/// * `T` - The event type stored in the buffer
/// * `N` - The capacity, checked at compile time to be a power of two
#[repr(C)]
pub struct RingBuffer<T, const N: usize> {
    slots: [UnsafeCell<T>; N],
}

impl<T, const N: usize> RingBuffer<T, N> {
    const VALID_CAPACITY: () = assert!(
        N.is_power_of_two(),
        "ring buffer capacity must be a power of two"
    );

    /// Mask for fast modulo operations (N - 1)
    const INDEX_MASK: i64 = N as i64 - 1;

    /// Create a ring buffer with every slot set to `T::default()`
    pub fn new() -> Self
    where
        T: Default,
    {
        Self::from_fn(|_| T::default())
    }

    /// Create a ring buffer, initialising slot `i` with `factory(i)`
    pub fn from_fn<F>(mut factory: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        Self {
            slots: std::array::from_fn(|i| UnsafeCell::new(factory(i))),
        }
    }

    /// Initialise a ring in place with every slot set to `T::default()`
    ///
    /// # Safety
    /// `ptr` must be valid for writes and aligned for `Self`.
    pub unsafe fn init_in_place(ptr: *mut Self)
    where
        T: Default,
    {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        let slots = std::ptr::addr_of_mut!((*ptr).slots) as *mut UnsafeCell<T>;
        for index in 0..N {
            slots.add(index).write(UnsafeCell::new(T::default()));
        }
    }

    /// Number of slots in the ring
    pub const fn capacity() -> usize {
        N
    }

    /// Physical slot index for a position
    #[inline]
    pub fn index(sequence: i64) -> usize {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        (sequence & Self::INDEX_MASK) as usize
    }

    /// Get a reference to the event at the specified sequence
    ///
    /// # Safety
    /// No writer may be accessing the same slot concurrently; callers only read
    /// positions inside a window granted by a read cursor.
    #[inline]
    pub unsafe fn get_unchecked(&self, sequence: i64) -> &T {
        let slot = self.slots.get_unchecked(Self::index(sequence));
        &*slot.get()
    }

    /// Get a raw mutable pointer to the event at the specified sequence
    ///
    /// # Safety
    /// The caller must hold the only access to this slot, i.e. the position
    /// is inside a window granted by the single write cursor of this ring.
    #[inline]
    pub unsafe fn get_mut_unchecked(&self, sequence: i64) -> *mut T {
        let slot = self.slots.get_unchecked(Self::index(sequence));
        slot.get()
    }

    /// Get a mutable reference to the event at the specified sequence
    pub fn get_mut(&mut self, sequence: i64) -> &mut T {
        self.slots[Self::index(sequence)].get_mut()
    }
}

impl<T: Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for RingBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer").field("capacity", &N).finish()
    }
}

// SAFETY: RingBuffer<T, N> is Sync when T is Send + Sync because:
// - Slots are only written inside a window granted to the single write cursor
// - Readers only access positions the writer published with release ordering
// - Those positions are observed through acquire loads before any slot read
unsafe impl<T: Send + Sync, const N: usize> Sync for RingBuffer<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_creation() {
        let buffer = RingBuffer::<i64, 8>::new();
        assert_eq!(RingBuffer::<i64, 8>::capacity(), 8);
        assert_eq!(unsafe { *buffer.get_unchecked(3) }, 0);
    }

    #[test]
    fn test_from_fn_initialises_each_slot() {
        let buffer = RingBuffer::<usize, 4>::from_fn(|i| i * 10);
        for pos in 0..4 {
            assert_eq!(unsafe { *buffer.get_unchecked(pos) }, pos as usize * 10);
        }
    }

    #[test]
    fn test_index_wraps() {
        assert_eq!(RingBuffer::<u8, 4>::index(0), 0);
        assert_eq!(RingBuffer::<u8, 4>::index(3), 3);
        assert_eq!(RingBuffer::<u8, 4>::index(4), 0);
        assert_eq!(RingBuffer::<u8, 4>::index(5), 1);
        assert_eq!(RingBuffer::<u8, 4>::index(-1), 3);
    }

    #[test]
    fn test_positions_one_lap_apart_share_a_slot() {
        let mut buffer = RingBuffer::<i64, 4>::new();
        *buffer.get_mut(1) = 11;
        assert_eq!(*buffer.get_mut(5), 11);

        unsafe { *buffer.get_mut_unchecked(9) = 99 };
        assert_eq!(unsafe { *buffer.get_unchecked(1) }, 99);
    }
}
