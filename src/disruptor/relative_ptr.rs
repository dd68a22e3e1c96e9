//! Self-relative pointers
//!
//! A [`RelativePtr`] stores the distance in bytes from its own address to its
//! target instead of the target's address. As long as the pointer and the target
//! live in the same region, the reference survives that region being mapped at a
//! different base address in another process.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Offset value reserved for "points nowhere"
const NULL_OFFSET: isize = 0;

/// An atomic, relocation-tolerant, non-owning reference to a `T`
#[repr(transparent)]
pub struct RelativePtr<T> {
    offset: AtomicIsize,
    _marker: PhantomData<*const T>,
}

// SAFETY: the pointer only holds an integer offset; resolving it is unsafe and
// hands out shared references, which is fine to do from any thread if T: Sync.
unsafe impl<T: Sync> Send for RelativePtr<T> {}
unsafe impl<T: Sync> Sync for RelativePtr<T> {}

impl<T> RelativePtr<T> {
    /// A pointer that resolves to nothing
    pub const fn null() -> Self {
        Self {
            offset: AtomicIsize::new(NULL_OFFSET),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn base(&self) -> isize {
        self as *const Self as isize
    }

    #[inline]
    fn offset_to(&self, target: &T) -> isize {
        (target as *const T as isize).wrapping_sub(self.base())
    }

    /// Whether this pointer currently refers to anything
    #[inline]
    pub fn is_null(&self) -> bool {
        self.offset.load(Ordering::Acquire) == NULL_OFFSET
    }

    /// Point at `target`, replacing any previous target
    pub fn set(&self, target: &T) {
        self.offset.store(self.offset_to(target), Ordering::Release);
    }

    /// Point at `target` only if this pointer is currently null
    ///
    /// Returns `true` if the pointer was claimed.
    pub fn try_set(&self, target: &T) -> bool {
        self.offset
            .compare_exchange(
                NULL_OFFSET,
                self.offset_to(target),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Reset to null
    pub fn clear(&self) {
        self.offset.store(NULL_OFFSET, Ordering::Release);
    }

    /// Whether this pointer currently refers to `target`
    ///
    /// Compares offsets only, so it never dereferences anything.
    pub fn points_to(&self, target: &T) -> bool {
        let offset = self.offset.load(Ordering::Acquire);
        offset != NULL_OFFSET && offset == self.offset_to(target)
    }

    /// Resolve the pointer against its current address
    ///
    /// # Safety
    /// The target must still be alive and must have moved together with this
    /// pointer (same region, same relative layout) since it was set.
    #[inline]
    pub unsafe fn get(&self) -> Option<&T> {
        let offset = self.offset.load(Ordering::Acquire);
        if offset == NULL_OFFSET {
            return None;
        }
        let address = self.base().wrapping_add(offset);
        Some(&*(address as *const T))
    }
}

impl<T> Default for RelativePtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for RelativePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelativePtr")
            .field("offset", &self.offset.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{size_of, MaybeUninit};
    use std::ptr;

    #[repr(C)]
    struct Pair {
        link: RelativePtr<u64>,
        value: u64,
    }

    #[test]
    fn test_null_by_default() {
        let p = RelativePtr::<u64>::null();
        assert!(p.is_null());
        assert!(unsafe { p.get() }.is_none());
    }

    #[test]
    fn test_set_and_resolve() {
        let pair = Pair {
            link: RelativePtr::null(),
            value: 7,
        };
        pair.link.set(&pair.value);

        assert!(!pair.link.is_null());
        assert!(pair.link.points_to(&pair.value));
        assert_eq!(unsafe { pair.link.get() }.copied(), Some(7));

        pair.link.clear();
        assert!(pair.link.is_null());
        assert!(!pair.link.points_to(&pair.value));
    }

    #[test]
    fn test_try_set_only_claims_null() {
        let a = 1u64;
        let b = 2u64;
        let p = RelativePtr::<u64>::null();

        assert!(p.try_set(&a));
        assert!(!p.try_set(&b));
        assert!(p.points_to(&a));
    }

    #[test]
    fn test_survives_relocation() {
        let original = Pair {
            link: RelativePtr::null(),
            value: 41,
        };
        original.link.set(&original.value);

        // Byte-copy the pair elsewhere, the way a second mapping would see it
        let mut moved = MaybeUninit::<Pair>::uninit();
        let moved = unsafe {
            ptr::copy_nonoverlapping(
                &original as *const Pair as *const u8,
                moved.as_mut_ptr() as *mut u8,
                size_of::<Pair>(),
            );
            moved.assume_init()
        };

        assert!(moved.link.points_to(&moved.value));
        assert!(!moved.link.points_to(&original.value));
        let resolved = unsafe { moved.link.get() }.unwrap();
        assert!(ptr::eq(resolved, &moved.value));
    }
}
