//! A slice wrapper that allows disjoint writes from multiple threads.

use std::cell::UnsafeCell;

/// Shared view over a mutable byte slice for parallel chunk assembly.
///
/// Cloning the view hands every worker the whole output buffer; the caller
/// must guarantee that no two threads write the same element. The chunked
/// reader satisfies this because chunk tiles are pairwise disjoint and
/// every copy targets only its own tile's image.
#[derive(Copy, Clone)]
pub(crate) struct CellSlice<'a, T>(&'a [UnsafeCell<T>]);

unsafe impl<T: Send + Sync> Send for CellSlice<'_, T> {}
unsafe impl<T: Send + Sync> Sync for CellSlice<'_, T> {}

impl<'a, T: Copy> CellSlice<'a, T> {
    pub(crate) fn new(slice: &'a mut [T]) -> Self {
        let ptr = slice as *mut [T] as *const [UnsafeCell<T>];
        // SAFETY: UnsafeCell<T> has the same layout as T, and the exclusive
        // borrow guarantees no other access for 'a.
        Self(unsafe { &*ptr })
    }

    /// Obtain a mutable view of the whole slice.
    ///
    /// # Safety
    ///
    /// May be called from several threads at once; callers must never write
    /// the same index from more than one thread.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get(&self) -> &mut [T] {
        let ptr = self.0.as_ptr() as *mut T;
        std::slice::from_raw_parts_mut(ptr, self.0.len())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
