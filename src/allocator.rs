use crate::AllocError;

use core::alloc::Layout;
use core::ptr::NonNull;

/// A source of memory for control blocks.
///
/// The allocator passed to a constructor is moved into the control block it
/// allocates and is used again to free that block once the last [`Shared`]
/// and [`Weak`] referencing it are gone.
///
/// # Safety
///
/// Memory returned by `allocate` must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and must stay valid
/// until it is passed to `deallocate` on this allocator or on a clone of it.
///
/// [`Shared`]: crate::Shared
/// [`Weak`]: crate::Weak
pub unsafe trait Allocator {
    /// Allocates a block of memory described by `layout`. `layout` never has
    /// a size of zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block previously returned by [`allocate`] with the same
    /// `layout`.
    ///
    /// [`allocate`]: Allocator::allocate
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global heap, as used by `Box`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0);
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError { layout })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::alloc::dealloc(ptr.as_ptr(), layout);
    }
}
