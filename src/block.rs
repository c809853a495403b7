use crate::{AllocError, Allocator};

use core::alloc::Layout;
use core::cell::Cell;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ptr::{self, NonNull};

use alloc::boxed::Box;

use log::trace;

/// Counters and type-erased operations at the start of every control block.
///
/// Both block layouts are `#[repr(C)]` with the header as their first field,
/// so a `NonNull<BlockHeader>` can be cast back to the concrete block inside
/// the functions stored here. Handles only ever see the header.
#[repr(C)]
pub(crate) struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    value: unsafe fn(NonNull<BlockHeader>) -> NonNull<u8>,
    destroy_value: unsafe fn(NonNull<BlockHeader>),
    deallocate: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    fn new(
        value: unsafe fn(NonNull<BlockHeader>) -> NonNull<u8>,
        destroy_value: unsafe fn(NonNull<BlockHeader>),
        deallocate: unsafe fn(NonNull<BlockHeader>),
    ) -> BlockHeader {
        BlockHeader {
            strong: Cell::new(1),
            weak: Cell::new(0),
            value,
            destroy_value,
            deallocate,
        }
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    /// Address of the managed value, whichever layout backs the block.
    ///
    /// The block must not have been deallocated.
    pub(crate) unsafe fn value(block: NonNull<BlockHeader>) -> NonNull<u8> {
        (block.as_ref().value)(block)
    }

    /// Adds a strong reference. The caller must already hold one.
    pub(crate) unsafe fn acquire_strong(block: NonNull<BlockHeader>) {
        let header = block.as_ref();
        header.strong.set(increment(header.strong.get()));
    }

    /// Adds a strong reference unless the value has already been destroyed.
    pub(crate) unsafe fn try_acquire_strong(block: NonNull<BlockHeader>) -> bool {
        let header = block.as_ref();
        let strong = header.strong.get();
        if strong == 0 {
            return false;
        }

        header.strong.set(increment(strong));
        true
    }

    pub(crate) unsafe fn acquire_weak(block: NonNull<BlockHeader>) {
        let header = block.as_ref();
        header.weak.set(increment(header.weak.get()));
    }

    /// Drops one strong reference. Releasing the last one destroys the value,
    /// and frees the block too if no weak references remain.
    ///
    /// While the value's destructor runs the strong count already reads zero,
    /// and an extra weak reference keeps the block alive in case the
    /// destructor drops `Weak`s pointing back at it.
    pub(crate) unsafe fn release_strong(block: NonNull<BlockHeader>) {
        let header = block.as_ref();
        let strong = header.strong.get();
        debug_assert!(strong > 0);

        if strong > 1 {
            header.strong.set(strong - 1);
            return;
        }

        header.strong.set(0);
        header.weak.set(increment(header.weak.get()));
        let destroy_value = header.destroy_value;
        destroy_value(block);
        trace!("control block {:p}: value destroyed", block);

        BlockHeader::release_weak(block);
    }

    /// Drops one weak reference, freeing the block if it was the last
    /// reference of either kind.
    pub(crate) unsafe fn release_weak(block: NonNull<BlockHeader>) {
        let header = block.as_ref();
        let weak = header.weak.get();
        debug_assert!(weak > 0);
        header.weak.set(weak - 1);

        if weak == 1 && header.strong.get() == 0 {
            let deallocate = header.deallocate;
            deallocate(block);
            trace!("control block {:p}: deallocated", block);
        }
    }
}

#[inline]
fn increment(count: usize) -> usize {
    match count.checked_add(1) {
        Some(count) => count,
        None => overflow(),
    }
}

#[cold]
fn overflow() -> ! {
    panic!("reference count overflow");
}

/// A block together with a typed pointer into the value it manages.
///
/// The pointer usually addresses the value itself, but projected handles
/// may point at a field of it or at anything else the value borrows.
pub(crate) struct Link<T: ?Sized> {
    pub(crate) block: NonNull<BlockHeader>,
    pub(crate) ptr: NonNull<T>,
    /// Set once the link has gone through a projection. The block owns
    /// what `ptr` points at only while this is unset.
    pub(crate) projected: bool,
}

impl<T: ?Sized> Link<T> {
    /// Link to the value the block owns.
    pub(crate) fn owned(block: NonNull<BlockHeader>, ptr: NonNull<T>) -> Link<T> {
        Link {
            block,
            ptr,
            projected: false,
        }
    }
}

impl<T: ?Sized> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Link<T> {}

/// A control block whose value lives inline, in the same allocation.
#[repr(C)]
pub(crate) struct Embedded<T, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

// Returns the memory of a block whose value could not be built.
struct Unbuilt<'a, A: Allocator> {
    alloc: &'a A,
    ptr: NonNull<u8>,
    layout: Layout,
}

impl<'a, A: Allocator> Drop for Unbuilt<'a, A> {
    fn drop(&mut self) {
        unsafe {
            self.alloc.deallocate(self.ptr, self.layout);
        }
    }
}

impl<T, A: Allocator + 'static> Embedded<T, A> {
    /// Allocates a block from `alloc`, then builds the value into it with
    /// `init`. If `init` fails or unwinds, the block is returned to `alloc`.
    ///
    /// The returned block has a strong count of one.
    pub(crate) fn new<E, F>(alloc: A, init: F) -> Result<NonNull<BlockHeader>, E>
    where
        E: From<AllocError>,
        F: FnOnce() -> Result<T, E>,
    {
        let layout = Layout::new::<Self>();
        let raw = alloc.allocate(layout)?;

        let unbuilt = Unbuilt {
            alloc: &alloc,
            ptr: raw,
            layout,
        };
        let value = init()?;
        mem::forget(unbuilt);

        let block = raw.cast::<Self>().as_ptr();
        unsafe {
            ptr::addr_of_mut!((*block).header).write(BlockHeader::new(
                Self::value,
                Self::destroy_value,
                Self::deallocate,
            ));
            ptr::addr_of_mut!((*block).alloc).write(ManuallyDrop::new(alloc));
            ptr::addr_of_mut!((*block).value).write(MaybeUninit::new(value));
        }

        trace!("control block {:p}: embedded, {} bytes", raw, layout.size());
        Ok(raw.cast())
    }

    unsafe fn value(block: NonNull<BlockHeader>) -> NonNull<u8> {
        let block = block.cast::<Self>().as_ptr();
        NonNull::new_unchecked(ptr::addr_of_mut!((*block).value).cast::<u8>())
    }

    unsafe fn destroy_value(block: NonNull<BlockHeader>) {
        let block = block.cast::<Self>().as_ptr();
        ptr::drop_in_place(ptr::addr_of_mut!((*block).value).cast::<T>());
    }

    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        let raw = block.cast::<Self>().as_ptr();
        let alloc = ManuallyDrop::take(&mut *ptr::addr_of_mut!((*raw).alloc));
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}

/// How an adopted value is released once its last owner is gone.
///
/// Implemented for any `FnOnce(NonNull<T>)` and for the box cleanups below,
/// which name no `T` and so stay `'static` for any value type.
pub(crate) trait Cleanup<T: ?Sized> {
    unsafe fn cleanup(self, ptr: NonNull<T>);
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Cleanup<T> for F {
    unsafe fn cleanup(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// Releases a pointer obtained from `Box::into_raw`.
pub(crate) struct DropBox;

impl<T: ?Sized> Cleanup<T> for DropBox {
    unsafe fn cleanup(self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

/// Hands a pointer obtained from `Box::into_raw` back to a caller's closure
/// as a `Box`.
pub(crate) struct BoxCleanup<F>(pub(crate) F);

impl<T: ?Sized, F: FnOnce(Box<T>)> Cleanup<T> for BoxCleanup<F> {
    unsafe fn cleanup(self, ptr: NonNull<T>) {
        (self.0)(Box::from_raw(ptr.as_ptr()))
    }
}

/// A control block for a value that was allocated elsewhere.
#[repr(C)]
pub(crate) struct Adopted<T: ?Sized, D, A> {
    header: BlockHeader,
    ptr: NonNull<T>,
    cleanup: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T: ?Sized, D: Cleanup<T> + 'static, A: Allocator + 'static> Adopted<T, D, A> {
    /// Allocates a block taking over `ptr`. If the block cannot be allocated,
    /// `cleanup` is run on `ptr` before the error is returned.
    ///
    /// `ptr` must stay valid until `cleanup` is called on it.
    pub(crate) unsafe fn new(
        ptr: NonNull<T>,
        cleanup: D,
        alloc: A,
    ) -> Result<NonNull<BlockHeader>, AllocError> {
        let layout = Layout::new::<Self>();
        let raw = match alloc.allocate(layout) {
            Ok(raw) => raw,
            Err(err) => {
                cleanup.cleanup(ptr);
                return Err(err);
            }
        };

        raw.cast::<Self>().as_ptr().write(Adopted {
            header: BlockHeader::new(Self::value, Self::destroy_value, Self::deallocate),
            ptr,
            cleanup: ManuallyDrop::new(cleanup),
            alloc: ManuallyDrop::new(alloc),
        });

        trace!("control block {:p}: adopted {:p}", raw, ptr.cast::<u8>());
        Ok(raw.cast())
    }

    unsafe fn value(block: NonNull<BlockHeader>) -> NonNull<u8> {
        (*block.cast::<Self>().as_ptr()).ptr.cast()
    }

    unsafe fn destroy_value(block: NonNull<BlockHeader>) {
        let raw = block.cast::<Self>().as_ptr();
        let cleanup = ManuallyDrop::take(&mut *ptr::addr_of_mut!((*raw).cleanup));
        cleanup.cleanup((*raw).ptr);
    }

    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        let raw = block.cast::<Self>().as_ptr();
        let alloc = ManuallyDrop::take(&mut *ptr::addr_of_mut!((*raw).alloc));
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}
