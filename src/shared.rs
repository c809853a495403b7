use crate::block::{Adopted, BlockHeader, BoxCleanup, Cleanup, DropBox, Link};
use crate::{factory, AllocError, Allocator, Global, Weak};

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr::{self, NonNull};

use alloc::alloc::handle_alloc_error;
use alloc::boxed::Box;

/// A reference-counted pointer owning a shared value.
///
/// Cloning a `Shared` adds an owner; dropping one (or calling
/// [`Shared::reset`]) removes it. The value is dropped when the last owner
/// goes away. The control block holding the counts is freed once there are
/// no [`Weak`] observers left either.
///
/// A `Shared` may also be null, as produced by [`Shared::null`], by
/// [`Shared::take`], or by [`Weak::lock`] on an expired observer.
///
/// Like `Rc`, the functionality of `Shared` is exposed through associated
/// functions rather than methods, so that it does not shadow methods of the
/// value it dereferences to.
///
/// # Examples
/// ```
/// use sharedrop::Shared;
///
/// let a = Shared::new(String::from("shared"));
/// let b = a.clone();
/// assert_eq!(Shared::use_count(&a), 2);
/// assert_eq!(*b, "shared");
///
/// drop(a);
/// assert_eq!(Shared::use_count(&b), 1);
/// ```
pub struct Shared<T: ?Sized> {
    link: Option<Link<T>>,
    marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Allocates a control block with `value` stored inline, using the
    /// global allocator.
    ///
    /// See [`factory::make`]. A value implementing [`SharedFromSelf`] is not
    /// observed by this owner; use [`Shared::new_observed`] for that, or call
    /// [`Shared::observe`] afterwards.
    ///
    /// [`SharedFromSelf`]: crate::SharedFromSelf
    pub fn new(value: T) -> Shared<T> {
        factory::make(value)
    }

    /// Allocates a control block with `value` stored inline, using `alloc`.
    ///
    /// Allocation failure is reported through [`handle_alloc_error`]; use
    /// [`Shared::try_new_in`] to get an error instead.
    pub fn new_in<A: Allocator + 'static>(value: T, alloc: A) -> Shared<T> {
        match factory::allocate(alloc, value) {
            Ok(shared) => shared,
            Err(err) => handle_alloc_error(err.layout),
        }
    }

    /// Like [`Shared::new_in`], but returns an error if the allocator fails.
    pub fn try_new_in<A: Allocator + 'static>(value: T, alloc: A) -> Result<Shared<T>, AllocError> {
        factory::allocate(alloc, value)
    }
}

impl<T: ?Sized> Shared<T> {
    /// Creates a `Shared` that owns nothing.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::Shared;
    ///
    /// let null = Shared::<i32>::null();
    /// assert!(Shared::is_null(&null));
    /// assert_eq!(Shared::use_count(&null), 0);
    /// ```
    pub const fn null() -> Shared<T> {
        Shared {
            link: None,
            marker: PhantomData,
        }
    }

    /// Takes ownership of a boxed value. The box is dropped normally once
    /// the last owner is gone.
    ///
    /// The value stays where the box put it; only the control block is
    /// allocated here.
    pub fn from_box(value: Box<T>) -> Shared<T> {
        let ptr = NonNull::from(Box::leak(value));
        unsafe { Shared::adopt(ptr, DropBox, Global) }
    }

    /// Takes ownership of a boxed value, handing it to `cleanup` instead of
    /// dropping it once the last owner is gone.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::Shared;
    /// use std::rc::Rc;
    /// use std::cell::Cell;
    ///
    /// let released = Rc::new(Cell::new(false));
    /// let flag = released.clone();
    /// let shared = Shared::from_box_with(Box::new(5), move |value: Box<i32>| {
    ///     assert_eq!(*value, 5);
    ///     flag.set(true);
    /// });
    ///
    /// let copy = shared.clone();
    /// drop(shared);
    /// assert!(!released.get());
    /// drop(copy);
    /// assert!(released.get());
    /// ```
    pub fn from_box_with<F>(value: Box<T>, cleanup: F) -> Shared<T>
    where
        F: FnOnce(Box<T>) + 'static,
    {
        let ptr = NonNull::from(Box::leak(value));
        unsafe { Shared::adopt(ptr, BoxCleanup(cleanup), Global) }
    }

    /// Takes ownership of a value allocated by other means. `cleanup` is
    /// called with `ptr` once the last owner is gone; the control block
    /// itself is allocated from `alloc`.
    ///
    /// If the control block cannot be allocated, `cleanup(ptr)` is called and
    /// [`handle_alloc_error`] is invoked.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads until `cleanup` is called with it, and
    /// must not be mutated through other pointers in the meantime.
    pub unsafe fn from_raw_in<D, A>(ptr: NonNull<T>, cleanup: D, alloc: A) -> Shared<T>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: Allocator + 'static,
    {
        Shared::adopt(ptr, cleanup, alloc)
    }

    /// Like [`Shared::from_raw_in`], but returns an error if the control
    /// block cannot be allocated. `cleanup(ptr)` has been called by then.
    ///
    /// # Safety
    ///
    /// See [`Shared::from_raw_in`].
    pub unsafe fn try_from_raw_in<D, A>(
        ptr: NonNull<T>,
        cleanup: D,
        alloc: A,
    ) -> Result<Shared<T>, AllocError>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: Allocator + 'static,
    {
        Shared::try_adopt(ptr, cleanup, alloc)
    }

    unsafe fn adopt<D, A>(ptr: NonNull<T>, cleanup: D, alloc: A) -> Shared<T>
    where
        D: Cleanup<T> + 'static,
        A: Allocator + 'static,
    {
        match Shared::try_adopt(ptr, cleanup, alloc) {
            Ok(shared) => shared,
            Err(err) => handle_alloc_error(err.layout),
        }
    }

    unsafe fn try_adopt<D, A>(ptr: NonNull<T>, cleanup: D, alloc: A) -> Result<Shared<T>, AllocError>
    where
        D: Cleanup<T> + 'static,
        A: Allocator + 'static,
    {
        let block = Adopted::new(ptr, cleanup, alloc)?;
        Ok(Shared::from_link(Link::owned(block, ptr)))
    }

    /// Wraps a link whose strong reference the caller hands over.
    pub(crate) unsafe fn from_link(link: Link<T>) -> Shared<T> {
        Shared {
            link: Some(link),
            marker: PhantomData,
        }
    }

    /// Returns `true` if `this` owns nothing.
    pub fn is_null(this: &Self) -> bool {
        this.link.is_none()
    }

    /// Returns a reference to the value, or `None` for a null `Shared`.
    pub fn get(this: &Self) -> Option<&T> {
        this.link.map(|link| unsafe { &*link.ptr.as_ptr() })
    }

    /// Returns a mutable reference to the value if `this` is its only owner
    /// and no [`Weak`] observes it.
    ///
    /// Handles produced by [`Shared::map`] or [`Shared::clone_map`] always
    /// return `None`, since the projected reference may point at data the
    /// value only borrows.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::Shared;
    ///
    /// let mut a = Shared::new(1);
    /// *Shared::get_mut(&mut a).unwrap() += 1;
    ///
    /// let b = a.clone();
    /// assert!(Shared::get_mut(&mut a).is_none());
    /// drop(b);
    /// assert_eq!(*a, 2);
    /// ```
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let link = this.link?;
        let header = unsafe { link.block.as_ref() };
        if !link.projected && header.strong() == 1 && header.weak() == 0 {
            Some(unsafe { &mut *link.ptr.as_ptr() })
        } else {
            None
        }
    }

    /// Returns the address of the value, or `None` for a null `Shared`.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.link.map(|link| link.ptr)
    }

    /// Number of `Shared`s owning the value, or 0 for a null `Shared`.
    pub fn use_count(this: &Self) -> usize {
        this.link
            .map_or(0, |link| unsafe { link.block.as_ref().strong() })
    }

    /// Number of [`Weak`]s observing the value, or 0 for a null `Shared`.
    pub fn weak_count(this: &Self) -> usize {
        this.link
            .map_or(0, |link| unsafe { link.block.as_ref().weak() })
    }

    /// Returns `true` if both handles share a control block and point at the
    /// same address, or if both are null.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.link, other.link) {
            (None, None) => true,
            (Some(a), Some(b)) => a.block == b.block && ptr::addr_eq(a.ptr.as_ptr(), b.ptr.as_ptr()),
            _ => false,
        }
    }

    /// Creates a [`Weak`] observer of the value. Downgrading a null `Shared`
    /// gives a null `Weak`.
    pub fn downgrade(this: &Self) -> Weak<T> {
        if let Some(link) = this.link {
            unsafe {
                BlockHeader::acquire_weak(link.block);
                Weak::from_link(link)
            }
        } else {
            Weak::new()
        }
    }

    /// Moves ownership out of `this`, leaving it null. The counts do not
    /// change.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::Shared;
    ///
    /// let mut a = Shared::new(3);
    /// let b = Shared::take(&mut a);
    /// assert!(Shared::is_null(&a));
    /// assert_eq!(Shared::use_count(&b), 1);
    /// ```
    pub fn take(this: &mut Self) -> Shared<T> {
        mem::take(this)
    }

    /// Releases the value owned by `this`, if any, leaving `this` null.
    ///
    /// If `this` was the last owner, the value is dropped, and the control
    /// block is freed as well when no [`Weak`] observes it.
    pub fn reset(this: &mut Self) {
        if let Some(link) = this.link.take() {
            unsafe { BlockHeader::release_strong(link.block) };
        }
    }

    /// Replaces the value owned by `this` with a newly adopted box.
    ///
    /// The new control block is allocated before the old value is
    /// released.
    pub fn reset_to(this: &mut Self, value: Box<T>) {
        *this = Shared::from_box(value);
    }

    /// Converts `this` into a handle to a part of the value, such as a field
    /// or a trait object, sharing the same control block. The strong count
    /// does not change.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::Shared;
    /// use std::fmt::Display;
    ///
    /// struct Pair { left: u8, right: &'static str }
    ///
    /// let pair = Shared::new(Pair { left: 1, right: "two" });
    /// let right = Shared::clone_map(&pair, |pair| &pair.right);
    /// let shown = Shared::map::<dyn Display, _>(pair, |pair| &pair.left);
    ///
    /// assert_eq!(Shared::use_count(&right), 2);
    /// assert_eq!(*right, "two");
    /// assert_eq!(shown.to_string(), "1");
    /// ```
    pub fn map<U, F>(this: Shared<T>, f: F) -> Shared<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let Some(link) = this.link else {
            return Shared::null();
        };

        let ptr = NonNull::from(f(unsafe { link.ptr.as_ref() }));
        mem::forget(this);
        unsafe {
            Shared::from_link(Link {
                block: link.block,
                ptr,
                projected: true,
            })
        }
    }

    /// Like [`Shared::map`], but adds an owner instead of consuming `this`.
    pub fn clone_map<U, F>(this: &Shared<T>, f: F) -> Shared<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        Shared::map(this.clone(), f)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            unsafe { BlockHeader::acquire_strong(link.block) };
        }

        Shared {
            link: self.link,
            marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if Shared::ptr_eq(self, source) {
            return;
        }

        let mut copy = source.clone();
        mem::swap(self, &mut copy);
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        Shared::reset(self);
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Shared::null()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the `Shared` is null.
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match Shared::get(self) {
            Some(value) => value,
            None => null_deref(),
        }
    }
}

#[cold]
#[track_caller]
fn null_deref() -> ! {
    panic!("dereferenced a null `Shared`");
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Shared::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Shared::get(self) == Shared::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for Shared<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::as_ptr(self) {
            Some(ptr) => fmt::Pointer::fmt(&ptr.cast::<u8>(), f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T: ?Sized> stable_deref_trait::StableDeref for Shared<T> {}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T: ?Sized> stable_deref_trait::CloneStableDeref for Shared<T> {}
