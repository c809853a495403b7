use crate::block::{BlockHeader, Link};
use crate::Shared;

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr;

/// A non-owning observer of a value managed by [`Shared`].
///
/// A `Weak` does not keep the value alive, only the control block that
/// records whether the value is still alive. It can be turned back into an
/// owner with [`lock`] while at least one [`Shared`] exists.
///
/// # Examples
/// ```
/// use sharedrop::Shared;
///
/// let owner = Shared::new(10);
/// let observer = Shared::downgrade(&owner);
/// assert!(!observer.expired());
/// assert_eq!(*observer.lock(), 10);
///
/// drop(owner);
/// assert!(observer.expired());
/// assert!(observer.upgrade().is_none());
/// ```
///
/// [`lock`]: Weak::lock
pub struct Weak<T: ?Sized> {
    link: Option<Link<T>>,
    marker: PhantomData<T>,
}

impl<T: ?Sized> Weak<T> {
    /// Creates a `Weak` that observes nothing. It is always expired.
    pub const fn new() -> Weak<T> {
        Weak {
            link: None,
            marker: PhantomData,
        }
    }

    /// Wraps a link whose weak reference the caller hands over.
    pub(crate) unsafe fn from_link(link: Link<T>) -> Weak<T> {
        Weak {
            link: Some(link),
            marker: PhantomData,
        }
    }

    /// Returns `true` if this `Weak` observes nothing or its value has been
    /// dropped.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Creates a new owner of the observed value, or a null [`Shared`] if the
    /// value has already been dropped.
    pub fn lock(&self) -> Shared<T> {
        match self.link {
            Some(link) if unsafe { BlockHeader::try_acquire_strong(link.block) } => unsafe {
                Shared::from_link(link)
            },
            _ => Shared::null(),
        }
    }

    /// Like [`lock`], but returns `None` instead of a null [`Shared`].
    ///
    /// [`lock`]: Weak::lock
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let shared = self.lock();
        if Shared::is_null(&shared) {
            None
        } else {
            Some(shared)
        }
    }

    /// Stops observing, leaving this `Weak` empty. Frees the control block if
    /// this was the last reference to it.
    pub fn reset(&mut self) {
        if let Some(link) = self.link.take() {
            unsafe { BlockHeader::release_weak(link.block) };
        }
    }

    /// Moves the observation out of `self`, leaving it empty.
    pub fn take(&mut self) -> Weak<T> {
        mem::take(self)
    }

    /// Number of [`Shared`] owners of the observed value; 0 once expired.
    pub fn use_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { link.block.as_ref().strong() })
    }

    /// Number of `Weak`s observing the value, including this one.
    pub fn weak_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { link.block.as_ref().weak() })
    }

    /// Returns `true` if both observe the same address in the same control
    /// block, or if both are empty.
    pub fn ptr_eq(&self, other: &Weak<T>) -> bool {
        match (self.link, other.link) {
            (None, None) => true,
            (Some(a), Some(b)) => a.block == b.block && ptr::addr_eq(a.ptr.as_ptr(), b.ptr.as_ptr()),
            _ => false,
        }
    }

    /// Returns a reference to the observed value without checking that it is
    /// still alive.
    ///
    /// # Safety
    ///
    /// `self` must observe a value, and that value must not have expired and
    /// must stay alive for as long as the returned reference is used. An
    /// empty `Weak` counts as expired. Prefer [`lock`], which holds the
    /// value alive.
    ///
    /// Debug builds assert that the value has not expired.
    ///
    /// [`lock`]: Weak::lock
    pub unsafe fn get_unchecked(&self) -> &T {
        debug_assert!(!self.expired(), "dereferenced an expired `Weak`");
        &*self.link.unwrap_unchecked().ptr.as_ptr()
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            unsafe { BlockHeader::acquire_weak(link.block) };
        }

        Weak {
            link: self.link,
            marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.ptr_eq(source) {
            return;
        }

        let mut copy = source.clone();
        mem::swap(self, &mut copy);
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}
