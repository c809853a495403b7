use crate::{AllocError, Allocator, NoOwnerError, Shared, Weak};

use core::cell::Cell;
use core::fmt;
use core::ptr::NonNull;

use alloc::boxed::Box;

/// A slot for a [`Weak`] reference from a value back to itself.
///
/// Embed a `SelfObserver` in a type and implement [`SharedFromSelf`] for it.
/// When the value is placed under shared ownership through one of the
/// `_observed` constructors, or when [`Shared::observe`] is called on an
/// owner, the slot is pointed at the control block, and the value can then
/// hand out owners of itself. The plain constructors such as [`Shared::new`]
/// leave the slot empty.
///
/// The slot only ever holds a weak reference, so a value never keeps
/// itself alive.
pub struct SelfObserver<T: ?Sized> {
    weak: Cell<Weak<T>>,
}

impl<T: ?Sized> SelfObserver<T> {
    /// Creates an empty slot.
    pub const fn new() -> SelfObserver<T> {
        SelfObserver {
            weak: Cell::new(Weak::new()),
        }
    }

    /// Creates a new owner of the value containing this slot.
    pub fn upgrade(&self) -> Result<Shared<T>, NoOwnerError> {
        let weak = self.weak.take();
        let shared = weak.lock();
        self.weak.set(weak);

        if Shared::is_null(&shared) {
            Err(NoOwnerError)
        } else {
            Ok(shared)
        }
    }

    /// Returns a copy of the stored weak reference.
    pub fn downgrade(&self) -> Weak<T> {
        let weak = self.weak.take();
        let copy = weak.clone();
        self.weak.set(weak);
        copy
    }

    /// Returns `true` if the value containing this slot currently has an
    /// owner.
    pub fn is_owned(&self) -> bool {
        let weak = self.weak.take();
        let owned = !weak.expired();
        self.weak.set(weak);
        owned
    }

    /// Points the slot at `owner`, unless it already refers to a live owner.
    fn observe(&self, owner: &Shared<T>) {
        let weak = self.weak.take();
        if weak.expired() {
            self.weak.set(Shared::downgrade(owner));
        } else {
            self.weak.set(weak);
        }
    }
}

impl<T: ?Sized> Default for SelfObserver<T> {
    fn default() -> Self {
        SelfObserver::new()
    }
}

impl<T: ?Sized> fmt::Debug for SelfObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfObserver")
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// A value that can produce [`Shared`] owners of itself.
///
/// Only owners created through an `_observed` constructor, or passed to
/// [`Shared::observe`], are visible to [`shared_from_self`]. A value owned
/// through [`Shared::new`] alone still reports [`NoOwnerError`].
///
/// [`shared_from_self`]: SharedFromSelf::shared_from_self
///
/// # Examples
/// ```
/// use sharedrop::{NoOwnerError, SelfObserver, Shared, SharedFromSelf};
///
/// struct Session {
///     id: u32,
///     this: SelfObserver<Session>,
/// }
///
/// impl SharedFromSelf for Session {
///     fn self_observer(&self) -> &SelfObserver<Session> {
///         &self.this
///     }
/// }
///
/// let loose = Session { id: 1, this: SelfObserver::new() };
/// assert_eq!(loose.shared_from_self().err(), Some(NoOwnerError));
///
/// let session = Shared::new_observed(Session { id: 2, this: SelfObserver::new() });
/// let again = session.shared_from_self().unwrap();
/// assert!(Shared::ptr_eq(&session, &again));
/// assert_eq!(again.id, 2);
/// ```
pub trait SharedFromSelf {
    /// The slot populated when the value is placed under shared ownership.
    fn self_observer(&self) -> &SelfObserver<Self>;

    /// Creates a new owner of `self`.
    ///
    /// Fails with [`NoOwnerError`] if no owner of `self` was ever observed,
    /// which includes values owned only through the plain constructors, or
    /// if its last owner has already been released.
    fn shared_from_self(&self) -> Result<Shared<Self>, NoOwnerError> {
        self.self_observer().upgrade()
    }

    /// Creates a [`Weak`] observer of `self`. It is expired if `self` has no
    /// owner.
    fn weak_from_self(&self) -> Weak<Self> {
        self.self_observer().downgrade()
    }
}

impl<T: SharedFromSelf> Shared<T> {
    /// Like [`Shared::new`], and points the value's [`SelfObserver`] at the
    /// new control block.
    pub fn new_observed(value: T) -> Shared<T> {
        Shared::observed(Shared::new(value))
    }

    /// Like [`Shared::try_new_in`], and points the value's [`SelfObserver`]
    /// at the new control block.
    pub fn try_new_observed_in<A: Allocator + 'static>(
        value: T,
        alloc: A,
    ) -> Result<Shared<T>, AllocError> {
        Shared::try_new_in(value, alloc).map(Shared::observed)
    }
}

impl<T: SharedFromSelf + ?Sized> Shared<T> {
    /// Like [`Shared::from_box`], and points the value's [`SelfObserver`] at
    /// the new control block.
    pub fn from_box_observed(value: Box<T>) -> Shared<T> {
        Shared::observed(Shared::from_box(value))
    }

    /// Like [`Shared::from_box_with`], and points the value's
    /// [`SelfObserver`] at the new control block.
    pub fn from_box_with_observed<F>(value: Box<T>, cleanup: F) -> Shared<T>
    where
        F: FnOnce(Box<T>) + 'static,
    {
        Shared::observed(Shared::from_box_with(value, cleanup))
    }

    /// Like [`Shared::from_raw_in`], and points the value's [`SelfObserver`]
    /// at the new control block.
    ///
    /// # Safety
    ///
    /// See [`Shared::from_raw_in`].
    pub unsafe fn from_raw_in_observed<D, A>(ptr: NonNull<T>, cleanup: D, alloc: A) -> Shared<T>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: Allocator + 'static,
    {
        Shared::observed(Shared::from_raw_in(ptr, cleanup, alloc))
    }

    /// Like [`Shared::try_from_raw_in`], and points the value's
    /// [`SelfObserver`] at the new control block.
    ///
    /// # Safety
    ///
    /// See [`Shared::from_raw_in`].
    pub unsafe fn try_from_raw_in_observed<D, A>(
        ptr: NonNull<T>,
        cleanup: D,
        alloc: A,
    ) -> Result<Shared<T>, AllocError>
    where
        D: FnOnce(NonNull<T>) + 'static,
        A: Allocator + 'static,
    {
        Shared::try_from_raw_in(ptr, cleanup, alloc).map(Shared::observed)
    }

    /// Points the value's [`SelfObserver`] at the control block of `this`,
    /// for owners built through a constructor without an `_observed` form,
    /// such as [`factory::try_allocate_with`]. Does nothing if `this` is null
    /// or the value already has a live owner.
    ///
    /// # Examples
    /// ```
    /// use sharedrop::{factory, SelfObserver, Shared, SharedFromSelf};
    ///
    /// struct Node {
    ///     this: SelfObserver<Node>,
    /// }
    ///
    /// impl SharedFromSelf for Node {
    ///     fn self_observer(&self) -> &SelfObserver<Node> {
    ///         &self.this
    ///     }
    /// }
    ///
    /// let node = factory::make_with(|| Node { this: SelfObserver::new() });
    /// assert!(node.shared_from_self().is_err());
    ///
    /// Shared::observe(&node);
    /// assert!(Shared::ptr_eq(&node, &node.shared_from_self().unwrap()));
    /// ```
    ///
    /// [`factory::try_allocate_with`]: crate::factory::try_allocate_with
    pub fn observe(this: &Shared<T>) {
        if let Some(value) = Shared::get(this) {
            value.self_observer().observe(this);
        }
    }

    fn observed(this: Shared<T>) -> Shared<T> {
        Shared::observe(&this);
        this
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tests::Counting;

    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Test(Arc<AtomicUsize>);

    impl Drop for Test {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Observed {
        this: SelfObserver<Observed>,
        _test: Test,
    }

    impl Observed {
        fn new(counter: &Arc<AtomicUsize>) -> Observed {
            Observed {
                this: SelfObserver::new(),
                _test: Test(counter.clone()),
            }
        }
    }

    impl SharedFromSelf for Observed {
        fn self_observer(&self) -> &SelfObserver<Observed> {
            &self.this
        }
    }

    #[test]
    fn shared_from_self() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counting = Counting::default();

        let owner = Shared::try_new_observed_in(Observed::new(&counter), counting.clone()).unwrap();
        assert_eq!(Shared::weak_count(&owner), 1);
        assert!(owner.this.is_owned());

        let again = owner.shared_from_self().unwrap();
        assert!(Shared::ptr_eq(&owner, &again));
        assert_eq!(Shared::use_count(&owner), 2);

        let weak = owner.weak_from_self();
        drop(owner);
        drop(again);

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(weak.expired());
        assert_eq!(counting.live.get(), 1);

        drop(weak);
        assert_eq!(counting.live.get(), 0);
    }

    #[test]
    fn never_owned() {
        let counter = Arc::new(AtomicUsize::new(0));
        let loose = Observed::new(&counter);

        assert!(!loose.this.is_owned());
        assert_eq!(loose.shared_from_self().err(), Some(NoOwnerError));
        assert!(loose.weak_from_self().expired());

        let plain = Shared::new(Observed::new(&counter));
        assert_eq!(plain.shared_from_self().err(), Some(NoOwnerError));

        Shared::observe(&plain);
        assert!(Shared::ptr_eq(&plain, &plain.shared_from_self().unwrap()));
    }

    #[test]
    fn adopted_with_cleanup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));

        let cleaned = cleanups.clone();
        let owner = Shared::from_box_with_observed(Box::new(Observed::new(&counter)), move |value| {
            cleaned.fetch_add(1, Ordering::Relaxed);
            drop(value);
        });

        let again = owner.shared_from_self().unwrap();
        assert!(Shared::ptr_eq(&owner, &again));
        drop(owner);
        drop(again);

        assert_eq!(cleanups.load(Ordering::Relaxed), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn adopted_raw() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counting = Counting::default();

        let raw = NonNull::from(Box::leak(Box::new(Observed::new(&counter))));
        let cleaned = cleanups.clone();
        let owner = unsafe {
            Shared::try_from_raw_in_observed(
                raw,
                move |ptr: NonNull<Observed>| {
                    cleaned.fetch_add(1, Ordering::Relaxed);
                    drop(Box::from_raw(ptr.as_ptr()));
                },
                counting.clone(),
            )
        }
        .unwrap();

        let weak = owner.weak_from_self();
        assert_eq!(Shared::use_count(&owner.shared_from_self().unwrap()), 2);
        drop(owner);

        assert!(weak.expired());
        assert_eq!(cleanups.load(Ordering::Relaxed), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(counting.live.get(), 1);
        drop(weak);
        assert_eq!(counting.live.get(), 0);
    }

    #[test]
    fn self_reference_frees_block() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counting = Counting::default();

        let owner = Shared::try_new_observed_in(Observed::new(&counter), counting.clone()).unwrap();
        drop(owner);

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(counting.live.get(), 0);
    }

    #[test]
    fn no_owner_while_dropping() {
        struct Watcher {
            this: SelfObserver<Watcher>,
            seen: Arc<AtomicUsize>,
        }

        impl SharedFromSelf for Watcher {
            fn self_observer(&self) -> &SelfObserver<Watcher> {
                &self.this
            }
        }

        impl Drop for Watcher {
            fn drop(&mut self) {
                if self.shared_from_self().is_err() {
                    self.seen.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let owner = Shared::new_observed(Watcher {
            this: SelfObserver::new(),
            seen: seen.clone(),
        });
        drop(owner);

        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn first_owner_group_wins() {
        let counter = Arc::new(AtomicUsize::new(0));

        let owner = Shared::from_box_observed(Box::new(Observed::new(&counter)));
        Shared::observed(owner.clone());

        let again = owner.shared_from_self().unwrap();
        assert!(Shared::ptr_eq(&owner, &again));
        assert_eq!(Shared::weak_count(&owner), 1);
    }
}
