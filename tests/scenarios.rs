//! End-to-end lifetimes of values, observers and control blocks.

use sharedrop::{factory, AllocError, Allocator, Global, Shared, Weak};

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

/// Records every allocation and deallocation it serves.
#[derive(Clone, Default)]
struct Recording {
    events: Rc<RefCell<Vec<&'static str>>>,
    live: Rc<Cell<usize>>,
}

unsafe impl Allocator for Recording {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = Global.allocate(layout)?;
        self.live.set(self.live.get() + 1);
        self.events.borrow_mut().push("allocate");
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.set(self.live.get() - 1);
        self.events.borrow_mut().push("deallocate");
        Global.deallocate(ptr, layout);
    }
}

/// Logs its own destruction into the same event list.
struct Value {
    events: Rc<RefCell<Vec<&'static str>>>,
}

impl Drop for Value {
    fn drop(&mut self) {
        self.events.borrow_mut().push("drop value");
    }
}

#[test]
fn copy_then_release_both() {
    let alloc = Recording::default();
    let events = alloc.events.clone();

    let mut original = factory::allocate(alloc.clone(), Value { events: events.clone() }).unwrap();
    assert_eq!(Shared::use_count(&original), 1);

    let mut copy = original.clone();
    assert_eq!(Shared::use_count(&original), 2);

    Shared::reset(&mut original);
    assert_eq!(Shared::use_count(&copy), 1);
    assert_eq!(*events.borrow(), ["allocate"]);

    Shared::reset(&mut copy);
    assert_eq!(Shared::use_count(&copy), 0);
    assert_eq!(*events.borrow(), ["allocate", "drop value", "deallocate"]);
    assert_eq!(alloc.live.get(), 0);
}

#[test]
fn observer_keeps_block_after_value() {
    let alloc = Recording::default();
    let events = alloc.events.clone();

    let owner = Shared::new_in(Value { events: events.clone() }, alloc.clone());
    let observer = Shared::downgrade(&owner);
    assert_eq!(observer.weak_count(), 1);

    drop(owner);
    assert_eq!(*events.borrow(), ["allocate", "drop value"]);
    assert_eq!(alloc.live.get(), 1);

    let locked = observer.lock();
    assert!(Shared::is_null(&locked));
    assert!(observer.expired());

    drop(observer);
    assert_eq!(*events.borrow(), ["allocate", "drop value", "deallocate"]);
    assert_eq!(alloc.live.get(), 0);
}

#[test]
fn adopted_pointer_uses_cleanup() {
    let alloc = Recording::default();
    let events = alloc.events.clone();

    let raw = NonNull::from(Box::leak(Box::new(Value { events: events.clone() })));
    let cleanup_events = events.clone();
    let owner = unsafe {
        Shared::from_raw_in(
            raw,
            move |ptr: NonNull<Value>| {
                cleanup_events.borrow_mut().push("cleanup");
                let value = Box::from_raw(ptr.as_ptr());
                std::mem::forget(value);
            },
            alloc.clone(),
        )
    };
    let copy = owner.clone();

    drop(owner);
    assert_eq!(*events.borrow(), ["allocate"]);

    drop(copy);
    assert_eq!(*events.borrow(), ["allocate", "cleanup", "deallocate"]);

    unsafe { drop(Box::from_raw(raw.as_ptr())) };
    assert_eq!(events.borrow().last(), Some(&"drop value"));
}

#[test]
fn observers_released_before_owner() {
    let alloc = Recording::default();
    let events = alloc.events.clone();

    let owner = Shared::new_in(Value { events: events.clone() }, alloc.clone());
    let observers: Vec<Weak<Value>> = (0..4).map(|_| Shared::downgrade(&owner)).collect();
    assert_eq!(Shared::weak_count(&owner), 4);

    drop(observers);
    assert_eq!(*events.borrow(), ["allocate"]);

    drop(owner);
    assert_eq!(*events.borrow(), ["allocate", "drop value", "deallocate"]);
}

#[test]
fn lock_counts_one_more_owner() {
    let owner = Shared::new(String::from("value"));
    let observer = Weak::from(&owner);

    let mut held = Vec::new();
    for expected in 2..6 {
        let before = observer.use_count();
        let locked = observer.lock();
        assert_eq!(Shared::use_count(&locked), before + 1);
        assert_eq!(Shared::use_count(&locked), expected);
        held.push(locked);
    }

    drop(owner);
    drop(held);
    assert!(Shared::is_null(&observer.lock()));
}

#[test]
fn self_assignment_changes_nothing() {
    let alloc = Recording::default();
    let events = alloc.events.clone();

    let mut owner = Shared::new_in(Value { events: events.clone() }, alloc.clone());
    let same = owner.clone();
    owner.clone_from(&same);
    owner = owner.clone();
    assert_eq!(Shared::use_count(&owner), 2);

    let mut observer = Shared::downgrade(&owner);
    let same_observer = observer.clone();
    observer.clone_from(&same_observer);
    assert_eq!(observer.weak_count(), 2);

    assert_eq!(*events.borrow(), ["allocate"]);
}

#[test]
fn moved_from_handles_act_default() {
    let mut owner = Shared::new(1u8);
    let moved = Shared::take(&mut owner);
    let fresh = Shared::<u8>::default();

    assert_eq!(Shared::is_null(&owner), Shared::is_null(&fresh));
    assert_eq!(Shared::use_count(&owner), Shared::use_count(&fresh));
    assert!(Shared::ptr_eq(&owner, &fresh));
    assert!(Shared::downgrade(&owner).expired());
    assert_eq!(*moved, 1);

    let mut observer = Shared::downgrade(&moved);
    let moved_observer = observer.take();
    assert!(observer.ptr_eq(&Weak::default()));
    assert!(observer.lock() == Shared::null());
    assert_eq!(*moved_observer.lock(), 1);
}

#[test]
fn projected_observer() {
    trait Speak {
        fn speak(&self) -> String;
    }

    struct Dog;

    impl Speak for Dog {
        fn speak(&self) -> String {
            String::from("woof")
        }
    }

    let dog = Shared::new(Dog);
    let speaker = Shared::map::<dyn Speak, _>(dog, |dog| dog);
    let observer = Shared::downgrade(&speaker);

    assert_eq!(observer.lock().speak(), "woof");
    drop(speaker);
    assert!(observer.upgrade().is_none());
}
