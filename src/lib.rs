#![no_std]

//! Shared ownership of heap values through reference counting.
//!
//! [`Shared`] is an owning handle: each clone adds an owner, and the value
//! is dropped when the last owner is released. [`Weak`] observes a value
//! without keeping it alive, and can be promoted back to a [`Shared`] while
//! any owner remains.
//!
//! Both handles point at a control block that holds the strong and weak
//! counts. A control block is allocated in one of two ways:
//!
//! - together with the value, by [`Shared::new`] and the [`factory`]
//!   functions, in a single allocation;
//! - around a value allocated elsewhere, by [`Shared::from_box`],
//!   [`Shared::from_box_with`] and [`Shared::from_raw_in`], which take a
//!   cleanup operation that runs in place of the value's destructor.
//!
//! Either way, the memory for the control block comes from an
//! [`Allocator`], [`Global`] by default. The value is destroyed when the
//! strong count reaches zero; the block itself is freed once the weak count
//! has reached zero as well.
//!
//! A value can hand out owners of itself by embedding a [`SelfObserver`] and
//! implementing [`SharedFromSelf`].
//!
//! Counts are not synchronized, so neither handle is `Send` or `Sync`.
//! Cycles of [`Shared`] handles are never collected.
//!
//! # Examples
//! ```
//! use sharedrop::Shared;
//!
//! let owner = Shared::new(vec![1, 2, 3]);
//! let observer = Shared::downgrade(&owner);
//!
//! let second = observer.lock();
//! assert_eq!(Shared::use_count(&owner), 2);
//!
//! drop(owner);
//! drop(second);
//! assert!(observer.expired());
//! ```

extern crate alloc;

mod allocator;
mod block;
mod error;
pub mod factory;
mod self_observer;
mod shared;
mod weak;

pub use allocator::{Allocator, Global};
pub use error::{AllocError, NoOwnerError};
pub use self_observer::{SelfObserver, SharedFromSelf};
pub use shared::Shared;
pub use weak::Weak;
