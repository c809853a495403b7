//! Construction of values together with their control block.
//!
//! Every function here performs a single allocation holding both the
//! reference counts and the value, and returns its first [`Shared`] owner.
//! [`Shared::new`], [`Shared::new_in`] and [`Shared::try_new_in`] are thin
//! wrappers over these.
//!
//! The `_with` variants allocate first and then build the value straight
//! into the block. If building fails or panics, the block goes back to the
//! allocator and no handle is created.

use crate::block::{BlockHeader, Embedded, Link};
use crate::{AllocError, Allocator, Global, Shared};

use alloc::alloc::handle_alloc_error;

/// Places `value` in a new control block from the global allocator.
///
/// # Examples
/// ```
/// use sharedrop::factory;
///
/// let shared = factory::make(vec![1, 2, 3]);
/// assert_eq!(shared.len(), 3);
/// ```
pub fn make<T>(value: T) -> Shared<T> {
    make_with(|| value)
}

/// Builds a value with `init` directly into a new control block from the
/// global allocator.
pub fn make_with<T, F>(init: F) -> Shared<T>
where
    F: FnOnce() -> T,
{
    match try_allocate_with(Global, || Ok::<T, AllocError>(init())) {
        Ok(shared) => shared,
        Err(err) => handle_alloc_error(err.layout),
    }
}

/// Builds a value with the fallible `init` directly into a new control block
/// from the global allocator.
pub fn try_make_with<T, E, F>(init: F) -> Result<Shared<T>, E>
where
    E: From<AllocError>,
    F: FnOnce() -> Result<T, E>,
{
    try_allocate_with(Global, init)
}

/// Places `value` in a new control block from `alloc`.
///
/// `value` is dropped if the allocation fails.
pub fn allocate<T, A>(alloc: A, value: T) -> Result<Shared<T>, AllocError>
where
    A: Allocator + 'static,
{
    try_allocate_with(alloc, || Ok(value))
}

/// Builds a value with the fallible `init` directly into a new control block
/// from `alloc`.
///
/// Allocation failure is converted into `E`, so a single error type covers
/// both ways this can fail.
///
/// # Examples
/// ```
/// use sharedrop::{factory, AllocError, Global};
///
/// #[derive(Debug)]
/// enum LoadError {
///     OutOfMemory,
///     Parse(std::num::ParseIntError),
/// }
///
/// impl From<AllocError> for LoadError {
///     fn from(_: AllocError) -> LoadError {
///         LoadError::OutOfMemory
///     }
/// }
///
/// let parsed = factory::try_allocate_with(Global, || "17".parse::<u32>().map_err(LoadError::Parse));
/// assert_eq!(*parsed.unwrap(), 17);
///
/// let failed = factory::try_allocate_with(Global, || "x".parse::<u32>().map_err(LoadError::Parse));
/// assert!(matches!(failed, Err(LoadError::Parse(_))));
/// ```
pub fn try_allocate_with<T, A, E, F>(alloc: A, init: F) -> Result<Shared<T>, E>
where
    A: Allocator + 'static,
    E: From<AllocError>,
    F: FnOnce() -> Result<T, E>,
{
    let block = Embedded::<T, A>::new(alloc, init)?;
    unsafe {
        let ptr = BlockHeader::value(block).cast::<T>();
        Ok(Shared::from_link(Link::owned(block, ptr)))
    }
}
