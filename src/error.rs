use core::alloc::Layout;
use core::fmt;

/// The allocator could not provide memory for a control block.
///
/// Returned by the fallible constructors of [`Shared`] and by the
/// [`factory`] functions. No handle exists when this is returned.
///
/// [`Shared`]: crate::Shared
/// [`factory`]: crate::factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Layout of the allocation that failed.
    pub layout: Layout,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory allocation of {} bytes (align {}) failed",
            self.layout.size(),
            self.layout.align()
        )
    }
}

impl core::error::Error for AllocError {}

/// [`shared_from_self`] was called on a value that has no live owner.
///
/// Either no [`Shared`] was ever constructed through a self-observing path
/// for this value, or every owner has already been released.
///
/// [`shared_from_self`]: crate::SharedFromSelf::shared_from_self
/// [`Shared`]: crate::Shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoOwnerError;

impl fmt::Display for NoOwnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no owning reference to this value is available")
    }
}

impl core::error::Error for NoOwnerError {}
