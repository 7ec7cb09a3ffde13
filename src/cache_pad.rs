//! Prevents [false sharing](https://en.wikipedia.org/wiki/False_sharing) by rounding a value
//! up to the size and alignment of a cache line.
//!
//! The queue relies on this in two places. Each segment keeps its `head` and `tail` cursors in
//! their own [`CachePad`] so that producers hammering `tail` never invalidate the line that
//! consumers read `head` from. And every segment allocation is wrapped in a [`CachePad`],
//! which puts the slot array itself on a cache-line boundary.
//!
//! The line length is a single per-target constant, [`CACHE_LINE`]: 128 bytes on x86_64 and
//! aarch64, 64 bytes elsewhere. The size of `CachePad<T>` is the smallest multiple of
//! [`CACHE_LINE`] large enough to accommodate a value of type `T`.

use std::fmt;
use std::ops::Deref;

/// Cache line length assumed for the target architecture.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub(crate) const CACHE_LINE: usize = 128;

/// Cache line length assumed for the target architecture.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) const CACHE_LINE: usize = 64;

/// Pads and aligns a value to [`CACHE_LINE`] bytes.
#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
pub(crate) struct CachePad<T> {
    value: T,
}

// `repr(align)` only accepts literals; this pins the attribute pair above to the constant.
const _: () = assert!(align_of::<CachePad<()>>() == CACHE_LINE);

impl<T> CachePad<T> {
    /// Pads `value` out to a cache line of its own.
    pub(crate) const fn new(value: T) -> CachePad<T> {
        CachePad { value }
    }
}

impl<T> Deref for CachePad<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachePad").field(&self.value).finish()
    }
}
