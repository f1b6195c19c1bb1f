//! Error types surfaced by fallible pool operations.

use core::fmt;

/// Errors returned by fallible [`FixedPool`](crate::pool::FixedPool)
/// operations.
///
/// A pointer that belongs to no slot owned by the pool is not represented
/// here: per this allocator's contract that is a programmer error, and
/// [`FixedPool::free`](crate::pool::FixedPool::free) asserts on it rather
/// than returning a value for the caller to ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// `item_size == 0` at construction.
    ItemSizeZero,
    /// The upstream allocator could not supply a new slot.
    Exhausted,
    /// The configured `item_init` hook returned `false`.
    ItemInitRefused,
    /// The freed cell's free-bitmap bit was already clear.
    DoubleFree,
    /// The freed pointer does not land on a cell boundary.
    Misaligned,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PoolError::ItemSizeZero => "item_size must be greater than zero",
            PoolError::Exhausted => "upstream allocator exhausted",
            PoolError::ItemInitRefused => "item_init hook refused the allocation",
            PoolError::DoubleFree => "cell was already free",
            PoolError::Misaligned => "pointer is not a valid cell address",
        };
        f.write_str(msg)
    }
}
