//! A single-threaded fixed-size object pool allocator.
//!
//! Three layers, coarsest to finest:
//!
//! - **upstream** (L0): an external, variable-size allocator the pool
//!   draws whole regions from. Defaults to the global allocator, but any
//!   [`UpstreamAllocator`] implementation can be supplied instead.
//! - **slot** (L1): one upstream-owned region, sub-allocated into
//!   fixed-size cells via a free-bitmap.
//! - **pool** (L2): the public [`FixedPool`] handle. Routes allocation to
//!   one *current* slot at a time and keeps the rest on *partial*/*full*
//!   lists, birthing new slots from upstream on demand and returning empty
//!   ones as soon as they're not needed.
//!
//! This allocator keeps no internal locks and is not `Send`/`Sync`: it is
//! meant for single-threaded use, one pool per owner.

#![no_std]

extern crate alloc;

pub mod error;
mod list;
pub mod pool;
mod slot;
pub mod upstream;

pub use error::PoolError;
pub use pool::{FixedPool, ItemExit, ItemInit, PoolConfig};
pub use upstream::{REGION_ALIGN, SystemUpstream, UpstreamAllocator, default_upstream};
