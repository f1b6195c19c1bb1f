//! The L0 upstream allocator contract.
//!
//! This is the pool's only external dependency: a coarse-grained,
//! variable-size allocator that hands out whole slot-sized regions. The
//! pool never frees part of a region, and never asks upstream to merge or
//! split regions on its behalf.

use core::alloc::Layout;
use core::ptr::NonNull;

use alloc::alloc::{alloc, alloc_zeroed, dealloc};

use slotpool_lib::OnceLock;

/// Alignment requested for every region obtained from an upstream
/// allocator. 16 bytes comfortably covers the `Slot` header's own
/// pointer-sized fields regardless of target word size.
pub const REGION_ALIGN: usize = 16;

/// A coarse-grained allocator that supplies backing regions for slots.
///
/// `alloc`/`alloc_zero` may return more bytes than requested: the pool
/// honours whatever size comes back and may fit more cells into the
/// region than it originally planned for. `free` is always called with
/// exactly the `actual_bytes` an earlier `alloc`/`alloc_zero` call
/// returned.
///
/// # Safety
/// Implementors must return regions valid for reads and writes for
/// `actual_bytes`, aligned to at least [`REGION_ALIGN`], and disjoint from
/// every other region currently live. `free` must only ever be called with
/// a `(ptr, bytes)` pair an earlier `alloc`/`alloc_zero` call on the same
/// allocator returned, and each such pair at most once.
pub unsafe trait UpstreamAllocator {
    /// Request at least `bytes` of fresh memory. Returns the region's base
    /// pointer and its actual size, which may exceed `bytes`.
    fn alloc(&self, bytes: usize) -> Option<(NonNull<u8>, usize)>;

    /// As [`alloc`](Self::alloc), but the returned region is zero-filled.
    fn alloc_zero(&self, bytes: usize) -> Option<(NonNull<u8>, usize)>;

    /// Release a region previously returned by `alloc`/`alloc_zero`.
    ///
    /// # Safety
    /// `ptr`/`bytes` must be exactly the pair a prior `alloc`/`alloc_zero`
    /// call on this allocator returned, not previously freed.
    unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize);
}

fn layout_for(bytes: usize) -> Option<Layout> {
    Layout::from_size_align(bytes, REGION_ALIGN).ok()
}

/// The process-wide default upstream, backed by the Rust global allocator.
pub struct SystemUpstream;

unsafe impl UpstreamAllocator for SystemUpstream {
    fn alloc(&self, bytes: usize) -> Option<(NonNull<u8>, usize)> {
        if bytes == 0 {
            return None;
        }
        let layout = layout_for(bytes)?;
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).map(|p| (p, layout.size()))
    }

    fn alloc_zero(&self, bytes: usize) -> Option<(NonNull<u8>, usize)> {
        if bytes == 0 {
            return None;
        }
        let layout = layout_for(bytes)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr).map(|p| (p, layout.size()))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
        let layout = layout_for(bytes).expect("region layout was valid at alloc time");
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }
}

static DEFAULT_UPSTREAM: OnceLock<SystemUpstream> = OnceLock::new();

/// Returns the process-wide default upstream allocator, binding it to
/// [`SystemUpstream`] on first use.
///
/// This is the crate's only piece of global mutable state, and exists
/// solely so callers can construct a pool without wiring up their own
/// upstream. The allocator itself remains single-threaded and holds no
/// locks.
pub fn default_upstream() -> &'static dyn UpstreamAllocator {
    DEFAULT_UPSTREAM.call_once(|| SystemUpstream);
    DEFAULT_UPSTREAM
        .get()
        .expect("default upstream was just initialized")
}
