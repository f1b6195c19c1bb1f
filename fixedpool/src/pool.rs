//! The fixed pool (L2): routes allocation across owned slots and keeps
//! them classified as current / partial / full.

use core::ptr::{self, NonNull};

use slotpool_lib::{log_debug, log_warn};

use crate::error::PoolError;
use crate::list::SlotList;
use crate::slot::Slot;
use crate::upstream::{UpstreamAllocator, default_upstream};

/// Default `slot_capacity` used when the caller passes 0: enough items per
/// slot that a page-ish region amortizes the per-slot header and bitmap
/// overhead, without a single slot dominating the pool's footprint.
const DEFAULT_PAGE_SIZE: usize = 4096;

fn default_slot_capacity() -> usize {
    DEFAULT_PAGE_SIZE / 16
}

/// Runs once on a freshly allocated cell. Returning `false` aborts the
/// allocation; the cell is reclaimed and `malloc`/`malloc_zero` return
/// [`PoolError::ItemInitRefused`].
///
/// # Safety
/// `item` points to exactly `item_size` bytes, uninitialised unless
/// allocated via `malloc_zero`. The hook must not retain `item` beyond the
/// call and must not allocate from or free into the same pool.
pub type ItemInit = unsafe fn(item: NonNull<u8>, ctx: *mut ()) -> bool;

/// Runs on every item about to be reclaimed: explicit `free`, `clear`, or
/// the pool's own teardown.
///
/// # Safety
/// Must not itself allocate from or free into the same pool.
pub type ItemExit = unsafe fn(item: NonNull<u8>, ctx: *mut ());

/// Construction parameters for a [`FixedPool`].
pub struct PoolConfig {
    /// Items per slot. `0` substitutes a page-derived default.
    pub slot_capacity: usize,
    /// Bytes per item. Must be greater than zero.
    pub item_size: usize,
    pub item_init: Option<ItemInit>,
    pub item_exit: Option<ItemExit>,
    /// Opaque context forwarded to both hooks.
    pub hook_ctx: *mut (),
}

impl PoolConfig {
    /// A pool with no hooks and a page-derived slot capacity.
    pub fn new(item_size: usize) -> Self {
        Self {
            slot_capacity: 0,
            item_size,
            item_init: None,
            item_exit: None,
            hook_ctx: ptr::null_mut(),
        }
    }
}

/// A single-threaded fixed-size object pool allocator.
///
/// Carves items of a fixed size out of slots obtained from an upstream
/// allocator, routing allocation to one *current* slot and keeping the
/// rest classified on *partial*/*full* lists. The pool holds only raw
/// pointers to its slots, so it is `!Send` and `!Sync` by construction:
/// this allocator has no internal synchronization and is built for
/// single-threaded use only.
pub struct FixedPool {
    upstream: &'static dyn UpstreamAllocator,
    slot_capacity: usize,
    item_size: usize,
    item_init: Option<ItemInit>,
    item_exit: Option<ItemExit>,
    hook_ctx: *mut (),
    live_count: usize,
    current_slot: *mut Slot,
    /// Second probe for `free`, alongside `current_slot`: whichever slot
    /// last had a cell released is likely to be freed from again.
    last_freed_slot: *mut Slot,
    partial_slots: SlotList,
    full_slots: SlotList,
}

impl FixedPool {
    /// Construct a new pool. `upstream` of `None` binds to the process-wide
    /// default, backed by the global allocator.
    pub fn new(
        upstream: Option<&'static dyn UpstreamAllocator>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if config.item_size == 0 {
            return Err(PoolError::ItemSizeZero);
        }
        let slot_capacity = if config.slot_capacity == 0 {
            default_slot_capacity()
        } else {
            config.slot_capacity
        };
        Ok(Self {
            upstream: upstream.unwrap_or_else(default_upstream),
            slot_capacity,
            item_size: config.item_size,
            item_init: config.item_init,
            item_exit: config.item_exit,
            hook_ctx: config.hook_ctx,
            live_count: 0,
            current_slot: ptr::null_mut(),
            last_freed_slot: ptr::null_mut(),
            partial_slots: SlotList::new(),
            full_slots: SlotList::new(),
        })
    }

    /// Exact count of items currently handed out.
    pub fn size(&self) -> usize {
        self.live_count
    }

    /// Configured item size, in bytes.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    fn ensure_current_slot(&mut self) -> Result<(), PoolError> {
        let need_new = self.current_slot.is_null() || unsafe { (*self.current_slot).is_full() };
        if !need_new {
            return Ok(());
        }

        if !self.current_slot.is_null() {
            let full_slot = self.current_slot;
            self.current_slot = ptr::null_mut();
            unsafe { self.full_slots.push_back(full_slot) };
        }

        if let Some(slot) = self.partial_slots.pop_front() {
            self.current_slot = slot;
        } else {
            self.current_slot = self.birth_slot()?;
        }
        Ok(())
    }

    fn birth_slot(&mut self) -> Result<*mut Slot, PoolError> {
        let requested = Slot::bytes_needed_for(self.slot_capacity, self.item_size);
        let (region, actual_bytes) = self.upstream.alloc(requested).ok_or(PoolError::Exhausted)?;
        match unsafe { Slot::init_in_place(region, actual_bytes, self.item_size) } {
            Some(slot) => {
                log_debug!(
                    "fixedpool: slot born ({} bytes, {} cells)",
                    actual_bytes,
                    unsafe { (*slot.as_ptr()).capacity() }
                );
                Ok(slot.as_ptr())
            }
            None => {
                unsafe { self.upstream.free(region, actual_bytes) };
                Err(PoolError::Exhausted)
            }
        }
    }

    fn alloc_raw_cell(&mut self) -> Result<NonNull<u8>, PoolError> {
        self.ensure_current_slot()?;
        let slot = unsafe { &mut *self.current_slot };
        Ok(unsafe { slot.malloc() }.expect("current slot unexpectedly full after selection"))
    }

    fn finish_alloc(&mut self, cell: NonNull<u8>) -> Result<NonNull<u8>, PoolError> {
        if let Some(init) = self.item_init {
            let accepted = unsafe { init(cell, self.hook_ctx) };
            if !accepted {
                let slot = unsafe { &mut *self.current_slot };
                unsafe { slot.free(cell) }
                    .expect("rollback free of a cell this slot just handed out");
                log_warn!("fixedpool: item_init refused allocation, cell reclaimed");
                return Err(PoolError::ItemInitRefused);
            }
        }
        self.live_count += 1;
        Ok(cell)
    }

    /// Allocate one item. The returned cell is uninitialised unless
    /// `item_init` initialises it.
    pub fn malloc(&mut self) -> Result<NonNull<u8>, PoolError> {
        let cell = self.alloc_raw_cell()?;
        self.finish_alloc(cell)
    }

    /// As [`malloc`](Self::malloc), but the cell is zero-filled before the
    /// `item_init` hook (if any) observes it.
    pub fn malloc_zero(&mut self) -> Result<NonNull<u8>, PoolError> {
        let cell = self.alloc_raw_cell()?;
        unsafe { ptr::write_bytes(cell.as_ptr(), 0, self.item_size) };
        self.finish_alloc(cell)
    }

    fn find_owning_slot(&self, ptr: *const u8) -> Option<*mut Slot> {
        if !self.current_slot.is_null() && unsafe { (*self.current_slot).contains(ptr) } {
            return Some(self.current_slot);
        }
        if !self.last_freed_slot.is_null() && unsafe { (*self.last_freed_slot).contains(ptr) } {
            return Some(self.last_freed_slot);
        }
        if let Some(slot) = self.partial_slots.find(|s| unsafe { (*s).contains(ptr) }) {
            return Some(slot);
        }
        self.full_slots.find(|s| unsafe { (*s).contains(ptr) })
    }

    fn release_slot(&mut self, slot_ptr: *mut Slot) {
        let (region, size) = unsafe { (*slot_ptr).region() };
        log_debug!("fixedpool: slot died ({} bytes)", size);
        unsafe { self.upstream.free(region, size) };
    }

    /// Return `item` to the pool.
    ///
    /// # Panics
    /// Panics if `item` was not allocated from this pool. A mis-free is a
    /// programmer error rather than a recoverable condition, so it is
    /// asserted rather than returned as an `Err`.
    pub fn free(&mut self, item: NonNull<u8>) -> Result<(), PoolError> {
        let slot_ptr = match self.find_owning_slot(item.as_ptr()) {
            Some(s) => s,
            None => panic!(
                "fixedpool: free of {:p} does not belong to this pool",
                item.as_ptr()
            ),
        };

        let was_full = unsafe { (*slot_ptr).is_full() };

        if let Some(exit) = self.item_exit {
            unsafe { exit(item, self.hook_ctx) };
        }

        unsafe { (*slot_ptr).free(item) }?;

        let mut released = false;
        if slot_ptr != self.current_slot {
            if was_full {
                unsafe {
                    self.full_slots.remove(slot_ptr);
                    self.partial_slots.push_back(slot_ptr);
                }
            } else if unsafe { (*slot_ptr).is_empty() } {
                unsafe { self.partial_slots.remove(slot_ptr) };
                self.release_slot(slot_ptr);
                released = true;
            }
        }

        self.last_freed_slot = if released { ptr::null_mut() } else { slot_ptr };
        self.live_count -= 1;
        Ok(())
    }

    /// Visit every live item exactly once: current slot first, then the
    /// partial list, then the full list. Must not mutate the pool; stops
    /// early if `visitor` returns `false`.
    pub fn walk(&self, mut visitor: impl FnMut(NonNull<u8>) -> bool) {
        if !self.current_slot.is_null() {
            let cont = unsafe { (*self.current_slot).walk(&mut visitor) };
            if !cont {
                return;
            }
        }
        if !self.partial_slots.walk_cells(&mut visitor) {
            return;
        }
        self.full_slots.walk_cells(&mut visitor);
    }

    /// Reclaim every live item (invoking `item_exit` if configured) and
    /// release every owned slot back to upstream.
    pub fn clear(&mut self) {
        if let Some(exit) = self.item_exit {
            let ctx = self.hook_ctx;
            self.walk(|item| {
                unsafe { exit(item, ctx) };
                true
            });
        }

        if !self.current_slot.is_null() {
            self.release_slot(self.current_slot);
        }
        while let Some(slot) = self.full_slots.pop_front() {
            self.release_slot(slot);
        }
        while let Some(slot) = self.partial_slots.pop_front() {
            self.release_slot(slot);
        }

        self.current_slot = ptr::null_mut();
        self.last_freed_slot = ptr::null_mut();
        self.live_count = 0;
    }

    /// Tear down the pool: equivalent to `clear` followed by dropping the
    /// handle. Named to mirror the allocator's other lifecycle operations;
    /// `Drop` performs the same teardown for pools that go out of scope
    /// without an explicit call.
    pub fn exit(self) {}

    /// Dump every non-empty slot's occupancy to the log backend.
    #[cfg(feature = "diagnostics")]
    pub fn dump(&self) {
        slotpool_lib::log_info!(
            "fixedpool {:p}: {} live, {} partial slots, {} full slots",
            self as *const FixedPool,
            self.live_count,
            self.partial_slots.len(),
            self.full_slots.len()
        );
        if !self.current_slot.is_null() {
            unsafe { (*self.current_slot).dump() };
        }
        self.partial_slots.for_each(|s| unsafe { (*s).dump() });
        self.full_slots.for_each(|s| unsafe { (*s).dump() });
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::REGION_ALIGN;
    use alloc::boxed::Box;
    use core::alloc::Layout;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct MockUpstream {
        alloc_calls: AtomicUsize,
        free_calls: AtomicUsize,
        fail_after: usize,
        oversize_to: Option<usize>,
    }

    impl MockUpstream {
        fn new(fail_after: usize, oversize_to: Option<usize>) -> Self {
            Self {
                alloc_calls: AtomicUsize::new(0),
                free_calls: AtomicUsize::new(0),
                fail_after,
                oversize_to,
            }
        }

        fn alloc_count(&self) -> usize {
            self.alloc_calls.load(Ordering::SeqCst)
        }

        fn free_count(&self) -> usize {
            self.free_calls.load(Ordering::SeqCst)
        }
    }

    unsafe impl UpstreamAllocator for MockUpstream {
        fn alloc(&self, bytes: usize) -> Option<(NonNull<u8>, usize)> {
            let calls = self.alloc_calls.fetch_add(1, Ordering::SeqCst);
            if calls >= self.fail_after {
                return None;
            }
            let actual = self.oversize_to.map(|n| bytes.max(n)).unwrap_or(bytes);
            let layout = Layout::from_size_align(actual, REGION_ALIGN).unwrap();
            let ptr = unsafe { alloc::alloc::alloc(layout) };
            NonNull::new(ptr).map(|p| (p, actual))
        }

        fn alloc_zero(&self, bytes: usize) -> Option<(NonNull<u8>, usize)> {
            let calls = self.alloc_calls.fetch_add(1, Ordering::SeqCst);
            if calls >= self.fail_after {
                return None;
            }
            let actual = self.oversize_to.map(|n| bytes.max(n)).unwrap_or(bytes);
            let layout = Layout::from_size_align(actual, REGION_ALIGN).unwrap();
            let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
            NonNull::new(ptr).map(|p| (p, actual))
        }

        unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
            self.free_calls.fetch_add(1, Ordering::SeqCst);
            let layout = Layout::from_size_align(bytes, REGION_ALIGN).unwrap();
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    fn leak_upstream(u: MockUpstream) -> &'static MockUpstream {
        Box::leak(Box::new(u))
    }

    #[test]
    fn item_size_zero_is_rejected() {
        let err = FixedPool::new(None, PoolConfig::new(0)).unwrap_err();
        assert_eq!(err, PoolError::ItemSizeZero);
    }

    #[test]
    fn fourth_malloc_fills_the_slot_fifth_births_another() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 4;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let mut cells = alloc::vec::Vec::new();
        for _ in 0..4 {
            cells.push(pool.malloc().unwrap());
        }
        assert_eq!(pool.size(), 4);

        pool.malloc().unwrap();
        assert_eq!(pool.size(), 5);

        let mock = upstream;
        assert_eq!(mock.alloc_count(), 2);
    }

    #[test]
    fn free_in_arbitrary_order_releases_emptied_non_current_slot() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 2;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let a = pool.malloc().unwrap();
        let b = pool.malloc().unwrap(); // slot 1 now full
        let c = pool.malloc().unwrap(); // births slot 2, becomes current

        let mock = upstream;
        assert_eq!(mock.alloc_count(), 2);

        pool.free(a).unwrap();
        pool.free(b).unwrap(); // slot 1 now empty and not current -> released
        assert_eq!(mock.free_count(), 1);

        pool.free(c).unwrap();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn double_free_through_the_pool_is_rejected() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 4;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let a = pool.malloc().unwrap();
        pool.malloc().unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(PoolError::DoubleFree));
    }

    #[test]
    #[should_panic]
    fn free_of_foreign_pointer_panics() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 4;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let mut stray = 0u8;
        let foreign = NonNull::new(&mut stray as *mut u8).unwrap();
        let _ = pool.free(foreign);
    }

    #[test]
    fn upstream_exhaustion_surfaces_as_error() {
        let upstream = leak_upstream(MockUpstream::new(0, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 4;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        assert_eq!(pool.malloc(), Err(PoolError::Exhausted));
    }

    #[test]
    fn oversized_upstream_region_is_exploited_before_birthing_another_slot() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, Some(4096)));
        let mut cfg = PoolConfig::new(8);
        cfg.slot_capacity = 4;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        for _ in 0..50 {
            pool.malloc().unwrap();
        }

        let mock = upstream;
        assert_eq!(mock.alloc_count(), 1);
    }

    unsafe fn refuse_third(_item: NonNull<u8>, ctx: *mut ()) -> bool {
        let counter = unsafe { &*(ctx as *const AtomicUsize) };
        let n = counter.fetch_add(1, Ordering::SeqCst);
        n != 2
    }

    #[test]
    fn item_init_refusal_reclaims_the_cell() {
        let counter = AtomicUsize::new(0);
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 4;
        cfg.item_init = Some(refuse_third);
        cfg.hook_ctx = &counter as *const AtomicUsize as *mut ();
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        pool.malloc().unwrap();
        pool.malloc().unwrap();
        assert_eq!(pool.malloc(), Err(PoolError::ItemInitRefused));
        assert_eq!(pool.size(), 2);

        // the reclaimed cell is available again
        pool.malloc().unwrap();
        assert_eq!(pool.size(), 3);
    }

    unsafe fn count_exit(_item: NonNull<u8>, ctx: *mut ()) {
        let counter = unsafe { &*(ctx as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn clear_invokes_item_exit_on_every_live_item_and_releases_all_slots() {
        let counter = AtomicUsize::new(0);
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 2;
        cfg.item_exit = Some(count_exit);
        cfg.hook_ctx = &counter as *const AtomicUsize as *mut ();
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        for _ in 0..5 {
            pool.malloc().unwrap();
        }
        pool.clear();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.size(), 0);

        let mock = upstream;
        assert_eq!(mock.alloc_count(), mock.free_count());
    }

    #[test]
    fn walk_visits_exactly_the_live_items() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.slot_capacity = 2;
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let mut cells = alloc::vec::Vec::new();
        for _ in 0..5 {
            cells.push(pool.malloc().unwrap());
        }
        pool.free(cells[2]).unwrap();

        let mut seen = alloc::vec::Vec::new();
        pool.walk(|item| {
            seen.push(item);
            true
        });
        assert_eq!(seen.len(), 4);
        assert!(!seen.contains(&cells[2]));
    }

    #[test]
    fn drop_releases_every_owned_slot() {
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        {
            let mut cfg = PoolConfig::new(16);
            cfg.slot_capacity = 2;
            let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();
            for _ in 0..5 {
                pool.malloc().unwrap();
            }
        }

        let mock = upstream;
        assert_eq!(mock.alloc_count(), mock.free_count());
    }

    unsafe fn record_if_zeroed(item: NonNull<u8>, ctx: *mut ()) -> bool {
        let seen_zero = unsafe { &*(ctx as *const AtomicUsize) };
        if unsafe { *item.as_ptr() } == 0 {
            seen_zero.fetch_add(1, Ordering::SeqCst);
        }
        true
    }

    #[test]
    fn malloc_zero_fills_the_cell_and_item_init_observes_it() {
        let seen_zero = AtomicUsize::new(0);
        let upstream = leak_upstream(MockUpstream::new(usize::MAX, None));
        let mut cfg = PoolConfig::new(16);
        cfg.item_init = Some(record_if_zeroed);
        cfg.hook_ctx = &seen_zero as *const AtomicUsize as *mut ();
        let mut pool = FixedPool::new(Some(upstream), cfg).unwrap();

        let first = pool.malloc_zero().unwrap();
        unsafe { ptr::write_bytes(first.as_ptr(), 0xAA, pool.item_size()) };
        pool.free(first).unwrap();

        // reuses the same cell, now poisoned with 0xAA: only a real
        // zero-fill makes this read back clean.
        let second = pool.malloc_zero().unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(second.as_ptr(), pool.item_size()) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(seen_zero.load(Ordering::SeqCst), 2);
    }
}
