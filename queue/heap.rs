//! An instrumented heap for checking queue allocations
//!
//! `CountingHeap` forwards every request to the system allocator. Requests
//! made inside `tracked` are counted, and can be made to fail with
//! `configure`, so a caller can see exactly what a queue operation allocated
//! and released and how it behaves when memory runs out.
//!
//! To use it, install it as the global allocator:
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: strqueue::heap::CountingHeap = strqueue::heap::CountingHeap::new();
//! ```
//!
//! Invariants:
//! * All accounting is per thread
//! * Untracked requests are never counted and never failed
//! * The accounting itself never allocates

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ptr;

use tracing::{info, trace};

/// The instrumented allocator
pub struct CountingHeap;

/// Failure injection settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapConfig {
    /// Let this many tracked allocations succeed, then fail every later one.
    /// `None` never fails.
    pub fail_after: Option<usize>,
}

/// Counters for tracked requests on the current thread
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful allocations, including reallocations
    pub allocations: usize,

    /// Released blocks, including the old block of a reallocation
    pub releases: usize,

    /// Requests refused by failure injection or by the system
    pub failures: usize,

    /// Bytes allocated minus bytes released. Signed because a tracked region
    /// may release memory that was allocated outside one.
    pub live_bytes: isize,
}

struct State {
    depth: Cell<usize>,
    remaining: Cell<Option<usize>>,
    allocations: Cell<usize>,
    releases: Cell<usize>,
    failures: Cell<usize>,
    live_bytes: Cell<isize>,
}

impl State {
    const fn new() -> State {
        State {
            depth: Cell::new(0),
            remaining: Cell::new(None),
            allocations: Cell::new(0),
            releases: Cell::new(0),
            failures: Cell::new(0),
            live_bytes: Cell::new(0),
        }
    }

    fn tracking(&self) -> bool {
        self.depth.get() > 0
    }

    // true if the request may go to the system allocator
    fn admit(&self) -> bool {
        if !self.tracking() {
            return true;
        }

        match self.remaining.get() {
            Some(0) => {
                self.failures.set(self.failures.get() + 1);
                false
            }
            Some(n) => {
                self.remaining.set(Some(n - 1));
                true
            }
            None => true,
        }
    }

    fn allocated(&self, size: usize) {
        if self.tracking() {
            self.allocations.set(self.allocations.get() + 1);
            self.live_bytes.set(self.live_bytes.get() + size as isize);
        }
    }

    fn released(&self, size: usize) {
        if self.tracking() {
            self.releases.set(self.releases.get() + 1);
            self.live_bytes.set(self.live_bytes.get() - size as isize);
        }
    }

    fn refused(&self) {
        if self.tracking() {
            self.failures.set(self.failures.get() + 1);
        }
    }

    fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.get(),
            releases: self.releases.get(),
            failures: self.failures.get(),
            live_bytes: self.live_bytes.get(),
        }
    }
}

thread_local! {
    static STATE: State = const { State::new() };
}

fn with_state<R>(f: impl FnOnce(&State) -> R, otherwise: R) -> R {
    STATE.try_with(f).unwrap_or(otherwise)
}

impl CountingHeap {
    pub const fn new() -> CountingHeap {
        CountingHeap
    }
}

impl Default for CountingHeap {
    fn default() -> CountingHeap {
        CountingHeap::new()
    }
}

unsafe impl GlobalAlloc for CountingHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !with_state(|s| s.admit(), true) {
            return ptr::null_mut();
        }

        let block = unsafe { System.alloc(layout) };
        with_state(
            |s| {
                if block.is_null() {
                    s.refused();
                } else {
                    s.allocated(layout.size());
                }
            },
            (),
        );
        block
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !with_state(|s| s.admit(), true) {
            return ptr::null_mut();
        }

        let block = unsafe { System.alloc_zeroed(layout) };
        with_state(
            |s| {
                if block.is_null() {
                    s.refused();
                } else {
                    s.allocated(layout.size());
                }
            },
            (),
        );
        block
    }

    unsafe fn dealloc(&self, block: *mut u8, layout: Layout) {
        unsafe { System.dealloc(block, layout) };
        with_state(|s| s.released(layout.size()), ());
    }

    // On failure the old block is left intact and nothing is released.
    unsafe fn realloc(&self, block: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !with_state(|s| s.admit(), true) {
            return ptr::null_mut();
        }

        let moved = unsafe { System.realloc(block, layout, new_size) };
        with_state(
            |s| {
                if moved.is_null() {
                    s.refused();
                } else {
                    s.released(layout.size());
                    s.allocated(new_size);
                }
            },
            (),
        );
        moved
    }
}

// Leaves the tracked region even if the tracked closure panics.
struct Region;

impl Drop for Region {
    fn drop(&mut self) {
        with_state(|s| s.depth.set(s.depth.get().saturating_sub(1)), ());
    }
}

/// Run `f` with tracking enabled on this thread and return its result.
/// Regions nest.
pub fn tracked<R>(f: impl FnOnce() -> R) -> R {
    with_state(|s| s.depth.set(s.depth.get() + 1), ());
    let region = Region;
    let result = f();
    drop(region);

    if !with_state(|s| s.tracking(), false) {
        trace!(stats = ?stats(), "left tracked region");
    }
    result
}

/// Install failure injection settings for this thread. Must not be called
/// from inside `tracked`.
pub fn configure(config: HeapConfig) {
    with_state(|s| s.remaining.set(config.fail_after), ());

    match config.fail_after {
        Some(n) => info!("tracked allocations fail after {} more", n),
        None => info!("tracked allocation failures off"),
    }
}

/// Return the counters for this thread
pub fn stats() -> HeapStats {
    with_state(|s| s.stats(), HeapStats::default())
}

/// Zero the counters for this thread. Failure injection settings are kept.
pub fn reset() {
    with_state(
        |s| {
            s.allocations.set(0);
            s.releases.set(0);
            s.failures.set(0);
            s.live_bytes.set(0);
        },
        (),
    );
}

#[cfg(test)]
mod test {
    use super::*;

    // The unit test binary does not install `CountingHeap`, so exercise the
    // accounting through the allocator value directly.
    fn allocate(heap: &CountingHeap, size: usize) -> *mut u8 {
        let layout = Layout::from_size_align(size, 8).unwrap();
        unsafe { heap.alloc(layout) }
    }

    fn release(heap: &CountingHeap, block: *mut u8, size: usize) {
        let layout = Layout::from_size_align(size, 8).unwrap();
        unsafe { heap.dealloc(block, layout) }
    }

    #[test]
    fn test_untracked_not_counted() {
        reset();
        let heap = CountingHeap::new();
        let block = allocate(&heap, 32);
        assert!(!block.is_null());
        release(&heap, block, 32);
        assert_eq!(stats(), HeapStats::default());
    }

    #[test]
    fn test_tracked_counts() {
        reset();
        let heap = CountingHeap::new();

        let block = tracked(|| allocate(&heap, 32));
        assert_eq!(stats().allocations, 1);
        assert_eq!(stats().live_bytes, 32);

        tracked(|| release(&heap, block, 32));
        assert_eq!(stats().releases, 1);
        assert_eq!(stats().live_bytes, 0);
    }

    #[test]
    fn test_fail_after() {
        reset();
        let heap = CountingHeap::new();
        configure(HeapConfig {
            fail_after: Some(1),
        });

        let (first, second) = tracked(|| (allocate(&heap, 16), allocate(&heap, 16)));
        configure(HeapConfig::default());

        assert!(!first.is_null());
        assert!(second.is_null());
        assert_eq!(stats().failures, 1);
        assert_eq!(stats().allocations, 1);

        // Untracked requests ignore the setting
        let untracked = allocate(&heap, 16);
        assert!(!untracked.is_null());

        release(&heap, untracked, 16);
        tracked(|| release(&heap, first, 16));
        assert_eq!(stats().live_bytes, 0);
    }

    #[test]
    fn test_realloc_failure_keeps_block() {
        reset();
        let heap = CountingHeap::new();
        let block = allocate(&heap, 8);
        unsafe { *block = 7 };

        configure(HeapConfig {
            fail_after: Some(0),
        });
        let layout = Layout::from_size_align(8, 8).unwrap();
        let moved = tracked(|| unsafe { heap.realloc(block, layout, 64) });
        configure(HeapConfig::default());

        assert!(moved.is_null());
        assert_eq!(unsafe { *block }, 7);
        release(&heap, block, 8);
    }

    #[test]
    fn test_nested_regions() {
        reset();
        let heap = CountingHeap::new();

        let block = tracked(|| tracked(|| allocate(&heap, 8)));
        // Back outside: not counted
        release(&heap, block, 8);

        assert_eq!(stats().allocations, 1);
        assert_eq!(stats().releases, 0);
        assert_eq!(stats().live_bytes, 8);
    }
}
