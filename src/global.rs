use std::{
    alloc::{GlobalAlloc, Layout, System},
    ptr,
    sync::{Mutex, PoisonError},
};

use crate::{
    arena::{Arena, DEFAULT_ARENA_CAPACITY},
    block::ALIGNMENT,
    check::HeapStats,
    heap::Heap,
};

/// A [`Heap`] shared by the whole process, usable as the global allocator:
///
/// ```rust,ignore
/// use tagalloc::GlobalHeap;
///
/// #[global_allocator]
/// static ALLOCATOR: GlobalHeap = GlobalHeap::new();
/// ```
///
/// The heap itself is single threaded, so every call goes through one mutex. It is
/// created on first use over an [`Arena`] of the configured capacity; once that is used
/// up, allocations fail.
///
/// Layouts aligned to more than [`ALIGNMENT`] are passed on to [`System`]. The standard
/// library asks for a few of those itself, so refusing them would abort the process.
///
/// Logging happens while the lock is held, so a logger that allocates must not be
/// installed at `debug` or `trace` level.
pub struct GlobalHeap {
    heap: Mutex<Option<Heap<Arena>>>,
    capacity: usize,
}

impl GlobalHeap {
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }

    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(None),
            capacity,
        }
    }

    /// Runs `f` on the heap, creating it if needed. `None` if it couldn't be created.
    fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<Arena>) -> R) -> Option<R> {
        // Heap operations only panic in debug assertions, before anything is written.
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);

        if heap.is_none() {
            *heap = Arena::with_capacity(self.capacity)
                .and_then(Heap::new)
                .ok();
        }

        heap.as_mut().map(f)
    }

    /// Statistics of the shared heap, `None` if it hasn't been created.
    ///
    /// Takes the lock but doesn't allocate.
    pub fn stats(&self) -> Option<HeapStats> {
        let heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        heap.as_ref().map(Heap::stats)
    }
}

impl Default for GlobalHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for GlobalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return unsafe { System.alloc(layout) };
        }

        self.with_heap(|heap| heap.allocate(layout.size()))
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() > ALIGNMENT {
            return unsafe { System.dealloc(ptr, layout) };
        }

        self.with_heap(|heap| unsafe { heap.release(ptr) });
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return unsafe { System.alloc_zeroed(layout) };
        }

        self.with_heap(|heap| heap.zeroed_allocate(1, layout.size()))
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return unsafe { System.realloc(ptr, layout, new_size) };
        }

        self.with_heap(|heap| unsafe { heap.resize(ptr, new_size) })
            .unwrap_or(ptr::null_mut())
    }
}
