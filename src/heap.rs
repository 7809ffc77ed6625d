use std::ptr::{self, NonNull};

use log::{debug, trace};

use crate::{
    block::{ALIGNMENT, Block, MIN_BLOCK_SIZE, Memory, OVERHEAD, PROLOGUE, SENTINEL_SIZE, TAG_SIZE},
    coalesce::coalesce,
    error::HeapError,
    freelist::FreeList,
    region::{RegionSource, extend},
    utils::{align, is_aligned},
};

/// Bytes the region grows by when no free block fits, unless the request is larger.
/// Many small allocations share one growth this way.
pub const CHUNK_SIZE: usize = 1 << 11;

/// An explicit free list allocator over one growable region.
///
/// The region starts and ends with an allocated sentinel block, and every block in
/// between carries a header and a footer:
///
/// ```text
/// +----------+---------+---------+---------+-----+---------+----------+
/// | Prologue | Block   | Block   | Block   | ... | Block   | Epilogue |
/// +----------+---------+---------+---------+-----+---------+----------+
/// ^ base                                                              ^ top
/// ```
///
/// Free blocks are chained into a circular list anchored at the prologue. Allocation
/// takes the first free block that fits, splitting it if the remainder is worth keeping,
/// and grows the region when nothing fits. Releasing a block merges it with its free
/// neighbours right away, so no two free blocks are ever adjacent.
///
/// A heap is meant for one thread at a time; every operation takes `&mut self`. See
/// [`crate::GlobalHeap`] for a locked, process wide instance.
pub struct Heap<S: RegionSource> {
    pub(crate) source: S,
    pub(crate) memory: Memory,
    pub(crate) free_list: FreeList,
}

// SAFETY: the heap exclusively owns its region; moving it to another thread moves the
// whole region with it.
unsafe impl<S: RegionSource + Send> Send for Heap<S> {}

/// Block size needed to serve a request of `size` payload bytes.
fn adjusted_size(size: usize) -> Option<usize> {
    align(size, ALIGNMENT)?.max(ALIGNMENT).checked_add(OVERHEAD)
}

impl<S: RegionSource> Heap<S> {
    /// Builds a heap on top of `source`.
    ///
    /// Lays down the prologue and epilogue and grows the region by a first
    /// [`CHUNK_SIZE`] so that the first allocations don't need to.
    pub fn new(mut source: S) -> Result<Self, HeapError> {
        let base = source.grow(2 * SENTINEL_SIZE)?;

        let address = base.as_ptr() as usize;
        if !is_aligned(address, ALIGNMENT) {
            return Err(HeapError::Misaligned { address });
        }

        // SAFETY: the source granted these bytes and we checked the alignment.
        let memory = unsafe { Memory::new(base, 2 * SENTINEL_SIZE) };

        let mut heap = Self {
            source,
            memory,
            free_list: FreeList::new(),
        };

        heap.memory.format(PROLOGUE, SENTINEL_SIZE, true, PROLOGUE, PROLOGUE);
        heap.memory.format(Block(SENTINEL_SIZE), SENTINEL_SIZE, true, PROLOGUE, PROLOGUE);
        heap.free_list.reset(&mut heap.memory);

        heap.extend(CHUNK_SIZE)?;

        debug!("heap ready at {base:p}");

        Ok(heap)
    }

    fn extend(&mut self, bytes: usize) -> Result<Block, HeapError> {
        extend(&mut self.source, &mut self.memory, &self.free_list, bytes)
    }

    /// Allocates `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// Returns null if `size` is zero or if the region can't grow any more. A failed
    /// allocation leaves the heap exactly as it was.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        let Some(adjusted) = adjusted_size(size) else {
            debug!("allocation of {size} bytes is too large");
            return ptr::null_mut();
        };

        let block = match self.free_list.first_fit(&self.memory, adjusted) {
            Some(block) => block,
            None => match self.extend(adjusted.max(CHUNK_SIZE)) {
                Ok(block) => block,
                Err(err) => {
                    debug!("allocation of {size} bytes failed: {err}");
                    return ptr::null_mut();
                }
            },
        };

        self.place(block, adjusted);

        let payload = self.memory.payload(block).as_ptr();
        trace!("allocate({size}) -> {payload:p} ({adjusted} byte block)");

        payload
    }

    /// Marks `block` as allocated with `size` bytes, giving back whatever is left over
    /// if it can still make a block of its own.
    fn place(&mut self, block: Block, size: usize) {
        let available = self.memory.size(block);
        debug_assert!(available >= size);

        self.free_list.remove(&mut self.memory, block);

        if available - size >= MIN_BLOCK_SIZE {
            self.memory.format(block, size, true, PROLOGUE, PROLOGUE);

            let rest = Block(block.offset() + size);
            self.free_list
                .insert_at_head(&mut self.memory, rest, available - size, false);
        } else {
            self.memory.format(block, available, true, PROLOGUE, PROLOGUE);
        }
    }

    /// Gives the block at `ptr` back to the heap. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this heap. Releasing anything
    /// else, or the same pointer twice, corrupts the heap. Debug builds assert on the
    /// cases they can detect.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        debug_assert!(self.contains(ptr), "{ptr:p} doesn't belong to this heap");
        debug_assert!(is_aligned(ptr as usize, ALIGNMENT), "{ptr:p} is misaligned");

        let block = self.memory.block_of(ptr);
        debug_assert!(self.memory.is_allocated(block), "{ptr:p} is already free");

        trace!("release({ptr:p}) ({} byte block)", self.memory.size(block));

        coalesce(&mut self.memory, &self.free_list, block);
    }

    /// Moves the allocation at `ptr` to a block of `size` bytes.
    ///
    /// A new block is always allocated, the first `min(old size, size)` bytes are copied
    /// over and the old block is released. If `ptr` is null this is [`Heap::allocate`];
    /// if `size` is zero the block is released and null is returned. If the new block
    /// can't be allocated, null is returned and `ptr` is left untouched.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::release`].
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if size == 0 {
            unsafe { self.release(ptr) };
            return ptr::null_mut();
        }

        if ptr.is_null() {
            return self.allocate(size);
        }

        let new = self.allocate(size);
        if new.is_null() {
            return new;
        }

        unsafe {
            let old_size = self.usable_size(ptr);
            ptr::copy_nonoverlapping(ptr, new, old_size.min(size));
            self.release(ptr);
        }

        trace!("resize({ptr:p}, {size}) -> {new:p}");

        new
    }

    /// Allocates room for `count` elements of `size` bytes, all set to zero.
    ///
    /// Returns null if the total is zero, doesn't fit in `usize`, or can't be allocated.
    pub fn zeroed_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(bytes) = count.checked_mul(size) else {
            debug!("zeroed allocation of {count} * {size} bytes overflows");
            return ptr::null_mut();
        };

        let ptr = self.allocate(bytes);

        if !ptr.is_null() {
            // SAFETY: we just allocated at least `bytes` bytes there.
            unsafe { ptr.write_bytes(0, bytes) };
        }

        ptr
    }

    /// Payload bytes available at `ptr`, which may be more than were asked for.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn usable_size(&self, ptr: *const u8) -> usize {
        if ptr.is_null() {
            return 0;
        }

        self.memory.size(self.memory.block_of(ptr)) - OVERHEAD
    }

    /// Whether `ptr` points into the part of the region where payloads live.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.memory.base().as_ptr() as usize;

        self.memory.contains(ptr)
            && addr >= base + SENTINEL_SIZE + TAG_SIZE
            && addr < self.memory.top() - SENTINEL_SIZE
    }

    /// Bytes currently under management, sentinels included.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Whether no bytes are under management.
    pub fn is_empty(&self) -> bool {
        self.memory.len() == 0
    }

    /// Start of the managed region.
    pub fn base(&self) -> NonNull<u8> {
        self.memory.base()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
