use std::ptr::NonNull;

use log::debug;

use crate::{
    error::{GrowError, HeapError},
    kernel::{page_size, request_memory, return_memory},
    region::RegionSource,
    utils::align,
};

/// Capacity used by [`Arena::new`].
pub const DEFAULT_ARENA_CAPACITY: usize = 64 << 20;

/// A region source over a range reserved once from the operating system.
///
/// The whole capacity is requested up front with [`request_memory`] (`mmap` or
/// `VirtualAlloc`), and [`RegionSource::grow`] then moves a private break through it,
/// the same way `sbrk` moves the program break:
///
/// ```text
/// +--------------------------------+----------------------------------------+
/// |       handed out to heap       |                unused                  |
/// +--------------------------------+----------------------------------------+
/// ^ base                           ^ brk                                    ^ capacity
/// ```
///
/// Because the range belongs to the arena alone, growth is always contiguous, and any
/// number of heaps can live side by side in one process. The range goes back to the
/// operating system when the arena is dropped.
#[derive(Debug)]
pub struct Arena {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

// SAFETY: the arena exclusively owns its range, nothing about it is tied to a thread.
unsafe impl Send for Arena {}

impl Arena {
    /// Reserves an arena of [`DEFAULT_ARENA_CAPACITY`] bytes.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }

    /// Reserves an arena of at least `capacity` bytes, rounded up to the page size.
    pub fn with_capacity(capacity: usize) -> Result<Self, HeapError> {
        let size = align(capacity.max(1), page_size()).ok_or(HeapError::Reserve { size: capacity })?;

        // SAFETY: `size` is a non-zero multiple of the page size.
        let base = unsafe { request_memory(size) }.ok_or(HeapError::Reserve { size })?;

        debug!("reserved arena of {size} bytes at {base:p}");

        Ok(Self {
            base,
            capacity: size,
            brk: 0,
        })
    }

    /// Total bytes reserved.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl RegionSource for Arena {
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError> {
        if increment > self.remaining() {
            return Err(GrowError::Exhausted {
                requested: increment,
                available: self.remaining(),
            });
        }

        // SAFETY: `brk + increment <= capacity`, so we stay inside the reservation.
        let start = unsafe { self.base.add(self.brk) };
        self.brk += increment;

        Ok(start)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        debug!("returning arena of {} bytes at {:p}", self.capacity, self.base);

        // SAFETY: the range came from `request_memory`, and whoever borrowed the source
        // is gone now that we're being dropped.
        unsafe { return_memory(self.base.as_ptr(), self.capacity) };
    }
}
