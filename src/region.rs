use std::ptr::NonNull;

use log::debug;

use crate::{
    block::{ALIGNMENT, Block, MIN_BLOCK_SIZE, Memory, PROLOGUE, SENTINEL_SIZE},
    coalesce::coalesce,
    error::{GrowError, HeapError},
    freelist::FreeList,
    utils::align,
};

/// The primitive that supplies raw memory to a [`crate::Heap`].
///
/// The heap manages one contiguous range. Every call to [`RegionSource::grow`] asks for
/// `increment` more bytes right after the ones already handed out, much like `sbrk(2)`
/// moves the program break.
///
/// # Safety
///
/// On success the returned pointer must be the start of `increment` bytes that are valid
/// for reads and writes and that nobody else touches for as long as the source lives.
/// The first range handed out must be aligned to [`crate::ALIGNMENT`]. If the source
/// can't keep ranges contiguous the heap notices and reports
/// [`GrowError::Discontiguous`].
pub unsafe trait RegionSource {
    /// Extends the region by `increment` bytes and returns where the new bytes begin,
    /// which is the old top of the region.
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError>;
}

unsafe impl<S: RegionSource + ?Sized> RegionSource for &mut S {
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).grow(increment)
    }
}

/// Grows the region by `bytes` (rounded up to [`ALIGNMENT`]) and turns the new space into
/// a free block.
///
/// ```text
///  before:  ... | last block |  Epilogue  |  <- top
///  grant:                                 | bytes ...................... |
///  after:   ... | last block |        new free block         |  Epilogue |  <- top
/// ```
///
/// The new block starts where the old epilogue was, and the epilogue moves to the new
/// top. The block is then coalesced, since the last block before the old epilogue may be
/// free too. On failure nothing has been written.
pub(crate) fn extend<S: RegionSource>(
    source: &mut S,
    memory: &mut Memory,
    free_list: &FreeList,
    bytes: usize,
) -> Result<Block, HeapError> {
    let bytes = align(bytes, ALIGNMENT).ok_or(GrowError::Overflow { requested: bytes })?;
    debug_assert!(bytes >= MIN_BLOCK_SIZE);

    let start = source.grow(bytes)?;

    let expected = memory.top();
    let actual = start.as_ptr() as usize;
    if actual != expected {
        debug!("region source handed out {actual:#x}, expected {expected:#x}");
        return Err(GrowError::Discontiguous { expected, actual }.into());
    }

    let block = Block(memory.len() - SENTINEL_SIZE);

    // SAFETY: the source just granted `bytes` more bytes right after our top.
    unsafe { memory.extend(bytes) };

    memory.format(block, bytes, false, PROLOGUE, PROLOGUE);
    let epilogue = memory.next_block(block);
    memory.format(epilogue, SENTINEL_SIZE, true, PROLOGUE, PROLOGUE);

    debug!(
        "extended region by {bytes} bytes, now {} bytes at {:p}",
        memory.len(),
        memory.base()
    );

    Ok(coalesce(memory, free_list, block))
}
