// SAFETY: `Memory` hands out safe tag accessors over raw memory and only checks bounds in
// debug builds. Every offset passed to them must come from the sentinels or from walking
// valid block sizes and free-list links, so that it lands on a tag inside the region.

use std::{mem, ptr::NonNull};

/// Machine word size in bytes.
pub(crate) const WORD_SIZE: usize = mem::size_of::<usize>();

/// Every block size, and therefore every payload address, is a multiple of this.
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Size of one boundary tag: a size/flag word plus a link word.
pub(crate) const TAG_SIZE: usize = 2 * WORD_SIZE;

/// Header plus footer.
pub(crate) const OVERHEAD: usize = 2 * TAG_SIZE;

/// Smallest block we ever create: both tags and one aligned payload unit.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + ALIGNMENT;

/// Prologue and epilogue carry tags only.
pub(crate) const SENTINEL_SIZE: usize = OVERHEAD;

/// Low bit of the size word.
const ALLOCATED: usize = 0x1;

/// A block is identified by the offset of its header from the start of the region.
///
/// Offsets instead of addresses keep the link words independent of where the region
/// lives in memory, so the heap may be anywhere and as large as `usize` allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Block(pub usize);

/// The prologue sits at the very start of the region and anchors the free list.
pub(crate) const PROLOGUE: Block = Block(0);

impl Block {
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Decoded contents of a header or footer.
///
/// Every block carries two of these, one at each end:
///
/// ```text
///  block offset
///  |
///  v
/// +----------------------+ <------+
/// | size | allocated bit |        |
/// +----------------------+        | -> Header (link = next free block)
/// |         link         |        |
/// +----------------------+ <------+ <- payload returned to the user
/// |                      |
/// |        Payload       |
/// |         ...          |
/// +----------------------+ <------+
/// | size | allocated bit |        |
/// +----------------------+        | -> Footer (link = previous free block)
/// |         link         |        |
/// +----------------------+ <------+
/// ```
///
/// Size and allocated bit must match in header and footer. The links only mean something
/// while the block is free; once it is handed out, the payload is the user's and the links
/// are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag {
    /// Total block size, tags included.
    pub size: usize,
    pub allocated: bool,
    pub link: Block,
}

impl Tag {
    pub const fn new(size: usize, allocated: bool, link: Block) -> Self {
        Self {
            size,
            allocated,
            link,
        }
    }

    #[inline]
    fn pack(self) -> [usize; 2] {
        debug_assert!(self.size & (ALIGNMENT - 1) == 0, "unaligned size {}", self.size);
        [self.size | (self.allocated as usize), self.link.0]
    }

    #[inline]
    fn unpack(words: [usize; 2]) -> Self {
        Self {
            size: words[0] & !(ALIGNMENT - 1),
            allocated: words[0] & ALLOCATED != 0,
            link: Block(words[1]),
        }
    }
}

/// The managed region as seen by the allocator: a base address and the number of bytes
/// that have been granted so far.
///
/// This is the only place where raw memory is read or written. Everything above it works
/// with [`Block`] offsets. Accesses are bounds checked in debug builds.
pub(crate) struct Memory {
    base: NonNull<u8>,
    len: usize,
}

impl Memory {
    /// **SAFETY**: `[base, base + len)` must be valid for reads and writes, owned by the
    /// caller, and `base` must be aligned to [`ALIGNMENT`].
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        debug_assert!(base.as_ptr() as usize % ALIGNMENT == 0);
        Self { base, len }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Address one past the last byte of the region.
    #[inline]
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.len
    }

    /// **SAFETY**: the `bytes` directly after the current end must have been granted to us.
    #[inline]
    pub unsafe fn extend(&mut self, bytes: usize) {
        self.len += bytes;
    }

    /// Whether `ptr` points inside the region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.len
    }

    #[inline]
    fn words(&self, at: usize) -> *mut usize {
        debug_assert!(at % WORD_SIZE == 0, "misaligned tag at {at:#x}");
        debug_assert!(
            at + TAG_SIZE <= self.len,
            "tag at {at:#x} outside of region of {} bytes",
            self.len
        );

        // SAFETY: in bounds of the region (checked above in debug builds).
        unsafe { self.base.as_ptr().add(at).cast::<usize>() }
    }

    #[inline]
    pub fn read_tag(&self, at: usize) -> Tag {
        let words = self.words(at);
        // SAFETY: `words` points at two aligned, initialized words inside the region.
        unsafe { Tag::unpack([words.read(), words.add(1).read()]) }
    }

    #[inline]
    pub fn write_tag(&mut self, at: usize, tag: Tag) {
        let words = self.words(at);
        let [meta, link] = tag.pack();
        // SAFETY: see `read_tag`.
        unsafe {
            words.write(meta);
            words.add(1).write(link);
        }
    }

    #[inline]
    pub fn header(&self, block: Block) -> Tag {
        self.read_tag(block.0)
    }

    #[inline]
    pub fn size(&self, block: Block) -> usize {
        self.header(block).size
    }

    #[inline]
    pub fn is_allocated(&self, block: Block) -> bool {
        self.header(block).allocated
    }

    #[inline]
    fn footer_at(block: Block, size: usize) -> usize {
        block.0 + size - TAG_SIZE
    }

    #[inline]
    pub fn footer(&self, block: Block) -> Tag {
        self.read_tag(Self::footer_at(block, self.size(block)))
    }

    /// Writes both tags of `block`. The footer position follows from `size`, not from
    /// whatever header was there before.
    pub fn format(&mut self, block: Block, size: usize, allocated: bool, next: Block, prev: Block) {
        self.write_tag(block.0, Tag::new(size, allocated, next));
        self.write_tag(Self::footer_at(block, size), Tag::new(size, allocated, prev));
    }

    /// Next block in the free list.
    #[inline]
    pub fn next_free(&self, block: Block) -> Block {
        self.header(block).link
    }

    /// Previous block in the free list.
    #[inline]
    pub fn prev_free(&self, block: Block) -> Block {
        self.footer(block).link
    }

    pub fn set_next_free(&mut self, block: Block, next: Block) {
        let mut header = self.header(block);
        header.link = next;
        self.write_tag(block.0, header);
    }

    pub fn set_prev_free(&mut self, block: Block, prev: Block) {
        let at = Self::footer_at(block, self.size(block));
        let mut footer = self.read_tag(at);
        footer.link = prev;
        self.write_tag(at, footer);
    }

    /// The block physically following `block`.
    #[inline]
    pub fn next_block(&self, block: Block) -> Block {
        Block(block.0 + self.size(block))
    }

    /// The block physically preceding `block`, found through its footer.
    #[inline]
    pub fn prev_block(&self, block: Block) -> Block {
        Block(block.0 - self.read_tag(block.0 - TAG_SIZE).size)
    }

    /// Tag of the block physically preceding `block`.
    #[inline]
    pub fn prev_footer(&self, block: Block) -> Tag {
        self.read_tag(block.0 - TAG_SIZE)
    }

    /// Address handed to the user for `block`.
    #[inline]
    pub fn payload(&self, block: Block) -> NonNull<u8> {
        // SAFETY: the payload of a block inside the region is inside the region too.
        unsafe { self.base.add(block.0 + TAG_SIZE) }
    }

    /// Inverse of [`Memory::payload`]. `ptr` must come from `payload`.
    #[inline]
    pub fn block_of(&self, ptr: *const u8) -> Block {
        Block(ptr as usize - self.base.as_ptr() as usize - TAG_SIZE)
    }
}
