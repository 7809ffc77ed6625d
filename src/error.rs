use thiserror::Error;

/// Failure of a [`crate::RegionSource`] to extend the managed region.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GrowError {
    /// The source has a fixed capacity and it has been used up.
    #[error("region exhausted: {requested} bytes requested, {available} available")]
    Exhausted { requested: usize, available: usize },
    /// The operating system refused to extend the region.
    #[error("the platform refused to extend the region by {requested} bytes")]
    Refused { requested: usize },
    /// The new bytes do not start where the region currently ends.
    #[error("region growth is not contiguous: expected {expected:#x}, got {actual:#x}")]
    Discontiguous { expected: usize, actual: usize },
    /// The increment cannot be represented by the underlying primitive.
    #[error("growth increment of {requested} bytes is not representable")]
    Overflow { requested: usize },
}

/// Errors building or growing a [`crate::Heap`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("failed to grow the managed region")]
    Grow(#[from] GrowError),
    /// The platform could not reserve the backing range of an [`crate::Arena`].
    #[error("failed to reserve {size} bytes of backing memory")]
    Reserve { size: usize },
    /// The region source handed out a base that is not aligned to [`crate::ALIGNMENT`].
    #[error("region base {address:#x} is not suitably aligned")]
    Misaligned { address: usize },
}

/// A violated heap invariant, as found by [`crate::Heap::check`].
///
/// Offsets are relative to the start of the managed region.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    #[error("sentinel block at {offset:#x} is damaged")]
    Sentinel { offset: usize },
    #[error("block at {offset:#x} has invalid size {size}")]
    BadSize { offset: usize, size: usize },
    #[error("header and footer of block at {offset:#x} disagree")]
    TagMismatch { offset: usize },
    #[error("blocks at {offset:#x} and its successor are both free")]
    AdjacentFree { offset: usize },
    #[error("heap walk overran the region at {offset:#x}")]
    Overrun { offset: usize },
    #[error("free list link at {offset:#x} is broken")]
    BrokenLink { offset: usize },
    #[error("allocated block at {offset:#x} is in the free list")]
    AllocatedInList { offset: usize },
    #[error("free list holds {listed} blocks but the heap has {free} free blocks")]
    CountMismatch { listed: usize, free: usize },
}
