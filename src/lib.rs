//! # tagalloc
//!
//! A `malloc`-style allocator built on boundary tags and one explicit free list.
//!
//! The allocator manages a single contiguous region that only ever grows. The region is
//! cut into blocks, and every block carries a header and a footer recording its size and
//! whether it is allocated:
//!
//! ```text
//!   +----------+--------------------+----------+------------------+----------+
//!   | Prologue | H   allocated    F | H  free F| H  allocated   F | Epilogue |
//!   +----------+--------------------+----------+------------------+----------+
//!        ^                               |  ^
//!        |          free list            |  |
//!        +-------------------------------+  +---- links live in the free
//!                                                  block's own tags
//! ```
//!
//! - The footer lets a block find its left neighbour, the size lets it find its right
//!   one, so freeing merges with free neighbours in constant time.
//! - Free blocks link to each other through their tags, so a free block can be taken out
//!   of the list in constant time without searching for it.
//! - Allocation is first-fit over that list, splitting blocks when the rest is large
//!   enough to stand on its own.
//!
//! ## Quick start
//!
//! ```rust
//! use tagalloc::{Arena, Heap};
//!
//! let mut heap = Heap::new(Arena::with_capacity(1 << 20)?)?;
//!
//! let ptr = heap.allocate(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0xAB, 64);
//!     let ptr = heap.resize(ptr, 256);
//!     assert_eq!(0xAB, *ptr.add(63));
//!     heap.release(ptr);
//! }
//!
//! assert!(heap.check().is_ok());
//! # Ok::<(), tagalloc::HeapError>(())
//! ```
//!
//! ## Crate structure
//!
//! ```text
//!   tagalloc
//!   ├── block     - boundary tags and raw region access
//!   ├── freelist  - circular free list threaded through the tags
//!   ├── coalesce  - merging with free neighbours
//!   ├── region    - RegionSource and growing the region
//!   ├── heap      - Heap: allocate, release, resize, zeroed_allocate
//!   ├── check     - heap walk, statistics, consistency check
//!   ├── arena     - Arena: region source over reserved pages
//!   ├── kernel    - platform memory calls, ProgramBreak (sbrk)
//!   └── global    - GlobalHeap: GlobalAlloc adapter
//! ```
//!
//! ## Limitations
//!
//! - A [`Heap`] is single threaded. [`GlobalHeap`] puts one behind a mutex.
//! - Memory is never given back to the region source while the heap lives.
//! - Every payload is aligned to [`ALIGNMENT`], larger alignments are not supported.
//! - Releasing a pointer that wasn't allocated by the heap, or releasing it twice, is
//!   undefined behaviour. Debug builds catch the obvious cases.

mod arena;
mod block;
mod check;
mod coalesce;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod region;
mod utils;

pub use arena::{Arena, DEFAULT_ARENA_CAPACITY};
pub use block::{ALIGNMENT, MIN_BLOCK_SIZE};
pub use check::{BlockInfo, HeapStats};
pub use error::{CheckError, GrowError, HeapError};
pub use global::GlobalHeap;
pub use heap::{CHUNK_SIZE, Heap};
#[cfg(unix)]
pub use kernel::ProgramBreak;
pub use region::RegionSource;
