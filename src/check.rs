//! Heap inspection: walking blocks, statistics and a consistency check.

use std::ptr::NonNull;

use log::debug;

use crate::{
    block::{ALIGNMENT, Block, MIN_BLOCK_SIZE, PROLOGUE, SENTINEL_SIZE, TAG_SIZE},
    error::CheckError,
    heap::Heap,
    region::RegionSource,
    utils::is_aligned,
};

/// A block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block's header from the start of the region.
    pub offset: usize,
    /// Total size, tags included.
    pub size: usize,
    pub allocated: bool,
    /// What [`Heap::allocate`] returned (or would return) for this block.
    pub payload: NonNull<u8>,
}

/// Counters gathered by a full heap walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes under management, sentinels included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    /// Allocated bytes, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Free bytes, tags included.
    pub free_bytes: usize,
    pub largest_free: usize,
}

impl<S: RegionSource> Heap<S> {
    fn info(&self, block: Block) -> BlockInfo {
        let header = self.memory.header(block);

        BlockInfo {
            offset: block.offset(),
            size: header.size,
            allocated: header.allocated,
            payload: self.memory.payload(block),
        }
    }

    fn epilogue(&self) -> Block {
        Block(self.memory.len() - SENTINEL_SIZE)
    }

    /// Every block between the sentinels, in address order.
    ///
    /// This trusts the tags; run [`Heap::check`] first if they may be damaged.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let end = self.epilogue();

        std::iter::successors(Some(Block(SENTINEL_SIZE)), move |block| {
            Some(self.memory.next_block(*block))
        })
        .take_while(move |block| *block < end)
        .map(move |block| self.info(block))
    }

    /// Free blocks in list order, head first.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.free_list
            .iter(&self.memory)
            .map(move |block| self.info(block))
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                heap_size: self.memory.len(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                if block.allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                stats
            },
        )
    }

    /// Logs every block at debug level.
    pub fn dump(&self) {
        debug!(
            "heap at {:p}, {} bytes, free list head {:#x}",
            self.memory.base(),
            self.memory.len(),
            self.free_list.head(&self.memory).offset()
        );

        if self.free_list.is_empty(&self.memory) {
            debug!("  free list is empty");
        }

        for block in self.blocks() {
            debug!(
                "  {:#08x} {:>8} {}",
                block.offset,
                block.size,
                if block.allocated { "allocated" } else { "free" }
            );
        }
    }

    fn check_sentinel(&self, block: Block) -> Result<(), CheckError> {
        let header = self.memory.header(block);
        let footer = self.memory.read_tag(block.offset() + SENTINEL_SIZE - TAG_SIZE);

        if header.size != SENTINEL_SIZE
            || !header.allocated
            || footer.size != SENTINEL_SIZE
            || !footer.allocated
        {
            return Err(CheckError::Sentinel {
                offset: block.offset(),
            });
        }

        Ok(())
    }

    /// Walks the whole heap and verifies its invariants:
    ///
    /// - the prologue and epilogue are intact,
    /// - every block is aligned, large enough, and its header matches its footer,
    /// - no two free blocks are adjacent,
    /// - the free list holds exactly the free blocks and is linked both ways.
    ///
    /// This is meant for tests and debugging. It allocates, so don't call it from a
    /// [`crate::GlobalHeap`].
    pub fn check(&self) -> Result<(), CheckError> {
        self.check_sentinel(PROLOGUE)?;
        self.check_sentinel(self.epilogue())?;

        let end = self.epilogue().offset();
        let mut blocks = Vec::new();
        let mut offset = SENTINEL_SIZE;
        let mut prev_free = false;

        while offset < end {
            let block = Block(offset);
            let header = self.memory.header(block);

            if header.size < MIN_BLOCK_SIZE || !is_aligned(header.size, ALIGNMENT) {
                return Err(CheckError::BadSize {
                    offset,
                    size: header.size,
                });
            }

            if offset + header.size > end {
                return Err(CheckError::Overrun { offset });
            }

            let footer = self.memory.footer(block);
            if header.size != footer.size || header.allocated != footer.allocated {
                return Err(CheckError::TagMismatch { offset });
            }

            if prev_free && !header.allocated {
                let previous = self.memory.prev_block(block);
                return Err(CheckError::AdjacentFree {
                    offset: previous.offset(),
                });
            }

            blocks.push((offset, header.allocated));
            prev_free = !header.allocated;
            offset += header.size;
        }

        if offset != end {
            return Err(CheckError::Overrun { offset });
        }

        let free = blocks.iter().filter(|(_, allocated)| !allocated).count();
        let anchor = self.free_list.anchor();

        // Forward, verifying that every back link mirrors its forward link.
        let mut listed = 0;
        let mut current = anchor;
        loop {
            let next = self.memory.next_free(current);

            if next != anchor {
                match blocks.binary_search_by_key(&next.offset(), |(offset, _)| *offset) {
                    Ok(index) if blocks[index].1 => {
                        return Err(CheckError::AllocatedInList {
                            offset: next.offset(),
                        });
                    }
                    Ok(_) => {}
                    Err(_) => {
                        return Err(CheckError::BrokenLink {
                            offset: current.offset(),
                        });
                    }
                }
            }

            if self.memory.prev_free(next) != current {
                return Err(CheckError::BrokenLink {
                    offset: next.offset(),
                });
            }

            if next == anchor {
                break;
            }

            listed += 1;
            if listed > free {
                return Err(CheckError::CountMismatch { listed, free });
            }
            current = next;
        }

        if listed != free {
            return Err(CheckError::CountMismatch { listed, free });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arena, block::Tag, heap::CHUNK_SIZE};
    use test_log::test;

    fn heap() -> Heap<Arena> {
        Heap::new(Arena::with_capacity(1 << 20).unwrap()).unwrap()
    }

    #[test]
    fn fresh_heap_is_consistent() {
        let heap = heap();

        assert_eq!(Ok(()), heap.check());
        assert_eq!(
            HeapStats {
                heap_size: 2 * SENTINEL_SIZE + CHUNK_SIZE,
                allocated_blocks: 0,
                allocated_bytes: 0,
                free_blocks: 1,
                free_bytes: CHUNK_SIZE,
                largest_free: CHUNK_SIZE,
            },
            heap.stats()
        );
    }

    #[test]
    fn blocks_cover_region() {
        let mut heap = heap();
        let ptrs: Vec<_> = (1..=5).map(|n| heap.allocate(n * 10)).collect();
        unsafe { heap.release(ptrs[2]) };

        let blocks: Vec<_> = heap.blocks().collect();
        let total: usize = blocks.iter().map(|block| block.size).sum();

        assert_eq!(heap.len() - 2 * SENTINEL_SIZE, total);
        assert_eq!(ptrs[0], blocks[0].payload.as_ptr());
        assert!(!blocks[2].allocated);
        assert_eq!(Ok(()), heap.check());
        heap.dump();
    }

    #[test]
    fn free_blocks_are_listed_most_recent_first() {
        let mut heap = heap();
        let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(32)).collect();

        unsafe {
            heap.release(ptrs[1]);
            heap.release(ptrs[3]);
        }

        let listed: Vec<_> = heap.free_blocks().map(|block| block.payload.as_ptr()).collect();
        assert_eq!(ptrs[3], listed[0]);
        assert_eq!(ptrs[1], listed[1]);
        assert_eq!(3, listed.len());
    }

    #[test]
    fn detects_tag_mismatch() {
        let mut heap = heap();
        let ptr = heap.allocate(64);
        let block = heap.memory.block_of(ptr);

        let at = block.offset() + heap.memory.size(block) - TAG_SIZE;
        let footer = heap.memory.read_tag(at);
        heap.memory.write_tag(at, Tag::new(footer.size, false, footer.link));

        assert_eq!(
            Err(CheckError::TagMismatch {
                offset: block.offset()
            }),
            heap.check()
        );
    }

    #[test]
    fn detects_adjacent_free_blocks() {
        let mut heap = heap();
        let first = heap.allocate(64);
        let second = heap.allocate(64);
        let _guard = heap.allocate(64);

        // Mark both free behind the coalescer's back.
        let a = heap.memory.block_of(first);
        let b = heap.memory.block_of(second);
        let (size_a, size_b) = (heap.memory.size(a), heap.memory.size(b));
        heap.free_list.insert_at_head(&mut heap.memory, a, size_a, false);
        heap.free_list.insert_at_head(&mut heap.memory, b, size_b, false);

        assert_eq!(
            Err(CheckError::AdjacentFree { offset: a.offset() }),
            heap.check()
        );
    }

    #[test]
    fn detects_free_block_missing_from_list() {
        let mut heap = heap();
        let ptr = heap.allocate(64);
        let _guard = heap.allocate(64);

        let block = heap.memory.block_of(ptr);
        let size = heap.memory.size(block);
        heap.memory.format(block, size, false, PROLOGUE, PROLOGUE);

        assert_eq!(
            Err(CheckError::CountMismatch { listed: 1, free: 2 }),
            heap.check()
        );
    }

    #[test]
    fn detects_allocated_block_in_list() {
        let mut heap = heap();
        let ptr = heap.allocate(64);
        let block = heap.memory.block_of(ptr);

        heap.memory.set_next_free(PROLOGUE, block);

        assert_eq!(
            Err(CheckError::AllocatedInList {
                offset: block.offset()
            }),
            heap.check()
        );
    }

    #[test]
    fn detects_damaged_epilogue() {
        let mut heap = heap();
        let epilogue = heap.epilogue();

        heap.memory
            .write_tag(epilogue.offset(), Tag::new(SENTINEL_SIZE, false, PROLOGUE));

        assert_eq!(
            Err(CheckError::Sentinel {
                offset: epilogue.offset()
            }),
            heap.check()
        );
    }
}
