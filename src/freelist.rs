use crate::block::{Block, Memory, PROLOGUE};

/// Circular doubly linked list of free blocks.
///
/// The list doesn't own any storage. Its links live inside the free blocks themselves:
/// the header of a free block points to the next free block and its footer points to the
/// previous one. Since a free block's payload is of no use to anyone, this costs nothing.
///
/// The prologue block is the anchor. Its header points to the first free block (the
/// head) and its footer to the last one, so an empty list is just the prologue pointing
/// at itself:
///
/// ```text
///         +-------------------------------------------------------+
///         |                                                       |
///         v        next             next             next         |
/// +--------------+ ---> +--------------+ ---> +--------------+ ---+
/// |   Prologue   |      |  Free block  |      |  Free block  |
/// +--------------+ <--- +--------------+ <--- +--------------+ <--+
///         |        prev             prev             prev         |
///         |                                                       |
///         +-------------------------------------------------------+
/// ```
///
/// Free blocks are always inserted right after the prologue, and removal only needs the
/// block itself, since both of its list neighbours are written in its own tags.
pub(crate) struct FreeList {
    anchor: Block,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { anchor: PROLOGUE }
    }

    #[inline]
    pub fn anchor(&self) -> Block {
        self.anchor
    }

    /// First block in list order, or the anchor if the list is empty.
    #[inline]
    pub fn head(&self, memory: &Memory) -> Block {
        memory.next_free(self.anchor)
    }

    pub fn is_empty(&self, memory: &Memory) -> bool {
        self.head(memory) == self.anchor
    }

    /// Makes the anchor point at itself in both directions.
    pub fn reset(&self, memory: &mut Memory) {
        memory.set_next_free(self.anchor, self.anchor);
        memory.set_prev_free(self.anchor, self.anchor);
    }

    /// Formats `block` with `size` and `allocated` and splices it in between the anchor
    /// and the current head.
    pub fn insert_at_head(&self, memory: &mut Memory, block: Block, size: usize, allocated: bool) {
        let old_head = self.head(memory);

        memory.format(block, size, allocated, old_head, self.anchor);
        memory.set_prev_free(old_head, block);
        memory.set_next_free(self.anchor, block);
    }

    /// Unlinks `block` from the list.
    ///
    /// Its list neighbours are read from its own tags, so this takes the same time whatever
    /// the length of the list or the position of the block in it.
    pub fn remove(&self, memory: &mut Memory, block: Block) {
        debug_assert_ne!(block, self.anchor, "the anchor can't be removed");

        let next = memory.next_free(block);
        let prev = memory.prev_free(block);

        memory.set_next_free(prev, next);
        memory.set_prev_free(next, prev);
    }

    /// Returns the first free block that can hold `size` bytes, tags included.
    ///
    /// This is first-fit: the scan starts at the head, so among the blocks that are large
    /// enough the most recently inserted one wins.
    pub fn first_fit(&self, memory: &Memory, size: usize) -> Option<Block> {
        self.iter(memory).find(|block| memory.size(*block) >= size)
    }

    pub fn iter<'a>(&self, memory: &'a Memory) -> Iter<'a> {
        Iter {
            memory,
            anchor: self.anchor,
            current: memory.next_free(self.anchor),
            forward: true,
        }
    }

    /// Walks the list from the tail back to the head.
    #[cfg(test)]
    pub fn iter_rev<'a>(&self, memory: &'a Memory) -> Iter<'a> {
        Iter {
            memory,
            anchor: self.anchor,
            current: memory.prev_free(self.anchor),
            forward: false,
        }
    }
}

pub(crate) struct Iter<'a> {
    memory: &'a Memory,
    anchor: Block,
    current: Block,
    forward: bool,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.anchor {
            return None;
        }

        let block = self.current;
        self.current = if self.forward {
            self.memory.next_free(block)
        } else {
            self.memory.prev_free(block)
        };

        Some(block)
    }
}
