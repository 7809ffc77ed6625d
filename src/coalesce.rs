use crate::{
    block::{Block, Memory},
    freelist::FreeList,
};

/// Frees `block` and merges it with whichever of its physical neighbours are free.
///
/// The neighbours are found from `block`'s own size (the next one) and from the footer
/// right before it (the previous one), never by walking the list. The prologue and the
/// epilogue are always allocated, so both lookups stay inside the region.
///
/// ```text
///  case 1: [alloc][block][alloc]  ->  [alloc][ free ][alloc]
///  case 2: [alloc][block][ free]  ->  [alloc][    free     ]
///  case 3: [ free][block][alloc]  ->  [    free     ][alloc]
///  case 4: [ free][block][ free]  ->  [        free        ]
/// ```
///
/// Whatever the case, the result is inserted at the head of the free list and returned.
/// `block` itself must not be in the list when this is called.
pub(crate) fn coalesce(memory: &mut Memory, free_list: &FreeList, block: Block) -> Block {
    let prev_allocated = memory.prev_footer(block).allocated;
    let next = memory.next_block(block);
    let next_allocated = memory.is_allocated(next);

    let mut size = memory.size(block);

    let merged = match (prev_allocated, next_allocated) {
        (true, true) => block,
        (true, false) => {
            size += memory.size(next);
            free_list.remove(memory, next);
            block
        }
        (false, true) => {
            let prev = memory.prev_block(block);
            size += memory.size(prev);
            free_list.remove(memory, prev);
            prev
        }
        (false, false) => {
            let prev = memory.prev_block(block);
            size += memory.size(prev) + memory.size(next);
            free_list.remove(memory, prev);
            free_list.remove(memory, next);
            prev
        }
    };

    free_list.insert_at_head(memory, merged, size, false);

    merged
}
