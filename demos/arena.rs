//! Fills a small arena until it runs out, then gives everything back.

use tagalloc::{Arena, Heap, HeapError};

fn main() -> Result<(), HeapError> {
    let mut heap = Heap::new(Arena::with_capacity(64 << 10)?)?;
    println!("Arena of {} bytes", heap.source().capacity());

    let mut blocks = Vec::new();
    loop {
        let ptr = heap.allocate(1000);
        if ptr.is_null() {
            break;
        }
        blocks.push(ptr);
    }

    println!(
        "Out of memory after {} allocations, heap is {} bytes",
        blocks.len(),
        heap.len()
    );

    // Release every other block first: they can't merge yet.
    for ptr in blocks.iter().step_by(2) {
        unsafe { heap.release(*ptr) };
    }
    println!("Free blocks with holes: {}", heap.stats().free_blocks);

    for ptr in blocks.iter().skip(1).step_by(2) {
        unsafe { heap.release(*ptr) };
    }
    println!("Free blocks after merging: {}", heap.stats().free_blocks);

    match heap.check() {
        Ok(()) => println!("Heap is consistent"),
        Err(err) => println!("Heap is broken: {err}"),
    }

    Ok(())
}
