use tagalloc::{Arena, Heap, HeapError};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() -> Result<(), HeapError> {
    let mut heap = Heap::new(Arena::new()?)?;

    let addr1 = heap.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = heap.allocate(8);
    log_alloc(addr2, 8);

    let addr3 = heap.zeroed_allocate(4, 4);
    log_alloc(addr3, 16);

    unsafe {
        heap.release(addr1);
        heap.release(addr2);

        let addr4 = heap.resize(addr3, 128);
        log_alloc(addr4, 128);
        heap.release(addr4);
    }

    let stats = heap.stats();
    println!(
        "{} bytes managed, {} free in {} block(s)",
        stats.heap_size, stats.free_bytes, stats.free_blocks
    );

    Ok(())
}
