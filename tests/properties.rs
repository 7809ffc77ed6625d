use std::ptr;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tagalloc::{ALIGNMENT, Arena, CHUNK_SIZE, Heap, HeapStats};
use test_log::test;

fn heap() -> Heap<Arena> {
    Heap::new(Arena::with_capacity(16 << 20).unwrap()).unwrap()
}

fn assert_no_adjacent_free(heap: &Heap<Arena>) {
    let blocks: Vec<_> = heap.blocks().collect();

    for pair in blocks.windows(2) {
        assert!(
            pair[0].allocated || pair[1].allocated,
            "free blocks at {:#x} and {:#x} are adjacent",
            pair[0].offset,
            pair[1].offset
        );
    }
}

#[test]
fn random_sequences_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut heap = heap();
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

    for step in 0..4000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let size = rng.gen_range(1..=1500);
            let ptr = heap.allocate(size);
            assert!(!ptr.is_null());
            assert_eq!(0, ptr as usize % ALIGNMENT);

            let fill = (step % 251) as u8;
            unsafe { ptr.write_bytes(fill, size) };
            live.push((ptr, size, fill));
        } else {
            let (ptr, size, fill) = live.swap_remove(rng.gen_range(0..live.len()));
            unsafe {
                // Nobody else wrote into this block while it was live.
                for i in 0..size {
                    assert_eq!(fill, *ptr.add(i));
                }
                heap.release(ptr);
            }
        }

        if step % 100 == 0 {
            assert_eq!(Ok(()), heap.check());
            assert_no_adjacent_free(&heap);
        }
    }

    for (ptr, _, _) in live.drain(..) {
        unsafe { heap.release(ptr) };
    }

    assert_eq!(Ok(()), heap.check());
    let stats = heap.stats();
    assert_eq!(1, stats.free_blocks);
    assert_eq!(0, stats.allocated_blocks);
}

#[test]
fn free_list_links_every_free_block() {
    let mut heap = heap();
    let ptrs: Vec<_> = (0..20).map(|n| heap.allocate(16 + n * 8)).collect();

    for ptr in ptrs.iter().step_by(2) {
        unsafe { heap.release(*ptr) };
    }

    let mut listed: Vec<_> = heap.free_blocks().map(|block| block.offset).collect();
    let walked: Vec<_> = heap
        .blocks()
        .filter(|block| !block.allocated)
        .map(|block| block.offset)
        .collect();

    // Ten released blocks plus what is left of the last growth.
    assert_eq!(11, walked.len());
    listed.sort_unstable();
    assert_eq!(walked, listed);

    // Also follows the back links all the way round.
    assert_eq!(Ok(()), heap.check());
}

#[test]
fn resize_preserves_prefix() {
    let mut heap = heap();

    unsafe {
        let ptr = heap.allocate(100);
        for i in 0..100 {
            *ptr.add(i) = (i * 3) as u8;
        }

        let grown = heap.resize(ptr, 5000);
        assert!(!grown.is_null());
        for i in 0..100 {
            assert_eq!((i * 3) as u8, *grown.add(i));
        }

        heap.release(grown);
    }

    assert_eq!(Ok(()), heap.check());
}

#[test]
fn zeroed_allocation_reads_zero() {
    let mut heap = heap();

    // Dirty a good part of the heap first.
    let dirty: Vec<_> = (0..10)
        .map(|_| {
            let ptr = heap.allocate(400);
            unsafe { ptr.write_bytes(0xEE, 400) };
            ptr
        })
        .collect();
    for ptr in dirty {
        unsafe { heap.release(ptr) };
    }

    let count = 125;
    let size = 24;
    let ptr = heap.zeroed_allocate(count, size);
    assert!(!ptr.is_null());

    let bytes = unsafe { std::slice::from_raw_parts(ptr, count * size) };
    assert!(bytes.iter().all(|byte| *byte == 0));
}

#[test]
fn every_pointer_is_aligned() {
    let mut heap = heap();

    for size in 1..300 {
        let ptr = heap.allocate(size);
        assert_eq!(0, ptr as usize % ALIGNMENT, "allocate({size})");

        let ptr = unsafe { heap.resize(ptr, size * 2) };
        assert_eq!(0, ptr as usize % ALIGNMENT, "resize(_, {})", size * 2);

        let ptr = heap.zeroed_allocate(size, 3);
        assert_eq!(0, ptr as usize % ALIGNMENT, "zeroed_allocate({size}, 3)");
    }
}

#[test]
fn three_neighbours_coalesce_into_one() {
    let mut heap = heap();

    // Three blocks that use up the first chunk exactly: nothing is left to merge with.
    // Each block carries a header and a footer of one alignment unit each.
    let overhead = 2 * ALIGNMENT;
    let a = heap.allocate(CHUNK_SIZE / 4 - overhead);
    let b = heap.allocate(CHUNK_SIZE / 4 - overhead);
    let c = heap.allocate(CHUNK_SIZE / 2 - overhead);

    assert_eq!(0, heap.stats().free_blocks);
    let sizes: usize = heap.blocks().map(|block| block.size).sum();
    assert_eq!(CHUNK_SIZE, sizes);

    unsafe {
        heap.release(a);
        heap.release(c);
    }
    assert_eq!(2, heap.free_blocks().count());

    unsafe { heap.release(b) };

    let free: Vec<_> = heap.free_blocks().collect();
    assert_eq!(1, free.len());
    assert_eq!(a, free[0].payload.as_ptr());
    assert_eq!(CHUNK_SIZE, free[0].size);
    assert_eq!(Ok(()), heap.check());
}

#[test]
fn null_and_zero_edge_cases() {
    let mut heap = heap();
    let before = heap.stats();

    assert!(heap.allocate(0).is_null());

    unsafe { heap.release(ptr::null_mut()) };
    assert_eq!(before, heap.stats());

    let ptr = unsafe { heap.resize(ptr::null_mut(), 64) };
    assert!(!ptr.is_null());
    assert_eq!(1, heap.stats().allocated_blocks);

    assert!(unsafe { heap.resize(ptr, 0) }.is_null());
    assert_eq!(before, heap.stats());
}

#[test]
fn out_of_memory_is_recoverable() {
    let mut heap = Heap::new(Arena::with_capacity(64 << 10).unwrap()).unwrap();
    let capacity = heap.source().capacity();

    let mut ptrs = Vec::new();
    loop {
        let ptr = heap.allocate(1000);
        if ptr.is_null() {
            break;
        }
        ptrs.push(ptr);
    }

    assert!(heap.len() <= capacity);
    assert!(!ptrs.is_empty());
    assert_eq!(Ok(()), heap.check());
    assert!(heap.allocate(capacity).is_null());

    for ptr in ptrs.drain(..) {
        unsafe { heap.release(ptr) };
    }

    assert_eq!(1, heap.stats().free_blocks);
    assert!(!heap.allocate(1000).is_null());
    assert_eq!(Ok(()), heap.check());
}

#[test]
fn heaps_are_independent() {
    let mut first = heap();
    let mut second = heap();

    let a = first.allocate(128);
    let b = second.allocate(128);

    assert!(first.contains(a));
    assert!(!first.contains(b));
    assert!(second.contains(b));

    unsafe { first.release(a) };

    assert_eq!(0, first.stats().allocated_blocks);
    assert_eq!(1, second.stats().allocated_blocks);
}

#[test]
fn stats_account_for_every_byte() {
    let mut heap = heap();
    let _ptrs: Vec<_> = (0..50).map(|n| heap.allocate(n * 37 + 1)).collect();

    let HeapStats {
        heap_size,
        allocated_bytes,
        free_bytes,
        ..
    } = heap.stats();

    // Prologue and epilogue, a header and a footer each.
    let sentinels = 2 * 2 * ALIGNMENT;
    assert_eq!(heap_size, allocated_bytes + free_bytes + sentinels);
}
